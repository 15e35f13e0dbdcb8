//! History bookkeeping shared by the quasi-Newton schemes.
//!
//! [`QuasiNewton`] owns the difference matrices
//!
//! - `V`: preconditioned residual differences `r_k - r_{k-1}`,
//! - `W`: iterate differences `x~_k - x~_{k-1}` (`x~` = incoming `values`),
//!
//! stored column-wise, oldest first, together with an incremental QR
//! factorization of `V`. `matrix_cols` counts the columns contributed by each
//! retained time window (oldest window first, current window last).
//!
//! Per coupling iteration:
//!
//! 1. stack the primary blocks and form `r = values - old_values`;
//! 2. at a window start, let the preconditioner rescale `V` (rebuilding `Q R`
//!    if its weights changed);
//! 3. first iteration of the first window (or of every window with forced
//!    initial relaxation): relax every block and return;
//! 4. otherwise append a `V`/`W` column (not in the first iteration of a
//!    window), evict the oldest column beyond `max_iterations_used`, filter;
//! 5. let the [`QuasiNewtonVariant`] compute the update from `Q R` and `W`;
//!    with no usable column fall back to relaxation;
//! 6. snapshot `values` into `old_values`.
//!
//! A change in any block's length (remeshing) discards all history before
//! step 1; the call then behaves like the first call of a fresh instance.

use crate::acceleration::filter::Filter;
use crate::acceleration::preconditioner::Preconditioner;
use crate::acceleration::qr::QrFactorization;
use crate::acceleration::{AccelerationConfig, check_data_ids, relax, stack};
use crate::coupling_error::CouplingError;
use crate::data::coupling_data::{DataId, DataMap, block, block_mut};
use crate::debug_invariants::DebugInvariants;
use nalgebra::DVector;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Residual differences below this norm do not produce a column.
const NUMERICAL_ZERO: f64 = 1e-14;

/// Scheme-specific part of a quasi-Newton acceleration.
pub trait QuasiNewtonVariant: fmt::Debug {
    /// Name used in log messages.
    fn name(&self) -> &'static str;

    /// Registers the secondary blocks and drops any state.
    fn initialize(&mut self, data: &DataMap, secondary: &[DataId]) -> Result<(), CouplingError>;

    /// Called once per iteration before any block is modified. `append` is
    /// true iff the base appended a `V`/`W` column in this iteration.
    fn begin_iteration(&mut self, data: &DataMap, append: bool) -> Result<(), CouplingError>;

    /// Update of the stacked primary values from the factorization of `V`,
    /// the columns of `W` and the preconditioned residual. `None` requests
    /// relaxation instead.
    fn compute_update(
        &mut self,
        qr: &QrFactorization,
        w: &[DVector<f64>],
        residual: &DVector<f64>,
    ) -> Option<DVector<f64>>;

    /// Moves the secondary blocks along the last computed update.
    fn relax_secondary(&self, data: &mut DataMap) -> Result<(), CouplingError>;

    /// Drops column `i` of the secondary history.
    fn remove_column(&mut self, i: usize);

    /// Drops all history (not the registered secondary IDs).
    fn clear(&mut self);
}

#[derive(Debug)]
pub struct QuasiNewton<V: QuasiNewtonVariant> {
    initial_relaxation: f64,
    force_initial_relaxation: bool,
    max_iterations_used: usize,
    timesteps_reused: usize,
    filter: Filter,
    data_ids: Vec<DataId>,
    secondary_ids: Vec<DataId>,
    preconditioner: Preconditioner,
    qr: QrFactorization,
    matrix_v: Vec<DVector<f64>>,
    matrix_w: Vec<DVector<f64>>,
    matrix_cols: VecDeque<usize>,
    old_residuals: Option<DVector<f64>>,
    old_xtilde: Option<DVector<f64>>,
    sizes: BTreeMap<DataId, usize>,
    first_iteration: bool,
    first_window: bool,
    pending_reset: bool,
    initialized: bool,
    variant: V,
}

impl<V: QuasiNewtonVariant> QuasiNewton<V> {
    /// Builds the history machine from an (already validated) configuration.
    pub fn with_variant(config: &AccelerationConfig, variant: V) -> Self {
        Self {
            initial_relaxation: config.initial_relaxation,
            force_initial_relaxation: config.force_initial_relaxation,
            max_iterations_used: config.max_iterations_used,
            timesteps_reused: config.timesteps_reused,
            filter: Filter::new(config.filter, config.singularity_limit),
            data_ids: config.data_ids.clone(),
            secondary_ids: Vec::new(),
            preconditioner: Preconditioner::new(&config.preconditioner),
            qr: QrFactorization::new(0),
            matrix_v: Vec::new(),
            matrix_w: Vec::new(),
            matrix_cols: VecDeque::from([0]),
            old_residuals: None,
            old_xtilde: None,
            sizes: BTreeMap::new(),
            first_iteration: true,
            first_window: true,
            pending_reset: false,
            initialized: false,
            variant,
        }
    }

    pub fn variant(&self) -> &V {
        &self.variant
    }

    /// Blocks relaxed with the primary coefficients.
    pub fn secondary_ids(&self) -> &[DataId] {
        &self.secondary_ids
    }

    /// Number of retained `V`/`W` columns.
    pub fn columns(&self) -> usize {
        self.matrix_v.len()
    }

    /// Columns per retained window, oldest first.
    pub fn window_columns(&self) -> Vec<usize> {
        self.matrix_cols.iter().copied().collect()
    }

    pub fn qr(&self) -> &QrFactorization {
        &self.qr
    }

    pub fn preconditioner(&self) -> &Preconditioner {
        &self.preconditioner
    }

    fn ensure_initialized(&self) -> Result<(), CouplingError> {
        if self.initialized {
            Ok(())
        } else {
            Err(CouplingError::InvalidConfiguration(format!(
                "{} acceleration used before initialize",
                self.variant.name()
            )))
        }
    }

    fn tracked_ids(&self) -> impl Iterator<Item = DataId> + '_ {
        self.data_ids.iter().chain(&self.secondary_ids).copied()
    }

    /// Records block sizes and sizes the preconditioner and QR accordingly.
    fn record_sizes(&mut self, data: &DataMap) -> Result<(), CouplingError> {
        let mut sizes = BTreeMap::new();
        for id in self.tracked_ids() {
            sizes.insert(id, block(data, id)?.len());
        }
        let primary: Vec<usize> = self.data_ids.iter().map(|id| sizes[id]).collect();
        self.qr.reset(primary.iter().sum());
        self.preconditioner.initialize(primary);
        self.sizes = sizes;
        Ok(())
    }

    fn sizes_changed(&self, data: &DataMap) -> bool {
        self.tracked_ids().any(|id| {
            data.get(&id)
                .is_some_and(|b| self.sizes.get(&id).is_some_and(|&n| n != b.len()))
        })
    }

    fn clear_history(&mut self) {
        self.matrix_v.clear();
        self.matrix_w.clear();
        self.qr.reset(self.qr.rows());
        self.variant.clear();
        self.matrix_cols.clear();
        self.matrix_cols.push_back(0);
    }

    /// Removes column `i` from everything but the QR factorization.
    fn drop_column(&mut self, i: usize) {
        self.matrix_v.remove(i);
        self.matrix_w.remove(i);
        self.variant.remove_column(i);
        let mut first = 0;
        let window = self.matrix_cols.iter().position(|&count| {
            first += count;
            i < first
        });
        if let Some(w) = window {
            self.matrix_cols[w] -= 1;
            if self.matrix_cols[w] == 0 && w + 1 < self.matrix_cols.len() {
                self.matrix_cols.remove(w);
            }
        }
    }

    fn remove_column(&mut self, i: usize) {
        self.qr.delete_column(i);
        self.drop_column(i);
    }

    fn remove_oldest_window(&mut self) {
        let Some(count) = self.matrix_cols.pop_front() else {
            return;
        };
        for _ in 0..count {
            self.qr.delete_column(0);
            self.matrix_v.remove(0);
            self.matrix_w.remove(0);
            self.variant.remove_column(0);
        }
    }

    /// Rescales `V` for new preconditioner weights at a window start.
    fn update_preconditioner(&mut self, xtilde: &DVector<f64>, residual: &DVector<f64>) {
        if self.preconditioner.is_frozen() {
            return;
        }
        for v in &mut self.matrix_v {
            self.preconditioner.revert(v);
        }
        self.preconditioner.update(xtilde, residual);
        for v in &mut self.matrix_v {
            self.preconditioner.apply(v);
        }
        if self.preconditioner.requires_new_qr() {
            let rejected = self.qr.rebuild(&self.matrix_v);
            for &i in rejected.iter().rev() {
                self.drop_column(i);
            }
            log::debug!(
                "{}: QR rebuilt after preconditioner update, {} columns dropped",
                self.variant.name(),
                rejected.len()
            );
            self.preconditioner.new_qr_fulfilled();
        }
    }

    /// Appends the newest `V`/`W` column. Returns whether a column was added.
    fn update_difference_matrices(&mut self, xtilde: &DVector<f64>, residual: &DVector<f64>) -> bool {
        if self.first_iteration || self.max_iterations_used == 0 {
            return false;
        }
        let (Some(old_r), Some(old_x)) = (&self.old_residuals, &self.old_xtilde) else {
            return false;
        };
        let delta_r = residual - old_r;
        if delta_r.norm() < NUMERICAL_ZERO {
            log::warn!(
                "{}: residual difference vanished, no column added",
                self.variant.name()
            );
            return false;
        }
        let delta_x = xtilde - old_x;

        if self.pending_reset {
            log::debug!("{}: dropping columns of the previous window", self.variant.name());
            self.clear_history();
            self.pending_reset = false;
        }

        let mut v = delta_r;
        self.preconditioner.apply(&mut v);
        if !self.qr.insert_column(v.clone()) {
            log::debug!("{}: linearly dependent column skipped", self.variant.name());
            return false;
        }
        self.matrix_v.push(v);
        self.matrix_w.push(delta_x);
        match self.matrix_cols.back_mut() {
            Some(count) => *count += 1,
            None => self.matrix_cols.push_back(1),
        }
        if self.matrix_v.len() > self.max_iterations_used {
            self.remove_column(0);
        }
        true
    }

    fn apply_filter(&mut self) {
        for i in self.qr.apply_filter(&self.filter) {
            self.drop_column(i);
        }
    }

    fn relax_all(&self, data: &mut DataMap) -> Result<(), CouplingError> {
        relax(data, &self.data_ids, self.initial_relaxation)?;
        relax(data, &self.secondary_ids, self.initial_relaxation)
    }
}

impl<V: QuasiNewtonVariant> super::Accelerate for QuasiNewton<V> {
    fn data_ids(&self) -> &[DataId] {
        &self.data_ids
    }

    fn initialize(&mut self, data: &DataMap) -> Result<(), CouplingError> {
        check_data_ids(data, &self.data_ids)?;
        self.secondary_ids = data
            .keys()
            .filter(|id| !self.data_ids.contains(*id))
            .copied()
            .collect();
        self.reset();
        self.record_sizes(data)?;
        self.variant.initialize(data, &self.secondary_ids)?;
        self.initialized = true;
        log::debug!(
            "{} initialized: primary {:?}, secondary {:?}, {} rows",
            self.variant.name(),
            self.data_ids,
            self.secondary_ids,
            self.qr.rows()
        );
        Ok(())
    }

    fn perform_acceleration(&mut self, data: &mut DataMap) -> Result<(), CouplingError> {
        self.ensure_initialized()?;
        check_data_ids(data, &self.data_ids)?;
        check_data_ids(data, &self.secondary_ids)?;
        if self.sizes_changed(data) {
            log::info!(
                "{}: coupling data size changed, discarding all history",
                self.variant.name()
            );
            self.reset();
            self.record_sizes(data)?;
        }
        for &id in &self.secondary_ids {
            block(data, id)?.check_sizes(id)?;
        }

        let (xtilde, old) = stack(data, &self.data_ids)?;
        let residual = &xtilde - &old;

        self.preconditioner.accumulate(&residual);
        if self.first_iteration {
            self.update_preconditioner(&xtilde, &residual);
        }

        let relax_only = self.first_iteration && (self.first_window || self.force_initial_relaxation);
        let appended = !relax_only && self.update_difference_matrices(&xtilde, &residual);
        self.variant.begin_iteration(data, appended)?;
        if appended {
            self.apply_filter();
        }

        let update = if relax_only {
            None
        } else {
            let mut scaled = residual.clone();
            self.preconditioner.apply(&mut scaled);
            self.variant.compute_update(&self.qr, &self.matrix_w, &scaled)
        };
        match update {
            Some(x_update) => {
                let values = &xtilde + x_update;
                let mut offset = 0;
                for &id in &self.data_ids {
                    let block = block_mut(data, id)?;
                    let n = block.len();
                    block.values.copy_from(&values.rows(offset, n));
                    offset += n;
                }
                self.variant.relax_secondary(data)?;
            }
            None => {
                if !relax_only {
                    log::debug!("{}: no usable columns, relaxing", self.variant.name());
                }
                self.relax_all(data)?;
            }
        }
        log::debug!(
            "{}: {} columns over windows {:?}",
            self.variant.name(),
            self.matrix_v.len(),
            self.matrix_cols
        );

        for id in self.tracked_ids() {
            block_mut(data, id)?.store_iteration();
        }
        self.old_residuals = Some(residual);
        self.old_xtilde = Some(xtilde);
        self.first_iteration = false;
        self.debug_assert_invariants();
        Ok(())
    }

    fn iterations_converged(&mut self, _data: &DataMap) -> Result<(), CouplingError> {
        self.ensure_initialized()?;
        if self.matrix_cols.back() == Some(&0) {
            self.matrix_cols.pop_back();
        }
        if self.timesteps_reused == 0 {
            if self.force_initial_relaxation {
                self.clear_history();
            } else {
                self.pending_reset = true;
            }
        } else {
            while self.matrix_cols.len() > self.timesteps_reused {
                self.remove_oldest_window();
            }
        }
        self.matrix_cols.push_back(0);
        self.first_iteration = true;
        self.first_window = false;
        log::info!(
            "{}: time window converged, keeping {} columns from windows {:?}",
            self.variant.name(),
            self.matrix_v.len(),
            self.matrix_cols
        );
        Ok(())
    }

    fn reset(&mut self) {
        self.clear_history();
        self.old_residuals = None;
        self.old_xtilde = None;
        self.first_iteration = true;
        self.first_window = true;
        self.pending_reset = false;
        let primary: Vec<usize> = self
            .data_ids
            .iter()
            .map(|id| self.sizes.get(id).copied().unwrap_or(0))
            .collect();
        self.preconditioner.initialize(primary);
    }
}

impl<V: QuasiNewtonVariant> DebugInvariants for QuasiNewton<V> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "QuasiNewton");
    }

    fn validate_invariants(&self) -> Result<(), CouplingError> {
        let cols = self.matrix_v.len();
        let windows: usize = self.matrix_cols.iter().sum();
        if self.matrix_w.len() != cols || self.qr.cols() != cols || windows != cols {
            return Err(CouplingError::InvalidConfiguration(format!(
                "history out of sync: V {cols}, W {}, QR {}, windows {windows}",
                self.matrix_w.len(),
                self.qr.cols()
            )));
        }
        self.qr.validate_invariants()
    }
}
