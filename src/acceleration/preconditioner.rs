//! Row scaling of the stacked primary data.
//!
//! The stacked vector is split into one segment per configured data ID and
//! every segment gets one strictly positive weight. [`Preconditioner::apply`]
//! multiplies by the weights, [`Preconditioner::revert`] divides them out.
//! Adaptive strategies recompute the weights at window boundaries only, so
//! the weights are constant during an iteration sequence.

use crate::coupling_error::CouplingError;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Ranges and norms below this fall back to a weight of 1.
const TINY: f64 = 1e-14;

/// Scaling strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreconditionerKind {
    /// Fixed user factors (all 1 if none are given).
    #[default]
    Constant,
    /// Inverse value range of each block.
    Value,
    /// Inverse residual norm of each block.
    Residual,
    /// Inverse share of each block in the residual norms summed over a window.
    ResidualSum,
}

/// Preconditioner configuration record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreconditionerConfig {
    pub kind: PreconditionerKind,
    /// One factor per data ID for [`PreconditionerKind::Constant`].
    pub factors: Vec<f64>,
    /// Freeze adaptive weights after this many windows.
    pub max_non_const_windows: Option<usize>,
}

impl PreconditionerConfig {
    pub fn validate(&self, data_ids: usize) -> Result<(), CouplingError> {
        if !self.factors.is_empty() {
            if self.kind != PreconditionerKind::Constant {
                return Err(CouplingError::InvalidConfiguration(
                    "preconditioner factors are only used by the constant preconditioner".into(),
                ));
            }
            if self.factors.len() != data_ids {
                return Err(CouplingError::InvalidConfiguration(format!(
                    "constant preconditioner needs one factor per data ID ({data_ids}), got {}",
                    self.factors.len()
                )));
            }
            if let Some(f) = self.factors.iter().find(|f| !(**f > 0.0)) {
                return Err(CouplingError::InvalidConfiguration(format!(
                    "preconditioner factors must be positive, got {f}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Preconditioner {
    kind: PreconditionerKind,
    factors: Vec<f64>,
    max_non_const_windows: Option<usize>,
    sizes: Vec<usize>,
    weights: DVector<f64>,
    residual_sums: Vec<f64>,
    windows: usize,
    frozen: bool,
    requires_new_qr: bool,
}

impl Preconditioner {
    pub fn new(config: &PreconditionerConfig) -> Self {
        Self {
            kind: config.kind,
            factors: config.factors.clone(),
            max_non_const_windows: config.max_non_const_windows,
            sizes: Vec::new(),
            weights: DVector::zeros(0),
            residual_sums: Vec::new(),
            windows: 0,
            frozen: false,
            requires_new_qr: false,
        }
    }

    /// Sets the segment lengths and resets all adaptive state.
    pub fn initialize(&mut self, sizes: Vec<usize>) {
        let total = sizes.iter().sum();
        let mut weights = DVector::from_element(total, 1.0);
        if self.kind == PreconditionerKind::Constant && !self.factors.is_empty() {
            let mut offset = 0;
            for (len, factor) in sizes.iter().zip(&self.factors) {
                weights.rows_mut(offset, *len).fill(1.0 / factor);
                offset += len;
            }
        }
        self.residual_sums = vec![0.0; sizes.len()];
        self.sizes = sizes;
        self.weights = weights;
        self.windows = 0;
        self.frozen = self.kind == PreconditionerKind::Constant;
        self.requires_new_qr = false;
    }

    /// Row weights of the stacked vector.
    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    /// Whether [`Preconditioner::update`] may still change the weights.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Whether the weights changed since the QR factorization was last rebuilt.
    pub fn requires_new_qr(&self) -> bool {
        self.requires_new_qr
    }

    pub fn new_qr_fulfilled(&mut self) {
        self.requires_new_qr = false;
    }

    /// Scales `v` in place.
    ///
    /// # Panics
    /// Panics if `v` does not have one entry per weight.
    pub fn apply(&self, v: &mut DVector<f64>) {
        assert_eq!(v.len(), self.weights.len(), "preconditioner applied to a vector of wrong size");
        v.component_mul_assign(&self.weights);
    }

    /// Undoes [`Preconditioner::apply`].
    ///
    /// # Panics
    /// Panics if `v` does not have one entry per weight.
    pub fn revert(&self, v: &mut DVector<f64>) {
        assert_eq!(v.len(), self.weights.len(), "preconditioner reverted on a vector of wrong size");
        v.component_div_assign(&self.weights);
    }

    /// Records the residual of one coupling iteration (used by `ResidualSum`).
    pub fn accumulate(&mut self, residual: &DVector<f64>) {
        if self.kind != PreconditionerKind::ResidualSum || self.frozen {
            return;
        }
        let norms: Vec<f64> = self
            .segments()
            .map(|(offset, len)| residual.rows(offset, len).norm())
            .collect();
        for (sum, norm) in self.residual_sums.iter_mut().zip(norms) {
            *sum += norm;
        }
    }

    /// Recomputes the weights at a window boundary.
    pub fn update(&mut self, values: &DVector<f64>, residual: &DVector<f64>) {
        if self.frozen {
            return;
        }
        let segment_weights: Vec<f64> = match self.kind {
            PreconditionerKind::Constant => return,
            PreconditionerKind::Value => self
                .segments()
                .map(|(offset, len)| {
                    let block = values.rows(offset, len);
                    invert_or_one(block.max() - block.min())
                })
                .collect(),
            PreconditionerKind::Residual => self
                .segments()
                .map(|(offset, len)| invert_or_one(residual.rows(offset, len).norm()))
                .collect(),
            PreconditionerKind::ResidualSum => {
                let total: f64 = self.residual_sums.iter().sum();
                let w = self
                    .residual_sums
                    .iter()
                    .map(|s| if total > TINY { invert_or_one(s / total) } else { 1.0 })
                    .collect();
                self.residual_sums.iter_mut().for_each(|s| *s = 0.0);
                w
            }
        };

        let mut weights = DVector::zeros(self.weights.len());
        for ((offset, len), w) in self.segments().zip(&segment_weights) {
            weights.rows_mut(offset, len).fill(*w);
        }
        if weights != self.weights {
            log::debug!("preconditioner weights updated: {segment_weights:?}");
            self.weights = weights;
            self.requires_new_qr = true;
        }

        self.windows += 1;
        if self.max_non_const_windows.is_some_and(|max| self.windows >= max) {
            log::info!("preconditioner frozen after {} windows", self.windows);
            self.frozen = true;
        }
    }

    fn segments(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.sizes.iter().scan(0, |offset, &len| {
            let segment = (*offset, len);
            *offset += len;
            Some(segment)
        })
    }
}

fn invert_or_one(x: f64) -> f64 {
    if x.abs() < TINY {
        log::warn!("preconditioner scale {x:e} is too small, falling back to 1");
        1.0
    } else {
        1.0 / x
    }
}
