//! Dynamic Aitken under-relaxation.
//!
//! The factor is updated from the two most recent residuals `r_{k-1}`, `r_k`
//! (stacked over the configured data IDs):
//!
//! ```text
//! omega_k = -omega_{k-1} * r_{k-1} . (r_k - r_{k-1}) / |r_k - r_{k-1}|^2
//! ```
//!
//! The first iteration of a window restarts from
//! `sign(omega) * min(initial, |omega|)`. Every block of the map is relaxed
//! with the same factor.

use crate::acceleration::{Accelerate, check_block_sizes, check_data_ids, relax, stack};
use crate::coupling_error::CouplingError;
use crate::data::coupling_data::{DataId, DataMap};
use nalgebra::DVector;

/// Residual differences below this norm keep the previous factor.
const TINY: f64 = 1e-14;

#[derive(Clone, Debug)]
pub struct AitkenRelaxation {
    initial_relaxation: f64,
    data_ids: Vec<DataId>,
    factor: f64,
    iteration: usize,
    residuals: Option<DVector<f64>>,
}

impl AitkenRelaxation {
    /// # Panics
    /// Panics unless `0 < initial_relaxation <= 1`.
    pub fn new(initial_relaxation: f64, data_ids: Vec<DataId>) -> Self {
        assert!(
            initial_relaxation > 0.0 && initial_relaxation <= 1.0,
            "initial relaxation must lie in (0, 1], got {initial_relaxation}"
        );
        Self {
            initial_relaxation,
            data_ids,
            factor: initial_relaxation,
            iteration: 0,
            residuals: None,
        }
    }

    /// Factor used by the most recent iteration.
    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl Accelerate for AitkenRelaxation {
    fn data_ids(&self) -> &[DataId] {
        &self.data_ids
    }

    fn initialize(&mut self, data: &DataMap) -> Result<(), CouplingError> {
        check_data_ids(data, &self.data_ids)
    }

    fn perform_acceleration(&mut self, data: &mut DataMap) -> Result<(), CouplingError> {
        let ids: Vec<DataId> = data.keys().copied().collect();
        check_block_sizes(data, &ids)?;
        let (values, old) = stack(data, &self.data_ids)?;
        let residual = values - old;
        if self
            .residuals
            .as_ref()
            .is_some_and(|prev| prev.len() != residual.len())
        {
            log::info!("Aitken relaxation: data size changed, restarting");
            self.reset();
        }

        match (&self.residuals, self.iteration) {
            (Some(prev), it) if it > 0 => {
                let delta = &residual - prev;
                let denominator = delta.norm_squared();
                if denominator > TINY * TINY {
                    self.factor = -self.factor * prev.dot(&delta) / denominator;
                } else {
                    log::warn!("Aitken relaxation: residual did not change, keeping factor");
                }
            }
            _ => {
                self.factor = self.factor.signum() * self.initial_relaxation.min(self.factor.abs());
            }
        }
        log::debug!("Aitken factor {} in iteration {}", self.factor, self.iteration);

        relax(data, &ids, self.factor)?;
        data.values_mut().for_each(|block| block.store_iteration());
        self.residuals = Some(residual);
        self.iteration += 1;
        Ok(())
    }

    fn iterations_converged(&mut self, _data: &DataMap) -> Result<(), CouplingError> {
        self.iteration = 0;
        Ok(())
    }

    fn reset(&mut self) {
        self.factor = self.initial_relaxation;
        self.iteration = 0;
        self.residuals = None;
    }
}
