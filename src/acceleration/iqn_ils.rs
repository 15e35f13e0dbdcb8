//! Interface quasi-Newton with inverse least-squares Jacobian (IQN-ILS).
//!
//! With `V = Q R` the coefficients solve `R alpha = -Q^T r` for the
//! preconditioned residual `r`; the update is `x = x~ + W alpha`. Secondary
//! blocks keep their own `W` columns and are moved with the same `alpha`.

use crate::acceleration::AccelerationConfig;
use crate::acceleration::qr::QrFactorization;
use crate::acceleration::quasi_newton::{QuasiNewton, QuasiNewtonVariant};
use crate::coupling_error::CouplingError;
use crate::data::coupling_data::{DataId, DataMap, block, block_mut};
use nalgebra::DVector;
use std::collections::BTreeMap;

/// IQN-ILS acceleration.
pub type IqnIls = QuasiNewton<IqnIlsUpdate>;

impl QuasiNewton<IqnIlsUpdate> {
    /// Builds IQN-ILS from an (already validated) configuration.
    pub fn from_config(config: &AccelerationConfig) -> Self {
        Self::with_variant(config, IqnIlsUpdate::default())
    }

    /// Coefficients of the most recent quasi-Newton update, `None` if the
    /// last iteration was relaxed.
    pub fn last_coefficients(&self) -> Option<&DVector<f64>> {
        self.variant().coefficients()
    }
}

#[derive(Clone, Debug, Default)]
pub struct IqnIlsUpdate {
    secondary_ids: Vec<DataId>,
    secondary_w: BTreeMap<DataId, Vec<DVector<f64>>>,
    secondary_old_xtilde: BTreeMap<DataId, DVector<f64>>,
    alpha: Option<DVector<f64>>,
}

impl IqnIlsUpdate {
    pub fn coefficients(&self) -> Option<&DVector<f64>> {
        self.alpha.as_ref()
    }

    /// `W` columns of a secondary block, oldest first.
    pub fn secondary_columns(&self, id: DataId) -> &[DVector<f64>] {
        self.secondary_w.get(&id).map_or(&[], Vec::as_slice)
    }
}

impl QuasiNewtonVariant for IqnIlsUpdate {
    fn name(&self) -> &'static str {
        "IQN-ILS"
    }

    fn initialize(&mut self, _data: &DataMap, secondary: &[DataId]) -> Result<(), CouplingError> {
        self.secondary_ids = secondary.to_vec();
        self.secondary_old_xtilde.clear();
        self.clear();
        Ok(())
    }

    fn begin_iteration(&mut self, data: &DataMap, append: bool) -> Result<(), CouplingError> {
        self.alpha = None;
        for &id in &self.secondary_ids {
            let values = &block(data, id)?.values;
            if append {
                let column = match self.secondary_old_xtilde.get(&id) {
                    Some(old) => values - old,
                    None => DVector::zeros(values.len()),
                };
                self.secondary_w.entry(id).or_default().push(column);
            }
            self.secondary_old_xtilde.insert(id, values.clone());
        }
        Ok(())
    }

    fn compute_update(
        &mut self,
        qr: &QrFactorization,
        w: &[DVector<f64>],
        residual: &DVector<f64>,
    ) -> Option<DVector<f64>> {
        self.alpha = qr.solve(residual);
        let alpha = self.alpha.as_ref()?;
        let mut update = DVector::zeros(residual.len());
        for (column, a) in w.iter().zip(alpha.iter()) {
            update.axpy(*a, column, 1.0);
        }
        Some(update)
    }

    fn relax_secondary(&self, data: &mut DataMap) -> Result<(), CouplingError> {
        let Some(alpha) = &self.alpha else {
            return Ok(());
        };
        for &id in &self.secondary_ids {
            let block = block_mut(data, id)?;
            for (column, a) in self.secondary_columns(id).iter().zip(alpha.iter()) {
                block.values.axpy(*a, column, 1.0);
            }
        }
        Ok(())
    }

    fn remove_column(&mut self, i: usize) {
        for columns in self.secondary_w.values_mut() {
            if i < columns.len() {
                columns.remove(i);
            }
        }
    }

    /// Keeps the last secondary iterates: the next appended column still
    /// needs them after a deferred reset.
    fn clear(&mut self) {
        self.secondary_w.clear();
        self.alpha = None;
    }
}
