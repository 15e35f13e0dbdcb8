//! Acceleration of implicit coupling iterations.
//!
//! The coupling scheme hands every coupling iteration's data blocks to one
//! [`Accelerate`] implementation, which rewrites `values` in place:
//!
//! - [`ConstantRelaxation`]: fixed under-relaxation;
//! - [`AitkenRelaxation`]: dynamic Aitken under-relaxation;
//! - [`IqnIls`]: interface quasi-Newton with least-squares approximation,
//!   built on the generic [`QuasiNewton`] history machine.
//!
//! The [`Acceleration`] enum is the closed set used from configuration.

pub mod aitken;
pub mod constant;
pub mod filter;
pub mod iqn_ils;
pub mod preconditioner;
pub mod qr;
pub mod quasi_newton;

use crate::coupling_error::CouplingError;
use crate::data::coupling_data::{DataId, DataMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use aitken::AitkenRelaxation;
pub use constant::ConstantRelaxation;
pub use filter::{Filter, FilterKind};
pub use iqn_ils::{IqnIls, IqnIlsUpdate};
pub use preconditioner::{Preconditioner, PreconditionerConfig, PreconditionerKind};
pub use qr::QrFactorization;
pub use quasi_newton::{QuasiNewton, QuasiNewtonVariant};

/// Capability interface of every acceleration scheme.
pub trait Accelerate {
    /// Data IDs the scheme was configured with.
    fn data_ids(&self) -> &[DataId];

    /// Checks that every configured block is present and records sizes.
    fn initialize(&mut self, data: &DataMap) -> Result<(), CouplingError>;

    /// Rewrites `values` of the blocks in place and snapshots the result
    /// into `old_values`.
    fn perform_acceleration(&mut self, data: &mut DataMap) -> Result<(), CouplingError>;

    /// Called once the coupling iterations of a time window converged.
    fn iterations_converged(&mut self, data: &DataMap) -> Result<(), CouplingError>;

    /// Discards every piece of history, e.g. after the coupled mesh changed.
    /// The next call behaves like the first call of a fresh instance.
    fn reset(&mut self);
}

/// Stacks the given blocks' `values` and `old_values` in ID order.
pub(crate) fn stack(
    data: &DataMap,
    ids: &[DataId],
) -> Result<(nalgebra::DVector<f64>, nalgebra::DVector<f64>), CouplingError> {
    let mut values = Vec::new();
    let mut old = Vec::new();
    for &id in ids {
        let block = crate::data::coupling_data::block(data, id)?;
        block.check_sizes(id)?;
        values.extend(block.values.iter());
        old.extend(block.old_values.iter());
    }
    Ok((
        nalgebra::DVector::from_vec(values),
        nalgebra::DVector::from_vec(old),
    ))
}

/// Fails with [`CouplingError::MissingData`] on the first absent ID.
pub(crate) fn check_data_ids(data: &DataMap, ids: &[DataId]) -> Result<(), CouplingError> {
    match ids.iter().find(|id| !data.contains_key(*id)) {
        Some(&id) => Err(CouplingError::MissingData { id }),
        None => Ok(()),
    }
}

/// Fails with [`CouplingError::DataSizeMismatch`] on the first block whose
/// `values` and `old_values` differ in length.
pub(crate) fn check_block_sizes(data: &DataMap, ids: &[DataId]) -> Result<(), CouplingError> {
    for &id in ids {
        crate::data::coupling_data::block(data, id)?.check_sizes(id)?;
    }
    Ok(())
}

/// `values = old_values + omega * (values - old_values)` for the given blocks.
/// Nothing is modified unless every block is consistent.
pub(crate) fn relax(data: &mut DataMap, ids: &[DataId], omega: f64) -> Result<(), CouplingError> {
    check_block_sizes(data, ids)?;
    for &id in ids {
        let block = crate::data::coupling_data::block_mut(data, id)?;
        let residual = block.residual();
        block.values.copy_from(&block.old_values);
        block.values.axpy(omega, &residual, 1.0);
    }
    Ok(())
}

/// Acceleration scheme selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccelerationKind {
    Constant,
    Aitken,
    #[default]
    IqnIls,
}

/// Acceleration configuration record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelerationConfig {
    pub kind: AccelerationKind,
    /// Relaxation factor of the first iteration (and the fixed factor of
    /// constant relaxation).
    pub initial_relaxation: f64,
    /// Relax the first iteration of every window, not only the first one.
    pub force_initial_relaxation: bool,
    /// Maximum number of V/W columns kept.
    pub max_iterations_used: usize,
    /// Number of past windows whose columns are reused.
    pub timesteps_reused: usize,
    pub filter: FilterKind,
    pub singularity_limit: f64,
    /// Primary data; all other blocks of the map are secondary.
    pub data_ids: Vec<DataId>,
    pub preconditioner: PreconditionerConfig,
}

impl Default for AccelerationConfig {
    fn default() -> Self {
        Self {
            kind: AccelerationKind::IqnIls,
            initial_relaxation: 0.1,
            force_initial_relaxation: false,
            max_iterations_used: 100,
            timesteps_reused: 10,
            filter: FilterKind::Qr2,
            singularity_limit: 1e-2,
            data_ids: Vec::new(),
            preconditioner: PreconditionerConfig::default(),
        }
    }
}

impl AccelerationConfig {
    pub fn validate(&self) -> Result<(), CouplingError> {
        let invalid = |msg: String| Err(CouplingError::InvalidConfiguration(msg));
        if !(self.initial_relaxation > 0.0 && self.initial_relaxation <= 1.0) {
            return invalid(format!(
                "initial relaxation must lie in (0, 1], got {}",
                self.initial_relaxation
            ));
        }
        if self.kind == AccelerationKind::IqnIls
            && self.filter != FilterKind::None
            && !(self.singularity_limit > 0.0)
        {
            return invalid(format!(
                "singularity limit must be positive, got {}",
                self.singularity_limit
            ));
        }
        if self.kind != AccelerationKind::Constant && self.data_ids.is_empty() {
            return invalid(format!("{:?} acceleration needs at least one data ID", self.kind));
        }
        let unique: BTreeSet<_> = self.data_ids.iter().collect();
        if unique.len() != self.data_ids.len() {
            return invalid(format!("duplicate data IDs in {:?}", self.data_ids));
        }
        if self.kind == AccelerationKind::IqnIls {
            self.preconditioner.validate(self.data_ids.len())?;
        }
        Ok(())
    }

    /// Validates the record and builds the configured scheme.
    pub fn build(&self) -> Result<Acceleration, CouplingError> {
        self.validate()?;
        Ok(match self.kind {
            AccelerationKind::Constant => Acceleration::Constant(ConstantRelaxation::new(
                self.initial_relaxation,
                self.data_ids.clone(),
            )),
            AccelerationKind::Aitken => Acceleration::Aitken(AitkenRelaxation::new(
                self.initial_relaxation,
                self.data_ids.clone(),
            )),
            AccelerationKind::IqnIls => Acceleration::IqnIls(IqnIls::from_config(self)),
        })
    }
}

/// Closed set of acceleration schemes behind one [`Accelerate`] interface.
#[derive(Debug)]
pub enum Acceleration {
    Constant(ConstantRelaxation),
    Aitken(AitkenRelaxation),
    IqnIls(IqnIls),
}

macro_rules! dispatch {
    ($self:expr, $a:ident => $body:expr) => {
        match $self {
            Acceleration::Constant($a) => $body,
            Acceleration::Aitken($a) => $body,
            Acceleration::IqnIls($a) => $body,
        }
    };
}

impl Accelerate for Acceleration {
    fn data_ids(&self) -> &[DataId] {
        dispatch!(self, a => a.data_ids())
    }

    fn initialize(&mut self, data: &DataMap) -> Result<(), CouplingError> {
        dispatch!(self, a => a.initialize(data))
    }

    fn perform_acceleration(&mut self, data: &mut DataMap) -> Result<(), CouplingError> {
        dispatch!(self, a => a.perform_acceleration(data))
    }

    fn iterations_converged(&mut self, data: &DataMap) -> Result<(), CouplingError> {
        dispatch!(self, a => a.iterations_converged(data))
    }

    fn reset(&mut self) {
        dispatch!(self, a => a.reset())
    }
}
