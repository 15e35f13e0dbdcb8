//! Coupling data blocks handed to the acceleration by the coupling scheme.
//!
//! A block carries the current iterate (`values`) and the iterate of the
//! previous coupling iteration (`old_values`). The acceleration rewrites
//! `values` in place and snapshots the result into `old_values`.

use crate::coupling_error::CouplingError;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Numeric identifier of one exchanged quantity.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DataId(pub u32);

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered map from data ID to block. Ordering fixes the stacking order of
/// primary data inside the acceleration.
pub type DataMap = BTreeMap<DataId, CouplingData>;

/// One exchanged quantity: current and previous iterate plus value dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct CouplingData {
    /// Current iterate, overwritten by the acceleration.
    pub values: DVector<f64>,
    /// Iterate of the previous coupling iteration.
    pub old_values: DVector<f64>,
    dimension: usize,
}

impl CouplingData {
    /// Creates a block from both iterates.
    ///
    /// # Panics
    /// Panics if `dimension == 0`.
    pub fn new(values: DVector<f64>, old_values: DVector<f64>, dimension: usize) -> Self {
        assert!(dimension > 0, "coupling data dimension must be positive");
        Self {
            values,
            old_values,
            dimension,
        }
    }

    /// Creates a block whose previous iterate is zero.
    pub fn from_values(values: Vec<f64>, dimension: usize) -> Self {
        let n = values.len();
        Self::new(DVector::from_vec(values), DVector::zeros(n), dimension)
    }

    /// Number of scalar entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Scalar entries per vertex (1 for scalar data, d for vector data).
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of vertices the block spans.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.values.len() / self.dimension
    }

    /// `values - old_values`.
    pub fn residual(&self) -> DVector<f64> {
        &self.values - &self.old_values
    }

    /// Snapshot the current iterate as the previous one.
    pub fn store_iteration(&mut self) {
        self.old_values.copy_from(&self.values);
    }

    /// Replace both iterates with zero vectors of a new length (remeshing).
    pub fn resize(&mut self, len: usize) {
        self.values = DVector::zeros(len);
        self.old_values = DVector::zeros(len);
    }

    /// Ensures `values` and `old_values` have the same length.
    pub fn check_sizes(&self, id: DataId) -> Result<(), CouplingError> {
        if self.values.len() != self.old_values.len() {
            return Err(CouplingError::DataSizeMismatch {
                id,
                expected: self.values.len(),
                found: self.old_values.len(),
            });
        }
        Ok(())
    }
}

/// Looks up `id`, reporting a missing block as [`CouplingError::MissingData`].
pub fn block(data: &DataMap, id: DataId) -> Result<&CouplingData, CouplingError> {
    data.get(&id).ok_or(CouplingError::MissingData { id })
}

/// Mutable variant of [`block`].
pub fn block_mut(data: &mut DataMap, id: DataId) -> Result<&mut CouplingData, CouplingError> {
    data.get_mut(&id).ok_or(CouplingError::MissingData { id })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residual_and_snapshot() {
        let mut d = CouplingData::new(
            DVector::from_vec(vec![3.0, 4.0]),
            DVector::from_vec(vec![1.0, 1.0]),
            1,
        );
        assert_eq!(d.residual().as_slice(), &[2.0, 3.0]);
        d.store_iteration();
        assert_eq!(d.old_values.as_slice(), &[3.0, 4.0]);
        assert_eq!(d.residual().norm(), 0.0);
    }

    #[test]
    fn vector_data_counts_vertices() {
        let d = CouplingData::from_values(vec![0.0; 6], 3);
        assert_eq!(d.vertex_count(), 2);
        assert_eq!(d.len(), 6);
    }

    #[test]
    fn size_mismatch_is_reported() {
        let d = CouplingData::new(DVector::zeros(3), DVector::zeros(2), 1);
        let err = d.check_sizes(DataId(7)).unwrap_err();
        assert_eq!(
            err,
            CouplingError::DataSizeMismatch {
                id: DataId(7),
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn data_id_serde_is_transparent() {
        let s = serde_json::to_string(&DataId(4)).unwrap();
        assert_eq!(s, "4");
        let back: DataId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, DataId(4));
    }
}
