//! Constant under-relaxation of every coupling data block.

use crate::acceleration::{Accelerate, check_data_ids, relax};
use crate::coupling_error::CouplingError;
use crate::data::coupling_data::{DataId, DataMap};

#[derive(Clone, Debug)]
pub struct ConstantRelaxation {
    relaxation: f64,
    data_ids: Vec<DataId>,
}

impl ConstantRelaxation {
    /// # Panics
    /// Panics unless `0 < relaxation <= 1`.
    pub fn new(relaxation: f64, data_ids: Vec<DataId>) -> Self {
        assert!(
            relaxation > 0.0 && relaxation <= 1.0,
            "relaxation factor must lie in (0, 1], got {relaxation}"
        );
        Self {
            relaxation,
            data_ids,
        }
    }

    pub fn relaxation(&self) -> f64 {
        self.relaxation
    }
}

impl Accelerate for ConstantRelaxation {
    fn data_ids(&self) -> &[DataId] {
        &self.data_ids
    }

    fn initialize(&mut self, data: &DataMap) -> Result<(), CouplingError> {
        check_data_ids(data, &self.data_ids)
    }

    fn perform_acceleration(&mut self, data: &mut DataMap) -> Result<(), CouplingError> {
        check_data_ids(data, &self.data_ids)?;
        let ids: Vec<DataId> = data.keys().copied().collect();
        relax(data, &ids, self.relaxation)?;
        data.values_mut().for_each(|block| block.store_iteration());
        Ok(())
    }

    fn iterations_converged(&mut self, _data: &DataMap) -> Result<(), CouplingError> {
        Ok(())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::coupling_data::CouplingData;

    #[test]
    fn relaxes_all_blocks() {
        let mut data = DataMap::new();
        data.insert(DataId(0), CouplingData::from_values(vec![40.0, 40.0], 1));
        data.insert(DataId(1), CouplingData::from_values(vec![8.0], 1));
        let mut acc = ConstantRelaxation::new(0.5, vec![DataId(0)]);
        acc.initialize(&data).unwrap();
        acc.perform_acceleration(&mut data).unwrap();
        assert_eq!(data[&DataId(0)].values.as_slice(), &[20.0, 20.0]);
        assert_eq!(data[&DataId(1)].values.as_slice(), &[4.0]);
        assert_eq!(data[&DataId(0)].old_values.as_slice(), &[20.0, 20.0]);

    #[test]
    fn inconsistent_unconfigured_block_is_reported() {
        let mut data = DataMap::new();
        data.insert(DataId(0), CouplingData::from_values(vec![40.0], 1));
        let mut broken = CouplingData::from_values(vec![1.0, 2.0], 1);
        broken.old_values = nalgebra::DVector::zeros(3);
        data.insert(DataId(7), broken);
        let mut acc = ConstantRelaxation::new(0.5, vec![DataId(0)]);
        assert_eq!(
            acc.perform_acceleration(&mut data),
            Err(CouplingError::DataSizeMismatch {
                id: DataId(7),
                expected: 2,
                found: 3
            })
        );
        assert_eq!(data[&DataId(0)].values[0], 40.0);
    }
}
}
