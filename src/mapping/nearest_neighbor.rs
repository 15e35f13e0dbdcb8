//! Nearest-neighbour mapping: each from-vertex takes the value of the
//! closest to-vertex.

use crate::coupling_error::CouplingError;
use crate::data::coupling_data::DataId;
use crate::geometry::projection::{InterpolationElements, vertex_elements};
use crate::geometry::spatial_index::SpatialIndexCache;
use crate::mapping::{Constraint, Mapping, MeshRequirement, WeightTable};
use crate::topology::mesh::MeshHandle;
use std::sync::Arc;

#[derive(Debug)]
pub struct NearestNeighborMapping {
    table: WeightTable,
}

impl NearestNeighborMapping {
    /// # Panics
    /// Panics unless `dimensions` is 2 or 3.
    pub fn new(constraint: Constraint, dimensions: usize, cache: Arc<SpatialIndexCache>) -> Self {
        Self {
            table: WeightTable::new(constraint, dimensions, cache),
        }
    }

    pub fn weights(&self) -> Option<&[InterpolationElements]> {
        self.table.weights()
    }
}

impl Mapping for NearestNeighborMapping {
    fn constraint(&self) -> Constraint {
        self.table.constraint()
    }

    fn dimensions(&self) -> usize {
        self.table.dimensions()
    }

    fn input_requirement(&self) -> MeshRequirement {
        MeshRequirement::Vertex
    }

    fn output_requirement(&self) -> MeshRequirement {
        MeshRequirement::Vertex
    }

    fn set_meshes(&mut self, input: MeshHandle, output: MeshHandle) {
        self.table.set_meshes(input, output);
    }

    fn compute_mapping(&mut self) -> Result<(), CouplingError> {
        self.table.compute_with(|to, index, p| {
            index
                .nearest_vertices(to, p, 1)
                .first()
                .map(|m| vertex_elements(m.index))
                .unwrap_or_default()
        })
    }

    fn has_computed_mapping(&self) -> bool {
        self.table.has_computed()
    }

    fn clear(&mut self) {
        self.table.clear();
    }

    fn map(&self, input: DataId, output: DataId) -> Result<(), CouplingError> {
        self.table.map(input, output)
    }

    fn tag_mesh_first_round(&mut self) -> Result<(), CouplingError> {
        self.compute_mapping()?;
        self.table.tag_contributors()?;
        self.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::mesh::{Mesh, MeshId};

    fn mesh(id: u32, xs: &[f64], data: DataId, dim: usize) -> Mesh {
        let mut m = Mesh::new(MeshId(id), format!("M{id}"), 2);
        for &x in xs {
            m.create_vertex(&[x, 0.0]).unwrap();
        }
        m.create_data(data, "D", dim);
        m.allocate_data_values();
        m
    }

    #[test]
    fn consistent_picks_closest_value() {
        let cache = Arc::new(SpatialIndexCache::new());
        let mut input = mesh(1, &[0.0, 1.0, 2.0], DataId(0), 2);
        input
            .data_mut(DataId(0))
            .unwrap()
            .values_mut()
            .copy_from_slice(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        let output = mesh(2, &[1.9, 0.2], DataId(1), 2);
        let output = output.into_handle();

        let mut mapping = NearestNeighborMapping::new(Constraint::Consistent, 2, cache);
        mapping.set_meshes(input.into_handle(), output.clone());
        mapping.compute_mapping().unwrap();
        mapping.map(DataId(0), DataId(1)).unwrap();
        assert_eq!(
            output.read().data(DataId(1)).unwrap().values().as_slice(),
            &[3.0, -3.0, 1.0, -1.0]
        );
    }

    #[test]
    fn conservative_sums_into_closest() {
        let cache = Arc::new(SpatialIndexCache::new());
        let mut input = mesh(1, &[0.1, 0.2, 0.9], DataId(0), 1);
        input
            .data_mut(DataId(0))
            .unwrap()
            .values_mut()
            .copy_from_slice(&[1.0, 2.0, 4.0]);
        let output = mesh(2, &[0.0, 1.0], DataId(1), 1).into_handle();

        let mut mapping = NearestNeighborMapping::new(Constraint::Conservative, 2, cache);
        mapping.set_meshes(input.into_handle(), output.clone());
        mapping.compute_mapping().unwrap();
        mapping.map(DataId(0), DataId(1)).unwrap();
        assert_eq!(output.read().data(DataId(1)).unwrap().values().as_slice(), &[3.0, 4.0]);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let cache = Arc::new(SpatialIndexCache::new());
        let input = mesh(1, &[0.0], DataId(0), 1);
        let output = mesh(2, &[0.0], DataId(1), 2);
        let mut mapping = NearestNeighborMapping::new(Constraint::Consistent, 2, cache);
        mapping.set_meshes(input.into_handle(), output.into_handle());
        mapping.compute_mapping().unwrap();
        assert_eq!(
            mapping.map(DataId(0), DataId(1)),
            Err(CouplingError::DataDimensionMismatch { input: 1, output: 2 })
        );
    }
}
