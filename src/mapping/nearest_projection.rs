//! Nearest-projection mapping.
//!
//! Every from-vertex is projected onto the closest primitive of the to-mesh
//! that actually contains its projection:
//!
//! 1. the 4 nearest triangles (3D only), by distance to the filled triangle;
//! 2. the 4 nearest edges;
//! 3. the single nearest vertex, which always succeeds.
//!
//! Within steps 1 and 2 candidates are tried in ascending distance and the
//! first one whose interpolation weights are all non-negative wins. Near mesh
//! boundaries and holes this degrades to edge or vertex accuracy.

use crate::coupling_error::CouplingError;
use crate::data::coupling_data::DataId;
use crate::geometry::projection::{
    InterpolationElements, all_non_negative, edge_elements, triangle_elements, vertex_elements,
};
use crate::geometry::spatial_index::{Match, MeshIndex, SpatialIndexCache};
use crate::mapping::{Constraint, Mapping, MeshRequirement, WeightTable};
use crate::topology::mesh::{Mesh, MeshHandle};
use nalgebra::Point3;
use std::sync::Arc;

/// Number of candidate primitives examined per from-vertex and kind.
const N_NEAREST: usize = 4;

#[derive(Debug)]
pub struct NearestProjectionMapping {
    table: WeightTable,
}

impl NearestProjectionMapping {
    /// # Panics
    /// Panics unless `dimensions` is 2 or 3.
    pub fn new(constraint: Constraint, dimensions: usize, cache: Arc<SpatialIndexCache>) -> Self {
        Self {
            table: WeightTable::new(constraint, dimensions, cache),
        }
    }

    /// Computed interpolation table, indexed by from-vertex.
    pub fn weights(&self) -> Option<&[InterpolationElements]> {
        self.table.weights()
    }
}

/// First candidate, in the given order, that `elements` accepts.
fn first_inside<F>(candidates: Vec<Match>, elements: F) -> Option<InterpolationElements>
where
    F: Fn(usize) -> Option<InterpolationElements>,
{
    candidates
        .into_iter()
        .filter_map(|m| elements(m.index))
        .find(|elems| all_non_negative(elems))
}

fn project(dimensions: usize, to: &Mesh, index: &MeshIndex, p: &Point3<f64>) -> InterpolationElements {
    if dimensions == 3 {
        let on_triangle = first_inside(index.nearest_triangles(to, p, N_NEAREST), |t| {
            triangle_elements(p, to, &to.triangles()[t])
        });
        if let Some(elems) = on_triangle {
            return elems;
        }
    }
    let on_edge = first_inside(index.nearest_edges(to, p, N_NEAREST), |e| {
        edge_elements(p, to, &to.edges()[e])
    });
    if let Some(elems) = on_edge {
        return elems;
    }
    index
        .nearest_vertices(to, p, 1)
        .first()
        .map(|m| vertex_elements(m.index))
        .unwrap_or_default()
}

impl Mapping for NearestProjectionMapping {
    fn constraint(&self) -> Constraint {
        self.table.constraint()
    }

    fn dimensions(&self) -> usize {
        self.table.dimensions()
    }

    fn input_requirement(&self) -> MeshRequirement {
        match self.constraint() {
            Constraint::Consistent => MeshRequirement::Full,
            Constraint::Conservative => MeshRequirement::Vertex,
        }
    }

    fn output_requirement(&self) -> MeshRequirement {
        match self.constraint() {
            Constraint::Consistent => MeshRequirement::Vertex,
            Constraint::Conservative => MeshRequirement::Full,
        }
    }

    fn set_meshes(&mut self, input: MeshHandle, output: MeshHandle) {
        self.table.set_meshes(input, output);
    }

    fn compute_mapping(&mut self) -> Result<(), CouplingError> {
        let dimensions = self.table.dimensions();
        self.table
            .compute_with(|to, index, p| project(dimensions, to, index, p))
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
