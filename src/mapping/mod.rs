//! Data mappings between non-matching meshes.
//!
//! A mapping owns one interpolation table: for every vertex of the *from*
//! mesh a small set of weighted *to*-mesh vertices. Which mesh is which
//! depends on the [`Constraint`]:
//!
//! | constraint     | from   | to    | `map` walks      |
//! |----------------|--------|-------|------------------|
//! | `Consistent`   | output | input | output vertices, gathers |
//! | `Conservative` | input  | output| input vertices, scatters |
//!
//! The table is computed by [`Mapping::compute_mapping`] and dropped by
//! [`Mapping::clear`], which also invalidates the spatial index of the *to*
//! mesh. Callers serialize access; no internal locking beyond the mesh
//! handles is provided.

pub mod nearest_neighbor;
pub mod nearest_projection;

use crate::coupling_error::CouplingError;
use crate::data::coupling_data::DataId;
use crate::geometry::projection::InterpolationElements;
use crate::geometry::spatial_index::{MeshIndex, SpatialIndexCache};
use crate::topology::mesh::{Mesh, MeshHandle};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use nearest_neighbor::NearestNeighborMapping;
pub use nearest_projection::NearestProjectionMapping;

/// Weights whose magnitude is at most this do not tag a vertex.
pub const NONZERO_WEIGHT: f64 = 1e-14;

/// Direction mode of a mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constraint {
    /// Preserves point values (interpolation).
    #[default]
    Consistent,
    /// Preserves integral quantities such as total force.
    Conservative,
}

/// How much of a mesh a mapping needs on one side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshRequirement {
    /// Vertex coordinates only.
    Vertex,
    /// Vertices plus edges and triangles.
    Full,
}

/// Capability interface shared by all mappings.
pub trait Mapping {
    fn constraint(&self) -> Constraint;

    /// Spatial dimension of the coupled meshes (2 or 3).
    fn dimensions(&self) -> usize;

    fn input_requirement(&self) -> MeshRequirement;

    fn output_requirement(&self) -> MeshRequirement;

    /// Attaches the meshes and drops any computed table.
    fn set_meshes(&mut self, input: MeshHandle, output: MeshHandle);

    /// Computes the interpolation table from the current mesh geometry.
    fn compute_mapping(&mut self) -> Result<(), CouplingError>;

    fn has_computed_mapping(&self) -> bool;

    /// Drops the table and invalidates the spatial index of the *to* mesh.
    fn clear(&mut self);

    /// Overwrites output data `output` with the mapped input data `input`.
    fn map(&self, input: DataId, output: DataId) -> Result<(), CouplingError>;

    /// Computes the table, tags every *to* vertex that contributes to it, then
    /// clears the table again.
    fn tag_mesh_first_round(&mut self) -> Result<(), CouplingError>;

    /// Second tagging pass; nothing to do for the geometric mappings.
    fn tag_mesh_second_round(&mut self) -> Result<(), CouplingError> {
        Ok(())
    }
}

/// Interpolation table plus the meshes and index cache it is computed from.
///
/// Shared by the concrete mappings, which only differ in how a single
/// *from* point is turned into [`InterpolationElements`].
#[derive(Debug)]
pub(crate) struct WeightTable {
    constraint: Constraint,
    dimensions: usize,
    cache: Arc<SpatialIndexCache>,
    input: Option<MeshHandle>,
    output: Option<MeshHandle>,
    weights: Option<Vec<InterpolationElements>>,
}

impl WeightTable {
    pub(crate) fn new(constraint: Constraint, dimensions: usize, cache: Arc<SpatialIndexCache>) -> Self {
        assert!(
            dimensions == 2 || dimensions == 3,
            "mapping dimensions must be 2 or 3, got {dimensions}"
        );
        Self {
            constraint,
            dimensions,
            cache,
            input: None,
            output: None,
            weights: None,
        }
    }

    pub(crate) fn constraint(&self) -> Constraint {
        self.constraint
    }

    pub(crate) fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub(crate) fn weights(&self) -> Option<&[InterpolationElements]> {
        self.weights.as_deref()
    }

    pub(crate) fn set_meshes(&mut self, input: MeshHandle, output: MeshHandle) {
        self.clear();
        self.input = Some(input);
        self.output = Some(output);
    }

    fn meshes(&self) -> Result<(&MeshHandle, &MeshHandle), CouplingError> {
        let input = self.input.as_ref().ok_or(CouplingError::MissingMesh("input"))?;
        let output = self.output.as_ref().ok_or(CouplingError::MissingMesh("output"))?;
        Ok((input, output))
    }

    /// `(from, to)` according to the constraint.
    fn direction(&self) -> Result<(&MeshHandle, &MeshHandle), CouplingError> {
        let (input, output) = self.meshes()?;
        Ok(match self.constraint {
            Constraint::Consistent => (output, input),
            Constraint::Conservative => (input, output),
        })
    }

    /// Fills the table by asking `locate` for the elements of every from-vertex.
    pub(crate) fn compute_with<F>(&mut self, locate: F) -> Result<(), CouplingError>
    where
        F: Fn(&Mesh, &MeshIndex, &Point3<f64>) -> InterpolationElements,
    {
        let weights: Vec<InterpolationElements> = {
            let (from, to) = self.direction()?;
            let from = from.read();
            let to = to.read();
            log::debug!(
                "computing {:?} mapping from \"{}\" ({} vertices) onto \"{}\"",
                self.constraint,
                from.name(),
                from.vertices().len(),
                to.name()
            );
            if to.vertices().is_empty() && !from.vertices().is_empty() {
                return Err(CouplingError::EmptyMesh {
                    mesh: to.name().to_owned(),
                });
            }
            let index = self.cache.index(&to);
            from.vertices()
                .iter()
                .map(|v| locate(&*to, &index, v.coords()))
                .collect()
        };
        self.weights = Some(weights);
        Ok(())
    }

    pub(crate) fn has_computed(&self) -> bool {
        self.weights.is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.weights = None;
        if let Ok((_, to)) = self.direction() {
            self.cache.clear(to.read().id());
        }
    }

    pub(crate) fn map(&self, input_id: DataId, output_id: DataId) -> Result<(), CouplingError> {
        let (input, output) = self.meshes()?;
        let Some(weights) = self.weights.as_ref() else {
            return Err(CouplingError::MappingNotComputed {
                from: input.read().name().to_owned(),
                to: output.read().name().to_owned(),
            });
        };

        // Copy the input so that mapping within one mesh does not self-lock.
        let (in_values, dim, in_vertices) = {
            let mesh = input.read();
            let data = mesh.data(input_id)?;
            (data.values().clone(), data.dimension(), mesh.vertices().len())
        };
        let mut out_mesh = output.write();
        let out_vertices = out_mesh.vertices().len();
        let out = out_mesh.data_mut(output_id)?;
        if out.dimension() != dim {
            return Err(CouplingError::DataDimensionMismatch {
                input: dim,
                output: out.dimension(),
            });
        }
        check_len(input_id, in_vertices * dim, in_values.len())?;
        check_len(output_id, out_vertices * dim, out.values().len())?;
        let (from_count, from_id) = match self.constraint {
            Constraint::Consistent => (out_vertices, output_id),
            Constraint::Conservative => (in_vertices, input_id),
        };
        check_len(from_id, from_count, weights.len())?;

        let out_values = out.values_mut();
        out_values.fill(0.0);
        match self.constraint {
            Constraint::Consistent => {
                log::debug!("map consistent: data {input_id} -> {output_id}");
                for (i, elems) in weights.iter().enumerate() {
                    for elem in elems {
                        for d in 0..dim {
                            out_values[i * dim + d] += elem.weight * in_values[elem.vertex * dim + d];
                        }
                    }
                }
            }
            Constraint::Conservative => {
                log::debug!("map conservative: data {input_id} -> {output_id}");
                for (i, elems) in weights.iter().enumerate() {
                    for elem in elems {
                        for d in 0..dim {
                            out_values[elem.vertex * dim + d] += elem.weight * in_values[i * dim + d];
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Tags the to-mesh vertices referenced with a nonzero weight.
    pub(crate) fn tag_contributors(&self) -> Result<usize, CouplingError> {
        let (_, to) = self.direction()?;
        let weights = self.weights.as_deref().unwrap_or_default();
        let mut to = to.write();
        let vertices = to.vertices_mut();
        for elem in weights.iter().flatten() {
            if elem.weight.abs() > NONZERO_WEIGHT {
                vertices[elem.vertex].tag();
            }
        }
        let tagged = to.tagged_count();
        log::debug!(
            "first round tagged {tagged}/{} vertices of \"{}\"",
            to.vertices().len(),
            to.name()
        );
        Ok(tagged)
    }
}

fn check_len(id: DataId, expected: usize, found: usize) -> Result<(), CouplingError> {
    if expected != found {
        return Err(CouplingError::DataSizeMismatch { id, expected, found });
    }
    Ok(())
}

/// Kind of mapping to build from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MappingMethodKind {
    #[default]
    NearestProjection,
    NearestNeighbor,
}

/// Mapping configuration record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub method: MappingMethodKind,
    pub constraint: Constraint,
    pub dimensions: usize,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            method: MappingMethodKind::NearestProjection,
            constraint: Constraint::Consistent,
            dimensions: 3,
        }
    }
}

impl MappingConfig {
    pub fn validate(&self) -> Result<(), CouplingError> {
        if self.dimensions != 2 && self.dimensions != 3 {
            return Err(CouplingError::InvalidConfiguration(format!(
                "mapping dimensions must be 2 or 3, got {}",
                self.dimensions
            )));
        }
        Ok(())
    }

    /// Validates the record and builds the configured mapping.
    pub fn build(&self, cache: Arc<SpatialIndexCache>) -> Result<MappingMethod, CouplingError> {
        self.validate()?;
        Ok(match self.method {
            MappingMethodKind::NearestProjection => MappingMethod::NearestProjection(
                NearestProjectionMapping::new(self.constraint, self.dimensions, cache),
            ),
            MappingMethodKind::NearestNeighbor => MappingMethod::NearestNeighbor(
                NearestNeighborMapping::new(self.constraint, self.dimensions, cache),
            ),
        })
    }
}

/// Closed set of mappings behind one [`Mapping`] interface.
#[derive(Debug)]
pub enum MappingMethod {
    NearestProjection(NearestProjectionMapping),
    NearestNeighbor(NearestNeighborMapping),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            MappingMethod::NearestProjection($m) => $body,
            MappingMethod::NearestNeighbor($m) => $body,
        }
    };
}

impl Mapping for MappingMethod {
    fn constraint(&self) -> Constraint {
        dispatch!(self, m => m.constraint())
    }

    fn dimensions(&self) -> usize {
        dispatch!(self, m => m.dimensions())
    }

    fn input_requirement(&self) -> MeshRequirement {
        dispatch!(self, m => m.input_requirement())
    }

    fn output_requirement(&self) -> MeshRequirement {
        dispatch!(self, m => m.output_requirement())
    }

    fn set_meshes(&mut self, input: MeshHandle, output: MeshHandle) {
        dispatch!(self, m => m.set_meshes(input, output))
    }

    fn compute_mapping(&mut self) -> Result<(), CouplingError> {
        dispatch!(self, m => m.compute_mapping())
    }

    fn has_computed_mapping(&self) -> bool {
        dispatch!(self, m => m.has_computed_mapping())
    }

    fn clear(&mut self) {
        dispatch!(self, m => m.clear())
    }

    fn map(&self, input: DataId, output: DataId) -> Result<(), CouplingError> {
        dispatch!(self, m => m.map(input, output))
    }

    fn tag_mesh_first_round(&mut self) -> Result<(), CouplingError> {
        dispatch!(self, m => m.tag_mesh_first_round())
    }

    fn tag_mesh_second_round(&mut self) -> Result<(), CouplingError> {
        dispatch!(self, m => m.tag_mesh_second_round())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_validation() {
        let cfg: MappingConfig = serde_json::from_str(r#"{"constraint":"conservative"}"#).unwrap();
        assert_eq!(cfg.method, MappingMethodKind::NearestProjection);
        assert_eq!(cfg.constraint, Constraint::Conservative);
        assert_eq!(cfg.dimensions, 3);
        cfg.validate().unwrap();

        let bad = MappingConfig {
            dimensions: 4,
            ..MappingConfig::default()
        };
        assert!(matches!(bad.validate(), Err(CouplingError::InvalidConfiguration(_))));
        assert!(bad.build(Arc::new(SpatialIndexCache::new())).is_err());
    }

    #[test]
    fn build_dispatches_on_method() {
        let cache = Arc::new(SpatialIndexCache::new());
        let cfg = MappingConfig {
            method: MappingMethodKind::NearestNeighbor,
            constraint: Constraint::Consistent,
            dimensions: 2,
        };
        let mapping = cfg.build(cache).unwrap();
        assert!(matches!(mapping, MappingMethod::NearestNeighbor(_)));
        assert_eq!(mapping.dimensions(), 2);
        assert_eq!(mapping.input_requirement(), MeshRequirement::Vertex);
        assert!(!mapping.has_computed_mapping());
    }

    #[test]
    fn unattached_mapping_reports_missing_mesh() {
        let cache = Arc::new(SpatialIndexCache::new());
        let mut mapping = MappingConfig::default().build(cache).unwrap();
        assert_eq!(mapping.compute_mapping(), Err(CouplingError::MissingMesh("input")));
    }
}
