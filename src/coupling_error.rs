//! CouplingError: Unified error type for mesh-coupling public APIs
//!
//! Configuration problems, missing coupling data, degenerate meshes and
//! communication failures are all reported through this type. Numerical
//! degeneracy inside the acceleration (rank deficiency, empty history) is
//! never an error; it is handled by falling back to relaxation.

use crate::data::coupling_data::DataId;
use crate::topology::mesh::MeshId;
use thiserror::Error;

/// Unified error type for mesh-coupling operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CouplingError {
    /// A configured data ID is not present in the data map handed to the acceleration.
    #[error("coupling data with id {id} is required by the acceleration but was not provided")]
    MissingData { id: DataId },
    /// A configuration value is outside of its admissible range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// `values` and `old_values` of a coupling data block disagree in length.
    #[error("data {id}: expected {expected} entries, found {found}")]
    DataSizeMismatch {
        id: DataId,
        expected: usize,
        found: usize,
    },
    /// A mapping was asked to project onto a mesh without any vertex.
    #[error("mesh \"{mesh}\" does not contain any vertex to map onto")]
    EmptyMesh { mesh: String },
    /// A mapping was used before input and output meshes were attached.
    #[error("mapping has no {0} mesh attached")]
    MissingMesh(&'static str),
    /// `map` was called before `compute_mapping`.
    #[error("mapping from \"{from}\" to \"{to}\" has not been computed")]
    MappingNotComputed { from: String, to: String },
    /// Mesh data lookup failed.
    #[error("mesh {mesh:?} has no data with id {id}")]
    MissingMeshData { mesh: MeshId, id: DataId },
    /// Input and output data of a mapping differ in their value dimension.
    #[error("data dimension mismatch: input {input}, output {output}")]
    DataDimensionMismatch { input: usize, output: usize },
    /// An edge referenced a vertex index outside of the mesh.
    #[error("edge references vertex {vertex}, but mesh \"{mesh}\" has only {count} vertices")]
    InvalidEdge {
        mesh: String,
        vertex: usize,
        count: usize,
    },
    /// Three edges do not form a closed triangle.
    #[error("edges {edges:?} of mesh \"{mesh}\" do not form a triangle")]
    InvalidTriangle { mesh: String, edges: [usize; 3] },
    /// Vertex coordinates do not match the mesh dimension.
    #[error("mesh \"{mesh}\" is {expected}-dimensional, got a {found}-dimensional vertex")]
    CoordinateDimension {
        mesh: String,
        expected: usize,
        found: usize,
    },
    /// Point-to-point communication with a neighbour failed.
    #[error("communication with rank {neighbor} failed: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: CommFailure,
    },
    /// A wire record did not decode.
    #[error("malformed wire payload: {0}")]
    WireError(String),
}

/// Reason of a communication failure, kept as a message so the error stays `Clone`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CommFailure(pub String);

impl From<String> for CommFailure {
    fn from(s: String) -> Self {
        CommFailure(s)
    }
}

impl From<&str> for CommFailure {
    fn from(s: &str) -> Self {
        CommFailure(s.to_owned())
    }
}
