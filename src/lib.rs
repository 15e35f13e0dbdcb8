#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-coupling
//!
//! mesh-coupling holds the numerical core of a partitioned multi-physics
//! coupling library: the acceleration of implicit coupling iterations, the
//! mapping of data between non-matching surface meshes, and the
//! point-to-point exchange of vertex data between partitioned participants.
//!
//! ## Features
//! - Interface quasi-Newton acceleration (IQN-ILS) with incremental QR
//!   factorization, column filtering, history reuse over time windows and
//!   block preconditioning; constant and Aitken under-relaxation
//! - Nearest-projection and nearest-neighbour mappings in 2D and 3D, with
//!   consistent and conservative constraints
//! - R-tree spatial indices per mesh, built lazily and shared through a cache
//! - Pluggable communication backends (no-op, in-process, MPI) for vertex
//!   data, meshes and bounding boxes
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-coupling = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "strict-invariants"]
//! ```
//!
//! Acceleration and mapping are configured through `serde` records
//! ([`acceleration::AccelerationConfig`], [`mapping::MappingConfig`]) whose
//! `build` methods validate the record and return the configured scheme.
//!
//! ## Determinism
//!
//! Acceleration and mapping are pure rank-local computations. Ties in the
//! spatial queries are broken by element index, so repeated runs produce
//! bit-identical weights. Tests that draw random meshes use fixed
//! `SmallRng` seeds.
//!
//! ## Logging
//!
//! The crate logs through the `log` facade and never installs a logger:
//! `debug` for per-call traces, `info` for time window transitions and
//! history resets, `warn` for numerical fall-backs.

pub mod acceleration;
pub mod algs;
pub mod coupling_error;
pub mod data;
pub mod debug_invariants;
pub mod geometry;
pub mod mapping;
pub mod topology;

pub use coupling_error::CouplingError;
pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::acceleration::{
        Accelerate, Acceleration, AccelerationConfig, AccelerationKind, IqnIls,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    pub use crate::algs::point_to_point::{PointToPointCommunication, VertexDistribution};
    pub use crate::coupling_error::CouplingError;
    pub use crate::data::coupling_data::{CouplingData, DataId, DataMap};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::geometry::bounding_box::Box3d;
    pub use crate::geometry::spatial_index::SpatialIndexCache;
    pub use crate::mapping::{Constraint, Mapping, MappingConfig, MappingMethod};
    pub use crate::topology::mesh::{Mesh, MeshHandle, MeshId};
}
