//! Coupling mesh topology.

pub mod mesh;

pub use mesh::{Edge, Mesh, MeshData, MeshHandle, MeshId, Triangle, Vertex};
