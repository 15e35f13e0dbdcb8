//! Geometric kernels: bounding boxes, projections and spatial indices.

pub mod bounding_box;
pub mod projection;
pub mod spatial_index;

pub use bounding_box::Box3d;
pub use projection::{InterpolationElement, InterpolationElements};
pub use spatial_index::{MeshIndex, SpatialIndexCache};
