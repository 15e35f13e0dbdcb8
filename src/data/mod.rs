//! Coupling data handed between the coupling scheme and the acceleration.

pub mod coupling_data;

pub use coupling_data::{CouplingData, DataId, DataMap};
