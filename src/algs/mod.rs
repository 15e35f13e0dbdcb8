//! Communication between ranks and participants.

pub mod communicator;
pub mod mesh_exchange;
pub mod point_to_point;
pub mod wire;

pub use communicator::{Communicator, LocalComm, NoComm, Wait};
pub use point_to_point::{PointToPointCommunication, VertexDistribution};
