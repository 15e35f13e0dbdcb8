//! Thin façade over intra-process or inter-process (MPI) message passing.
//!
//! Messages are contiguous byte slices, matched by (source, destination,
//! tag) and delivered in send order. All handles are waitable; the blocking
//! helpers [`send`], [`receive`] and [`broadcast_send`]/[`broadcast_receive`]
//! move `bytemuck::Pod` slices and report failures as
//! [`CouplingError::CommError`].

use crate::algs::wire::decode_records;
use crate::coupling_error::{CommFailure, CouplingError};
use bytemuck::Pod;
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Non-blocking communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of this endpoint.
    fn rank(&self) -> usize;
    /// Number of ranks reachable through this communicator.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Waits for completion and returns the received bytes (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// A handle that completed when it was created.
#[derive(Debug, Default)]
pub struct Ready(Option<Vec<u8>>);

impl Wait for Ready {
    fn wait(self) -> Option<Vec<u8>> {
        self.0
    }
}

/// No-op communicator for single-rank runs: sends vanish, receives yield nothing.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = Ready;
    type RecvHandle = Ready;

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) -> Ready {
        Ready(None)
    }

    fn irecv(&self, _peer: usize, _tag: u16) -> Ready {
        Ready(None)
    }
}

// --- LocalComm: ranks as threads of one process ---

type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

static GLOBAL_MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(DashMap::new()));

/// Interval between two polls of a pending receive.
pub const RETRY_INTERVAL: Duration = Duration::from_micros(50);

/// In-process communicator. Endpoints sharing a mailbox form one world.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Endpoint `rank` of a world of `size` ranks on the process-wide mailbox.
    pub fn new(rank: usize, size: usize) -> Self {
        assert!(rank < size, "rank {rank} out of range for {size} ranks");
        Self {
            rank,
            size,
            mailbox: Arc::clone(&GLOBAL_MAILBOX),
        }
    }

    /// All endpoints of a fresh world of `size` ranks with a private mailbox.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// Messages sent but not yet received, over all keys.
    pub fn pending(&self) -> usize {
        self.mailbox.iter().map(|q| q.len()).sum()
    }
}

/// Pending receive on a [`LocalComm`] mailbox.
#[derive(Debug)]
pub struct LocalRecv {
    mailbox: Arc<Mailbox>,
    key: Key,
}

impl LocalRecv {
    fn try_take(&self) -> Option<Bytes> {
        let mut queue = self.mailbox.get_mut(&self.key)?;
        queue.pop_front()
    }
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(bytes) = self.try_take() {
                return Some(bytes.to_vec());
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = Ready;
    type RecvHandle = LocalRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Ready {
        self.mailbox
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
        Ready(None)
    }

    fn irecv(&self, peer: usize, tag: u16) -> LocalRecv {
        LocalRecv {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Ready};
    use crate::coupling_error::CouplingError;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// Communicator over `MPI_COMM_WORLD`. Sends are standard-mode and
    /// complete before `isend` returns; receives block in `irecv`.
    pub struct MpiComm {
        pub world: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, CouplingError> {
            let universe = mpi::initialize().ok_or_else(|| {
                CouplingError::InvalidConfiguration("MPI was already initialized".into())
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: universe,
            })
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = Ready;
        type RecvHandle = Ready;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Ready {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, i32::from(tag));
            Ready(None)
        }

        fn irecv(&self, peer: usize, tag: u16) -> Ready {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(i32::from(tag));
            Ready(Some(data))
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

fn comm_error(neighbor: usize, msg: impl Into<CommFailure>) -> CouplingError {
    CouplingError::CommError {
        neighbor,
        source: msg.into(),
    }
}

/// Sends `values` to `peer` and waits for local completion.
pub fn send<C: Communicator, T: Pod>(comm: &C, peer: usize, tag: u16, values: &[T]) {
    comm.isend(peer, tag, bytemuck::cast_slice(values)).wait();
}

/// Receives exactly `out.len()` values from `peer`.
pub fn receive<C: Communicator, T: Pod>(
    comm: &C,
    peer: usize,
    tag: u16,
    out: &mut [T],
) -> Result<(), CouplingError> {
    let bytes = comm
        .irecv(peer, tag)
        .wait()
        .ok_or_else(|| comm_error(peer, "no message received"))?;
    let expected = std::mem::size_of_val(out);
    if bytes.len() != expected {
        return Err(comm_error(
            peer,
            format!("expected {expected} bytes, got {}", bytes.len()),
        ));
    }
    bytemuck::cast_slice_mut::<T, u8>(out).copy_from_slice(&bytes);
    Ok(())
}

/// Receives a message of unknown length as whole `T` records.
pub fn receive_vec<C: Communicator, T: Pod>(
    comm: &C,
    peer: usize,
    tag: u16,
) -> Result<Vec<T>, CouplingError> {
    let bytes = comm
        .irecv(peer, tag)
        .wait()
        .ok_or_else(|| comm_error(peer, "no message received"))?;
    decode_records(&bytes).map_err(|e| comm_error(peer, e.to_string()))
}

/// Sends `values` to every other rank.
pub fn broadcast_send<C: Communicator, T: Pod>(comm: &C, tag: u16, values: &[T]) {
    let handles: Vec<_> = (0..comm.size())
        .filter(|&peer| peer != comm.rank())
        .map(|peer| comm.isend(peer, tag, bytemuck::cast_slice(values)))
        .collect();
    for h in handles {
        h.wait();
    }
}

/// Receives a broadcast of `out.len()` values from `root`.
pub fn broadcast_receive<C: Communicator, T: Pod>(
    comm: &C,
    root: usize,
    tag: u16,
    out: &mut [T],
) -> Result<(), CouplingError> {
    receive(comm, root, tag, out)
}
