//! Point-to-point exchange of vertex data between two partitioned participants.
//!
//! Both participants know how the coupling mesh is spread over their own
//! ranks and over the remote ranks, as a [`VertexDistribution`]
//! (`rank -> global vertex indices`, in local storage order). A local rank
//! talks only to the remote ranks it shares vertices with. Values travel in
//! ascending global index order, so both sides agree on the layout without
//! further handshakes.
//!
//! Receiving zeroes the buffer and sums the contributions of all remote
//! ranks; a vertex held by several remote ranks therefore receives the sum,
//! one held by none stays zero.

use crate::algs::communicator::{Communicator, Wait, receive};
use crate::coupling_error::CouplingError;
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};

/// Global vertex indices per rank.
pub type VertexDistribution = BTreeMap<usize, Vec<usize>>;

/// Tag of vertex value messages unless overridden.
pub const VALUES_TAG: u16 = 0x50;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Route {
    remote_rank: usize,
    /// Local vertex positions, ordered by global index.
    indices: Vec<usize>,
}

/// Communication plan of one local rank.
#[derive(Debug)]
pub struct PointToPointCommunication<C: Communicator> {
    comm: C,
    local_rank: usize,
    local_vertices: usize,
    remote_offset: usize,
    tag: u16,
    routes: Vec<Route>,
}

impl<C: Communicator> PointToPointCommunication<C> {
    /// Builds the plan of `local_rank` from both distributions.
    pub fn new(
        comm: C,
        local_rank: usize,
        local: &VertexDistribution,
        remote: &VertexDistribution,
    ) -> Self {
        let globals = local.get(&local_rank).map_or(&[][..], Vec::as_slice);
        let position: HashMap<usize, usize> =
            globals.iter().enumerate().map(|(i, &g)| (g, i)).collect();
        let routes: Vec<Route> = remote
            .iter()
            .filter_map(|(&remote_rank, remote_globals)| {
                let indices: Vec<usize> = remote_globals
                    .iter()
                    .filter_map(|g| position.get(g).map(|&i| (*g, i)))
                    .sorted_unstable()
                    .dedup()
                    .map(|(_, i)| i)
                    .collect();
                (!indices.is_empty()).then_some(Route {
                    remote_rank,
                    indices,
                })
            })
            .collect();
        log::debug!(
            "rank {local_rank}: point-to-point plan with {} of {} remote ranks",
            routes.len(),
            remote.len()
        );
        Self {
            comm,
            local_rank,
            local_vertices: globals.len(),
            remote_offset: 0,
            tag: VALUES_TAG,
            routes,
        }
    }

    /// Remote rank `r` is reached as communicator rank `offset + r`.
    pub fn with_remote_offset(mut self, offset: usize) -> Self {
        self.remote_offset = offset;
        self
    }

    pub fn with_tag(mut self, tag: u16) -> Self {
        self.tag = tag;
        self
    }

    pub fn local_rank(&self) -> usize {
        self.local_rank
    }

    /// Remote ranks this rank exchanges data with, ascending.
    pub fn connected_ranks(&self) -> Vec<usize> {
        self.routes.iter().map(|r| r.remote_rank).collect()
    }

    fn check_len(&self, len: usize, value_dimension: usize) {
        assert_eq!(
            len,
            self.local_vertices * value_dimension,
            "rank {} holds {} vertices of dimension {value_dimension}",
            self.local_rank,
            self.local_vertices
        );
    }

    /// Ships the values of every shared vertex to the remote ranks holding it.
    ///
    /// # Panics
    /// Panics if `values` does not hold `value_dimension` entries per local vertex.
    pub fn send(&self, values: &[f64], value_dimension: usize) {
        self.check_len(values.len(), value_dimension);
        let handles: Vec<_> = self
            .routes
            .iter()
            .map(|route| {
                let buffer: Vec<f64> = route
                    .indices
                    .iter()
                    .flat_map(|&i| &values[i * value_dimension..(i + 1) * value_dimension])
                    .copied()
                    .collect();
                self.comm.isend(
                    self.remote_offset + route.remote_rank,
                    self.tag,
                    bytemuck::cast_slice(&buffer),
                )
            })
            .collect();
        for h in handles {
            h.wait();
        }
    }

    /// Zeroes `values` and accumulates the contributions of all remote ranks.
    ///
    /// # Panics
    /// Panics if `values` does not hold `value_dimension` entries per local vertex.
    pub fn receive(&self, values: &mut [f64], value_dimension: usize) -> Result<(), CouplingError> {
        self.check_len(values.len(), value_dimension);
        values.fill(0.0);
        for route in &self.routes {
            let mut buffer = vec![0.0f64; route.indices.len() * value_dimension];
            receive(
                &self.comm,
                self.remote_offset + route.remote_rank,
                self.tag,
                &mut buffer,
            )?;
            for (&i, chunk) in route.indices.iter().zip(buffer.chunks_exact(value_dimension)) {
                for (v, c) in values[i * value_dimension..].iter_mut().zip(chunk) {
                    *v += c;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};

    fn dist(entries: &[(usize, &[usize])]) -> VertexDistribution {
        entries.iter().map(|(r, v)| (*r, v.to_vec())).collect()
    }

    #[test]
    fn routes_follow_global_order() {
        let local = dist(&[(0, &[7, 3, 5])]);
        let remote = dist(&[(0, &[5, 7]), (1, &[1, 2]), (2, &[3])]);
        let p2p = PointToPointCommunication::new(NoComm, 0, &local, &remote);
        assert_eq!(p2p.connected_ranks(), vec![0, 2]);
        assert_eq!(p2p.routes[0].indices, vec![2, 0]);
        assert_eq!(p2p.routes[1].indices, vec![1]);
    }

    #[test]
    fn vector_values_are_summed() {
        let world = LocalComm::world(3);
        let a = dist(&[(0, &[0, 1]), (1, &[1])]);
        let b = dist(&[(0, &[1, 0, 9])]);
        let a0 = PointToPointCommunication::new(world[0].clone(), 0, &a, &b).with_remote_offset(2);
        let a1 = PointToPointCommunication::new(world[1].clone(), 1, &a, &b).with_remote_offset(2);
        let b0 = PointToPointCommunication::new(world[2].clone(), 0, &b, &a);
        a0.send(&[1.0, 2.0, 3.0, 4.0], 2);
        a1.send(&[10.0, 20.0], 2);
        let mut out = [-1.0; 6];
        b0.receive(&mut out, 2).unwrap();
        assert_eq!(out, [13.0, 24.0, 1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "holds 2 vertices")]
    fn wrong_buffer_length_panics() {
        let local = dist(&[(0, &[0, 1])]);
        let p2p = PointToPointCommunication::new(NoComm, 0, &local, &VertexDistribution::new());
        p2p.send(&[0.0; 3], 1);
    }
}
