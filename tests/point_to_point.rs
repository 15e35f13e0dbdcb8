//! Two participants exchanging vertex data: A on communicator ranks 0 and 1,
//! B on ranks 2 and 3.

use mesh_coupling::algs::communicator::{LocalComm, broadcast_receive, broadcast_send};
use mesh_coupling::algs::point_to_point::{PointToPointCommunication, VertexDistribution};
use std::thread;

fn dist(entries: &[(usize, &[usize])]) -> VertexDistribution {
    entries.iter().map(|(r, v)| (*r, v.to_vec())).collect()
}

fn a_distribution() -> VertexDistribution {
    dist(&[(0, &[0, 1, 3, 5, 7]), (1, &[1, 2, 4, 5, 6])])
}

fn a_values(rank: usize) -> Vec<f64> {
    match rank {
        0 => vec![10.0, 20.0, 40.0, 60.0, 80.0],
        _ => vec![20.0, 30.0, 50.0, 60.0, 70.0],
    }
}

/// Runs A -> B, B adds `rank + 1`, B -> A. Returns what B received and what
/// A got back, both per local rank.
fn round_trip(b: &VertexDistribution) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
    let a = a_distribution();
    let world = LocalComm::world(4);
    thread::scope(|s| {
        let a_side: Vec<_> = (0..2)
            .map(|rank| {
                let p2p = PointToPointCommunication::new(world[rank].clone(), rank, &a, b)
                    .with_remote_offset(2);
                let a = &a;
                s.spawn(move || {
                    p2p.send(&a_values(rank), 1);
                    let mut back = vec![-1.0; a[&rank].len()];
                    p2p.receive(&mut back, 1).unwrap();
                    back
                })
            })
            .collect();
        let b_side: Vec<_> = (0..2)
            .map(|rank| {
                let p2p = PointToPointCommunication::new(world[2 + rank].clone(), rank, b, &a);
                s.spawn(move || {
                    let mut got = vec![-1.0; b[&rank].len()];
                    p2p.receive(&mut got, 1).unwrap();
                    let reply: Vec<f64> = got.iter().map(|v| v + (rank + 1) as f64).collect();
                    p2p.send(&reply, 1);
                    got
                })
            })
            .collect();
        let received: Vec<Vec<f64>> = b_side.into_iter().map(|h| h.join().unwrap()).collect();
        let returned: Vec<Vec<f64>> = a_side.into_iter().map(|h| h.join().unwrap()).collect();
        (received, returned)
    })
}

#[test]
fn overlapping_distributions_sum_shared_vertices() {
    let b = dist(&[(0, &[1, 2, 5, 6]), (1, &[0, 1, 3, 4, 5, 7])]);
    let (received, returned) = round_trip(&b);
    assert_eq!(received[0], vec![40.0, 30.0, 120.0, 70.0]);
    assert_eq!(received[1], vec![10.0, 40.0, 40.0, 50.0, 120.0, 80.0]);
    assert_eq!(returned[0], vec![12.0, 83.0, 42.0, 243.0, 82.0]);
    assert_eq!(returned[1], vec![83.0, 31.0, 52.0, 243.0, 71.0]);
}

#[test]
fn vertex_without_remote_owner_stays_zero() {
    let b = dist(&[(0, &[1, 3, 5, 6]), (1, &[0, 1, 3, 4, 5, 7])]);
    let (received, returned) = round_trip(&b);
    assert_eq!(received[0], vec![40.0, 40.0, 120.0, 70.0]);
    assert_eq!(returned[0], vec![12.0, 83.0, 83.0, 243.0, 82.0]);
    assert_eq!(returned[1], vec![83.0, 0.0, 52.0, 243.0, 71.0]);
}

#[test]
fn connected_ranks_only_cover_shared_vertices() {
    let a = a_distribution();
    let b = dist(&[(0, &[0, 3]), (1, &[2, 4]), (2, &[9])]);
    let world = LocalComm::world(1);
    let p2p = PointToPointCommunication::new(world[0].clone(), 0, &a, &b);
    assert_eq!(p2p.connected_ranks(), vec![0]);
    let p2p = PointToPointCommunication::new(world[0].clone(), 1, &a, &b);
    assert_eq!(p2p.connected_ranks(), vec![1]);
}

#[test]
fn distributions_can_be_broadcast_before_the_exchange() {
    let world = LocalComm::world(3);
    let flat: Vec<u64> = vec![0, 1, 3, 5, 7];
    broadcast_send(&world[0], 9, &flat);
    for comm in &world[1..] {
        let mut out = vec![0u64; flat.len()];
        broadcast_receive(comm, 0, 9, &mut out).unwrap();
        assert_eq!(out, flat);
    }
}
