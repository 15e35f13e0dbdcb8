#![allow(dead_code)]
use mesh_coupling::data::coupling_data::{CouplingData, DataId, DataMap};
use mesh_coupling::topology::mesh::{Mesh, MeshId};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// Unit square `[0,1]^2` at `z = 0`, `n x n` cells, two triangles per cell,
/// with one scalar data field `data`.
pub fn triangulated_square(id: u32, n: usize, data: DataId) -> Mesh {
    let mut mesh = Mesh::new(MeshId(id), format!("Square{id}"), 3);
    let h = 1.0 / n as f64;
    for j in 0..=n {
        for i in 0..=n {
            mesh.create_vertex(&[i as f64 * h, j as f64 * h, 0.0]).unwrap();
        }
    }
    let vid = |i: usize, j: usize| j * (n + 1) + i;
    let mut edges: HashMap<(usize, usize), usize> = HashMap::new();
    let mut edge = |mesh: &mut Mesh, a: usize, b: usize| -> usize {
        let key = (a.min(b), a.max(b));
        *edges
            .entry(key)
            .or_insert_with(|| mesh.create_edge(key.0, key.1).unwrap())
    };
    for j in 0..n {
        for i in 0..n {
            let (a, b, c, d) = (vid(i, j), vid(i + 1, j), vid(i + 1, j + 1), vid(i, j + 1));
            let (ab, bc, ca) = (edge(&mut mesh, a, b), edge(&mut mesh, b, c), edge(&mut mesh, c, a));
            mesh.create_triangle(ab, bc, ca).unwrap();
            let (cd, da) = (edge(&mut mesh, c, d), edge(&mut mesh, d, a));
            mesh.create_triangle(ca, cd, da).unwrap();
        }
    }
    mesh.create_data(data, "Field", 1);
    mesh.allocate_data_values();
    mesh
}

/// Vertex-only mesh of `count` points drawn from `[lo, hi]^2 x [-dz, dz]`.
pub fn random_cloud(id: u32, count: usize, seed: u64, lo: f64, hi: f64, dz: f64, data: DataId) -> Mesh {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut mesh = Mesh::new(MeshId(id), format!("Cloud{id}"), 3);
    for _ in 0..count {
        let p = [
            rng.gen_range(lo..=hi),
            rng.gen_range(lo..=hi),
            if dz > 0.0 { rng.gen_range(-dz..=dz) } else { 0.0 },
        ];
        mesh.create_vertex(&p).unwrap();
    }
    mesh.create_data(data, "Field", 1);
    mesh.allocate_data_values();
    mesh
}

/// Data map with one block per `(id, values)` pair, previous iterate zero.
pub fn data_map(blocks: &[(u32, &[f64])]) -> DataMap {
    blocks
        .iter()
        .map(|(id, v)| (DataId(*id), CouplingData::from_values(v.to_vec(), 1)))
        .collect()
}

pub fn set_values(data: &mut DataMap, id: u32, values: &[f64]) {
    data.get_mut(&DataId(id))
        .unwrap()
        .values
        .copy_from_slice(values);
}

pub fn assert_close(got: f64, want: f64, tol: f64) {
    assert!((got - want).abs() <= tol, "got {got}, want {want} (tol {tol})");
}
