//! Shipping mesh partitions and their bounding boxes between ranks.
//!
//! A mesh travels as one message: [`WireMeshCounts`] followed by the vertex,
//! edge and triangle records. The receiver rebuilds the mesh through the
//! regular constructors, so malformed connectivity is rejected the same way
//! as locally created meshes.

use crate::algs::communicator::{Communicator, Wait, receive_vec};
use crate::algs::wire::{
    WireBox, WireCount, WireEdge, WireHdr, WireMeshCounts, WireTriangle, WireVertex,
    decode_records, expect_exact_len, kind,
};
use crate::coupling_error::CouplingError;
use crate::geometry::bounding_box::Box3d;
use crate::topology::mesh::{Mesh, MeshId};
use bytemuck::cast_slice;
use std::mem::size_of;

/// Sends vertices (with global indices), edges and triangles of `mesh`.
pub fn send_mesh<C: Communicator>(comm: &C, peer: usize, tag: u16, mesh: &Mesh) {
    let counts = WireMeshCounts {
        hdr: WireHdr::new(kind::MESH),
        dimensions: WireCount::new(mesh.dimensions()),
        vertices: WireCount::new(mesh.vertices().len()),
        edges: WireCount::new(mesh.edges().len()),
        triangles: WireCount::new(mesh.triangles().len()),
    };
    let vertices: Vec<WireVertex> = mesh
        .vertices()
        .iter()
        .map(|v| WireVertex::new(v.coords().coords.into(), v.global_index()))
        .collect();
    let edges: Vec<WireEdge> = mesh.edges().iter().map(|e| WireEdge::new(e.vertices())).collect();
    let triangles: Vec<WireTriangle> = mesh
        .triangles()
        .iter()
        .map(|t| WireTriangle::new([t.edge(0), t.edge(1), t.edge(2)]))
        .collect();

    let mut bytes = Vec::with_capacity(
        size_of::<WireMeshCounts>()
            + vertices.len() * size_of::<WireVertex>()
            + edges.len() * size_of::<WireEdge>()
            + triangles.len() * size_of::<WireTriangle>(),
    );
    bytes.extend_from_slice(cast_slice(&[counts]));
    bytes.extend_from_slice(cast_slice(&vertices));
    bytes.extend_from_slice(cast_slice(&edges));
    bytes.extend_from_slice(cast_slice(&triangles));
    log::debug!(
        "sending mesh \"{}\" to rank {peer}: {} vertices, {} edges, {} triangles",
        mesh.name(),
        vertices.len(),
        edges.len(),
        triangles.len()
    );
    comm.isend(peer, tag, &bytes).wait();
}

/// Receives a mesh sent with [`send_mesh`] and rebuilds it as `id`/`name`.
pub fn receive_mesh<C: Communicator>(
    comm: &C,
    peer: usize,
    tag: u16,
    id: MeshId,
    name: &str,
) -> Result<Mesh, CouplingError> {
    let bytes: Vec<u8> = receive_vec(comm, peer, tag)?;
    let head = size_of::<WireMeshCounts>();
    if bytes.len() < head {
        return Err(CouplingError::WireError(format!(
            "mesh message of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    let counts: WireMeshCounts = bytemuck::pod_read_unaligned(&bytes[..head]);
    counts.hdr.check_kind(kind::MESH)?;
    let (nv, ne, nt) = (
        counts.vertices.get(),
        counts.edges.get(),
        counts.triangles.get(),
    );
    let v_end = head + nv * size_of::<WireVertex>();
    let e_end = v_end + ne * size_of::<WireEdge>();
    expect_exact_len(bytes.len(), e_end + nt * size_of::<WireTriangle>())?;

    let dims = counts.dimensions.get();
    if dims != 2 && dims != 3 {
        return Err(CouplingError::WireError(format!(
            "mesh dimension {dims} is not supported"
        )));
    }
    let mut mesh = Mesh::new(id, name, dims);
    for v in decode_records::<WireVertex>(&bytes[head..v_end])? {
        let coords = v.coords();
        let index = mesh.create_vertex(&coords[..dims])?;
        if let Some(g) = v.global() {
            mesh.vertices_mut()[index].set_global_index(g);
        }
    }
    for e in decode_records::<WireEdge>(&bytes[v_end..e_end])? {
        let [a, b] = e.vertices();
        mesh.create_edge(a, b)?;
    }
    for t in decode_records::<WireTriangle>(&bytes[e_end..])? {
        let [e0, e1, e2] = t.edges();
        mesh.create_triangle(e0, e1, e2)?;
    }
    log::debug!("received mesh \"{name}\" from rank {peer}: {nv} vertices, {ne} edges, {nt} triangles");
    Ok(mesh)
}

pub fn send_bounding_box<C: Communicator>(comm: &C, peer: usize, tag: u16, bb: &Box3d) {
    comm.isend(peer, tag, cast_slice(&[WireBox::new(bb)])).wait();
}

pub fn receive_bounding_box<C: Communicator>(
    comm: &C,
    peer: usize,
    tag: u16,
) -> Result<Box3d, CouplingError> {
    let records: Vec<WireBox> = receive_vec(comm, peer, tag)?;
    match records.as_slice() {
        [record] => {
            record.hdr.check_kind(kind::BOUNDING_BOX)?;
            Ok(record.to_box())
        }
        _ => Err(CouplingError::WireError(format!(
            "expected one bounding box, got {}",
            records.len()
        ))),
    }
}
