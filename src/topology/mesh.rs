//! Read-mostly surface mesh consumed by the mappings.
//!
//! A [`Mesh`] is an ordered list of vertices plus edges (pairs of vertex
//! indices) and triangles (triples of edge indices). Entities are addressed
//! by their position in these lists; the position doubles as the entity ID.
//! Vertices additionally carry an optional global index, which is unique
//! across the ranks of a participant and drives point-to-point exchange.
//!
//! Coordinates are always stored as 3D points. Two-dimensional meshes keep
//! `z = 0`, so the same geometric kernels and spatial indices serve both.
//!
//! Meshes are shared between the mappings of a participant through a
//! [`MeshHandle`]. Any mutation of the vertex, edge or triangle sets must be
//! followed by [`SpatialIndexCache::clear`](crate::geometry::spatial_index::SpatialIndexCache::clear)
//! for this mesh, otherwise stale geometry is queried.

use crate::coupling_error::CouplingError;
use crate::data::coupling_data::DataId;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::bounding_box::Box3d;
use nalgebra::{DVector, Point3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stable identity of a mesh; keys the spatial index cache.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MeshId(pub u32);

/// Shared, lockable mesh as held by mappings.
pub type MeshHandle = Arc<RwLock<Mesh>>;

/// A mesh vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct Vertex {
    id: usize,
    coords: Point3<f64>,
    global_index: Option<usize>,
    tagged: bool,
}

impl Vertex {
    /// Position of the vertex in its mesh.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Coordinates, padded with `z = 0` for 2D meshes.
    #[inline]
    pub fn coords(&self) -> &Point3<f64> {
        &self.coords
    }

    #[inline]
    pub fn global_index(&self) -> Option<usize> {
        self.global_index
    }

    pub fn set_global_index(&mut self, index: usize) {
        self.global_index = Some(index);
    }

    /// Whether a mapping marked this vertex as contributing to a target.
    #[inline]
    pub fn is_tagged(&self) -> bool {
        self.tagged
    }

    pub fn tag(&mut self) {
        self.tagged = true;
    }

    pub fn untag(&mut self) {
        self.tagged = false;
    }
}

/// Edge between two vertices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    id: usize,
    vertices: [usize; 2],
}

impl Edge {
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn vertex(&self, i: usize) -> usize {
        self.vertices[i]
    }

    #[inline]
    pub fn vertices(&self) -> [usize; 2] {
        self.vertices
    }
}

/// Triangle made of three edges.
///
/// Vertices 0 and 1 are the first and second vertex of edge 0, vertex 2 is
/// the vertex of edge 1 not shared with edge 0. Edge 2 must connect vertex 2
/// with the vertex of edge 0 not shared with edge 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Triangle {
    id: usize,
    edges: [usize; 3],
    vertices: [usize; 3],
}

impl Triangle {
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn edge(&self, i: usize) -> usize {
        self.edges[i]
    }

    #[inline]
    pub fn vertex(&self, i: usize) -> usize {
        self.vertices[i]
    }

    #[inline]
    pub fn vertices(&self) -> [usize; 3] {
        self.vertices
    }
}

/// Values of one data field living on the mesh vertices.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    id: DataId,
    name: String,
    dimension: usize,
    values: DVector<f64>,
}

impl MeshData {
    #[inline]
    pub fn id(&self) -> DataId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    #[inline]
    pub fn values_mut(&mut self) -> &mut DVector<f64> {
        &mut self.values
    }
}

/// Vertices, edges, triangles and data fields of one coupling mesh.
#[derive(Clone, Debug)]
pub struct Mesh {
    id: MeshId,
    name: String,
    dimensions: usize,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    triangles: Vec<Triangle>,
    data: Vec<MeshData>,
}

impl Mesh {
    /// Creates an empty mesh.
    ///
    /// # Panics
    /// Panics unless `dimensions` is 2 or 3.
    pub fn new(id: MeshId, name: impl Into<String>, dimensions: usize) -> Self {
        assert!(
            dimensions == 2 || dimensions == 3,
            "mesh dimensions must be 2 or 3, got {dimensions}"
        );
        Self {
            id,
            name: name.into(),
            dimensions,
            vertices: Vec::new(),
            edges: Vec::new(),
            triangles: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Wraps the mesh into a shareable handle.
    pub fn into_handle(self) -> MeshHandle {
        Arc::new(RwLock::new(self))
    }

    #[inline]
    pub fn id(&self) -> MeshId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[inline]
    pub fn vertices_mut(&mut self) -> &mut [Vertex] {
        &mut self.vertices
    }

    #[inline]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Appends a vertex and returns its index.
    pub fn create_vertex(&mut self, coords: &[f64]) -> Result<usize, CouplingError> {
        if coords.len() != self.dimensions {
            return Err(CouplingError::CoordinateDimension {
                mesh: self.name.clone(),
                expected: self.dimensions,
                found: coords.len(),
            });
        }
        let z = if self.dimensions == 3 { coords[2] } else { 0.0 };
        let id = self.vertices.len();
        self.vertices.push(Vertex {
            id,
            coords: Point3::new(coords[0], coords[1], z),
            global_index: None,
            tagged: false,
        });
        Ok(id)
    }

    /// Appends an edge between two existing vertices and returns its index.
    pub fn create_edge(&mut self, a: usize, b: usize) -> Result<usize, CouplingError> {
        for v in [a, b] {
            if v >= self.vertices.len() {
                return Err(CouplingError::InvalidEdge {
                    mesh: self.name.clone(),
                    vertex: v,
                    count: self.vertices.len(),
                });
            }
        }
        let id = self.edges.len();
        self.edges.push(Edge {
            id,
            vertices: [a, b],
        });
        Ok(id)
    }

    /// Appends a triangle from three existing edges and returns its index.
    pub fn create_triangle(
        &mut self,
        e0: usize,
        e1: usize,
        e2: usize,
    ) -> Result<usize, CouplingError> {
        let invalid = || CouplingError::InvalidTriangle {
            mesh: self.name.clone(),
            edges: [e0, e1, e2],
        };
        let (Some(a), Some(b), Some(c)) = (self.edges.get(e0), self.edges.get(e1), self.edges.get(e2))
        else {
            return Err(invalid());
        };
        let vertices =
            triangle_vertices([a.vertices, b.vertices, c.vertices]).ok_or_else(invalid)?;
        let id = self.triangles.len();
        self.triangles.push(Triangle {
            id,
            edges: [e0, e1, e2],
            vertices,
        });
        Ok(id)
    }

    /// Endpoints of an edge.
    pub fn edge_points(&self, edge: &Edge) -> [&Point3<f64>; 2] {
        [
            self.vertices[edge.vertices[0]].coords(),
            self.vertices[edge.vertices[1]].coords(),
        ]
    }

    /// Corners of a triangle in vertex order.
    pub fn triangle_points(&self, triangle: &Triangle) -> [&Point3<f64>; 3] {
        [
            self.vertices[triangle.vertices[0]].coords(),
            self.vertices[triangle.vertices[1]].coords(),
            self.vertices[triangle.vertices[2]].coords(),
        ]
    }

    /// Registers a data field; values are sized by [`Mesh::allocate_data_values`].
    pub fn create_data(&mut self, id: DataId, name: impl Into<String>, dimension: usize) {
        assert!(dimension > 0, "data dimension must be positive");
        self.data.push(MeshData {
            id,
            name: name.into(),
            dimension,
            values: DVector::zeros(self.vertices.len() * dimension),
        });
    }

    pub fn data(&self, id: DataId) -> Result<&MeshData, CouplingError> {
        self.data
            .iter()
            .find(|d| d.id == id)
            .ok_or(CouplingError::MissingMeshData { mesh: self.id, id })
    }

    pub fn data_mut(&mut self, id: DataId) -> Result<&mut MeshData, CouplingError> {
        let mesh = self.id;
        self.data
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(CouplingError::MissingMeshData { mesh, id })
    }

    /// Resizes every data field to `vertex count * dimension`, keeping existing
    /// leading values and zero-filling new entries.
    pub fn allocate_data_values(&mut self) {
        let n = self.vertices.len();
        for d in &mut self.data {
            let len = n * d.dimension;
            if d.values.len() != len {
                let old = std::mem::replace(&mut d.values, DVector::zeros(len));
                let keep = old.len().min(len);
                d.values.rows_mut(0, keep).copy_from(&old.rows(0, keep));
            }
        }
    }

    /// Drops all vertices, edges and triangles (remeshing). Data fields stay
    /// registered but become empty.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.edges.clear();
        self.triangles.clear();
        for d in &mut self.data {
            d.values = DVector::zeros(0);
        }
    }

    /// Axis-aligned box around all vertices; `None` for an empty mesh.
    pub fn bounding_box(&self) -> Option<Box3d> {
        Box3d::from_points(self.vertices.iter().map(|v| v.coords()))
    }

    /// Clears the tag of every vertex.
    pub fn untag_all(&mut self) {
        self.vertices.iter_mut().for_each(Vertex::untag);
    }

    pub fn tagged_count(&self) -> usize {
        self.vertices.iter().filter(|v| v.is_tagged()).count()
    }
}

fn triangle_vertices(edges: [[usize; 2]; 3]) -> Option<[usize; 3]> {
    let [a, b, c] = edges;
    let shared = if b.contains(&a[0]) {
        a[0]
    } else if b.contains(&a[1]) {
        a[1]
    } else {
        return None;
    };
    let free = if a[0] == shared { a[1] } else { a[0] };
    let v2 = if b[0] == shared { b[1] } else { b[0] };
    let closes = (c[0] == v2 && c[1] == free) || (c[0] == free && c[1] == v2);
    if !closes || free == v2 || free == shared || v2 == shared {
        return None;
    }
    Some([a[0], a[1], v2])
}

impl DebugInvariants for Mesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Mesh");
    }

    fn validate_invariants(&self) -> Result<(), CouplingError> {
        let count = self.vertices.len();
        for (i, v) in self.vertices.iter().enumerate() {
            if v.id != i {
                return Err(CouplingError::InvalidConfiguration(format!(
                    "vertex at position {i} carries id {}",
                    v.id
                )));
            }
        }
        for e in &self.edges {
            if let Some(&vertex) = e.vertices.iter().find(|&&v| v >= count) {
                return Err(CouplingError::InvalidEdge {
                    mesh: self.name.clone(),
                    vertex,
                    count,
                });
            }
        }
        for t in &self.triangles {
            let edges = t.edges.map(|e| self.edges.get(e).map(|e| e.vertices));
            let valid = match edges {
                [Some(a), Some(b), Some(c)] => triangle_vertices([a, b, c]) == Some(t.vertices),
                _ => false,
            };
            if !valid {
                return Err(CouplingError::InvalidTriangle {
                    mesh: self.name.clone(),
                    edges: t.edges,
                });
            }
        }
        for d in &self.data {
            let expected = count * d.dimension;
            if d.values.len() != expected {
                return Err(CouplingError::DataSizeMismatch {
                    id: d.id,
                    expected,
                    found: d.values.len(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Mesh {
        let mut mesh = Mesh::new(MeshId(1), "Square", 3);
        let v: Vec<usize> = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]]
            .iter()
            .map(|c| mesh.create_vertex(c).unwrap())
            .collect();
        let e01 = mesh.create_edge(v[0], v[1]).unwrap();
        let e12 = mesh.create_edge(v[1], v[2]).unwrap();
        let e20 = mesh.create_edge(v[2], v[0]).unwrap();
        let e23 = mesh.create_edge(v[2], v[3]).unwrap();
        let e30 = mesh.create_edge(v[3], v[0]).unwrap();
        mesh.create_triangle(e01, e12, e20).unwrap();
        mesh.create_triangle(e20, e23, e30).unwrap();
        mesh
    }

    #[test]
    fn triangle_vertex_rule() {
        let mesh = unit_square();
        assert_eq!(mesh.triangles()[0].vertices(), [0, 1, 2]);
        // edge 0 = (2,0) gives vertices 0 and 1, edge 1 = (2,3) adds 3
        assert_eq!(mesh.triangles()[1].vertices(), [2, 0, 3]);
        mesh.validate_invariants().unwrap();
    }

    #[test]
    fn triangle_vertices_follow_edge_zero_orientation() {
        let mut mesh = Mesh::new(MeshId(4), "Reversed", 2);
        for c in [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]] {
            mesh.create_vertex(&c).unwrap();
        }
        let e10 = mesh.create_edge(1, 0).unwrap();
        let e02 = mesh.create_edge(0, 2).unwrap();
        let e21 = mesh.create_edge(2, 1).unwrap();
        let t = mesh.create_triangle(e10, e02, e21).unwrap();
        assert_eq!(mesh.triangles()[t].vertices(), [1, 0, 2]);
    }

    #[test]
    fn open_edge_loop_is_rejected() {
        let mut mesh = Mesh::new(MeshId(2), "Open", 2);
        for c in [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0]] {
            mesh.create_vertex(&c).unwrap();
        }
        let a = mesh.create_edge(0, 1).unwrap();
        let b = mesh.create_edge(1, 2).unwrap();
        let c = mesh.create_edge(2, 3).unwrap();
        assert!(matches!(
            mesh.create_triangle(a, b, c),
            Err(CouplingError::InvalidTriangle { .. })
        ));
    }

    #[test]
    fn two_dimensional_vertices_are_padded() {
        let mut mesh = Mesh::new(MeshId(3), "Line", 2);
        let v = mesh.create_vertex(&[1.5, -2.0]).unwrap();
        assert_eq!(mesh.vertices()[v].coords(), &Point3::new(1.5, -2.0, 0.0));
        assert!(mesh.create_vertex(&[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn allocate_data_keeps_prefix() {
        let mut mesh = Mesh::new(MeshId(4), "M", 2);
        mesh.create_vertex(&[0.0, 0.0]).unwrap();
        mesh.create_data(DataId(0), "Forces", 2);
        mesh.allocate_data_values();
        mesh.data_mut(DataId(0)).unwrap().values_mut()[1] = 7.0;
        mesh.create_vertex(&[1.0, 0.0]).unwrap();
        mesh.allocate_data_values();
        assert_eq!(mesh.data(DataId(0)).unwrap().values().as_slice(), &[0.0, 7.0, 0.0, 0.0]);
        mesh.validate_invariants().unwrap();
    }

    #[test]
    fn clear_empties_mesh_and_data() {
        let mut mesh = unit_square();
        mesh.create_data(DataId(1), "T", 1);
        mesh.clear();
        assert!(mesh.vertices().is_empty());
        assert!(mesh.triangles().is_empty());
        assert_eq!(mesh.data(DataId(1)).unwrap().values().len(), 0);
        assert!(mesh.bounding_box().is_none());
    }
}
