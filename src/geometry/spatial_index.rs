//! Per-mesh R-tree cache for nearest-neighbour queries.
//!
//! The cache maps a [`MeshId`] to a [`MeshIndex`], which lazily bulk-loads
//! one R-tree each for the vertices, edges and triangles of the mesh on first
//! access. There is no automatic invalidation: whoever mutates a mesh must
//! call [`SpatialIndexCache::clear`] for it.
//!
//! The cache is an explicit object injected into the mappings (usually as an
//! `Arc<SpatialIndexCache>` shared by all mappings of a participant), never a
//! process-wide static.

use crate::geometry::bounding_box::Box3d;
use crate::geometry::projection::triangle_distance_2;
use crate::topology::mesh::{Mesh, MeshId};
use dashmap::DashMap;
use nalgebra::Point3;
use once_cell::sync::OnceCell;
use rstar::primitives::{GeomWithData, Line};
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use std::fmt;
use std::sync::Arc;

/// Vertex position tagged with its index in the mesh.
pub type IndexedVertex = GeomWithData<[f64; 3], usize>;
/// Edge segment tagged with its index in the mesh.
pub type IndexedEdge = GeomWithData<Line<[f64; 3]>, usize>;

/// Triangle tagged with its index in the mesh; distance is measured to the
/// filled triangle, not to its bounding box.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedTriangle {
    corners: [[f64; 3]; 3],
    pub index: usize,
}

impl RTreeObject for IndexedTriangle {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_points(self.corners.iter())
    }
}

impl PointDistance for IndexedTriangle {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        let [a, b, c] = self.corners.map(Point3::from);
        triangle_distance_2(&Point3::from(*point), &a, &b, &c)
    }
}

/// A primitive returned by a nearest query, with its true distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Match {
    pub index: usize,
    pub distance: f64,
}

fn sort_matches(matches: &mut [Match]) {
    matches.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.index.cmp(&b.index)));
}

fn point(p: &Point3<f64>) -> [f64; 3] {
    [p.x, p.y, p.z]
}

/// Lazily built R-trees of one mesh.
#[derive(Default)]
pub struct MeshIndex {
    vertices: OnceCell<RTree<IndexedVertex>>,
    edges: OnceCell<RTree<IndexedEdge>>,
    triangles: OnceCell<RTree<IndexedTriangle>>,
}

impl fmt::Debug for MeshIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshIndex")
            .field("vertices", &self.vertices.get().map(RTree::size))
            .field("edges", &self.edges.get().map(RTree::size))
            .field("triangles", &self.triangles.get().map(RTree::size))
            .finish()
    }
}

impl MeshIndex {
    /// Vertex tree, built from `mesh` on first access.
    pub fn vertices(&self, mesh: &Mesh) -> &RTree<IndexedVertex> {
        self.vertices.get_or_init(|| {
            log::debug!("building vertex R-tree of mesh \"{}\"", mesh.name());
            RTree::bulk_load(
                mesh.vertices()
                    .iter()
                    .map(|v| GeomWithData::new(point(v.coords()), v.id()))
                    .collect(),
            )
        })
    }

    /// Edge tree, built from `mesh` on first access.
    pub fn edges(&self, mesh: &Mesh) -> &RTree<IndexedEdge> {
        self.edges.get_or_init(|| {
            log::debug!("building edge R-tree of mesh \"{}\"", mesh.name());
            RTree::bulk_load(
                mesh.edges()
                    .iter()
                    .map(|e| {
                        let [a, b] = mesh.edge_points(e);
                        GeomWithData::new(Line::new(point(a), point(b)), e.id())
                    })
                    .collect(),
            )
        })
    }

    /// Triangle tree, built from `mesh` on first access.
    pub fn triangles(&self, mesh: &Mesh) -> &RTree<IndexedTriangle> {
        self.triangles.get_or_init(|| {
            log::debug!("building triangle R-tree of mesh \"{}\"", mesh.name());
            RTree::bulk_load(
                mesh.triangles()
                    .iter()
                    .map(|t| IndexedTriangle {
                        corners: mesh.triangle_points(t).map(point),
                        index: t.id(),
                    })
                    .collect(),
            )
        })
    }

    pub fn has_vertex_tree(&self) -> bool {
        self.vertices.get().is_some()
    }

    pub fn has_edge_tree(&self) -> bool {
        self.edges.get().is_some()
    }

    pub fn has_triangle_tree(&self) -> bool {
        self.triangles.get().is_some()
    }

    /// Up to `k` vertices nearest to `p`, ascending by distance (ties by index).
    pub fn nearest_vertices(&self, mesh: &Mesh, p: &Point3<f64>, k: usize) -> Vec<Match> {
        let q = point(p);
        let mut matches: Vec<Match> = self
            .vertices(mesh)
            .nearest_neighbor_iter(&q)
            .take(k)
            .map(|v| Match {
                index: v.data,
                distance: v.distance_2(&q).sqrt(),
            })
            .collect();
        sort_matches(&mut matches);
        matches
    }

    /// Up to `k` edges nearest to `p`, ascending by distance (ties by index).
    pub fn nearest_edges(&self, mesh: &Mesh, p: &Point3<f64>, k: usize) -> Vec<Match> {
        let q = point(p);
        let mut matches: Vec<Match> = self
            .edges(mesh)
            .nearest_neighbor_iter(&q)
            .take(k)
            .map(|e| Match {
                index: e.data,
                distance: e.geom().distance_2(&q).sqrt(),
            })
            .collect();
        sort_matches(&mut matches);
        matches
    }

    /// Up to `k` triangles nearest to `p`, ascending by distance (ties by index).
    pub fn nearest_triangles(&self, mesh: &Mesh, p: &Point3<f64>, k: usize) -> Vec<Match> {
        let q = point(p);
        let mut matches: Vec<Match> = self
            .triangles(mesh)
            .nearest_neighbor_iter(&q)
            .take(k)
            .map(|t| Match {
                index: t.index,
                distance: t.distance_2(&q).sqrt(),
            })
            .collect();
        sort_matches(&mut matches);
        matches
    }

    /// Indices of all vertices inside `bb` (boundary included), ascending.
    pub fn vertices_in_box(&self, mesh: &Mesh, bb: &Box3d) -> Vec<usize> {
        let mut found: Vec<usize> = self
            .vertices(mesh)
            .locate_in_envelope(&bb.to_aabb())
            .map(|v| v.data)
            .collect();
        found.sort_unstable();
        found
    }
}

/// Cache of [`MeshIndex`] entries keyed by mesh identity.
#[derive(Debug, Default)]
pub struct SpatialIndexCache {
    indices: DashMap<MeshId, Arc<MeshIndex>>,
}

impl SpatialIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached index of `mesh`, inserting an empty (lazy) entry on first use.
    pub fn index(&self, mesh: &Mesh) -> Arc<MeshIndex> {
        self.indices.entry(mesh.id()).or_default().value().clone()
    }

    /// Erases the cached index of a mesh. Must follow every mesh mutation.
    pub fn clear(&self, mesh: MeshId) {
        if self.indices.remove(&mesh).is_some() {
            log::debug!("dropped spatial index of mesh {mesh:?}");
        }
    }

    /// Erases every cached index.
    pub fn clear_all(&self) {
        self.indices.clear();
    }

    pub fn contains(&self, mesh: MeshId) -> bool {
        self.indices.contains_key(&mesh)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(id: u32, n: usize) -> Mesh {
        let mut mesh = Mesh::new(MeshId(id), "Grid", 3);
        for j in 0..n {
            for i in 0..n {
                mesh.create_vertex(&[i as f64, j as f64, 0.0]).unwrap();
            }
        }
        mesh
    }

    #[test]
    fn trees_are_built_lazily_per_kind() {
        let cache = SpatialIndexCache::new();
        let mesh = grid(1, 3);
        let index = cache.index(&mesh);
        assert!(!index.has_vertex_tree());
        let nearest = index.nearest_vertices(&mesh, &Point3::new(1.1, 0.9, 0.0), 1);
        assert_eq!(nearest[0].index, 4);
        assert!(index.has_vertex_tree());
        assert!(!index.has_edge_tree());
        assert!(!index.has_triangle_tree());
    }

    #[test]
    fn clear_drops_only_that_mesh() {
        let cache = SpatialIndexCache::new();
        let a = grid(1, 2);
        let b = grid(2, 2);
        cache.index(&a).vertices(&a);
        cache.index(&b).vertices(&b);
        assert_eq!(cache.len(), 2);
        cache.clear(a.id());
        assert!(!cache.contains(a.id()));
        assert!(cache.contains(b.id()));
        assert!(cache.index(&b).has_vertex_tree());
    }

    #[test]
    fn same_index_is_returned_until_cleared() {
        let cache = SpatialIndexCache::new();
        let mesh = grid(5, 2);
        let first = cache.index(&mesh);
        let second = cache.index(&mesh);
        assert!(Arc::ptr_eq(&first, &second));
        cache.clear(mesh.id());
        let third = cache.index(&mesh);
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn stale_tree_is_served_until_cleared() {
        let cache = SpatialIndexCache::new();
        let mut mesh = grid(7, 2);
        cache.index(&mesh).vertices(&mesh);
        mesh.create_vertex(&[10.0, 10.0, 0.0]).unwrap();
        let p = Point3::new(10.0, 10.0, 0.0);
        assert_ne!(cache.index(&mesh).nearest_vertices(&mesh, &p, 1)[0].index, 4);
        cache.clear(mesh.id());
        assert_eq!(cache.index(&mesh).nearest_vertices(&mesh, &p, 1)[0].index, 4);
    }

    #[test]
    fn stale_edge_tree_survives_shrunk_mesh() {
        let mut mesh = Mesh::new(MeshId(8), "Shrinking", 2);
        mesh.create_vertex(&[0.0, 0.0]).unwrap();
        mesh.create_vertex(&[2.0, 0.0]).unwrap();
        mesh.create_edge(0, 1).unwrap();
        let cache = SpatialIndexCache::new();
        let p = Point3::new(1.0, 3.0, 0.0);
        assert_eq!(cache.index(&mesh).nearest_edges(&mesh, &p, 1).len(), 1);
        mesh.clear();
        mesh.create_vertex(&[5.0, 5.0]).unwrap();
        let found = cache.index(&mesh).nearest_edges(&mesh, &p, 1);
        assert_eq!(found[0].index, 0);
        assert!((found[0].distance - 3.0).abs() < 1e-12);
        cache.clear(mesh.id());
        assert!(cache.index(&mesh).nearest_edges(&mesh, &p, 1).is_empty());
    }

    #[test]
    fn nearest_edges_sorted_by_true_distance() {
        let mut mesh = Mesh::new(MeshId(3), "Edges", 2);
        for c in [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [0.0, 5.0], [1.0, 5.0]] {
            mesh.create_vertex(&c).unwrap();
        }
        mesh.create_edge(3, 4).unwrap();
        mesh.create_edge(0, 1).unwrap();
        mesh.create_edge(1, 2).unwrap();
        let cache = SpatialIndexCache::new();
        let found = cache
            .index(&mesh)
            .nearest_edges(&mesh, &Point3::new(0.5, 1.0, 0.0), 3);
        assert_eq!(found.iter().map(|m| m.index).collect::<Vec<_>>(), vec![1, 2, 0]);
        assert!((found[0].distance - 1.0).abs() < 1e-12);
        assert!((found[1].distance - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn box_query() {
        let cache = SpatialIndexCache::new();
        let mesh = grid(4, 4);
        let bb = Box3d::enclosing(&Point3::new(1.0, 1.0, 0.0), 1.0);
        let found = cache.index(&mesh).vertices_in_box(&mesh, &bb);
        assert_eq!(found, vec![0, 1, 2, 4, 5, 6, 8, 9, 10]);
    }
}
