//! Interpolation weights from projecting a point onto mesh primitives.
//!
//! A point is expressed as a weighted combination of the vertices of the
//! primitive it projects onto:
//!
//! - **vertex**: a single element with weight 1;
//! - **edge** `[a, b]`: weights `(1 - t, t)` with `t` the parameter of the
//!   orthogonal projection onto the line through `a` and `b`;
//! - **triangle** `[a, b, c]`: barycentric coordinates of the orthogonal
//!   projection onto the triangle's plane.
//!
//! Edge and triangle weights always sum to one. A weight is negative exactly
//! when the projection falls outside the primitive, which is what the
//! nearest-projection mapping uses to reject candidates.

use crate::topology::mesh::{Edge, Mesh, Triangle};
use nalgebra::Point3;

const DEGENERATE: f64 = 1e-30;

/// One vertex contribution of an interpolation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterpolationElement {
    /// Position of the contributing vertex in its mesh.
    pub vertex: usize,
    pub weight: f64,
}

/// Contributions describing one interpolated point.
pub type InterpolationElements = Vec<InterpolationElement>;

/// Interpolation onto a single vertex.
pub fn vertex_elements(vertex: usize) -> InterpolationElements {
    vec![InterpolationElement {
        vertex,
        weight: 1.0,
    }]
}

/// Interpolation onto an edge; `None` for a zero-length edge.
pub fn edge_elements(point: &Point3<f64>, mesh: &Mesh, edge: &Edge) -> Option<InterpolationElements> {
    let [a, b] = mesh.edge_points(edge);
    let t = segment_parameter(point, a, b)?;
    Some(vec![
        InterpolationElement {
            vertex: edge.vertex(0),
            weight: 1.0 - t,
        },
        InterpolationElement {
            vertex: edge.vertex(1),
            weight: t,
        },
    ])
}

/// Interpolation onto a triangle; `None` for a degenerate triangle.
pub fn triangle_elements(
    point: &Point3<f64>,
    mesh: &Mesh,
    triangle: &Triangle,
) -> Option<InterpolationElements> {
    let [a, b, c] = mesh.triangle_points(triangle);
    let [u, v, w] = barycentric(point, a, b, c)?;
    Some(vec![
        InterpolationElement {
            vertex: triangle.vertex(0),
            weight: u,
        },
        InterpolationElement {
            vertex: triangle.vertex(1),
            weight: v,
        },
        InterpolationElement {
            vertex: triangle.vertex(2),
            weight: w,
        },
    ])
}

/// Whether the point genuinely projects inside the primitive.
pub fn all_non_negative(elements: &[InterpolationElement]) -> bool {
    elements.iter().all(|e| e.weight >= 0.0)
}

/// Parameter `t` of the projection of `p` onto the line `a + t (b - a)`.
fn segment_parameter(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> Option<f64> {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= DEGENERATE {
        return None;
    }
    Some((p - a).dot(&ab) / len2)
}

/// Barycentric coordinates of the projection of `p` onto the plane of `abc`.
fn barycentric(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Option<[f64; 3]> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= DEGENERATE {
        return None;
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Some([1.0 - v - w, v, w])
}

/// Squared distance from `p` to the segment `[a, b]`.
pub fn segment_distance_2(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    let t = segment_parameter(p, a, b).map_or(0.0, |t| t.clamp(0.0, 1.0));
    let closest = a + (b - a) * t;
    (p - closest).norm_squared()
}

/// Squared distance from `p` to the (filled) triangle `abc`.
pub fn triangle_distance_2(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> f64 {
    (p - closest_point_on_triangle(p, a, b, c)).norm_squared()
}

/// Closest point of triangle `abc` to `p` (Voronoi-region walk).
fn closest_point_on_triangle(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Point3<f64> {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = va + vb + vc;
    if denom.abs() <= DEGENERATE {
        // Collinear corners: fall back to the closest edge.
        let candidates = [(a, b), (b, c), (c, a)];
        return candidates
            .iter()
            .map(|(s, e)| {
                let t = segment_parameter(p, s, e).map_or(0.0, |t| t.clamp(0.0, 1.0));
                *s + (*e - *s) * t
            })
            .min_by(|x, y| (p - x).norm_squared().total_cmp(&(p - y).norm_squared()))
            .unwrap_or(*a);
    }
    let v = vb / denom;
    let w = vc / denom;
    a + ab * v + ac * w
}
