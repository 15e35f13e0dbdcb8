//! Axis-aligned bounding boxes.
//!
//! [`Box3d`] is used to build spatial-index queries ("all vertices within a
//! radius of a point") and to describe the extent of a mesh partition when it
//! is sent to a remote participant. The layout is `#[repr(C)]` and `Pod`, so
//! a box goes on the wire as six little-endian doubles.

use bytemuck::{Pod, Zeroable};
use nalgebra::Point3;
use rstar::AABB;
use serde::{Deserialize, Serialize};

/// Axis-aligned box given by its minimal and maximal corner.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Box3d {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

static_assertions::assert_eq_size!(Box3d, [f64; 6]);

impl Box3d {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// Box enclosing the sphere of `radius` around `center`.
    pub fn enclosing(center: &Point3<f64>, radius: f64) -> Self {
        Self {
            min: [center.x - radius, center.y - radius, center.z - radius],
            max: [center.x + radius, center.y + radius, center.z + radius],
        }
    }

    /// Smallest box containing all points; `None` if there are none.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point3<f64>>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bb = Self {
            min: [first.x, first.y, first.z],
            max: [first.x, first.y, first.z],
        };
        for p in iter {
            bb.include(p);
        }
        Some(bb)
    }

    /// Grows the box to contain `p`.
    pub fn include(&mut self, p: &Point3<f64>) {
        for d in 0..3 {
            self.min[d] = self.min[d].min(p[d]);
            self.max[d] = self.max[d].max(p[d]);
        }
    }

    /// Grows the box to contain `other`.
    pub fn merge(&mut self, other: &Box3d) {
        for d in 0..3 {
            self.min[d] = self.min[d].min(other.min[d]);
            self.max[d] = self.max[d].max(other.max[d]);
        }
    }

    /// Enlarges the box by `margin` in every direction.
    pub fn expand_by(&mut self, margin: f64) {
        for d in 0..3 {
            self.min[d] -= margin;
            self.max[d] += margin;
        }
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|d| self.min[d] <= p[d] && p[d] <= self.max[d])
    }

    /// Touching boxes intersect.
    pub fn intersects(&self, other: &Box3d) -> bool {
        (0..3).all(|d| self.min[d] <= other.max[d] && other.min[d] <= self.max[d])
    }

    pub fn to_aabb(&self) -> AABB<[f64; 3]> {
        AABB::from_corners(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enclosing_box_of_sphere() {
        let bb = Box3d::enclosing(&Point3::new(1.0, 2.0, 3.0), 0.5);
        assert_eq!(bb.min, [0.5, 1.5, 2.5]);
        assert_eq!(bb.max, [1.5, 2.5, 3.5]);
        assert!(bb.contains(&Point3::new(1.0, 2.0, 3.0)));
        assert!(!bb.contains(&Point3::new(1.6, 2.0, 3.0)));
    }

    #[test]
    fn from_points_and_merge() {
        let pts = [Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, -1.0, 0.5)];
        let mut bb = Box3d::from_points(pts.iter()).unwrap();
        assert_eq!(bb.min, [0.0, -1.0, 0.0]);
        assert_eq!(bb.max, [2.0, 0.0, 0.5]);
        bb.merge(&Box3d::new([-1.0, 0.0, 0.0], [0.0, 3.0, 0.0]));
        assert_eq!(bb.min, [-1.0, -1.0, 0.0]);
        assert_eq!(bb.max, [2.0, 3.0, 0.5]);
        assert!(Box3d::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn touching_boxes_intersect() {
        let a = Box3d::new([0.0; 3], [1.0; 3]);
        let b = Box3d::new([1.0, 0.0, 0.0], [2.0, 1.0, 1.0]);
        let mut c = Box3d::new([3.0; 3], [4.0; 3]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        c.expand_by(2.0);
        assert!(a.intersects(&c));
    }

    #[test]
    fn wire_layout_is_six_doubles() {
        let bb = Box3d::new([1.0, 2.0, 3.0], [4.0, 5.0, 6.0]);
        let raw: &[f64] = bytemuck::cast_slice(std::slice::from_ref(&bb));
        assert_eq!(raw, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
