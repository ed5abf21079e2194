//! Geometry primitives: bounding boxes, planes and line segments.
//!
//! Pure math with no simulation state. Everything the broad phase and the
//! narrow phase need to classify space lives here.

use glam::Vec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// Creates a new AABB from min and max corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Creates an AABB from center and half-extents.
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Smallest AABB containing every point. `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::new(first, first), |aabb, p| aabb.expanded_to(p)))
    }

    /// Returns the center of the AABB.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns the size of the AABB.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Checks if this AABB contains a point.
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Checks if this AABB intersects another AABB (touching counts).
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Returns the union of two AABBs.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Grows the box to include `point`.
    pub fn expanded_to(&self, point: Vec3) -> Aabb {
        Aabb::new(self.min.min(point), self.max.max(point))
    }

    /// Grows the box by `margin` on every side.
    pub fn inflated(&self, margin: f32) -> Aabb {
        Aabb::new(self.min - Vec3::splat(margin), self.max + Vec3::splat(margin))
    }

    /// The eight corners, in x-fastest order.
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Slab test against the segment `from..to`.
    ///
    /// Returns the entry parameter in `[0, 1]` when the segment touches the box.
    pub fn intersect_segment(&self, from: Vec3, to: Vec3) -> Option<f32> {
        let dir = to - from;
        let mut t_min = 0.0_f32;
        let mut t_max = 1.0_f32;

        for axis in 0..3 {
            let (o, d, lo, hi) = (from[axis], dir[axis], self.min[axis], self.max[axis]);
            if d.abs() < f32::EPSILON {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let (mut t1, mut t2) = ((lo - o) * inv, (hi - o) * inv);
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }

        Some(t_min)
    }
}

/// Where a set of points lies relative to a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneSide {
    /// Every point is strictly in front (along the normal).
    Front,
    /// Every point is strictly behind.
    Back,
    /// Points on both sides, or at least one point on the plane.
    Straddling,
}

/// A plane `normal · p = offset` with unit normal.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Plane {
    /// Unit normal pointing away from the solid side.
    pub normal: Vec3,
    /// Distance from the origin along the normal.
    pub offset: f32,
}

impl Plane {
    /// Creates a plane, normalizing `normal`. `None` if the normal has no length.
    pub fn new(normal: Vec3, offset: f32) -> Option<Self> {
        let normal = normal.try_normalize()?;
        Some(Self { normal, offset })
    }

    /// Plane through `point` with the given normal.
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Option<Self> {
        let normal = normal.try_normalize()?;
        Some(Self {
            normal,
            offset: normal.dot(point),
        })
    }

    /// Signed distance of `point` (positive in front).
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.offset
    }

    /// Projects `point` onto the plane.
    pub fn project(&self, point: Vec3) -> Vec3 {
        point - self.normal * self.signed_distance(point)
    }

    /// Classifies the box's eight corners against the plane.
    ///
    /// A corner exactly on the plane makes the box straddle it.
    pub fn classify_aabb(&self, aabb: &Aabb) -> PlaneSide {
        let mut front = 0;
        let mut back = 0;
        for corner in aabb.corners() {
            let d = self.signed_distance(corner);
            if d > 0.0 {
                front += 1;
            } else if d < 0.0 {
                back += 1;
            }
        }
        match (front, back) {
            (8, _) => PlaneSide::Front,
            (_, 8) => PlaneSide::Back,
            _ => PlaneSide::Straddling,
        }
    }

    /// Parameter `t` where the segment `from..to` crosses the plane.
    pub fn intersect_segment(&self, from: Vec3, to: Vec3) -> Option<f32> {
        let da = self.signed_distance(from);
        let db = self.signed_distance(to);
        if (da > 0.0 && db > 0.0) || (da < 0.0 && db < 0.0) || da == db {
            return None;
        }
        Some(da / (da - db))
    }
}

/// A finite line segment.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Line {
    /// Start point.
    pub from: Vec3,
    /// End point.
    pub to: Vec3,
}

impl Line {
    /// Creates a segment.
    pub fn new(from: Vec3, to: Vec3) -> Self {
        Self { from, to }
    }

    /// Direction vector (not normalized).
    pub fn direction(&self) -> Vec3 {
        self.to - self.from
    }

    /// Point at parameter `t`.
    pub fn at(&self, t: f32) -> Vec3 {
        self.from + self.direction() * t
    }

    /// Bounding box of the segment.
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.from.min(self.to), self.from.max(self.to))
    }

    /// Parameter in `[0, 1]` of the point on the segment closest to `point`.
    pub fn closest_parameter(&self, point: Vec3) -> f32 {
        let d = self.direction();
        let len_sq = d.length_squared();
        if len_sq <= f32::EPSILON {
            return 0.0;
        }
        ((point - self.from).dot(d) / len_sq).clamp(0.0, 1.0)
    }

    /// Point on the segment closest to `point`.
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        self.at(self.closest_parameter(point))
    }
}

/// Closest point on triangle `abc` to `p` (Ericson, Real-Time Collision Detection 5.1.5).
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

/// Segment/triangle intersection (Möller–Trumbore), returning the segment parameter.
pub fn intersect_segment_triangle(from: Vec3, to: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let dir = to - from;
    let e1 = b - a;
    let e2 = c - a;
    let h = dir.cross(e2);
    let det = e1.dot(h);
    if det.abs() < 1e-8 {
        return None;
    }
    let inv = 1.0 / det;
    let s = from - a;
    let u = s.dot(h) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv;
    (0.0..=1.0).contains(&t).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_intersects_touching() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let c = Aabb::new(Vec3::splat(1.5), Vec3::splat(2.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_aabb_segment() {
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let t = aabb
            .intersect_segment(Vec3::new(-3.0, 0.0, 0.0), Vec3::new(3.0, 0.0, 0.0))
            .unwrap();
        assert!((t - 1.0 / 3.0).abs() < 1e-5);
        assert!(aabb
            .intersect_segment(Vec3::new(-3.0, 2.0, 0.0), Vec3::new(3.0, 2.0, 0.0))
            .is_none());
        // Segment ending before the box.
        assert!(aabb
            .intersect_segment(Vec3::new(-3.0, 0.0, 0.0), Vec3::new(-2.0, 0.0, 0.0))
            .is_none());
    }

    #[test]
    fn test_plane_classify() {
        let ground = Plane::new(Vec3::Y, 0.0).unwrap();
        let above = Aabb::new(Vec3::new(0.0, 1.0, 0.0), Vec3::splat(2.0));
        let below = Aabb::new(Vec3::splat(-2.0), Vec3::new(0.0, -1.0, 0.0));
        let across = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let touching = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(ground.classify_aabb(&above), PlaneSide::Front);
        assert_eq!(ground.classify_aabb(&below), PlaneSide::Back);
        assert_eq!(ground.classify_aabb(&across), PlaneSide::Straddling);
        assert_eq!(ground.classify_aabb(&touching), PlaneSide::Straddling);
    }

    #[test]
    fn test_plane_rejects_zero_normal() {
        assert!(Plane::new(Vec3::ZERO, 1.0).is_none());
    }

    #[test]
    fn test_closest_point_on_triangle_interior() {
        let p = closest_point_on_triangle(
            Vec3::new(0.25, 5.0, 0.25),
            Vec3::ZERO,
            Vec3::X,
            Vec3::Z,
        );
        assert!((p - Vec3::new(0.25, 0.0, 0.25)).length() < 1e-5);
    }

    #[test]
    fn test_segment_triangle() {
        let t = intersect_segment_triangle(
            Vec3::new(0.2, 1.0, 0.2),
            Vec3::new(0.2, -1.0, 0.2),
            Vec3::ZERO,
            Vec3::Z,
            Vec3::X,
        );
        assert!((t.unwrap() - 0.5).abs() < 1e-5);
    }
}
