//! Narrow-phase collision tests.
//!
//! Pairwise tests between shapes under world transforms, producing
//! [`ContactManifold`]s whose normal points from A toward B. Pairs closer
//! than the contact margin produce speculative contacts with negative depth.
//!
//! Ray shapes are swept along their motion for the tick and produce a
//! single contact at the first hit.

use glam::{Affine3A, Vec3};

use crate::geom::{closest_point_on_triangle, intersect_segment_triangle, Plane};
use crate::object::ObjectId;
use crate::shape::{CollisionShape, TriangleMesh};

/// Most points kept for a mesh against a plane.
const MAX_MESH_PLANE_POINTS: usize = 8;

/// One point of a manifold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ManifoldPoint {
    /// Deepest point of A.
    pub on_a: Vec3,
    /// Deepest point of B.
    pub on_b: Vec3,
    /// Penetration depth, negative while separated.
    pub depth: f32,
}

/// Contact points between two objects sharing one normal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContactManifold {
    /// First object.
    pub a: ObjectId,
    /// Second object.
    pub b: ObjectId,
    /// Contact normal (from A to B).
    pub normal: Vec3,
    /// Contact points.
    pub points: Vec<ManifoldPoint>,
}

impl ContactManifold {
    /// Swap objects and invert the normal.
    #[inline]
    pub fn flip(mut self) -> Self {
        self.normal = -self.normal;
        std::mem::swap(&mut self.a, &mut self.b);
        for p in &mut self.points {
            std::mem::swap(&mut p.on_a, &mut p.on_b);
        }
        self
    }

    /// Deepest penetration among the points.
    pub fn max_depth(&self) -> f32 {
        self.points
            .iter()
            .map(|p| p.depth)
            .fold(f32::NEG_INFINITY, f32::max)
    }
}

/// A shape placed in the world for one test.
#[derive(Clone, Copy, Debug)]
pub struct Placed<'a> {
    /// Owning object.
    pub id: ObjectId,
    /// Shape in local space.
    pub shape: &'a CollisionShape,
    /// Local-to-world transform.
    pub xform: Affine3A,
    /// World-space displacement over the tick. Only rays use it.
    pub sweep: Vec3,
}

/// First hit of a segment against a shape.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Fraction along the segment, in `[0, 1]`.
    pub fraction: f32,
    /// World-space hit point.
    pub point: Vec3,
    /// Surface normal at the hit.
    pub normal: Vec3,
}

/// Tests two placed shapes, appending manifolds to `out`.
pub fn collide(a: &Placed<'_>, b: &Placed<'_>, margin: f32, out: &mut Vec<ContactManifold>) {
    use CollisionShape as S;

    match (a.shape, b.shape) {
        (S::Multi(children), _) => {
            for (shape, local) in children {
                let child = Placed {
                    shape,
                    xform: a.xform * *local,
                    ..*a
                };
                collide(&child, b, margin, out);
            }
        }
        (_, S::Multi(_)) => {
            let start = out.len();
            collide(b, a, margin, out);
            flip_from(out, start);
        }

        (S::Sphere { radius: ra }, S::Sphere { radius: rb }) => {
            let ca = a.xform.transform_point3(Vec3::ZERO);
            let cb = b.xform.transform_point3(Vec3::ZERO);
            if let Some(m) = sphere_sphere(a.id, b.id, ca, *ra, cb, *rb, margin) {
                out.push(m);
            }
        }
        (S::Sphere { radius }, S::InfinitePlane(_)) => {
            let c = a.xform.transform_point3(Vec3::ZERO);
            if let Some(plane) = b.shape.world_plane(&b.xform) {
                out.extend(sphere_plane(a.id, b.id, c, *radius, &plane, margin));
            }
        }
        (S::Sphere { radius }, S::TriangleMesh(mesh)) => {
            let c = a.xform.transform_point3(Vec3::ZERO);
            out.extend(sphere_mesh(a.id, b.id, c, *radius, mesh, &b.xform, margin));
        }
        (S::TriangleMesh(mesh), S::InfinitePlane(_)) => {
            if let Some(plane) = b.shape.world_plane(&b.xform) {
                out.extend(mesh_plane(a.id, b.id, mesh, &a.xform, &plane, margin));
            }
        }
        (S::Ray, S::Ray) | (S::InfinitePlane(_), S::InfinitePlane(_)) => {}
        (S::Ray, _) => {
            let from = a.xform.transform_point3(Vec3::ZERO);
            if let Some(hit) = raycast(b.shape, &b.xform, from, from + a.sweep) {
                out.push(ContactManifold {
                    a: a.id,
                    b: b.id,
                    normal: -hit.normal,
                    points: vec![ManifoldPoint {
                        on_a: hit.point,
                        on_b: hit.point,
                        depth: 0.0,
                    }],
                });
            }
        }
        (_, S::Ray) | (S::InfinitePlane(_), _) | (S::TriangleMesh(_), S::Sphere { .. }) => {
            let start = out.len();
            collide(b, a, margin, out);
            flip_from(out, start);
        }
        // Mesh against mesh is not supported.
        (S::TriangleMesh(_), S::TriangleMesh(_)) => {}
    }
}

fn flip_from(out: &mut [ContactManifold], start: usize) {
    for m in &mut out[start..] {
        *m = std::mem::take(m).flip();
    }
}

/// Test sphere-sphere collision.
pub fn sphere_sphere(
    a: ObjectId,
    b: ObjectId,
    pos_a: Vec3,
    radius_a: f32,
    pos_b: Vec3,
    radius_b: f32,
    margin: f32,
) -> Option<ContactManifold> {
    let d = pos_b - pos_a;
    let dist_sq = d.length_squared();
    let reach = radius_a + radius_b + margin;
    if dist_sq >= reach * reach {
        return None;
    }
    let dist = dist_sq.sqrt();
    // Normal points from A toward B
    let normal = if dist > 0.0 { d / dist } else { Vec3::Y };
    Some(ContactManifold {
        a,
        b,
        normal,
        points: vec![ManifoldPoint {
            on_a: pos_a + normal * radius_a,
            on_b: pos_b - normal * radius_b,
            depth: radius_a + radius_b - dist,
        }],
    })
}

/// Test sphere-plane collision.
pub fn sphere_plane(
    sphere: ObjectId,
    plane_id: ObjectId,
    center: Vec3,
    radius: f32,
    plane: &Plane,
    margin: f32,
) -> Option<ContactManifold> {
    let dist = plane.signed_distance(center);
    if dist >= radius + margin {
        return None;
    }
    Some(ContactManifold {
        a: sphere,
        b: plane_id,
        normal: -plane.normal,
        points: vec![ManifoldPoint {
            on_a: center - plane.normal * radius,
            on_b: center - plane.normal * dist,
            depth: radius - dist,
        }],
    })
}

/// Test sphere against every triangle of a mesh, keeping the closest.
pub fn sphere_mesh(
    sphere: ObjectId,
    mesh_id: ObjectId,
    center: Vec3,
    radius: f32,
    mesh: &TriangleMesh,
    xform: &Affine3A,
    margin: f32,
) -> Option<ContactManifold> {
    let reach = radius + margin;
    let mut best: Option<(f32, Vec3, Vec3)> = None;
    for [a, b, c] in mesh.triangle_vertices() {
        let (a, b, c) = (
            xform.transform_point3(a),
            xform.transform_point3(b),
            xform.transform_point3(c),
        );
        let q = closest_point_on_triangle(center, a, b, c);
        let dist_sq = (q - center).length_squared();
        if dist_sq >= reach * reach || best.is_some_and(|(d, _, _)| dist_sq >= d) {
            continue;
        }
        let face = (b - a).cross(c - a);
        best = Some((dist_sq, q, face));
    }

    let (dist_sq, q, face) = best?;
    let dist = dist_sq.sqrt();
    let normal = if dist > 1e-6 {
        (q - center) / dist
    } else {
        -face.try_normalize()?
    };
    Some(ContactManifold {
        a: sphere,
        b: mesh_id,
        normal,
        points: vec![ManifoldPoint {
            on_a: center + normal * radius,
            on_b: q,
            depth: radius - dist,
        }],
    })
}

/// Test mesh vertices against a plane.
pub fn mesh_plane(
    mesh_id: ObjectId,
    plane_id: ObjectId,
    mesh: &TriangleMesh,
    xform: &Affine3A,
    plane: &Plane,
    margin: f32,
) -> Option<ContactManifold> {
    let mut points: Vec<ManifoldPoint> = mesh
        .vertices
        .iter()
        .map(|v| xform.transform_point3(*v))
        .filter_map(|v| {
            let dist = plane.signed_distance(v);
            (dist < margin).then(|| ManifoldPoint {
                on_a: v,
                on_b: v - plane.normal * dist,
                depth: -dist,
            })
        })
        .collect();
    if points.is_empty() {
        return None;
    }
    points.sort_by(|x, y| y.depth.total_cmp(&x.depth));
    points.truncate(MAX_MESH_PLANE_POINTS);
    Some(ContactManifold {
        a: mesh_id,
        b: plane_id,
        normal: -plane.normal,
        points,
    })
}

/// First hit of segment `from → to` against a shape.
pub fn raycast(shape: &CollisionShape, xform: &Affine3A, from: Vec3, to: Vec3) -> Option<RayHit> {
    let hit_at = |fraction: f32, normal: Vec3| RayHit {
        fraction,
        point: from + (to - from) * fraction,
        normal,
    };
    match shape {
        CollisionShape::Ray => None,
        CollisionShape::Sphere { radius } => {
            let center = xform.transform_point3(Vec3::ZERO);
            let t = segment_sphere(from, to, center, *radius)?;
            let point = from + (to - from) * t;
            let normal = (point - center).try_normalize().unwrap_or(Vec3::Y);
            Some(hit_at(t, normal))
        }
        CollisionShape::InfinitePlane(_) => {
            let plane = shape.world_plane(xform)?;
            // Only hits from the front side count.
            if plane.signed_distance(from) < 0.0 {
                return None;
            }
            let t = plane.intersect_segment(from, to)?;
            Some(hit_at(t, plane.normal))
        }
        CollisionShape::TriangleMesh(mesh) => {
            let mut best: Option<RayHit> = None;
            for [a, b, c] in mesh.triangle_vertices() {
                let (a, b, c) = (
                    xform.transform_point3(a),
                    xform.transform_point3(b),
                    xform.transform_point3(c),
                );
                let Some(t) = intersect_segment_triangle(from, to, a, b, c) else {
                    continue;
                };
                if best.is_some_and(|h| h.fraction <= t) {
                    continue;
                }
                let Some(mut normal) = (b - a).cross(c - a).try_normalize() else {
                    continue;
                };
                if normal.dot(to - from) > 0.0 {
                    normal = -normal;
                }
                best = Some(hit_at(t, normal));
            }
            best
        }
        CollisionShape::Multi(children) => children
            .iter()
            .filter_map(|(child, local)| raycast(child, &(*xform * *local), from, to))
            .min_by(|x, y| x.fraction.total_cmp(&y.fraction)),
    }
}

/// Fraction at which segment `from → to` enters a sphere. A segment starting
/// inside reports 0.
pub fn segment_sphere(from: Vec3, to: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let d = to - from;
    let m = from - center;
    let c = m.length_squared() - radius * radius;
    if c <= 0.0 {
        return Some(0.0);
    }
    let a = d.length_squared();
    if a <= f32::EPSILON {
        return None;
    }
    let b = m.dot(d);
    if b > 0.0 {
        return None;
    }
    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()) / a;
    (0.0..=1.0).contains(&t).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: u32) -> ObjectId {
        ObjectId::from_raw(i, 0)
    }

    fn placed(i: u32, shape: &CollisionShape, pos: Vec3) -> Placed<'_> {
        Placed {
            id: id(i),
            shape,
            xform: Affine3A::from_translation(pos),
            sweep: Vec3::ZERO,
        }
    }

    #[test]
    fn test_speculative_sphere_contact() {
        let ball = CollisionShape::sphere(1.0).unwrap();
        let mut out = Vec::new();
        collide(
            &placed(0, &ball, Vec3::ZERO),
            &placed(1, &ball, Vec3::new(0.0, 2.01, 0.0)),
            0.02,
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].normal, Vec3::Y);
        assert!(out[0].max_depth() < 0.0);

        out.clear();
        collide(
            &placed(0, &ball, Vec3::ZERO),
            &placed(1, &ball, Vec3::new(0.0, 2.01, 0.0)),
            0.0,
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_plane_order_independent() {
        let ball = CollisionShape::sphere(1.0).unwrap();
        let ground = CollisionShape::ground();
        let mut out = Vec::new();
        collide(
            &placed(1, &ground, Vec3::ZERO),
            &placed(0, &ball, Vec3::new(0.0, 0.9, 0.0)),
            0.0,
            &mut out,
        );
        assert_eq!(out.len(), 1);
        let m = &out[0];
        assert_eq!((m.a, m.b), (id(1), id(0)));
        // Plane toward sphere.
        assert_eq!(m.normal, Vec3::Y);
        assert!((m.points[0].depth - 0.1).abs() < 1e-5);
        assert!((m.points[0].on_a.y).abs() < 1e-5);
    }

    #[test]
    fn test_box_on_plane_four_corners() {
        let cube = CollisionShape::TriangleMesh(TriangleMesh::cuboid(Vec3::splat(0.5)));
        let ground = CollisionShape::ground();
        let mut out = Vec::new();
        collide(
            &placed(0, &cube, Vec3::new(0.0, 0.45, 0.0)),
            &placed(1, &ground, Vec3::ZERO),
            0.0,
            &mut out,
        );
        assert_eq!(out[0].points.len(), 4);
        assert_eq!(out[0].normal, -Vec3::Y);
    }

    #[test]
    fn test_sphere_mesh_face() {
        let cube = CollisionShape::TriangleMesh(TriangleMesh::cuboid(Vec3::splat(1.0)));
        let ball = CollisionShape::sphere(0.5).unwrap();
        let mut out = Vec::new();
        collide(
            &placed(0, &ball, Vec3::new(0.0, 1.4, 0.0)),
            &placed(1, &cube, Vec3::ZERO),
            0.0,
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert!((out[0].normal + Vec3::Y).length() < 1e-5);
        assert!((out[0].points[0].depth - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_multi_recurses() {
        let ball = CollisionShape::sphere(0.5).unwrap();
        let pair = CollisionShape::multi(vec![
            (ball.clone(), Affine3A::from_translation(Vec3::new(-1.0, 0.0, 0.0))),
            (ball.clone(), Affine3A::from_translation(Vec3::new(1.0, 0.0, 0.0))),
        ])
        .unwrap();
        let ground = CollisionShape::ground();
        let mut out = Vec::new();
        collide(
            &placed(0, &ground, Vec3::ZERO),
            &placed(1, &pair, Vec3::new(0.0, 0.4, 0.0)),
            0.0,
            &mut out,
        );
        assert_eq!(out.len(), 2);
        for m in &out {
            assert_eq!(m.a, id(0));
            assert_eq!(m.normal, Vec3::Y);
        }
    }

    #[test]
    fn test_ray_sweep_hits_sphere() {
        let ball = CollisionShape::sphere(1.0).unwrap();
        let ray = CollisionShape::Ray;
        let mut probe = placed(0, &ray, Vec3::new(0.0, 5.0, 0.0));
        probe.sweep = Vec3::new(0.0, -10.0, 0.0);
        let mut out = Vec::new();
        collide(&placed(1, &ball, Vec3::ZERO), &probe, 0.0, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].a, out[0].b), (id(1), id(0)));
        assert!((out[0].points[0].on_a - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_raycast_mesh_and_plane() {
        let cube = CollisionShape::TriangleMesh(TriangleMesh::cuboid(Vec3::ONE));
        let hit = raycast(&cube, &Affine3A::IDENTITY, Vec3::new(0.2, 5.0, 0.1), Vec3::new(0.2, -5.0, 0.1))
            .unwrap();
        assert!((hit.fraction - 0.4).abs() < 1e-5);
        assert!((hit.normal - Vec3::Y).length() < 1e-5);

        let ground = CollisionShape::ground();
        let hit = raycast(&ground, &Affine3A::IDENTITY, Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, -2.0, 0.0))
            .unwrap();
        assert!((hit.fraction - 0.5).abs() < 1e-6);
        assert!(raycast(&ground, &Affine3A::IDENTITY, Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, 1.0, 0.0)).is_none());
    }

    #[test]
    fn test_segment_sphere() {
        assert_eq!(segment_sphere(Vec3::ZERO, Vec3::X, Vec3::ZERO, 1.0), Some(0.0));
        let t = segment_sphere(Vec3::new(-3.0, 0.0, 0.0), Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO, 1.0).unwrap();
        assert!((t - 1.0 / 3.0).abs() < 1e-6);
        assert!(segment_sphere(Vec3::new(-3.0, 2.0, 0.0), Vec3::new(3.0, 2.0, 0.0), Vec3::ZERO, 1.0).is_none());
    }
}
