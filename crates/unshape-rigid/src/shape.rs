//! Collision shapes.
//!
//! Shapes are immutable geometric descriptions in a body's local frame. Each
//! variant knows its density-1 mass properties, whether it may move, its
//! bounds under a transform, and how to draw itself.

use glam::{Affine3A, Mat3, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::debug::{Color, DebugRenderer};
use crate::error::ConfigError;
use crate::geom::{Aabb, Plane};
use crate::mass::MassInfo;

/// Discriminant of a [`CollisionShape`]. Doubles as the serialized tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ShapeType {
    /// Ray (swept point).
    Ray = 0,
    /// Sphere.
    Sphere = 1,
    /// Triangle mesh.
    TriangleMesh = 2,
    /// Infinite plane.
    InfinitePlane = 3,
    /// Composite of transformed child shapes.
    Multi = 4,
}

impl ShapeType {
    /// Number of shape types.
    pub const COUNT: usize = 5;

    /// All shape types in tag order.
    pub const ALL: [ShapeType; Self::COUNT] = [
        ShapeType::Ray,
        ShapeType::Sphere,
        ShapeType::TriangleMesh,
        ShapeType::InfinitePlane,
        ShapeType::Multi,
    ];

    /// Dense index for bucketed storage.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Decodes a tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }
}

/// A triangle soup with shared vertices.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TriangleMesh {
    /// Vertex positions in local space.
    pub vertices: Vec<Vec3>,
    /// Counter-clockwise (outward-facing) index triples.
    pub triangles: Vec<[u32; 3]>,
}

impl TriangleMesh {
    /// Builds a mesh, rejecting empty meshes and dangling indices.
    pub fn new(vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Result<Self, ConfigError> {
        if triangles.is_empty() {
            return Err(ConfigError::DegenerateShape("mesh has no triangles".into()));
        }
        let count = vertices.len() as u32;
        if let Some(bad) = triangles.iter().flatten().find(|&&i| i >= count) {
            return Err(ConfigError::DegenerateShape(format!(
                "mesh index {bad} out of range for {count} vertices"
            )));
        }
        Ok(Self {
            vertices,
            triangles,
        })
    }

    /// Axis-aligned box mesh centered on the origin.
    pub fn cuboid(half_extents: Vec3) -> Self {
        let h = half_extents;
        let vertices = vec![
            Vec3::new(-h.x, -h.y, -h.z),
            Vec3::new(h.x, -h.y, -h.z),
            Vec3::new(h.x, h.y, -h.z),
            Vec3::new(-h.x, h.y, -h.z),
            Vec3::new(-h.x, -h.y, h.z),
            Vec3::new(h.x, -h.y, h.z),
            Vec3::new(h.x, h.y, h.z),
            Vec3::new(-h.x, h.y, h.z),
        ];
        let triangles = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [3, 7, 6],
            [3, 6, 2],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        Self {
            vertices,
            triangles,
        }
    }

    /// Iterates triangles as vertex triples.
    pub fn triangle_vertices(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.triangles.iter().map(|&[a, b, c]| {
            [
                self.vertices[a as usize],
                self.vertices[b as usize],
                self.vertices[c as usize],
            ]
        })
    }

    /// Mass properties of the enclosed volume at density 1.
    ///
    /// Sums signed tetrahedra against the origin, so the mesh should be
    /// closed with consistent winding.
    pub fn mass_info(&self) -> MassInfo {
        // Covariance of the canonical tetrahedron (0, e1, e2, e3).
        let canonical = Mat3::from_cols(
            Vec3::new(2.0, 1.0, 1.0),
            Vec3::new(1.0, 2.0, 1.0),
            Vec3::new(1.0, 1.0, 2.0),
        ) * (1.0 / 120.0);

        let mut volume = 0.0;
        let mut weighted_com = Vec3::ZERO;
        let mut covariance = Mat3::ZERO;

        for [a, b, c] in self.triangle_vertices() {
            let basis = Mat3::from_cols(a, b, c);
            let det = basis.determinant();
            volume += det / 6.0;
            weighted_com += (a + b + c) * (det / 24.0);
            covariance += basis * canonical * basis.transpose() * det;
        }

        if volume.abs() <= f32::EPSILON {
            return MassInfo::ZERO;
        }
        if volume < 0.0 {
            // Inward winding: flip the sign of every accumulated term.
            volume = -volume;
            weighted_com = -weighted_com;
            covariance = covariance * -1.0;
        }

        let com = weighted_com / volume;
        let outer = Mat3::from_cols(com * com.x, com * com.y, com * com.z);
        let covariance = covariance - outer * volume;
        let moi = Mat3::IDENTITY * (covariance.x_axis.x + covariance.y_axis.y + covariance.z_axis.z)
            - covariance;

        MassInfo {
            mass: volume,
            com,
            moi,
        }
    }
}

/// Collision shape of a body.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CollisionShape {
    /// A point swept along the body's velocity each tick.
    Ray,
    /// Sphere centered on the local origin.
    Sphere {
        /// Radius of the sphere.
        radius: f32,
    },
    /// Triangle mesh.
    TriangleMesh(TriangleMesh),
    /// Infinite plane; never moves.
    InfinitePlane(Plane),
    /// Child shapes, each with a local transform.
    Multi(Vec<(CollisionShape, Affine3A)>),
}

impl CollisionShape {
    /// Sphere shape.
    pub fn sphere(radius: f32) -> Result<Self, ConfigError> {
        if !(radius > 0.0 && radius.is_finite()) {
            return Err(ConfigError::DegenerateShape(format!(
                "sphere radius must be positive, got {radius}"
            )));
        }
        Ok(CollisionShape::Sphere { radius })
    }

    /// Infinite plane shape.
    pub fn plane(normal: Vec3, offset: f32) -> Result<Self, ConfigError> {
        Plane::new(normal, offset)
            .map(CollisionShape::InfinitePlane)
            .ok_or_else(|| ConfigError::DegenerateShape("plane normal has zero length".into()))
    }

    /// Ground plane at `y = 0` facing up.
    pub fn ground() -> Self {
        CollisionShape::InfinitePlane(Plane {
            normal: Vec3::Y,
            offset: 0.0,
        })
    }

    /// Mesh shape.
    pub fn mesh(vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Result<Self, ConfigError> {
        TriangleMesh::new(vertices, triangles).map(CollisionShape::TriangleMesh)
    }

    /// Composite shape. Children may not be planes or other composites.
    pub fn multi(children: Vec<(CollisionShape, Affine3A)>) -> Result<Self, ConfigError> {
        if children.is_empty() {
            return Err(ConfigError::DegenerateShape("multi shape has no children".into()));
        }
        if children.iter().any(|(s, _)| {
            matches!(
                s.shape_type(),
                ShapeType::InfinitePlane | ShapeType::Multi
            )
        }) {
            return Err(ConfigError::DegenerateShape(
                "multi shape children must be finite, non-composite shapes".into(),
            ));
        }
        Ok(CollisionShape::Multi(children))
    }

    /// Discriminant of this shape.
    pub fn shape_type(&self) -> ShapeType {
        match self {
            CollisionShape::Ray => ShapeType::Ray,
            CollisionShape::Sphere { .. } => ShapeType::Sphere,
            CollisionShape::TriangleMesh(_) => ShapeType::TriangleMesh,
            CollisionShape::InfinitePlane(_) => ShapeType::InfinitePlane,
            CollisionShape::Multi(_) => ShapeType::Multi,
        }
    }

    /// Whether a body with this shape may ever move.
    pub fn can_move(&self) -> bool {
        !matches!(self, CollisionShape::InfinitePlane(_))
    }

    /// Mass properties at density 1.
    pub fn compute_mass_info(&self) -> MassInfo {
        match self {
            CollisionShape::Ray | CollisionShape::InfinitePlane(_) => MassInfo::ZERO,
            CollisionShape::Sphere { radius } => {
                let volume = 4.0 / 3.0 * std::f32::consts::PI * radius.powi(3);
                MassInfo::sphere(volume, *radius)
            }
            CollisionShape::TriangleMesh(mesh) => mesh.mass_info(),
            CollisionShape::Multi(children) => children
                .iter()
                .map(|(shape, xform)| {
                    shape
                        .compute_mass_info()
                        .transformed(Mat3::from(xform.matrix3), Vec3::from(xform.translation))
                })
                .sum(),
        }
    }

    /// World-space bounds under `xform`. `None` for unbounded shapes.
    pub fn aabb(&self, xform: &Affine3A) -> Option<Aabb> {
        match self {
            CollisionShape::Ray => {
                let p = xform.transform_point3(Vec3::ZERO);
                Some(Aabb::new(p, p))
            }
            CollisionShape::Sphere { radius } => Some(Aabb::from_center_half_extents(
                xform.transform_point3(Vec3::ZERO),
                Vec3::splat(*radius),
            )),
            CollisionShape::TriangleMesh(mesh) => {
                Aabb::from_points(mesh.vertices.iter().map(|v| xform.transform_point3(*v)))
            }
            CollisionShape::InfinitePlane(_) => None,
            CollisionShape::Multi(children) => children
                .iter()
                .filter_map(|(shape, local)| shape.aabb(&(*xform * *local)))
                .reduce(|a, b| a.union(&b)),
        }
    }

    /// World-space plane for an infinite plane shape under `xform`.
    pub fn world_plane(&self, xform: &Affine3A) -> Option<Plane> {
        match self {
            CollisionShape::InfinitePlane(plane) => {
                let point = xform.transform_point3(plane.normal * plane.offset);
                Plane::from_point_normal(point, xform.transform_vector3(plane.normal))
            }
            _ => None,
        }
    }

    /// Pushes this shape's outline into `renderer`.
    pub fn debug_draw(&self, renderer: &mut dyn DebugRenderer, xform: &Affine3A, color: Color) {
        match self {
            CollisionShape::Ray => {
                let p = xform.transform_point3(Vec3::ZERO);
                for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
                    renderer.line(p - axis * 0.1, p + axis * 0.1, color);
                }
            }
            CollisionShape::Sphere { radius } => renderer.sphere(xform, *radius, color),
            CollisionShape::TriangleMesh(mesh) => {
                for [a, b, c] in mesh.triangle_vertices() {
                    let (a, b, c) = (
                        xform.transform_point3(a),
                        xform.transform_point3(b),
                        xform.transform_point3(c),
                    );
                    renderer.line(a, b, color);
                    renderer.line(b, c, color);
                    renderer.line(c, a, color);
                }
            }
            CollisionShape::InfinitePlane(_) => {
                let Some(plane) = self.world_plane(xform) else {
                    return;
                };
                let center = plane.normal * plane.offset;
                let u = plane.normal.any_orthonormal_vector();
                let v = plane.normal.cross(u);
                const HALF: f32 = 10.0;
                for i in -5..=5 {
                    let s = i as f32 * 2.0;
                    renderer.line(center + u * s - v * HALF, center + u * s + v * HALF, color);
                    renderer.line(center + v * s - u * HALF, center + v * s + u * HALF, color);
                }
            }
            CollisionShape::Multi(children) => {
                for (shape, local) in children {
                    shape.debug_draw(renderer, &(*xform * *local), color);
                }
            }
        }
    }
}
