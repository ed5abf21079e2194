//! Debug drawing hooks.
//!
//! The physics core knows nothing about rendering beyond "accepts line
//! primitives". Renderers implement [`DebugRenderer`]; shapes, bodies and
//! regions push lines into it.

use glam::{Affine3A, Vec3};

use crate::geom::Aabb;

/// RGBA color for debug lines.
pub type Color = [f32; 4];

/// Color used for active bodies.
pub const ACTIVE_COLOR: Color = [0.2, 1.0, 0.2, 1.0];
/// Color used for sleeping bodies.
pub const INACTIVE_COLOR: Color = [0.4, 0.4, 1.0, 1.0];
/// Color used for static geometry.
pub const STATIC_COLOR: Color = [0.7, 0.7, 0.7, 1.0];
/// Color used for region bounds.
pub const REGION_COLOR: Color = [1.0, 0.6, 0.0, 0.5];

/// Receives debug geometry.
pub trait DebugRenderer {
    /// Draw a world-space line segment.
    fn line(&mut self, from: Vec3, to: Vec3, color: Color);

    /// Draw a sphere as three axis circles.
    fn sphere(&mut self, xform: &Affine3A, radius: f32, color: Color) {
        const SEGMENTS: usize = 16;
        let axes = [(Vec3::X, Vec3::Y), (Vec3::Y, Vec3::Z), (Vec3::Z, Vec3::X)];
        for (u, v) in axes {
            let point = |i: usize| {
                let angle = i as f32 / SEGMENTS as f32 * std::f32::consts::TAU;
                xform.transform_point3((u * angle.cos() + v * angle.sin()) * radius)
            };
            for i in 0..SEGMENTS {
                self.line(point(i), point(i + 1), color);
            }
        }
    }

    /// Draw the twelve edges of a world-space box.
    fn aabb(&mut self, aabb: &Aabb, color: Color) {
        let c = aabb.corners();
        const EDGES: [(usize, usize); 12] = [
            (0, 1),
            (2, 3),
            (4, 5),
            (6, 7),
            (0, 2),
            (1, 3),
            (4, 6),
            (5, 7),
            (0, 4),
            (1, 5),
            (2, 6),
            (3, 7),
        ];
        for (a, b) in EDGES {
            self.line(c[a], c[b], color);
        }
    }
}

/// Collects lines into a vector. Handy for tests and offline dumps.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    /// Collected `(from, to, color)` triples.
    pub lines: Vec<(Vec3, Vec3, Color)>,
}

impl DebugRenderer for LineBuffer {
    fn line(&mut self, from: Vec3, to: Vec3, color: Color) {
        self.lines.push((from, to, color));
    }
}
