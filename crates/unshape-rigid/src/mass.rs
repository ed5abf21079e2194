//! Mass, center of mass and inertia.

use std::ops::{Add, AddAssign, Mul, MulAssign};

use glam::{Mat3, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mass properties of a body or shape.
///
/// `moi` is the inertia tensor about `com`, expressed in the owner's local
/// frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MassInfo {
    /// Total mass.
    pub mass: f32,
    /// Center of mass.
    pub com: Vec3,
    /// Inertia tensor about the center of mass (symmetric).
    pub moi: Mat3,
}

impl Default for MassInfo {
    fn default() -> Self {
        Self::ZERO
    }
}

impl MassInfo {
    /// No mass at all.
    pub const ZERO: Self = Self {
        mass: 0.0,
        com: Vec3::ZERO,
        moi: Mat3::ZERO,
    };

    /// A point mass at `pos`.
    pub fn point(mass: f32, pos: Vec3) -> Self {
        Self {
            mass,
            com: pos,
            moi: Mat3::ZERO,
        }
    }

    /// Solid sphere of uniform density.
    pub fn sphere(mass: f32, radius: f32) -> Self {
        Self {
            mass,
            com: Vec3::ZERO,
            moi: Mat3::from_diagonal(Vec3::splat(0.4 * mass * radius * radius)),
        }
    }

    /// Solid box of uniform density.
    pub fn cuboid(mass: f32, half_extents: Vec3) -> Self {
        let e = half_extents * 2.0;
        let factor = mass / 12.0;
        Self {
            mass,
            com: Vec3::ZERO,
            moi: Mat3::from_diagonal(Vec3::new(
                factor * (e.y * e.y + e.z * e.z),
                factor * (e.x * e.x + e.z * e.z),
                factor * (e.x * e.x + e.y * e.y),
            )),
        }
    }

    /// Inverse mass; zero for massless or non-finite masses.
    pub fn inverse_mass(&self) -> f32 {
        if self.mass > 0.0 && self.mass.is_finite() {
            1.0 / self.mass
        } else {
            0.0
        }
    }

    /// Inertia tensor about `pivot` instead of the center of mass.
    pub fn moi_about(&self, pivot: Vec3) -> Mat3 {
        self.moi + parallel_axis(self.mass, self.com - pivot)
    }

    /// Expresses these properties in a parent frame given by `rotation` and
    /// `translation`.
    pub fn transformed(&self, rotation: Mat3, translation: Vec3) -> Self {
        Self {
            mass: self.mass,
            com: rotation * self.com + translation,
            moi: rotation * self.moi * rotation.transpose(),
        }
    }
}

/// Parallel-axis offset term `m (|d|² I - d dᵀ)`.
fn parallel_axis(mass: f32, d: Vec3) -> Mat3 {
    let outer = Mat3::from_cols(d * d.x, d * d.y, d * d.z);
    (Mat3::IDENTITY * d.length_squared() - outer) * mass
}

impl AddAssign for MassInfo {
    fn add_assign(&mut self, other: Self) {
        let total = self.mass + other.mass;
        if total <= 0.0 {
            *self = MassInfo::ZERO;
            return;
        }

        let com = (self.com * self.mass + other.com * other.mass) / total;
        let moi = self.moi_about(com) + other.moi_about(com);
        *self = Self {
            mass: total,
            com,
            moi,
        };
    }
}

impl Add for MassInfo {
    type Output = MassInfo;

    fn add(mut self, other: Self) -> MassInfo {
        self += other;
        self
    }
}

impl MulAssign<f32> for MassInfo {
    fn mul_assign(&mut self, scale: f32) {
        self.mass *= scale;
        self.moi *= scale;
    }
}

impl Mul<f32> for MassInfo {
    type Output = MassInfo;

    fn mul(mut self, scale: f32) -> MassInfo {
        self *= scale;
        self
    }
}

impl std::iter::Sum for MassInfo {
    fn sum<I: Iterator<Item = MassInfo>>(iter: I) -> Self {
        iter.fold(MassInfo::ZERO, |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mat_close(a: Mat3, b: Mat3, eps: f32) -> bool {
        a.abs_diff_eq(b, eps)
    }

    #[test]
    fn test_zero_plus_zero() {
        let sum = MassInfo::ZERO + MassInfo::ZERO;
        assert_eq!(sum.mass, 0.0);
        assert_eq!(sum.inverse_mass(), 0.0);
        assert!(sum.com.is_finite());
    }

    #[test]
    fn test_two_points_on_axis() {
        let a = MassInfo::point(1.0, Vec3::new(-1.0, 0.0, 0.0));
        let b = MassInfo::point(1.0, Vec3::new(1.0, 0.0, 0.0));
        let sum = a + b;
        assert_eq!(sum.mass, 2.0);
        assert_eq!(sum.com, Vec3::ZERO);
        // Dumbbell along x: no inertia about x, 2 about y and z.
        assert!(mat_close(
            sum.moi,
            Mat3::from_diagonal(Vec3::new(0.0, 2.0, 2.0)),
            1e-6
        ));
    }

    #[test]
    fn test_scale() {
        let m = MassInfo::sphere(2.0, 1.0) * 3.0;
        assert_eq!(m.mass, 6.0);
        assert!((m.moi.x_axis.x - 2.4).abs() < 1e-5);
    }

    #[test]
    fn test_transformed_rotates_tensor() {
        let m = MassInfo::cuboid(1.0, Vec3::new(2.0, 0.5, 0.5));
        let rot = Mat3::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let t = m.transformed(rot, Vec3::new(0.0, 0.0, 3.0));
        assert!((t.com - Vec3::new(0.0, 0.0, 3.0)).length() < 1e-6);
        // Long axis moved from x to y.
        assert!((t.moi.y_axis.y - m.moi.x_axis.x).abs() < 1e-4);
        assert!((t.moi.x_axis.x - m.moi.y_axis.y).abs() < 1e-4);
    }
}
