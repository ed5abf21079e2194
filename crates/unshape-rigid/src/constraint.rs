//! Constraints between rigid bodies.
//!
//! Every constraint follows the same two-phase protocol each tick:
//! 1. `do_update` recomputes tick-scoped matrices and targets from the
//!    current poses, before any impulse is applied.
//! 2. `do_constraint` applies one impulse per solver iteration and reports
//!    whether the bodies should be kept awake.
//!
//! Constraints never touch [`RigidBody`](crate::RigidBody) directly. They read
//! and write [`SolverBody`] snapshots so the solver can run batch members on
//! independent copies.

use glam::{Mat3, Quat, Vec3};

use crate::config::ContactSettings;
use crate::contact::ContactPoint;
use crate::joint::{FixedJointConstraint, JointConstraint, PlacedFootConstraint, SkeletalJointConstraint};
use crate::object::{ObjectId, UserEntity};

/// Velocity-level view of a body used while solving.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverBody {
    /// Body handle.
    pub id: ObjectId,
    /// World-space center of mass.
    pub com: Vec3,
    /// Orientation at the start of the tick.
    pub orientation: Quat,
    /// Linear velocity.
    pub velocity: Vec3,
    /// Angular velocity.
    pub angular_velocity: Vec3,
    /// Inverse mass, 0 if immovable.
    pub inv_mass: f32,
    /// World-space inverse inertia tensor.
    pub inv_moi: Mat3,
    /// Whether the body is a node in the constraint graph.
    pub merges: bool,
}

impl SolverBody {
    /// An immovable body at the origin, for constraints anchored to nothing.
    pub fn fixed(id: ObjectId) -> Self {
        Self {
            id,
            com: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inv_mass: 0.0,
            inv_moi: Mat3::ZERO,
            merges: false,
        }
    }

    /// Velocity of the world-space point `p` rigidly attached to the body.
    pub fn velocity_at(&self, p: Vec3) -> Vec3 {
        self.velocity + self.angular_velocity.cross(p - self.com)
    }

    /// Applies a linear impulse at world-space point `p`.
    pub fn apply_impulse(&mut self, impulse: Vec3, p: Vec3) {
        self.velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_moi * (p - self.com).cross(impulse);
    }

    /// Applies an angular impulse.
    pub fn apply_angular_impulse(&mut self, impulse: Vec3) {
        self.angular_velocity += self.inv_moi * impulse;
    }

    /// Whether nothing can move this body.
    pub fn is_immovable(&self) -> bool {
        self.inv_mass == 0.0
    }
}

/// Per-tick parameters shared by every constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepContext {
    /// Timestep.
    pub dt: f32,
    /// World gravity.
    pub gravity: Vec3,
    /// Contact tuning.
    pub contact: ContactSettings,
}

/// A resolved contact, as reported to collision callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactReport {
    /// Body receiving the report.
    pub body: ObjectId,
    /// Body it collided with.
    pub other: ObjectId,
    /// Entity owning `body`.
    pub entity: Option<UserEntity>,
    /// Entity owning `other`.
    pub other_entity: Option<UserEntity>,
    /// World-space contact point.
    pub position: Vec3,
    /// Contact normal pointing from `other` toward `body`.
    pub normal: Vec3,
    /// Impulse applied to `body`.
    pub impulse: Vec3,
}

impl ContactReport {
    /// The same contact seen from the other body.
    pub fn flipped(&self) -> Self {
        Self {
            body: self.other,
            other: self.body,
            entity: self.other_entity,
            other_entity: self.entity,
            position: self.position,
            normal: -self.normal,
            impulse: -self.impulse,
        }
    }
}

/// Two-phase constraint protocol.
pub trait ConstraintSolver: Send {
    /// The two bodies this constraint links, `(a, b)`.
    fn bodies(&self) -> (ObjectId, ObjectId);

    /// Recomputes tick-scoped state from current poses.
    fn do_update(&mut self, a: &SolverBody, b: &SolverBody, ctx: &StepContext);

    /// Applies one impulse. Returns `true` if the bodies should be woken.
    fn do_constraint(&mut self, a: &mut SolverBody, b: &mut SolverBody, ctx: &StepContext) -> bool;

    /// Takes the pending callback report, if the constraint has one.
    fn take_report(&mut self) -> Option<ContactReport> {
        None
    }
}

/// A constraint between bodies.
#[derive(Clone, Debug)]
pub enum PhysicsConstraint {
    /// Contact produced by the narrow phase this tick.
    Contact(ContactPoint),
    /// Ball joint with angular extents.
    Joint(JointConstraint),
    /// Joint with no relative rotation.
    Fixed(FixedJointConstraint),
    /// Joint with extents and a bounded motor.
    Skeletal(SkeletalJointConstraint),
    /// Foot pinned to the ground.
    PlacedFoot(PlacedFootConstraint),
}

impl ConstraintSolver for PhysicsConstraint {
    fn bodies(&self) -> (ObjectId, ObjectId) {
        match self {
            PhysicsConstraint::Contact(c) => c.bodies(),
            PhysicsConstraint::Joint(c) => c.bodies(),
            PhysicsConstraint::Fixed(c) => c.bodies(),
            PhysicsConstraint::Skeletal(c) => c.bodies(),
            PhysicsConstraint::PlacedFoot(c) => c.bodies(),
        }
    }

    fn do_update(&mut self, a: &SolverBody, b: &SolverBody, ctx: &StepContext) {
        match self {
            PhysicsConstraint::Contact(c) => c.do_update(a, b, ctx),
            PhysicsConstraint::Joint(c) => c.do_update(a, b, ctx),
            PhysicsConstraint::Fixed(c) => c.do_update(a, b, ctx),
            PhysicsConstraint::Skeletal(c) => c.do_update(a, b, ctx),
            PhysicsConstraint::PlacedFoot(c) => c.do_update(a, b, ctx),
        }
    }

    fn do_constraint(&mut self, a: &mut SolverBody, b: &mut SolverBody, ctx: &StepContext) -> bool {
        match self {
            PhysicsConstraint::Contact(c) => c.do_constraint(a, b, ctx),
            PhysicsConstraint::Joint(c) => c.do_constraint(a, b, ctx),
            PhysicsConstraint::Fixed(c) => c.do_constraint(a, b, ctx),
            PhysicsConstraint::Skeletal(c) => c.do_constraint(a, b, ctx),
            PhysicsConstraint::PlacedFoot(c) => c.do_constraint(a, b, ctx),
        }
    }

    fn take_report(&mut self) -> Option<ContactReport> {
        match self {
            PhysicsConstraint::Contact(c) => c.take_report(),
            _ => None,
        }
    }
}

impl From<ContactPoint> for PhysicsConstraint {
    fn from(c: ContactPoint) -> Self {
        PhysicsConstraint::Contact(c)
    }
}

impl From<JointConstraint> for PhysicsConstraint {
    fn from(c: JointConstraint) -> Self {
        PhysicsConstraint::Joint(c)
    }
}

impl From<FixedJointConstraint> for PhysicsConstraint {
    fn from(c: FixedJointConstraint) -> Self {
        PhysicsConstraint::Fixed(c)
    }
}

impl From<SkeletalJointConstraint> for PhysicsConstraint {
    fn from(c: SkeletalJointConstraint) -> Self {
        PhysicsConstraint::Skeletal(c)
    }
}

impl From<PlacedFootConstraint> for PhysicsConstraint {
    fn from(c: PlacedFootConstraint) -> Self {
        PhysicsConstraint::PlacedFoot(c)
    }
}

// ============================================================================
// Effective mass
// ============================================================================

/// Cross-product matrix: `skew(r) * v == r.cross(v)`.
pub fn skew(r: Vec3) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(0.0, r.z, -r.y),
        Vec3::new(-r.z, 0.0, r.x),
        Vec3::new(r.y, -r.x, 0.0),
    )
}

/// Matrix mapping an impulse applied at lever arms `ra`/`rb` (equal and
/// opposite on the two bodies) to the change in relative point velocity.
pub fn point_mass_matrix(a: &SolverBody, ra: Vec3, b: &SolverBody, rb: Vec3) -> Mat3 {
    let sa = skew(ra);
    let sb = skew(rb);
    Mat3::IDENTITY * (a.inv_mass + b.inv_mass) - sa * a.inv_moi * sa - sb * b.inv_moi * sb
}

/// Inverts `m`, or returns `None` if it is singular or non-finite.
pub fn try_invert(m: Mat3) -> Option<Mat3> {
    let det = m.determinant();
    if !det.is_finite() || det.abs() <= 1e-12 {
        return None;
    }
    let inv = m.inverse();
    inv.is_finite().then_some(inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(id: u32, com: Vec3) -> SolverBody {
        SolverBody {
            com,
            inv_mass: 1.0,
            inv_moi: Mat3::IDENTITY,
            merges: true,
            ..SolverBody::fixed(ObjectId::from_raw(id, 0))
        }
    }

    #[test]
    fn test_skew_matches_cross() {
        let r = Vec3::new(1.0, -2.0, 3.0);
        let v = Vec3::new(0.5, 4.0, -1.0);
        assert!((skew(r) * v - r.cross(v)).length() < 1e-6);
    }

    #[test]
    fn test_mass_matrix_predicts_velocity_change() {
        let mut a = body(0, Vec3::ZERO);
        let mut b = body(1, Vec3::new(0.0, 2.0, 0.0));
        let p = Vec3::new(0.3, 1.0, 0.2);
        let (ra, rb) = (p - a.com, p - b.com);
        let k = point_mass_matrix(&a, ra, &b, rb);

        let impulse = Vec3::new(0.2, -0.7, 0.1);
        let before = a.velocity_at(p) - b.velocity_at(p);
        a.apply_impulse(impulse, p);
        b.apply_impulse(-impulse, p);
        let after = a.velocity_at(p) - b.velocity_at(p);
        assert!(((after - before) - k * impulse).length() < 1e-5);
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let a = SolverBody::fixed(ObjectId::from_raw(0, 0));
        let b = SolverBody::fixed(ObjectId::from_raw(1, 0));
        let k = point_mass_matrix(&a, Vec3::X, &b, Vec3::Y);
        assert!(try_invert(k).is_none());
        assert!(try_invert(Mat3::IDENTITY).is_some());
    }

    #[test]
    fn test_report_flip() {
        let r = ContactReport {
            body: ObjectId::from_raw(0, 0),
            other: ObjectId::from_raw(1, 0),
            entity: Some(UserEntity(7)),
            other_entity: None,
            position: Vec3::ZERO,
            normal: Vec3::Y,
            impulse: Vec3::new(0.0, 2.0, 0.0),
        };
        let f = r.flipped();
        assert_eq!(f.body, r.other);
        assert_eq!(f.other_entity, Some(UserEntity(7)));
        assert_eq!(f.normal, -Vec3::Y);
        assert_eq!(f.flipped(), r);
    }
}
