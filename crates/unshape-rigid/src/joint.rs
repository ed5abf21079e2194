//! Joint constraints.
//!
//! All joints pin an anchor on body A to an anchor on body B and limit the
//! relative rotation of B's joint frame inside A's. Relative rotation is
//! measured as a rotation vector in A's joint frame: `x` is twist about the
//! joint axis, `y` and `z` are the two swings.
//!
//! When the rotation predicted for the end of the tick leaves the allowed
//! extents, the angular target is recomputed against the clamped rotation,
//! so a joint at its limit still moves as far as the limit allows.

use glam::{Mat3, Quat, Vec3};

use crate::constraint::{point_mass_matrix, try_invert, ConstraintSolver, SolverBody, StepContext};
use crate::object::ObjectId;

/// Fraction of positional drift removed per tick.
const BAUMGARTE: f32 = 0.2;

/// Drives a joint toward a target relative orientation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointDrive {
    /// Target rotation of B's frame relative to A's.
    pub target: Quat,
    /// Fraction of the remaining error removed per tick, 0-1.
    pub stiffness: f32,
}

/// Ball joint with per-axis angular extents.
#[derive(Clone, Debug)]
pub struct JointConstraint {
    /// First body.
    pub obj_a: ObjectId,
    /// Second body.
    pub obj_b: ObjectId,
    /// Anchor relative to A's center of mass, in A's local frame.
    pub anchor_a: Vec3,
    /// Anchor relative to B's center of mass, in B's local frame.
    pub anchor_b: Vec3,
    /// Joint frame in A's local frame.
    pub frame_a: Quat,
    /// Joint frame in B's local frame.
    pub frame_b: Quat,
    /// Lower rotation-vector limits (twist, swing, swing).
    pub min_extents: Vec3,
    /// Upper rotation-vector limits (twist, swing, swing).
    pub max_extents: Vec3,
    /// Optional orientation drive.
    pub drive: Option<JointDrive>,

    p_a: Vec3,
    p_b: Vec3,
    linear_inv: Option<Mat3>,
    angular_inv: Option<Mat3>,
    bias: Vec3,
    joint_rot: Quat,
    rot_vec: Vec3,
    linear_impulse: Vec3,
    angular_impulse: Vec3,
}

impl JointConstraint {
    /// Joint with coincident anchors and no angular limits.
    pub fn new(obj_a: ObjectId, obj_b: ObjectId, anchor_a: Vec3, anchor_b: Vec3) -> Self {
        Self {
            obj_a,
            obj_b,
            anchor_a,
            anchor_b,
            frame_a: Quat::IDENTITY,
            frame_b: Quat::IDENTITY,
            min_extents: Vec3::splat(-std::f32::consts::PI),
            max_extents: Vec3::splat(std::f32::consts::PI),
            drive: None,
            p_a: Vec3::ZERO,
            p_b: Vec3::ZERO,
            linear_inv: None,
            angular_inv: None,
            bias: Vec3::ZERO,
            joint_rot: Quat::IDENTITY,
            rot_vec: Vec3::ZERO,
            linear_impulse: Vec3::ZERO,
            angular_impulse: Vec3::ZERO,
        }
    }

    /// Set the joint frames in each body's local space.
    pub fn with_frames(mut self, frame_a: Quat, frame_b: Quat) -> Self {
        self.frame_a = frame_a.normalize();
        self.frame_b = frame_b.normalize();
        self
    }

    /// Set the angular extents.
    pub fn with_extents(mut self, min: Vec3, max: Vec3) -> Self {
        self.min_extents = min.min(max);
        self.max_extents = max.max(min);
        self
    }

    /// Drive toward a relative orientation.
    pub fn with_drive(mut self, target: Quat, stiffness: f32) -> Self {
        self.drive = Some(JointDrive {
            target: target.normalize(),
            stiffness: stiffness.clamp(0.0, 1.0),
        });
        self
    }

    /// Relative rotation vector measured at the last update.
    pub fn rotation_vector(&self) -> Vec3 {
        self.rot_vec
    }

    /// Linear impulse applied since the last update.
    pub fn linear_impulse(&self) -> Vec3 {
        self.linear_impulse
    }

    /// Takes back every impulse applied since the last update.
    pub(crate) fn revert(&mut self, a: &mut SolverBody, b: &mut SolverBody) {
        a.apply_impulse(-self.linear_impulse, self.p_a);
        b.apply_impulse(self.linear_impulse, self.p_b);
        a.apply_angular_impulse(-self.angular_impulse);
        b.apply_angular_impulse(self.angular_impulse);
        self.linear_impulse = Vec3::ZERO;
        self.angular_impulse = Vec3::ZERO;
    }

    /// World-space joint frame of A at the last update.
    pub fn joint_rotation(&self) -> Quat {
        self.joint_rot
    }

    fn clamp_extents(&self, v: Vec3) -> Vec3 {
        v.clamp(self.min_extents, self.max_extents)
    }

    /// Relative angular velocity `ω_b - ω_a` expressed in A's joint frame.
    fn local_relative_spin(&self, a: &SolverBody, b: &SolverBody) -> Vec3 {
        self.joint_rot.inverse() * (b.angular_velocity - a.angular_velocity)
    }

    /// Angular velocity the joint should have this iteration, in A's joint
    /// frame, or `None` if the joint is free to move as it is.
    fn angular_target(&self, current: Vec3, dt: f32) -> Option<Vec3> {
        let mut target = match self.drive {
            Some(drive) => {
                let goal = self.clamp_extents(rotation_vector(drive.target));
                Some((goal - self.rot_vec) / dt * drive.stiffness)
            }
            None => None,
        };
        let spin = target.unwrap_or(current);
        let predicted = self.rot_vec + spin * dt;
        let clamped = self.clamp_extents(predicted);
        if clamped != predicted {
            target = Some((clamped - self.rot_vec) / dt);
        }
        target
    }
}

/// Rotation vector of `q`, taking the short way round.
fn rotation_vector(q: Quat) -> Vec3 {
    let q = if q.w < 0.0 { -q } else { q };
    q.to_scaled_axis()
}

impl ConstraintSolver for JointConstraint {
    fn bodies(&self) -> (ObjectId, ObjectId) {
        (self.obj_a, self.obj_b)
    }

    fn do_update(&mut self, a: &SolverBody, b: &SolverBody, ctx: &StepContext) {
        let r_a = a.orientation * self.anchor_a;
        let r_b = b.orientation * self.anchor_b;
        self.p_a = a.com + r_a;
        self.p_b = b.com + r_b;
        self.linear_inv = try_invert(point_mass_matrix(a, r_a, b, r_b));
        self.angular_inv = try_invert(a.inv_moi + b.inv_moi);
        if self.linear_inv.is_none() {
            tracing::debug!(a = ?self.obj_a, b = ?self.obj_b, "joint has no linear response this tick");
        }

        // Pull A's anchor onto B's over a few ticks.
        self.bias = (self.p_b - self.p_a) * (BAUMGARTE / ctx.dt);

        self.joint_rot = a.orientation * self.frame_a;
        let frame_b = b.orientation * self.frame_b;
        self.rot_vec = rotation_vector(self.joint_rot.inverse() * frame_b);
        self.linear_impulse = Vec3::ZERO;
        self.angular_impulse = Vec3::ZERO;
    }

    fn do_constraint(&mut self, a: &mut SolverBody, b: &mut SolverBody, ctx: &StepContext) -> bool {
        let mut applied = 0.0;

        if let Some(inv) = self.linear_inv {
            let dv = a.velocity_at(self.p_a) - b.velocity_at(self.p_b);
            let impulse = inv * (self.bias - dv);
            if impulse.is_finite() {
                a.apply_impulse(impulse, self.p_a);
                b.apply_impulse(-impulse, self.p_b);
                self.linear_impulse += impulse;
                applied += impulse.length_squared();
            }
        }

        if let Some(inv) = self.angular_inv {
            let current = self.local_relative_spin(a, b);
            if let Some(target) = self.angular_target(current, ctx.dt) {
                let delta = self.joint_rot * (target - current);
                // Raises ω_b - ω_a by `delta`.
                let impulse = -(inv * delta);
                if impulse.is_finite() {
                    a.apply_angular_impulse(impulse);
                    b.apply_angular_impulse(-impulse);
                    self.angular_impulse += impulse;
                    applied += impulse.length_squared();
                }
            }
        }

        applied > ctx.contact.impulse_wake_threshold_sq
    }
}

/// Joint that keeps the bodies' relative orientation fixed.
#[derive(Clone, Debug)]
pub struct FixedJointConstraint {
    joint: JointConstraint,
}

impl FixedJointConstraint {
    /// Fixed joint. Frames are chosen so the relative orientation at creation
    /// is the one held.
    pub fn new(
        obj_a: ObjectId,
        obj_b: ObjectId,
        anchor_a: Vec3,
        anchor_b: Vec3,
        frame_a: Quat,
        frame_b: Quat,
    ) -> Self {
        Self {
            joint: JointConstraint::new(obj_a, obj_b, anchor_a, anchor_b)
                .with_frames(frame_a, frame_b)
                .with_extents(Vec3::ZERO, Vec3::ZERO),
        }
    }

    /// Fixes an existing joint at its current anchors and frames.
    pub fn from_joint(joint: JointConstraint) -> Self {
        Self {
            joint: joint.with_extents(Vec3::ZERO, Vec3::ZERO),
        }
    }

    /// Underlying joint.
    pub fn joint(&self) -> &JointConstraint {
        &self.joint
    }
}

impl ConstraintSolver for FixedJointConstraint {
    fn bodies(&self) -> (ObjectId, ObjectId) {
        self.joint.bodies()
    }

    fn do_update(&mut self, a: &SolverBody, b: &SolverBody, ctx: &StepContext) {
        self.joint.do_update(a, b, ctx);
    }

    fn do_constraint(&mut self, a: &mut SolverBody, b: &mut SolverBody, ctx: &StepContext) -> bool {
        self.joint.do_constraint(a, b, ctx)
    }
}

/// Joint with extents and a bounded per-axis motor.
#[derive(Clone, Debug)]
pub struct SkeletalJointConstraint {
    /// Underlying limited joint.
    pub joint: JointConstraint,
    /// Lowest motor torque per joint axis.
    pub min_torque: Vec3,
    /// Highest motor torque per joint axis.
    pub max_torque: Vec3,
    torque: Vec3,
    motor_pending: bool,
}

impl SkeletalJointConstraint {
    /// Wraps a joint with a motor limited to `[min_torque, max_torque]`.
    pub fn new(joint: JointConstraint, min_torque: Vec3, max_torque: Vec3) -> Self {
        Self {
            joint,
            min_torque: min_torque.min(max_torque),
            max_torque: max_torque.max(min_torque),
            torque: Vec3::ZERO,
            motor_pending: false,
        }
    }

    /// Commands a motor torque in A's joint frame. Clamped on use.
    pub fn set_motor_torque(&mut self, torque: Vec3) {
        self.torque = torque;
    }

    /// Torque that will actually be applied.
    pub fn effective_torque(&self) -> Vec3 {
        self.torque.clamp(self.min_torque, self.max_torque)
    }
}

impl ConstraintSolver for SkeletalJointConstraint {
    fn bodies(&self) -> (ObjectId, ObjectId) {
        self.joint.bodies()
    }

    fn do_update(&mut self, a: &SolverBody, b: &SolverBody, ctx: &StepContext) {
        self.joint.do_update(a, b, ctx);
        self.motor_pending = true;
    }

    fn do_constraint(&mut self, a: &mut SolverBody, b: &mut SolverBody, ctx: &StepContext) -> bool {
        let mut wake = false;
        if self.motor_pending {
            self.motor_pending = false;
            let impulse = self.joint.joint_rotation() * self.effective_torque() * ctx.dt;
            b.apply_angular_impulse(impulse);
            a.apply_angular_impulse(-impulse);
            wake = impulse.length_squared() > ctx.contact.impulse_wake_threshold_sq;
        }
        self.joint.do_constraint(a, b, ctx) || wake
    }
}

/// Pins a foot (A) to the ground (B) until pulled off.
#[derive(Clone, Debug)]
pub struct PlacedFootConstraint {
    /// Underlying joint.
    pub joint: JointConstraint,
    /// Linear impulse per tick above which the foot lets go.
    pub break_impulse: f32,
    broken: bool,
}

impl PlacedFootConstraint {
    /// Pins `foot` to `ground` with no relative rotation.
    pub fn new(
        foot: ObjectId,
        ground: ObjectId,
        anchor_foot: Vec3,
        anchor_ground: Vec3,
        break_impulse: f32,
    ) -> Self {
        Self {
            joint: JointConstraint::new(foot, ground, anchor_foot, anchor_ground)
                .with_extents(Vec3::ZERO, Vec3::ZERO),
            break_impulse,
            broken: false,
        }
    }

    /// Whether the foot has been pulled free.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Re-plants a broken foot.
    pub fn reset(&mut self) {
        self.broken = false;
    }
}

impl ConstraintSolver for PlacedFootConstraint {
    fn bodies(&self) -> (ObjectId, ObjectId) {
        self.joint.bodies()
    }

    fn do_update(&mut self, a: &SolverBody, b: &SolverBody, ctx: &StepContext) {
        if !self.broken {
            self.joint.do_update(a, b, ctx);
        }
    }

    fn do_constraint(&mut self, a: &mut SolverBody, b: &mut SolverBody, ctx: &StepContext) -> bool {
        if self.broken {
            return false;
        }
        let wake = self.joint.do_constraint(a, b, ctx);
        if self.joint.linear_impulse().length() > self.break_impulse {
            // Nothing this tick's iterations applied stays on the bodies.
            self.joint.revert(a, b);
            self.broken = true;
            tracing::debug!(foot = ?self.joint.obj_a, "placed foot broke free");
            return true;
        }
        wake
    }
}
