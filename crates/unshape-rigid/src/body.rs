//! Rigid body dynamics.
//!
//! Provides the core `RigidBody` type: pose, velocities, force accumulators,
//! mass and inertia, plus the dirty-tagged world-space cache that the broad
//! phase and solver read through [`RigidBody::cache`].

use std::fmt;
use std::sync::Arc;

use glam::{Affine3A, Mat3, Quat, Vec3};

use crate::config::SleepSettings;
use crate::constraint::ContactReport;
use crate::debug::{DebugRenderer, ACTIVE_COLOR, INACTIVE_COLOR, STATIC_COLOR};
use crate::error::ConfigError;
use crate::geom::Aabb;
use crate::mass::MassInfo;
use crate::object::{ObjectCore, ObjectId, UserEntity};
use crate::region::Activity;
use crate::shape::CollisionShape;

/// Receives resolved contacts for a body.
///
/// Invoked synchronously during constraint resolution, after the impulse has
/// been applied. Implementations must not reach back into the world.
pub trait CollisionCallback: Send + Sync {
    /// Called once per contact per tick.
    fn on_collision(&self, report: &ContactReport);
}

impl<F> CollisionCallback for F
where
    F: Fn(&ContactReport) + Send + Sync,
{
    fn on_collision(&self, report: &ContactReport) {
        self(report)
    }
}

/// World-space data derived from the body's pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyCache {
    /// Local-to-world transform.
    pub xform: Affine3A,
    /// World bounds, `None` for unbounded shapes.
    pub aabb: Option<Aabb>,
    /// World-space inverse inertia tensor about the center of mass.
    pub inv_moi: Mat3,
    /// World-space center of mass.
    pub com: Vec3,
}

/// A rigid body in the physics simulation.
pub struct RigidBody {
    pub(crate) core: ObjectCore,
    shape: CollisionShape,
    mass_info: MassInfo,
    inv_mass: f32,
    inv_moi_local: Mat3,
    can_move: bool,

    position: Vec3,
    orientation: Quat,
    velocity: Vec3,
    angular_velocity: Vec3,
    force: Vec3,
    torque: Vec3,
    applied_force: Vec3,
    applied_torque: Vec3,
    gravity: Vec3,
    active: bool,
    sleep_timer: f32,

    /// Restitution (bounciness) 0-1.
    pub restitution: f32,
    /// Friction coefficient.
    pub friction: f32,
    /// Fraction of linear velocity lost per second.
    pub linear_damping: f32,
    /// Fraction of angular velocity lost per second.
    pub angular_damping: f32,

    pub(crate) group: Option<ObjectId>,
    callback: Option<Arc<dyn CollisionCallback>>,
    cache: Option<BodyCache>,
}

impl fmt::Debug for RigidBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RigidBody")
            .field("shape", &self.shape.shape_type())
            .field("mass", &self.mass_info.mass)
            .field("position", &self.position)
            .field("orientation", &self.orientation)
            .field("velocity", &self.velocity)
            .field("angular_velocity", &self.angular_velocity)
            .field("active", &self.active)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl RigidBody {
    /// Creates a body with explicit mass properties.
    ///
    /// The body is dynamic only if the mass is positive and the shape may
    /// move; otherwise it is static.
    pub fn new(shape: CollisionShape, mass_info: MassInfo) -> Result<Self, ConfigError> {
        if !(mass_info.mass >= 0.0 && mass_info.mass.is_finite()) {
            return Err(ConfigError::Mass(mass_info.mass));
        }
        Ok(Self::build(shape, mass_info))
    }

    /// Creates a dynamic body whose mass comes from the shape at `density`.
    pub fn dynamic(shape: CollisionShape, density: f32, position: Vec3) -> Self {
        let mass_info = shape.compute_mass_info() * density.max(0.0);
        Self::build(shape, mass_info).with_position(position)
    }

    /// Creates a static (immovable) rigid body.
    pub fn new_static(shape: CollisionShape, position: Vec3) -> Self {
        Self::build(shape, MassInfo::ZERO).with_position(position)
    }

    fn build(shape: CollisionShape, mass_info: MassInfo) -> Self {
        let can_move = mass_info.mass > 0.0 && shape.can_move();
        let (inv_mass, inv_moi_local) = if can_move {
            (mass_info.inverse_mass(), invert_inertia(mass_info.moi))
        } else {
            (0.0, Mat3::ZERO)
        };
        Self {
            core: ObjectCore::default(),
            shape,
            mass_info,
            inv_mass,
            inv_moi_local,
            can_move,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            applied_force: Vec3::ZERO,
            applied_torque: Vec3::ZERO,
            gravity: Vec3::ZERO,
            active: can_move,
            sleep_timer: 0.0,
            restitution: 0.3,
            friction: 0.5,
            linear_damping: 0.01,
            angular_damping: 0.01,
            group: None,
            callback: None,
            cache: None,
        }
    }

    // ========================================================================
    // Builders
    // ========================================================================

    /// Sets the initial position.
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.set_position(position);
        self
    }

    /// Sets the initial orientation.
    pub fn with_orientation(mut self, orientation: Quat) -> Self {
        self.set_orientation(orientation);
        self
    }

    /// Sets the initial linear velocity.
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.set_velocity(velocity);
        self
    }

    /// Sets restitution.
    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    /// Sets friction.
    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    /// Sets linear and angular damping.
    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    /// Registers a collision callback.
    pub fn with_callback(mut self, callback: Arc<dyn CollisionCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Attaches a gameplay entity.
    pub fn with_user_entity(mut self, entity: UserEntity) -> Self {
        self.core.user_entity = Some(entity);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Shared object state.
    pub fn core(&self) -> &ObjectCore {
        &self.core
    }

    /// Collision shape.
    pub fn shape(&self) -> &CollisionShape {
        &self.shape
    }

    /// Consumes the body, keeping its shape.
    pub fn into_shape(self) -> CollisionShape {
        self.shape
    }

    /// Local mass properties.
    pub fn mass_info(&self) -> &MassInfo {
        &self.mass_info
    }

    /// Mass (0 = static).
    pub fn mass(&self) -> f32 {
        if self.can_move {
            self.mass_info.mass
        } else {
            0.0
        }
    }

    /// Inverse mass, 0 for static bodies.
    pub fn inverse_mass(&self) -> f32 {
        self.inv_mass
    }

    /// Whether the body is ever moved by the simulation.
    pub fn can_move(&self) -> bool {
        self.can_move
    }

    /// Whether the body participates in constraint graph merging.
    pub fn merges_subgraphs(&self) -> bool {
        self.can_move && !matches!(self.shape, CollisionShape::Ray)
    }

    /// Whether the body is awake.
    pub fn is_active(&self) -> bool {
        self.can_move && self.active
    }

    /// Region bucket for this body.
    pub fn activity(&self) -> Activity {
        if !self.can_move {
            Activity::Static
        } else if self.active {
            Activity::Active
        } else {
            Activity::Inactive
        }
    }

    /// Owning group, if any.
    pub fn group(&self) -> Option<ObjectId> {
        self.group
    }

    /// Registered collision callback.
    pub fn callback(&self) -> Option<&Arc<dyn CollisionCallback>> {
        self.callback.as_ref()
    }

    /// Replaces the collision callback.
    pub fn set_callback(&mut self, callback: Option<Arc<dyn CollisionCallback>>) {
        self.callback = callback;
    }

    /// Position of the body origin in world space.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Orientation.
    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    /// Linear velocity.
    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Angular velocity.
    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    /// Gravity acting on this body.
    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    /// Linear momentum.
    pub fn momentum(&self) -> Vec3 {
        self.velocity * self.mass()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Moves the body origin.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.cache = None;
    }

    /// Rotates the body.
    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation.normalize();
        self.cache = None;
    }

    /// Sets linear velocity. Ignored for static bodies.
    pub fn set_velocity(&mut self, velocity: Vec3) {
        if self.can_move {
            self.velocity = velocity;
        }
    }

    /// Sets angular velocity. Ignored for static bodies.
    pub fn set_angular_velocity(&mut self, angular_velocity: Vec3) {
        if self.can_move {
            self.angular_velocity = angular_velocity;
        }
    }

    pub(crate) fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    /// Adds a force for the next tick only.
    pub fn apply_force(&mut self, force: Vec3) {
        if self.can_move {
            self.force += force;
        }
    }

    /// Adds a force at a world-space point for the next tick only.
    pub fn apply_force_at_point(&mut self, force: Vec3, point: Vec3) {
        if self.can_move {
            let r = point - self.cache().com;
            self.force += force;
            self.torque += r.cross(force);
        }
    }

    /// Adds a torque for the next tick only.
    pub fn apply_torque(&mut self, torque: Vec3) {
        if self.can_move {
            self.torque += torque;
        }
    }

    /// Sets the force applied every tick until changed.
    pub fn set_applied_force(&mut self, force: Vec3) {
        self.applied_force = force;
    }

    /// Sets the torque applied every tick until changed.
    pub fn set_applied_torque(&mut self, torque: Vec3) {
        self.applied_torque = torque;
    }

    /// Apply an impulse at the center of mass.
    pub fn apply_impulse(&mut self, impulse: Vec3) {
        if self.can_move {
            self.velocity += impulse * self.inv_mass;
        }
    }

    /// Apply an impulse at a world-space point.
    pub fn apply_impulse_at_point(&mut self, impulse: Vec3, point: Vec3) {
        if self.can_move {
            let cache = *self.cache();
            self.velocity += impulse * self.inv_mass;
            self.angular_velocity += cache.inv_moi * (point - cache.com).cross(impulse);
        }
    }

    /// Get the velocity at a world-space point on the body.
    pub fn velocity_at_point(&mut self, point: Vec3) -> Vec3 {
        let com = self.cache().com;
        self.velocity + self.angular_velocity.cross(point - com)
    }

    /// Wakes the body.
    pub fn wake(&mut self) {
        if self.can_move {
            self.active = true;
            self.sleep_timer = 0.0;
        }
    }

    /// Puts the body to sleep immediately.
    pub fn sleep(&mut self) {
        if self.can_move {
            self.active = false;
            self.sleep_timer = 0.0;
            self.velocity = Vec3::ZERO;
            self.angular_velocity = Vec3::ZERO;
        }
    }

    // ========================================================================
    // Cache
    // ========================================================================

    /// World-space derived data, rebuilt if the pose changed since last read.
    pub fn cache(&mut self) -> &BodyCache {
        self.cache.get_or_insert_with(|| {
            compute_cache(
                &self.shape,
                self.position,
                self.orientation,
                self.inv_moi_local,
                self.mass_info.com,
            )
        })
    }

    /// Whether the cache must be rebuilt before use.
    pub fn cache_dirty(&self) -> bool {
        self.cache.is_none()
    }

    /// World transform.
    pub fn transform(&mut self) -> Affine3A {
        self.cache().xform
    }

    /// World bounds, `None` for infinite planes.
    pub fn aabb(&mut self) -> Option<Aabb> {
        self.cache().aabb
    }

    /// World-space inverse inertia tensor.
    pub fn inverse_inertia(&mut self) -> Mat3 {
        self.cache().inv_moi
    }

    /// World-space center of mass.
    pub fn center_of_mass(&mut self) -> Vec3 {
        self.cache().com
    }

    /// Bounds covering this tick's motion. Ray bodies sweep their velocity.
    pub(crate) fn swept_aabb(&mut self, dt: f32) -> Option<Aabb> {
        let velocity = self.velocity;
        let is_ray = matches!(self.shape, CollisionShape::Ray);
        let aabb = self.aabb()?;
        if is_ray {
            Some(aabb.union(&Aabb::new(aabb.min + velocity * dt, aabb.max + velocity * dt)))
        } else {
            Some(aabb)
        }
    }

    // ========================================================================
    // Integration
    // ========================================================================

    /// Applies gravity and accumulated forces to velocity, then damping.
    /// Clears the per-tick accumulators.
    pub(crate) fn integrate_velocity(&mut self, dt: f32) {
        if self.is_active() {
            let inv_moi = self.inverse_inertia();
            let force = self.force + self.applied_force;
            let torque = self.torque + self.applied_torque;
            self.velocity += (force * self.inv_mass + self.gravity) * dt;
            self.angular_velocity += inv_moi * torque * dt;
            self.velocity *= (1.0 - self.linear_damping).clamp(0.0, 1.0).powf(dt);
            self.angular_velocity *= (1.0 - self.angular_damping).clamp(0.0, 1.0).powf(dt);
        }
        self.force = Vec3::ZERO;
        self.torque = Vec3::ZERO;
    }

    /// Advances the pose, rotating about the center of mass.
    pub(crate) fn integrate_position(&mut self, dt: f32) {
        if !self.is_active() {
            return;
        }
        let com = self.center_of_mass();
        let new_com = com + self.velocity * dt;
        let spin = self.angular_velocity * dt;
        let orientation = if spin.length_squared() > 0.0 {
            (Quat::from_scaled_axis(spin) * self.orientation).normalize()
        } else {
            self.orientation
        };
        self.orientation = orientation;
        self.position = new_com - orientation * self.mass_info.com;
        self.cache = None;
    }

    /// Advances the sleep timer. Returns `true` if the body fell asleep.
    pub(crate) fn update_sleep(&mut self, dt: f32, settings: &SleepSettings) -> bool {
        if !settings.enabled || !self.is_active() {
            return false;
        }
        let resting = self.velocity.length_squared()
            < settings.linear_threshold * settings.linear_threshold
            && self.angular_velocity.length_squared()
                < settings.angular_threshold * settings.angular_threshold;
        if !resting {
            self.sleep_timer = 0.0;
            return false;
        }
        self.sleep_timer += dt;
        if self.sleep_timer >= settings.delay {
            self.sleep();
            return true;
        }
        false
    }

    /// Copies velocities written by the solver back into the body.
    pub(crate) fn store_velocities(&mut self, velocity: Vec3, angular_velocity: Vec3) {
        if self.can_move {
            self.velocity = velocity;
            self.angular_velocity = angular_velocity;
        }
    }

    /// Pushes the body outline into `renderer`, colored by activity.
    pub fn debug_draw(&mut self, renderer: &mut dyn DebugRenderer) {
        let color = match self.activity() {
            Activity::Active => ACTIVE_COLOR,
            Activity::Inactive => INACTIVE_COLOR,
            Activity::Static => STATIC_COLOR,
        };
        let xform = self.transform();
        self.shape.debug_draw(renderer, &xform, color);
    }
}

fn compute_cache(
    shape: &CollisionShape,
    position: Vec3,
    orientation: Quat,
    inv_moi_local: Mat3,
    local_com: Vec3,
) -> BodyCache {
    let xform = Affine3A::from_rotation_translation(orientation, position);
    let rot = Mat3::from_quat(orientation);
    BodyCache {
        xform,
        aabb: shape.aabb(&xform),
        inv_moi: rot * inv_moi_local * rot.transpose(),
        com: xform.transform_point3(local_com),
    }
}

/// Inverse of a local inertia tensor, zero when singular.
fn invert_inertia(moi: Mat3) -> Mat3 {
    let det = moi.determinant();
    if det.abs() <= f32::EPSILON || !det.is_finite() {
        Mat3::ZERO
    } else {
        moi.inverse()
    }
}
