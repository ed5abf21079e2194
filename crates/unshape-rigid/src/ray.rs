//! Ray colliders: point projectiles swept as segments each tick.

use std::fmt;
use std::sync::Arc;

use glam::Vec3;

use crate::debug::{Color, DebugRenderer, ACTIVE_COLOR, INACTIVE_COLOR};
use crate::geom::Aabb;
use crate::object::{ObjectCore, ObjectId, UserEntity};

/// A ray collider striking something.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayContact {
    /// The ray collider.
    pub ray: ObjectId,
    /// Body that was hit.
    pub object: ObjectId,
    /// Entity owning the body that was hit.
    pub entity: Option<UserEntity>,
    /// World-space hit point.
    pub point: Vec3,
    /// Surface normal at the hit point.
    pub normal: Vec3,
    /// Fraction of this tick's sweep travelled before the hit.
    pub fraction: f32,
}

/// Decides what a ray collider does when it hits something.
pub trait RayCallback: Send + Sync {
    /// Returns `true` to stop the ray at the hit and hand its momentum to the
    /// body, `false` to pass through.
    fn on_hit(&self, contact: &RayContact) -> bool;
}

impl<F> RayCallback for F
where
    F: Fn(&RayContact) -> bool + Send + Sync,
{
    fn on_hit(&self, contact: &RayContact) -> bool {
        self(contact)
    }
}

/// A massive point moving along a ray.
#[derive(Clone)]
pub struct RayCollider {
    pub(crate) core: ObjectCore,
    position: Vec3,
    velocity: Vec3,
    gravity: Vec3,
    mass: f32,
    active: bool,
    callback: Option<Arc<dyn RayCallback>>,
}

impl fmt::Debug for RayCollider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayCollider")
            .field("position", &self.position)
            .field("velocity", &self.velocity)
            .field("mass", &self.mass)
            .field("active", &self.active)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl RayCollider {
    /// An active ray at `position` moving with `velocity`.
    pub fn new(position: Vec3, velocity: Vec3, mass: f32) -> Self {
        Self {
            core: ObjectCore::default(),
            position,
            velocity,
            gravity: Vec3::ZERO,
            mass: mass.max(0.0),
            active: true,
            callback: None,
        }
    }

    /// Set the hit callback. Without one, every hit stops the ray.
    pub fn with_callback(mut self, callback: Arc<dyn RayCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Set the owning entity.
    pub fn with_user_entity(mut self, entity: UserEntity) -> Self {
        self.core.user_entity = Some(entity);
        self
    }

    /// Shared object state.
    pub fn core(&self) -> &ObjectCore {
        &self.core
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Linear momentum carried into a hit.
    pub fn momentum(&self) -> Vec3 {
        self.velocity * self.mass
    }

    /// Whether the ray is still moving.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Sets the velocity and reactivates a stopped ray.
    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
        self.active = velocity != Vec3::ZERO;
    }

    pub(crate) fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    pub(crate) fn callback(&self) -> Option<&Arc<dyn RayCallback>> {
        self.callback.as_ref()
    }

    /// The segment swept this tick.
    pub fn segment(&self, dt: f32) -> (Vec3, Vec3) {
        (self.position, self.position + self.velocity * dt)
    }

    /// Box around this tick's sweep.
    pub fn swept_aabb(&self, dt: f32) -> Aabb {
        let (from, to) = self.segment(dt);
        Aabb::from_points([from, to]).unwrap_or(Aabb::new(from, from))
    }

    pub(crate) fn integrate_velocity(&mut self, dt: f32) {
        if self.active {
            self.velocity += self.gravity * dt;
        }
    }

    /// Moves the full sweep.
    pub(crate) fn advance(&mut self, dt: f32) {
        if self.active {
            self.position += self.velocity * dt;
        }
    }

    /// Stops the ray at `point`.
    pub(crate) fn stop_at(&mut self, point: Vec3) {
        self.position = point;
        self.velocity = Vec3::ZERO;
        self.active = false;
    }

    pub fn debug_draw(&self, renderer: &mut dyn DebugRenderer, dt: f32) {
        let color: Color = if self.active { ACTIVE_COLOR } else { INACTIVE_COLOR };
        let (from, to) = self.segment(dt);
        renderer.line(from, to, color);
    }
}
