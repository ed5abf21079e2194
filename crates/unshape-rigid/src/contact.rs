//! Contact constraints and their per-tick cache.
//!
//! The narrow phase turns each touching pair into a [`ContactRegion`] (one
//! normal) holding one or more [`ContactPoint`]s. Both come from pools owned
//! by a [`ContactCache`] and go back at the end of the tick through
//! [`ContactCache::clear_results`]; handles must not outlive that call.

use glam::{Mat3, Vec3};

use crate::constraint::{
    point_mass_matrix, try_invert, ConstraintSolver, ContactReport, SolverBody, StepContext,
};
use crate::error::PoolError;
use crate::object::ObjectId;
use crate::pool::{Pool, PoolHandle, Recycle};

/// One body's side of a contact.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContactPart {
    /// Deepest point of this body in world space.
    pub pos: Vec3,
    /// Outward surface normal of this body at `pos`.
    pub norm: Vec3,
}

/// Contact between two bodies, resolved with restitution and friction.
#[derive(Debug, Clone, Default)]
pub struct ContactPoint {
    /// First body.
    pub obj_a: ObjectId,
    /// Second body.
    pub obj_b: ObjectId,
    /// Body A's side.
    pub a: ContactPart,
    /// Body B's side.
    pub b: ContactPart,
    /// `1 + e_a * e_b`.
    pub bounce_coeff: f32,
    /// `mu_a * mu_b`.
    pub fric_coeff: f32,

    position: Vec3,
    normal: Vec3,
    r_a: Vec3,
    r_b: Vec3,
    rlv_to_impulse: Mat3,
    bounce_threshold: f32,
    degenerate: bool,
    reported: bool,
    report: Option<ContactReport>,
}

impl ContactPoint {
    /// Creates a contact from both sides and the material products.
    pub fn new(
        obj_a: ObjectId,
        obj_b: ObjectId,
        a: ContactPart,
        b: ContactPart,
        restitution: (f32, f32),
        friction: (f32, f32),
    ) -> Self {
        Self {
            obj_a,
            obj_b,
            a,
            b,
            bounce_coeff: 1.0 + restitution.0 * restitution.1,
            fric_coeff: friction.0 * friction.1,
            ..Self::default()
        }
    }

    /// Contact position computed in the last update.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Normal from B toward A computed in the last update.
    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    /// Whether the last update found the contact unsolvable.
    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    /// Relative velocity of A with respect to B along the normal.
    pub fn normal_velocity(&self, a: &SolverBody, b: &SolverBody) -> f32 {
        (a.velocity_at(self.position) - b.velocity_at(self.position)).dot(self.normal)
    }

    fn mark_degenerate(&mut self, reason: &'static str) {
        self.degenerate = true;
        tracing::debug!(
            a = ?self.obj_a,
            b = ?self.obj_b,
            reason,
            "skipping degenerate contact this tick"
        );
    }
}

impl Recycle for ContactPoint {
    fn recycle(&mut self) {
        *self = Self::default();
    }
}

impl ConstraintSolver for ContactPoint {
    fn bodies(&self) -> (ObjectId, ObjectId) {
        (self.obj_a, self.obj_b)
    }

    fn do_update(&mut self, a: &SolverBody, b: &SolverBody, ctx: &StepContext) {
        self.degenerate = false;
        self.position = (self.a.pos + self.b.pos) * 0.5;
        self.bounce_threshold = ctx.contact.bounce_threshold(ctx.gravity, ctx.dt);

        let Some(normal) = (self.b.norm - self.a.norm).try_normalize() else {
            self.mark_degenerate("zero-length normal");
            return;
        };
        self.normal = normal;
        self.r_a = self.position - a.com;
        self.r_b = self.position - b.com;

        match try_invert(point_mass_matrix(a, self.r_a, b, self.r_b)) {
            Some(inv) => self.rlv_to_impulse = inv,
            None => self.mark_degenerate("singular effective mass"),
        }
    }

    fn do_constraint(&mut self, a: &mut SolverBody, b: &mut SolverBody, ctx: &StepContext) -> bool {
        if self.degenerate {
            return false;
        }

        let p = self.position;
        let n = self.normal;
        let dv = a.velocity_at(p) - b.velocity_at(p);
        let nvdot = dv.dot(n);
        if nvdot >= ctx.contact.adhesion_threshold {
            return false;
        }

        let bounce = if -nvdot < self.bounce_threshold {
            1.0
        } else {
            self.bounce_coeff
        };
        let normal_impulse = self.rlv_to_impulse * (n * (bounce * (-nvdot).max(0.0)));

        // Friction cancels tangential velocity, scaled down to the Coulomb cone.
        let full_friction = self.rlv_to_impulse * (n * nvdot - dv);
        let full_sq = full_friction.length_squared();
        let cone_sq = self.fric_coeff * self.fric_coeff * normal_impulse.length_squared();
        let friction_impulse = if full_sq <= f32::MIN_POSITIVE {
            Vec3::ZERO
        } else if full_sq > cone_sq {
            full_friction * (cone_sq / full_sq).sqrt()
        } else {
            full_friction
        };

        let impulse = normal_impulse + friction_impulse;
        if !impulse.is_finite() {
            self.mark_degenerate("non-finite impulse");
            return false;
        }

        a.apply_impulse(impulse, p);
        b.apply_impulse(-impulse, p);

        let wake = impulse.length_squared() > ctx.contact.impulse_wake_threshold_sq;
        if wake && !self.reported {
            self.reported = true;
            self.report = Some(ContactReport {
                body: self.obj_a,
                other: self.obj_b,
                entity: None,
                other_entity: None,
                position: p,
                normal: n,
                impulse,
            });
        }
        wake
    }

    fn take_report(&mut self) -> Option<ContactReport> {
        self.report.take()
    }
}

/// Contact points sharing one normal between a pair of bodies.
#[derive(Debug, Clone, Default)]
pub struct ContactRegion {
    /// First body.
    pub obj_a: ObjectId,
    /// Second body.
    pub obj_b: ObjectId,
    /// Normal from A toward B.
    pub normal: Vec3,
    /// Points issued for this region.
    pub points: Vec<PoolHandle>,
}

impl Recycle for ContactRegion {
    fn recycle(&mut self) {
        self.obj_a = ObjectId::default();
        self.obj_b = ObjectId::default();
        self.normal = Vec3::ZERO;
        self.points.clear();
    }
}

/// Pooled storage for this tick's contacts.
#[derive(Debug, Default)]
pub struct ContactCache {
    points: Pool<ContactPoint>,
    regions: Pool<ContactRegion>,
    issued_points: Vec<PoolHandle>,
    issued_regions: Vec<PoolHandle>,
}

impl ContactCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a region for a touching pair.
    pub fn add_region(&mut self, obj_a: ObjectId, obj_b: ObjectId, normal: Vec3) -> PoolHandle {
        let (handle, region) = self.regions.allocate();
        region.obj_a = obj_a;
        region.obj_b = obj_b;
        region.normal = normal;
        self.issued_regions.push(handle);
        handle
    }

    /// Adds a point to a region opened this tick.
    pub fn add_point(
        &mut self,
        region: PoolHandle,
        point: ContactPoint,
    ) -> Result<PoolHandle, PoolError> {
        if !self.regions.owns(region) {
            return Err(PoolError::AllocatorNotFound {
                handle: region.allocator().get(),
                allocator: self.regions.id().get(),
            });
        }
        let (handle, slot) = self.points.allocate();
        *slot = point;
        self.issued_points.push(handle);
        if let Some(region) = self.regions.get_mut(region) {
            region.points.push(handle);
        }
        Ok(handle)
    }

    /// Reads a point issued this tick.
    pub fn point(&self, handle: PoolHandle) -> Option<&ContactPoint> {
        self.points.get(handle)
    }

    /// Mutably reads a point issued this tick.
    pub fn point_mut(&mut self, handle: PoolHandle) -> Option<&mut ContactPoint> {
        self.points.get_mut(handle)
    }

    /// Reads a region issued this tick.
    pub fn region(&self, handle: PoolHandle) -> Option<&ContactRegion> {
        self.regions.get(handle)
    }

    /// Points issued this tick, in issue order.
    pub fn issued_points(&self) -> &[PoolHandle] {
        &self.issued_points
    }

    /// Regions issued this tick, in issue order.
    pub fn issued_regions(&self) -> &[PoolHandle] {
        &self.issued_regions
    }

    /// Every live point, in slot order.
    pub fn points_mut(&mut self) -> impl Iterator<Item = &mut ContactPoint> + '_ {
        self.points.iter_mut().map(|(_, p)| p)
    }

    /// Number of points issued this tick.
    pub fn point_count(&self) -> usize {
        self.issued_points.len()
    }

    /// Point pool, for capacity inspection.
    pub fn point_pool(&self) -> &Pool<ContactPoint> {
        &self.points
    }

    /// Returns every point and region issued this tick to the pools.
    pub fn clear_results(&mut self) {
        // Reverse order leaves the lowest slots on top of each free list.
        for handle in self.issued_points.drain(..).rev() {
            let released = self.points.delete(handle);
            debug_assert!(released.is_ok(), "{released:?}");
        }
        for handle in self.issued_regions.drain(..).rev() {
            let released = self.regions.delete(handle);
            debug_assert!(released.is_ok(), "{released:?}");
        }
    }
}

impl Drop for ContactCache {
    fn drop(&mut self) {
        self.clear_results();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContactSettings;

    fn ctx() -> StepContext {
        StepContext {
            dt: 1.0 / 60.0,
            gravity: Vec3::new(0.0, -9.8, 0.0),
            contact: ContactSettings::default(),
        }
    }

    fn body(id: u32, com: Vec3, velocity: Vec3) -> SolverBody {
        SolverBody {
            com,
            velocity,
            inv_mass: 1.0,
            inv_moi: Mat3::from_diagonal(Vec3::splat(2.5)),
            merges: true,
            ..SolverBody::fixed(ObjectId::from_raw(id, 0))
        }
    }

    /// A on top of B, touching at y = 1.
    fn stacked() -> ContactPoint {
        ContactPoint::new(
            ObjectId::from_raw(0, 0),
            ObjectId::from_raw(1, 0),
            ContactPart {
                pos: Vec3::new(0.0, 1.0, 0.0),
                norm: -Vec3::Y,
            },
            ContactPart {
                pos: Vec3::new(0.0, 1.0, 0.0),
                norm: Vec3::Y,
            },
            (0.0, 0.0),
            (0.5, 0.5),
        )
    }

    #[test]
    fn test_impulse_symmetry() {
        let mut a = body(0, Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.3, -2.0, 0.0));
        let mut b = body(1, Vec3::ZERO, Vec3::ZERO);
        let mut c = stacked();
        let ctx = ctx();
        c.do_update(&a, &b, &ctx);
        let (pa, pb) = (a.velocity, b.velocity);
        assert!(c.do_constraint(&mut a, &mut b, &ctx));
        let (ja, jb) = (a.velocity - pa, b.velocity - pb);
        assert!((ja + jb).length() < 1e-6);
        assert!(ja.y > 0.0);
    }

    #[test]
    fn test_stops_approach() {
        let mut a = body(0, Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, -3.0, 0.0));
        let mut b = body(1, Vec3::ZERO, Vec3::ZERO);
        let mut c = stacked();
        let ctx = ctx();
        c.do_update(&a, &b, &ctx);
        assert!(c.normal_velocity(&a, &b) < 0.0);
        c.do_constraint(&mut a, &mut b, &ctx);
        assert!(c.normal_velocity(&a, &b) > -1e-4);
    }

    #[test]
    fn test_friction_within_cone() {
        let mut a = body(0, Vec3::new(0.0, 2.0, 0.0), Vec3::new(10.0, -1.0, 0.0));
        let mut b = SolverBody::fixed(ObjectId::from_raw(1, 0));
        let mut c = stacked();
        let ctx = ctx();
        c.do_update(&a, &b, &ctx);
        let before = a.velocity;
        c.do_constraint(&mut a, &mut b, &ctx);
        let j = a.velocity - before;
        let tangential = Vec3::new(j.x, 0.0, j.z).length();
        assert!(tangential <= c.fric_coeff * j.y.abs() + 1e-4);
        assert!(a.velocity.x < 10.0);
    }

    #[test]
    fn test_no_friction_without_sliding() {
        let mut a = body(0, Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, -1.0, 0.0));
        let mut b = body(1, Vec3::ZERO, Vec3::ZERO);
        let mut c = stacked();
        let ctx = ctx();
        c.do_update(&a, &b, &ctx);
        c.do_constraint(&mut a, &mut b, &ctx);
        assert!(a.velocity.x.abs() < 1e-6 && a.velocity.z.abs() < 1e-6);
        assert!(a.velocity.is_finite());
    }

    #[test]
    fn test_static_pair_is_degenerate() {
        let mut a = SolverBody::fixed(ObjectId::from_raw(0, 0));
        let mut b = SolverBody::fixed(ObjectId::from_raw(1, 0));
        let mut c = stacked();
        let ctx = ctx();
        c.do_update(&a, &b, &ctx);
        assert!(c.is_degenerate());
        assert!(!c.do_constraint(&mut a, &mut b, &ctx));
        assert_eq!(a.velocity, Vec3::ZERO);
    }

    #[test]
    fn test_zero_normal_is_degenerate() {
        let a = body(0, Vec3::ZERO, Vec3::ZERO);
        let b = body(1, Vec3::Y, Vec3::ZERO);
        let mut c = stacked();
        c.b.norm = c.a.norm;
        c.do_update(&a, &b, &ctx());
        assert!(c.is_degenerate());
    }

    #[test]
    fn test_report_once_per_tick() {
        let mut a = body(0, Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, -3.0, 0.0));
        let mut b = body(1, Vec3::ZERO, Vec3::ZERO);
        let mut c = stacked();
        let ctx = ctx();
        c.do_update(&a, &b, &ctx);
        c.do_constraint(&mut a, &mut b, &ctx);
        let report = c.take_report().unwrap();
        assert_eq!(report.body, c.obj_a);
        a.velocity = Vec3::new(0.0, -3.0, 0.0);
        c.do_constraint(&mut a, &mut b, &ctx);
        assert!(c.take_report().is_none());
    }

    #[test]
    fn test_cache_reuses_chunks() {
        let mut cache = ContactCache::new();
        let fill = |cache: &mut ContactCache| {
            for _ in 0..100 {
                let region = cache.add_region(ObjectId::from_raw(0, 0), ObjectId::from_raw(1, 0), Vec3::Y);
                cache.add_point(region, stacked()).unwrap();
            }
        };
        fill(&mut cache);
        let chunks = cache.point_pool().chunk_count();
        assert_eq!(cache.point_count(), 100);
        cache.clear_results();
        assert_eq!(cache.point_pool().live_count(), 0);
        fill(&mut cache);
        assert_eq!(cache.point_pool().chunk_count(), chunks);
        assert_eq!(cache.issued_points()[0].index(), 0);
    }

    #[test]
    fn test_region_tracks_points() {
        let mut cache = ContactCache::new();
        let region = cache.add_region(ObjectId::from_raw(0, 0), ObjectId::from_raw(1, 0), Vec3::Y);
        let p = cache.add_point(region, stacked()).unwrap();
        assert_eq!(cache.region(region).unwrap().points, vec![p]);
        assert_eq!(cache.point(p).unwrap().obj_b, ObjectId::from_raw(1, 0));
    }
}
