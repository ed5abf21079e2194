//! Physics simulation world.
//!
//! [`PhysicsWorld`] owns every collision object, the broad-phase grid, the
//! per-tick contact cache and the persistent joints. One [`PhysicsWorld::update`]
//! runs, in order:
//!
//! 1. velocity integration for active bodies and rays
//! 2. region reconciliation for every object that may have moved
//! 3. pair finding through shared regions, then the narrow phase
//! 4. ray collider sweeps
//! 5. constraint graph, island waking and batching
//! 6. the iterative solve and collision callbacks
//! 7. position integration and sleep checks
//! 8. release of this tick's contacts

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::body::RigidBody;
use crate::config::Physics;
use crate::constraint::{ConstraintSolver, ContactReport, PhysicsConstraint, SolverBody, StepContext};
use crate::contact::{ContactCache, ContactPart, ContactPoint};
use crate::debug::DebugRenderer;
use crate::error::{ConfigError, PhysicsError, PhysicsResult};
use crate::graph::{ConstraintGraph, ConstraintLink};
use crate::grid::{BroadEntry, GridRegionManager, RegionManager};
use crate::group::CollisionGroup;
use crate::joint::JointConstraint;
use crate::narrow::{self, ContactManifold, Placed, RayHit};
use crate::object::{activity_of, BroadBounds, CollisionObject, ObjectArena, ObjectId};
use crate::ray::{RayCollider, RayContact};
use crate::region::Activity;
use crate::solver::{SolveOutcome, Solver};

/// Told when an object leaves every region of the grid.
pub trait OrphanCallback: Send + Sync {
    fn on_orphan(&self, object: ObjectId);
}

impl<F> OrphanCallback for F
where
    F: Fn(ObjectId) + Send + Sync,
{
    fn on_orphan(&self, object: ObjectId) {
        self(object)
    }
}

/// Handle to a persistent joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JointId(u32);

impl JointId {
    /// Slot index.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Counters from one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
    /// Object pairs that shared a region.
    pub pairs: usize,
    /// Contact points generated.
    pub contacts: usize,
    /// Solver batches.
    pub batches: usize,
    /// Objects that left the grid this step.
    pub orphans: usize,
    /// Ray colliders that hit something.
    pub ray_hits: usize,
    /// Bodies woken by islands or impulses.
    pub woken: usize,
    /// Bodies that fell asleep.
    pub slept: usize,
}

/// The physics simulation world.
pub struct PhysicsWorld {
    config: Physics,
    objects: ObjectArena,
    grid: GridRegionManager,
    contacts: ContactCache,
    joints: Vec<Option<PhysicsConstraint>>,
    free_joints: Vec<u32>,
    graph: ConstraintGraph,
    solver: Solver,
    manifolds: Vec<ContactManifold>,
    orphan_callback: Option<Arc<dyn OrphanCallback>>,
}

impl fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("config", &self.config)
            .field("objects", &self.objects.len())
            .field("joints", &self.joints.iter().flatten().count())
            .finish_non_exhaustive()
    }
}

impl PhysicsWorld {
    /// Create a new physics world.
    pub fn new(config: Physics) -> Result<Self, ConfigError> {
        config.validate()?;
        let grid = GridRegionManager::new(&config.grid)?;
        Ok(Self {
            config,
            objects: ObjectArena::new(),
            grid,
            contacts: ContactCache::new(),
            joints: Vec::new(),
            free_joints: Vec::new(),
            graph: ConstraintGraph::new(),
            solver: Solver::new(),
            manifolds: Vec::new(),
            orphan_callback: None,
        })
    }

    /// Simulation parameters.
    pub fn config(&self) -> &Physics {
        &self.config
    }

    /// The broad-phase grid.
    pub fn grid(&self) -> &GridRegionManager {
        &self.grid
    }

    /// Every object in the world.
    pub fn objects(&self) -> &ObjectArena {
        &self.objects
    }

    /// This tick's contacts. Empty between steps.
    pub fn contacts(&self) -> &ContactCache {
        &self.contacts
    }

    /// Sets the callback for objects leaving the grid.
    pub fn set_orphan_callback(&mut self, callback: Option<Arc<dyn OrphanCallback>>) {
        self.orphan_callback = callback;
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Adds a rigid body.
    pub fn add_rigid_body(&mut self, mut body: RigidBody) -> ObjectId {
        body.set_gravity(self.config.gravity);
        body.group = None;
        let id = self.objects.insert(CollisionObject::Rigid(body));
        self.register(id);
        id
    }

    /// Adds a ray collider.
    pub fn add_ray_collider(&mut self, mut ray: RayCollider) -> ObjectId {
        ray.set_gravity(self.config.gravity);
        let id = self.objects.insert(CollisionObject::Ray(ray));
        self.register(id);
        id
    }

    /// Adds a group and its member bodies. Returns the group handle and the
    /// member handles in input order.
    pub fn add_group(
        &mut self,
        group: CollisionGroup,
        bodies: Vec<RigidBody>,
    ) -> (ObjectId, Vec<ObjectId>) {
        let group_id = self.objects.insert(CollisionObject::Group(group));
        let mut children = Vec::with_capacity(bodies.len());
        for mut body in bodies {
            body.set_gravity(self.config.gravity);
            body.group = Some(group_id);
            children.push(self.objects.insert(CollisionObject::Rigid(body)));
        }
        if let Some(group) = self.objects.get_mut(group_id).and_then(CollisionObject::as_group_mut) {
            for &child in &children {
                group.push_child(child);
            }
        }
        self.register(group_id);
        (group_id, children)
    }

    /// Removes an object. Removing a group removes its members; joints
    /// attached to a removed body are dropped.
    pub fn remove_object(&mut self, id: ObjectId) -> PhysicsResult<CollisionObject> {
        let object = self.objects.remove(id).ok_or(PhysicsError::InvalidHandle)?;
        self.grid.on_object_removed(id, object.core().regions());
        for other in object.core().disabled_collisions() {
            if let Some(other) = self.objects.get_mut(*other) {
                other.core_mut().disabled_collisions.remove(&id);
            }
        }
        match &object {
            CollisionObject::Group(group) => {
                for &child in group.children() {
                    if let Err(err) = self.remove_object(child) {
                        tracing::warn!(
                            group = ?id,
                            child = ?child,
                            %err,
                            "group member already gone"
                        );
                    }
                }
            }
            CollisionObject::Rigid(body) => {
                if let Some(group) = body
                    .group()
                    .and_then(|g| self.objects.get_mut(g))
                    .and_then(CollisionObject::as_group_mut)
                {
                    group.remove_child(id);
                }
            }
            CollisionObject::Ray(_) => {}
        }
        self.drop_joints_of(id);
        tracing::debug!(object = ?id, kind = object.kind(), "object removed");
        Ok(object)
    }

    /// Looks up any object.
    pub fn object(&self, id: ObjectId) -> Option<&CollisionObject> {
        self.objects.get(id)
    }

    /// Get a rigid body.
    pub fn body(&self, id: ObjectId) -> PhysicsResult<&RigidBody> {
        let object = self.objects.get(id).ok_or(PhysicsError::InvalidHandle)?;
        object.as_rigid().ok_or(PhysicsError::WrongKind {
            expected: "rigid body",
        })
    }

    /// Get a mutable rigid body.
    pub fn body_mut(&mut self, id: ObjectId) -> PhysicsResult<&mut RigidBody> {
        let object = self.objects.get_mut(id).ok_or(PhysicsError::InvalidHandle)?;
        object.as_rigid_mut().ok_or(PhysicsError::WrongKind {
            expected: "rigid body",
        })
    }

    /// Get a ray collider.
    pub fn ray(&self, id: ObjectId) -> PhysicsResult<&RayCollider> {
        let object = self.objects.get(id).ok_or(PhysicsError::InvalidHandle)?;
        object.as_ray().ok_or(PhysicsError::WrongKind {
            expected: "ray collider",
        })
    }

    /// Get a group.
    pub fn group(&self, id: ObjectId) -> PhysicsResult<&CollisionGroup> {
        let object = self.objects.get(id).ok_or(PhysicsError::InvalidHandle)?;
        object.as_group().ok_or(PhysicsError::WrongKind {
            expected: "collision group",
        })
    }

    /// Sets gravity for the world and every object in it.
    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.config.gravity = gravity;
        for (_, object) in self.objects.iter_mut() {
            match object {
                CollisionObject::Rigid(body) => body.set_gravity(gravity),
                CollisionObject::Ray(ray) => ray.set_gravity(gravity),
                CollisionObject::Group(_) => {}
            }
        }
    }

    /// Overrides gravity for one object. Groups forward it to their members.
    pub fn set_object_gravity(&mut self, id: ObjectId, gravity: Vec3) -> PhysicsResult<()> {
        for target in self.targets(id)? {
            match self.objects.get_mut(target) {
                Some(CollisionObject::Rigid(body)) => body.set_gravity(gravity),
                Some(CollisionObject::Ray(ray)) => ray.set_gravity(gravity),
                _ => {}
            }
        }
        Ok(())
    }

    /// Sets linear velocity and wakes. Groups forward it to their members.
    pub fn set_velocity(&mut self, id: ObjectId, velocity: Vec3) -> PhysicsResult<()> {
        for target in self.targets(id)? {
            match self.objects.get_mut(target) {
                Some(CollisionObject::Rigid(body)) => {
                    body.set_velocity(velocity);
                    body.wake();
                }
                Some(CollisionObject::Ray(ray)) => ray.set_velocity(velocity),
                _ => {}
            }
        }
        Ok(())
    }

    /// Moves an object by `offset`. Groups move their members.
    pub fn translate(&mut self, id: ObjectId, offset: Vec3) -> PhysicsResult<()> {
        for target in self.targets(id)? {
            match self.objects.get_mut(target) {
                Some(CollisionObject::Rigid(body)) => {
                    let position = body.position();
                    body.set_position(position + offset);
                    body.wake();
                }
                Some(CollisionObject::Ray(ray)) => {
                    let position = ray.position();
                    ray.set_position(position + offset);
                }
                _ => {}
            }
        }
        let filed = self.filed_object(id);
        if self.refile(filed, self.config.dt) == Some(true) {
            self.report_orphan(filed);
        }
        Ok(())
    }

    /// Stops two objects from colliding with each other.
    ///
    /// Both handles must be live and distinct.
    pub fn disable_collision(&mut self, a: ObjectId, b: ObjectId) -> PhysicsResult<()> {
        self.set_collision(a, b, false)
    }

    /// Lets two objects collide again.
    pub fn enable_collision(&mut self, a: ObjectId, b: ObjectId) -> PhysicsResult<()> {
        self.set_collision(a, b, true)
    }

    fn set_collision(&mut self, a: ObjectId, b: ObjectId, enabled: bool) -> PhysicsResult<()> {
        let (first, second) = self
            .objects
            .get_pair_mut(a, b)
            .ok_or(PhysicsError::InvalidHandle)?;
        for (object, other) in [(first, b), (second, a)] {
            let disabled = &mut object.core_mut().disabled_collisions;
            if enabled {
                disabled.remove(&other);
            } else {
                disabled.insert(other);
            }
        }
        Ok(())
    }

    /// `id` itself, or the members of `id` if it is a group.
    fn targets(&self, id: ObjectId) -> PhysicsResult<Vec<ObjectId>> {
        match self.objects.get(id) {
            None => Err(PhysicsError::InvalidHandle),
            Some(CollisionObject::Group(group)) => Ok(group.children().to_vec()),
            Some(_) => Ok(vec![id]),
        }
    }

    /// Rigid bodies standing for `id` in the narrow phase.
    fn leaves(&self, id: ObjectId) -> Vec<ObjectId> {
        match self.objects.get(id) {
            Some(CollisionObject::Group(group)) => group.children().to_vec(),
            _ => vec![id],
        }
    }

    /// Object registered with the grid on behalf of `id`.
    fn filed_object(&self, id: ObjectId) -> ObjectId {
        self.objects
            .rigid(id)
            .and_then(RigidBody::group)
            .unwrap_or(id)
    }

    // ========================================================================
    // Joints
    // ========================================================================

    /// Builds a joint between `a` and `b` pivoting at the world point `pivot`
    /// with joint axes `axes`, using the bodies' current poses.
    pub fn joint_at(
        &mut self,
        a: ObjectId,
        b: ObjectId,
        pivot: Vec3,
        axes: Quat,
    ) -> PhysicsResult<JointConstraint> {
        let mut local = |id: ObjectId| -> PhysicsResult<(Vec3, Quat)> {
            let body = self.body_mut(id)?;
            let com = body.center_of_mass();
            let inverse = body.orientation().inverse();
            Ok((inverse * (pivot - com), inverse * axes))
        };
        let (anchor_a, frame_a) = local(a)?;
        let (anchor_b, frame_b) = local(b)?;
        Ok(JointConstraint::new(a, b, anchor_a, anchor_b).with_frames(frame_a, frame_b))
    }

    /// Adds a persistent joint between two rigid bodies.
    pub fn add_joint(&mut self, joint: impl Into<PhysicsConstraint>) -> PhysicsResult<JointId> {
        let joint = joint.into();
        let (a, b) = joint.bodies();
        for id in [a, b] {
            self.body(id)?;
        }
        let index = match self.free_joints.pop() {
            Some(index) => {
                self.joints[index as usize] = Some(joint);
                index
            }
            None => {
                self.joints.push(Some(joint));
                (self.joints.len() - 1) as u32
            }
        };
        Ok(JointId(index))
    }

    /// Removes a joint.
    pub fn remove_joint(&mut self, id: JointId) -> PhysicsResult<PhysicsConstraint> {
        let joint = self
            .joints
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(PhysicsError::InvalidHandle)?;
        self.free_joints.push(id.0);
        Ok(joint)
    }

    /// Looks up a joint.
    pub fn joint(&self, id: JointId) -> Option<&PhysicsConstraint> {
        self.joints.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Looks up a joint mutably, e.g. to set a motor torque.
    pub fn joint_mut(&mut self, id: JointId) -> Option<&mut PhysicsConstraint> {
        self.joints.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Live joints.
    pub fn joints(&self) -> impl Iterator<Item = (JointId, &PhysicsConstraint)> {
        self.joints
            .iter()
            .enumerate()
            .filter_map(|(i, j)| j.as_ref().map(|j| (JointId(i as u32), j)))
    }

    fn drop_joints_of(&mut self, id: ObjectId) {
        for (index, slot) in self.joints.iter_mut().enumerate() {
            let attached = slot.as_ref().is_some_and(|j| {
                let (a, b) = j.bodies();
                a == id || b == id
            });
            if attached {
                *slot = None;
                self.free_joints.push(index as u32);
                tracing::debug!(object = ?id, joint = index, "joint dropped with its body");
            }
        }
    }

    // ========================================================================
    // Broad phase
    // ========================================================================

    fn broad_entry(&mut self, id: ObjectId, dt: f32) -> Option<BroadEntry> {
        let margin = self.config.contact.margin;

        let children = self
            .objects
            .get(id)
            .and_then(CollisionObject::as_group)
            .map(|g| g.children().to_vec());
        if let Some(children) = children {
            let boxes: Vec<_> = children
                .iter()
                .filter_map(|c| self.objects.rigid_mut(*c).and_then(|b| b.swept_aabb(dt)))
                .collect();
            if let Some(group) = self.objects.get_mut(id).and_then(CollisionObject::as_group_mut) {
                group.refresh_bounds(boxes);
            }
        }

        let activity = activity_of(self.objects.get(id)?, &self.objects);
        let object = self.objects.get_mut(id)?;
        let shape = object.shape_type();
        let bounds = match object {
            CollisionObject::Rigid(body) => {
                if body.group().is_some() {
                    return None;
                }
                let xform = body.transform();
                match body.shape().world_plane(&xform) {
                    Some(plane) => BroadBounds::Plane(plane),
                    None => BroadBounds::Finite(body.swept_aabb(dt)?.inflated(margin)),
                }
            }
            CollisionObject::Ray(ray) => BroadBounds::Finite(ray.swept_aabb(dt)),
            CollisionObject::Group(group) => BroadBounds::Finite(group.bounds()?.inflated(margin)),
        };
        Some(BroadEntry {
            id,
            shape,
            activity,
            bounds,
        })
    }

    fn register(&mut self, id: ObjectId) {
        let Some(entry) = self.broad_entry(id, self.config.dt) else {
            return;
        };
        let regions = self.grid.on_object_added(&entry);
        let orphaned = regions.is_empty();
        if let Some(object) = self.objects.get_mut(id) {
            object.core_mut().regions = regions;
        }
        if orphaned {
            self.report_orphan(id);
        }
    }

    /// Reconciles `id`'s regions and activity bucket. Returns whether it
    /// has just left the grid.
    fn refile(&mut self, id: ObjectId, dt: f32) -> Option<bool> {
        let entry = self.broad_entry(id, dt)?;
        let object = self.objects.get_mut(id)?;
        let mut regions = std::mem::take(&mut object.core_mut().regions);
        let was_filed = !regions.is_empty();
        let delta = self.grid.on_object_update(&entry, &mut regions);
        self.grid.set_activity(&entry, &regions);
        object.core_mut().regions = regions;
        Some(delta.orphaned && was_filed)
    }

    /// Static bodies only need refiling after being moved.
    fn needs_refile(&self, id: ObjectId) -> bool {
        match self.objects.get(id) {
            Some(CollisionObject::Rigid(body)) => {
                body.group().is_none()
                    && (body.activity() != Activity::Static || body.cache_dirty())
            }
            Some(_) => true,
            None => false,
        }
    }

    fn report_orphan(&self, id: ObjectId) {
        tracing::warn!(object = ?id, "object left the simulated volume");
        if let Some(callback) = &self.orphan_callback {
            callback.on_orphan(id);
        }
    }

    /// Candidate pairs of filed objects, each once, in handle order. A group
    /// that collides with itself appears as `(g, g)`.
    fn broad_pairs(&self) -> Vec<(ObjectId, ObjectId)> {
        let mut pairs = BTreeSet::new();
        for (id, object) in self.objects.iter() {
            let filed = match object {
                CollisionObject::Ray(_) => false,
                CollisionObject::Rigid(body) => body.group().is_none(),
                CollisionObject::Group(_) => true,
            };
            // Inactive and static objects never start a pair.
            if !filed || activity_of(object, &self.objects) != Activity::Active {
                continue;
            }
            if object.as_group().is_some_and(CollisionGroup::collide_children) {
                pairs.insert((id, id));
            }
            for other in self.grid.neighbours(object.core().regions(), false) {
                if other == id
                    || object.core().collision_disabled(other)
                    || matches!(self.objects.get(other), None | Some(CollisionObject::Ray(_)))
                {
                    continue;
                }
                pairs.insert(if id < other { (id, other) } else { (other, id) });
            }
        }
        pairs.into_iter().collect()
    }

    // ========================================================================
    // Narrow phase
    // ========================================================================

    fn narrow_pair(&mut self, x: ObjectId, y: ObjectId, dt: f32) {
        if x == y {
            let members = self.leaves(x);
            for (i, &p) in members.iter().enumerate() {
                for &q in &members[i + 1..] {
                    self.narrow_bodies(p, q, dt);
                }
            }
            return;
        }
        let (xs, ys) = (self.leaves(x), self.leaves(y));
        for &p in &xs {
            for &q in &ys {
                if p != q {
                    self.narrow_bodies(p, q, dt);
                }
            }
        }
    }

    fn narrow_bodies(&mut self, p: ObjectId, q: ObjectId, dt: f32) {
        let margin = self.config.contact.margin;
        {
            let (Some(a), Some(b)) = (self.objects.rigid(p), self.objects.rigid(q)) else {
                return;
            };
            if a.core().collision_disabled(q)
                || (a.activity() != Activity::Active && b.activity() != Activity::Active)
            {
                return;
            }
        }

        let mut placed = |id: ObjectId| {
            self.objects
                .rigid_mut(id)
                .map(|body| (body.transform(), body.swept_aabb(dt)))
        };
        let (Some((xform_a, box_a)), Some((xform_b, box_b))) = (placed(p), placed(q)) else {
            return;
        };
        // Planes have no box and skip the box test.
        if let (Some(box_a), Some(box_b)) = (box_a, box_b) {
            if !box_a.inflated(margin).intersects(&box_b) {
                return;
            }
        }

        let (Some(a), Some(b)) = (self.objects.rigid(p), self.objects.rigid(q)) else {
            return;
        };
        let mut manifolds = std::mem::take(&mut self.manifolds);
        manifolds.clear();
        narrow::collide(
            &Placed {
                id: p,
                shape: a.shape(),
                xform: xform_a,
                sweep: a.velocity() * dt,
            },
            &Placed {
                id: q,
                shape: b.shape(),
                xform: xform_b,
                sweep: b.velocity() * dt,
            },
            margin,
            &mut manifolds,
        );
        let materials = [(p, a.restitution, a.friction), (q, b.restitution, b.friction)];
        let material = |id: ObjectId| {
            materials
                .iter()
                .find(|m| m.0 == id)
                .map_or((0.0, 0.0), |m| (m.1, m.2))
        };

        for manifold in &manifolds {
            let (ma, mb) = (material(manifold.a), material(manifold.b));
            let region = self.contacts.add_region(manifold.a, manifold.b, manifold.normal);
            for point in &manifold.points {
                let contact = ContactPoint::new(
                    manifold.a,
                    manifold.b,
                    ContactPart {
                        pos: point.on_a,
                        norm: manifold.normal,
                    },
                    ContactPart {
                        pos: point.on_b,
                        norm: -manifold.normal,
                    },
                    (ma.0, mb.0),
                    (ma.1, mb.1),
                );
                if let Err(error) = self.contacts.add_point(region, contact) {
                    tracing::error!(%error, "contact point dropped");
                }
            }
        }
        self.manifolds = manifolds;
    }

    // ========================================================================
    // Ray colliders
    // ========================================================================

    fn cast_rays(&mut self, dt: f32) -> usize {
        let rays: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, o)| o.as_ray().is_some_and(RayCollider::is_active))
            .map(|(id, _)| id)
            .collect();

        let mut hits = 0;
        for ray_id in rays {
            let Some(ray) = self.objects.get(ray_id).and_then(CollisionObject::as_ray) else {
                continue;
            };
            let (from, to) = ray.segment(dt);
            let momentum = ray.momentum();
            let callback = ray.callback().cloned();
            let disabled = ray.core().disabled_collisions().clone();

            let mut candidates = BTreeSet::new();
            for region in self.grid.get_regions_on_ray(from, to).iter() {
                if let Some(region) = self.grid.region(region) {
                    candidates.extend(region.all_objects());
                }
            }

            let mut nearest: Option<(ObjectId, RayHit)> = None;
            for candidate in candidates {
                if candidate == ray_id || disabled.contains(&candidate) {
                    continue;
                }
                for body_id in self.leaves(candidate) {
                    let Some(body) = self.objects.rigid_mut(body_id) else {
                        continue;
                    };
                    let xform = body.transform();
                    let Some(hit) = narrow::raycast(body.shape(), &xform, from, to) else {
                        continue;
                    };
                    if nearest.map_or(true, |(_, best)| hit.fraction < best.fraction) {
                        nearest = Some((body_id, hit));
                    }
                }
            }

            let mut stop = None;
            if let Some((object, hit)) = nearest {
                hits += 1;
                let contact = RayContact {
                    ray: ray_id,
                    object,
                    entity: self.objects.get(object).and_then(|o| o.core().user_entity),
                    point: hit.point,
                    normal: hit.normal,
                    fraction: hit.fraction,
                };
                if callback.as_ref().map_or(true, |cb| cb.on_hit(&contact)) {
                    if let Some(body) = self.objects.rigid_mut(object) {
                        body.wake();
                        body.apply_impulse_at_point(momentum, hit.point);
                    }
                    stop = Some(hit.point);
                }
            }
            if let Some(ray) = self.objects.get_mut(ray_id).and_then(CollisionObject::as_ray_mut) {
                match stop {
                    Some(point) => ray.stop_at(point),
                    None => ray.advance(dt),
                }
            }
        }
        hits
    }

    // ========================================================================
    // Solve
    // ========================================================================

    fn solve(&mut self, dt: f32, stats: &mut StepStats) -> SolveOutcome {
        let ctx = StepContext {
            dt,
            gravity: self.config.gravity,
            contact: self.config.contact,
        };
        let objects = &mut self.objects;

        let constraints: Vec<&mut dyn ConstraintSolver> = self
            .contacts
            .points_mut()
            .map(|c| c as &mut dyn ConstraintSolver)
            .chain(
                self.joints
                    .iter_mut()
                    .flatten()
                    .map(|j| j as &mut dyn ConstraintSolver),
            )
            .collect();

        let merges = |id: ObjectId| objects.rigid(id).is_some_and(RigidBody::merges_subgraphs);
        let links: Vec<ConstraintLink> = constraints
            .iter()
            .map(|c| {
                let (a, b) = c.bodies();
                ConstraintLink {
                    a,
                    b,
                    a_merges: merges(a),
                    b_merges: merges(b),
                }
            })
            .collect();
        self.graph.build(&links);

        // An island touching anything awake is solved awake.
        for island in self.graph.islands() {
            if island
                .iter()
                .any(|id| objects.rigid(*id).is_some_and(RigidBody::is_active))
            {
                for id in island {
                    if let Some(body) = objects.rigid_mut(id).filter(|b| !b.is_active()) {
                        body.wake();
                        stats.woken += 1;
                    }
                }
            }
        }

        self.solver.load(
            objects
                .iter_mut()
                .filter_map(|(id, o)| o.as_rigid_mut().map(|body| solver_body(id, body))),
        );
        let batches = self.graph.batches();
        stats.batches = batches.len();
        let outcome = self
            .solver
            .solve(constraints, &batches, self.config.solver_iterations, &ctx);

        for id in &outcome.woken {
            if let Some(body) = objects.rigid_mut(*id).filter(|b| !b.is_active()) {
                body.wake();
                stats.woken += 1;
            }
        }
        for snapshot in self.solver.bodies() {
            if let Some(body) = objects.rigid_mut(snapshot.id).filter(|b| b.is_active()) {
                body.store_velocities(snapshot.velocity, snapshot.angular_velocity);
            }
        }
        outcome
    }

    /// Fills in entities and calls both bodies' callbacks.
    fn dispatch(&self, reports: Vec<ContactReport>) {
        for mut report in reports {
            let entity = |id| self.objects.get(id).and_then(|o| o.core().user_entity);
            report.entity = entity(report.body);
            report.other_entity = entity(report.other);
            if let Some(callback) = self.objects.rigid(report.body).and_then(RigidBody::callback) {
                callback.on_collision(&report);
            }
            if let Some(callback) = self.objects.rigid(report.other).and_then(RigidBody::callback) {
                callback.on_collision(&report.flipped());
            }
        }
    }

    // ========================================================================
    // Step
    // ========================================================================

    /// Advances the simulation by the configured timestep.
    pub fn step(&mut self) -> StepStats {
        self.update(self.config.dt)
    }

    /// Advances the simulation by `dt`.
    pub fn update(&mut self, dt: f32) -> StepStats {
        let mut stats = StepStats::default();
        if !(dt > 0.0 && dt.is_finite()) {
            tracing::debug!(dt, "ignoring non-positive timestep");
            return stats;
        }
        let span = tracing::debug_span!("physics_step", dt, objects = self.objects.len());
        let _enter = span.enter();

        for (_, object) in self.objects.iter_mut() {
            match object {
                CollisionObject::Rigid(body) => body.integrate_velocity(dt),
                CollisionObject::Ray(ray) => ray.integrate_velocity(dt),
                CollisionObject::Group(_) => {}
            }
        }

        for id in self.objects.ids() {
            if self.needs_refile(id) && self.refile(id, dt) == Some(true) {
                stats.orphans += 1;
                self.report_orphan(id);
            }
        }

        let pairs = self.broad_pairs();
        stats.pairs = pairs.len();
        for (a, b) in pairs {
            self.narrow_pair(a, b, dt);
        }
        stats.contacts = self.contacts.point_count();

        stats.ray_hits = self.cast_rays(dt);

        let outcome = self.solve(dt, &mut stats);
        self.dispatch(outcome.reports);

        let sleep = self.config.sleep;
        let mut slept = Vec::new();
        for (id, object) in self.objects.iter_mut() {
            if let CollisionObject::Rigid(body) = object {
                body.integrate_position(dt);
                if body.update_sleep(dt, &sleep) {
                    slept.push(body.group().unwrap_or(id));
                }
            }
        }
        stats.slept = slept.len();
        for id in slept {
            self.refile(id, dt);
        }

        self.contacts.clear_results();
        self.graph.clear();

        tracing::trace!(
            pairs = stats.pairs,
            contacts = stats.contacts,
            batches = stats.batches,
            ray_hits = stats.ray_hits,
            "step finished"
        );
        stats
    }

    // ========================================================================
    // Debug
    // ========================================================================

    /// Draws every object, and occupied regions if `regions` is set.
    pub fn debug_draw(&mut self, renderer: &mut dyn DebugRenderer, regions: bool) {
        if regions {
            self.grid.debug_draw(renderer);
        }
        let dt = self.config.dt;
        for (_, object) in self.objects.iter_mut() {
            match object {
                CollisionObject::Rigid(body) => body.debug_draw(renderer),
                CollisionObject::Ray(ray) => ray.debug_draw(renderer, dt),
                CollisionObject::Group(group) => group.debug_draw(renderer),
            }
        }
    }
}

fn solver_body(id: ObjectId, body: &mut RigidBody) -> SolverBody {
    let cache = *body.cache();
    SolverBody {
        id,
        com: cache.com,
        orientation: body.orientation(),
        velocity: body.velocity(),
        angular_velocity: body.angular_velocity(),
        inv_mass: body.inverse_mass(),
        inv_moi: cache.inv_moi,
        merges: body.merges_subgraphs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridConfig, SleepSettings};
    use crate::joint::FixedJointConstraint;
    use crate::shape::CollisionShape;
    use std::sync::Mutex;

    fn world() -> PhysicsWorld {
        PhysicsWorld::new(Physics::default()).unwrap()
    }

    fn ball(position: Vec3) -> RigidBody {
        RigidBody::dynamic(CollisionShape::sphere(1.0).unwrap(), 1.0, position)
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = Physics::default().with_solver_iterations(0);
        assert_eq!(
            PhysicsWorld::new(config).unwrap_err(),
            ConfigError::SolverIterations
        );
    }

    #[test]
    fn test_ball_rests_on_ground() {
        let mut world = world();
        world.add_rigid_body(RigidBody::new_static(CollisionShape::ground(), Vec3::ZERO));
        let ball = world.add_rigid_body(ball(Vec3::new(0.0, 3.0, 0.0)).with_restitution(0.0));
        for _ in 0..240 {
            world.step();
        }
        let body = world.body(ball).unwrap();
        assert!((body.position().y - 1.0).abs() < 0.1, "y = {}", body.position().y);
        assert!(body.velocity().length() < 0.5);
    }

    #[test]
    fn test_falling_without_ground() {
        let mut world = world();
        let ball = world.add_rigid_body(ball(Vec3::new(0.0, 10.0, 0.0)));
        let stats = world.step();
        assert_eq!(stats.contacts, 0);
        let v = world.body(ball).unwrap().velocity();
        assert!(v.y < 0.0);
    }

    #[test]
    fn test_disabled_collision_is_mirrored() {
        let mut world = world();
        let a = world.add_rigid_body(ball(Vec3::ZERO));
        let b = world.add_rigid_body(ball(Vec3::new(0.0, 1.5, 0.0)));
        world.disable_collision(a, b).unwrap();
        assert!(world.object(b).unwrap().core().collision_disabled(a));
        assert_eq!(world.step().contacts, 0);

        world.enable_collision(b, a).unwrap();
        assert!(!world.object(a).unwrap().core().collision_disabled(b));
        assert!(world.step().contacts > 0);
    }

    #[test]
    fn test_stale_handles_rejected() {
        let mut world = world();
        let a = world.add_rigid_body(ball(Vec3::ZERO));
        world.remove_object(a).unwrap();
        assert_eq!(world.body(a).unwrap_err(), PhysicsError::InvalidHandle);
        assert!(world.remove_object(a).is_err());
        assert_eq!(
            world.set_velocity(a, Vec3::X).unwrap_err(),
            PhysicsError::InvalidHandle
        );
    }

    #[test]
    fn test_joint_needs_rigid_bodies() {
        let mut world = world();
        let a = world.add_rigid_body(ball(Vec3::ZERO));
        let ray = world.add_ray_collider(RayCollider::new(Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO, 1.0));
        let joint = JointConstraint::new(a, ray, Vec3::ZERO, Vec3::ZERO);
        assert_eq!(
            world.add_joint(joint).unwrap_err(),
            PhysicsError::WrongKind {
                expected: "rigid body"
            }
        );
    }

    #[test]
    fn test_joints_dropped_with_body() {
        let mut world = world();
        let a = world.add_rigid_body(ball(Vec3::ZERO));
        let b = world.add_rigid_body(ball(Vec3::new(3.0, 0.0, 0.0)));
        let joint = world.joint_at(a, b, Vec3::new(1.5, 0.0, 0.0), Quat::IDENTITY).unwrap();
        let id = world.add_joint(FixedJointConstraint::from_joint(joint)).unwrap();
        assert!(world.joint(id).is_some());
        world.remove_object(b).unwrap();
        assert!(world.joint(id).is_none());
        assert_eq!(world.joints().count(), 0);
    }

    #[test]
    fn test_fixed_joint_keeps_distance() {
        let mut world = PhysicsWorld::new(Physics::default().with_gravity(Vec3::ZERO)).unwrap();
        let a = world.add_rigid_body(ball(Vec3::ZERO));
        let b = world.add_rigid_body(ball(Vec3::new(3.0, 0.0, 0.0)));
        let joint = world.joint_at(a, b, Vec3::new(1.5, 0.0, 0.0), Quat::IDENTITY).unwrap();
        world.add_joint(FixedJointConstraint::from_joint(joint)).unwrap();
        world.set_velocity(b, Vec3::new(0.0, 2.0, 0.0)).unwrap();
        for _ in 0..60 {
            world.step();
        }
        let pa = world.body(a).unwrap().position();
        let pb = world.body(b).unwrap().position();
        assert!(((pb - pa).length() - 3.0).abs() < 0.1);
    }

    #[test]
    fn test_group_members_move_together() {
        let mut world = PhysicsWorld::new(Physics::default().with_gravity(Vec3::ZERO)).unwrap();
        let (group, members) = world.add_group(
            CollisionGroup::new(),
            vec![ball(Vec3::ZERO), ball(Vec3::new(1.0, 0.0, 0.0))],
        );
        world.set_velocity(group, Vec3::X).unwrap();
        world.translate(group, Vec3::new(0.0, 2.0, 0.0)).unwrap();
        // Overlapping members ignore each other by default.
        assert_eq!(world.step().contacts, 0);
        for id in &members {
            let body = world.body(*id).unwrap();
            assert_eq!(body.group(), Some(group));
            assert!((body.velocity() - Vec3::X).length() < 1e-3);
            assert!((body.position().y - 2.0).abs() < 1e-5);
        }

        world.remove_object(group).unwrap();
        assert!(members.iter().all(|id| world.object(*id).is_none()));
    }

    #[test]
    fn test_group_self_collision() {
        let mut world = PhysicsWorld::new(Physics::default().with_gravity(Vec3::ZERO)).unwrap();
        world.add_group(
            CollisionGroup::new().with_collide_children(true),
            vec![ball(Vec3::ZERO), ball(Vec3::new(1.5, 0.0, 0.0))],
        );
        assert!(world.step().contacts > 0);
    }

    #[test]
    fn test_orphan_reported_once() {
        let mut world = PhysicsWorld::new(Physics::default().with_gravity(Vec3::ZERO)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        world.set_orphan_callback(Some(Arc::new(move |id: ObjectId| {
            sink.lock().unwrap().push(id);
        })));
        let ball = world.add_rigid_body(ball(Vec3::ZERO));
        let limit = GridConfig::default().extent_max();
        world.translate(ball, Vec3::new(limit.x + 10.0, 0.0, 0.0)).unwrap();
        world.step();
        world.step();
        assert_eq!(*seen.lock().unwrap(), vec![ball]);
        assert!(world.object(ball).unwrap().core().regions().is_empty());
    }

    #[test]
    fn test_ray_transfers_momentum() {
        let mut world = PhysicsWorld::new(Physics::default().with_gravity(Vec3::ZERO)).unwrap();
        let target = world.add_rigid_body(ball(Vec3::new(5.0, 0.0, 0.0)));
        let ray = world.add_ray_collider(RayCollider::new(Vec3::ZERO, Vec3::new(600.0, 0.0, 0.0), 0.01));
        let stats = world.step();
        assert_eq!(stats.ray_hits, 1);
        let ray = world.ray(ray).unwrap();
        assert!(!ray.is_active());
        assert!((ray.position().x - 4.0).abs() < 1e-3);
        assert!(world.body(target).unwrap().velocity().x > 0.0);
    }

    #[test]
    fn test_ray_pass_through() {
        let mut world = PhysicsWorld::new(Physics::default().with_gravity(Vec3::ZERO)).unwrap();
        world.add_rigid_body(ball(Vec3::new(5.0, 0.0, 0.0)));
        let pass = Arc::new(|_: &RayContact| false);
        let ray = world.add_ray_collider(
            RayCollider::new(Vec3::ZERO, Vec3::new(600.0, 0.0, 0.0), 0.01).with_callback(pass),
        );
        world.step();
        let ray = world.ray(ray).unwrap();
        assert!(ray.is_active());
        assert!((ray.position().x - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_collision_callbacks_see_both_sides() {
        let mut world = PhysicsWorld::new(Physics::default().with_gravity(Vec3::ZERO)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let record = Arc::new(move |report: &ContactReport| {
            sink.lock().unwrap().push(*report);
        });
        let a = world.add_rigid_body(
            ball(Vec3::ZERO)
                .with_callback(record.clone())
                .with_user_entity(crate::object::UserEntity(1)),
        );
        let b = world.add_rigid_body(ball(Vec3::new(0.0, 1.9, 0.0)).with_callback(record));
        world.set_velocity(b, Vec3::new(0.0, -2.0, 0.0)).unwrap();
        world.step();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let for_a = seen.iter().find(|r| r.body == a).unwrap();
        let for_b = seen.iter().find(|r| r.body == b).unwrap();
        assert_eq!(for_a.entity, Some(crate::object::UserEntity(1)));
        assert_eq!(for_b.other_entity, Some(crate::object::UserEntity(1)));
        assert!((for_a.impulse + for_b.impulse).length() < 1e-5);
        // B is pushed up, away from A.
        assert!(for_b.impulse.y > 0.0);
    }

    #[test]
    fn test_resting_body_sleeps() {
        let sleep = SleepSettings {
            delay: 0.1,
            ..SleepSettings::default()
        };
        let mut world = PhysicsWorld::new(
            Physics::default()
                .with_gravity(Vec3::ZERO)
                .with_sleep(sleep),
        )
        .unwrap();
        let ball = world.add_rigid_body(ball(Vec3::ZERO));
        let mut slept = 0;
        for _ in 0..10 {
            slept += world.step().slept;
        }
        assert_eq!(slept, 1);
        assert!(!world.body(ball).unwrap().is_active());

        world.set_velocity(ball, Vec3::X).unwrap();
        assert!(world.body(ball).unwrap().is_active());
    }

    #[test]
    fn test_impact_wakes_sleeping_body() {
        let sleep = SleepSettings {
            delay: 0.1,
            ..SleepSettings::default()
        };
        let mut world = PhysicsWorld::new(
            Physics::default()
                .with_gravity(Vec3::ZERO)
                .with_sleep(sleep),
        )
        .unwrap();
        let sleeper = world.add_rigid_body(ball(Vec3::ZERO));
        for _ in 0..10 {
            world.step();
        }
        assert!(!world.body(sleeper).unwrap().is_active());

        let striker = world.add_rigid_body(ball(Vec3::new(4.0, 0.0, 0.0)));
        world.set_velocity(striker, Vec3::new(-10.0, 0.0, 0.0)).unwrap();

        let mut woken = 0;
        for _ in 0..30 {
            woken += world.step().woken;
        }
        let body = world.body(sleeper).unwrap();
        assert!(woken >= 1);
        assert!(body.is_active());
        assert!(body.velocity().x < -1.0, "{}", body.velocity());
        assert!(body.position().x < 0.0);
    }

    #[test]
    fn test_collision_with_self_rejected() {
        let mut world = world();
        let a = world.add_rigid_body(ball(Vec3::ZERO));
        assert_eq!(
            world.disable_collision(a, a).unwrap_err(),
            PhysicsError::InvalidHandle
        );
        assert!(!world.object(a).unwrap().core().collision_disabled(a));
    }
}
