//! Collision objects and their arena.
//!
//! Every simulated thing is a [`CollisionObject`]: a rigid body, a ray
//! collider, or a group of rigid bodies. Objects live in an [`ObjectArena`]
//! and are addressed by generational [`ObjectId`] handles, so a handle to a
//! removed object can never alias a newer one.

use std::collections::BTreeSet;

use crate::body::RigidBody;
use crate::geom::{Aabb, Plane};
use crate::group::CollisionGroup;
use crate::ray::RayCollider;
use crate::region::{Activity, RegionSet};
use crate::shape::ShapeType;

/// Handle to an object in a world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl ObjectId {
    /// Builds a handle from its parts.
    pub const fn from_raw(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Opaque back-reference to a gameplay entity. Never interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserEntity(pub u64);

/// State shared by every kind of collision object.
#[derive(Debug, Clone, Default)]
pub struct ObjectCore {
    pub(crate) regions: RegionSet,
    pub(crate) disabled_collisions: BTreeSet<ObjectId>,
    /// Owning gameplay entity, if any.
    pub user_entity: Option<UserEntity>,
}

impl ObjectCore {
    /// Regions the object currently overlaps.
    pub fn regions(&self) -> &RegionSet {
        &self.regions
    }

    /// Objects this one never collides with.
    pub fn disabled_collisions(&self) -> &BTreeSet<ObjectId> {
        &self.disabled_collisions
    }

    /// Whether collisions with `other` are disabled.
    pub fn collision_disabled(&self, other: ObjectId) -> bool {
        self.disabled_collisions.contains(&other)
    }
}

/// What the broad phase needs to know about an object's extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BroadBounds {
    /// Finite world-space box.
    Finite(Aabb),
    /// Unbounded half-space boundary.
    Plane(Plane),
}

/// A rigid body, ray collider or group.
#[derive(Debug)]
pub enum CollisionObject {
    /// Rigid body.
    Rigid(RigidBody),
    /// Ray collider.
    Ray(RayCollider),
    /// Group of rigid bodies.
    Group(CollisionGroup),
}

impl CollisionObject {
    /// Shared object state.
    pub fn core(&self) -> &ObjectCore {
        match self {
            CollisionObject::Rigid(b) => &b.core,
            CollisionObject::Ray(r) => &r.core,
            CollisionObject::Group(g) => &g.core,
        }
    }

    /// Mutable shared object state.
    pub fn core_mut(&mut self) -> &mut ObjectCore {
        match self {
            CollisionObject::Rigid(b) => &mut b.core,
            CollisionObject::Ray(r) => &mut r.core,
            CollisionObject::Group(g) => &mut g.core,
        }
    }

    /// Human-readable kind, for errors.
    pub fn kind(&self) -> &'static str {
        match self {
            CollisionObject::Rigid(_) => "rigid body",
            CollisionObject::Ray(_) => "ray collider",
            CollisionObject::Group(_) => "collision group",
        }
    }

    /// Shape bucket used for region filing.
    pub fn shape_type(&self) -> ShapeType {
        match self {
            CollisionObject::Rigid(b) => b.shape().shape_type(),
            CollisionObject::Ray(_) => ShapeType::Ray,
            CollisionObject::Group(_) => ShapeType::Multi,
        }
    }

    /// Rigid body view.
    pub fn as_rigid(&self) -> Option<&RigidBody> {
        match self {
            CollisionObject::Rigid(b) => Some(b),
            _ => None,
        }
    }

    /// Mutable rigid body view.
    pub fn as_rigid_mut(&mut self) -> Option<&mut RigidBody> {
        match self {
            CollisionObject::Rigid(b) => Some(b),
            _ => None,
        }
    }

    /// Ray collider view.
    pub fn as_ray(&self) -> Option<&RayCollider> {
        match self {
            CollisionObject::Ray(r) => Some(r),
            _ => None,
        }
    }

    /// Mutable ray collider view.
    pub fn as_ray_mut(&mut self) -> Option<&mut RayCollider> {
        match self {
            CollisionObject::Ray(r) => Some(r),
            _ => None,
        }
    }

    /// Group view.
    pub fn as_group(&self) -> Option<&CollisionGroup> {
        match self {
            CollisionObject::Group(g) => Some(g),
            _ => None,
        }
    }

    /// Mutable group view.
    pub fn as_group_mut(&mut self) -> Option<&mut CollisionGroup> {
        match self {
            CollisionObject::Group(g) => Some(g),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    object: Option<CollisionObject>,
}

/// Generational slab of collision objects.
#[derive(Debug, Default)]
pub struct ObjectArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl ObjectArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `object` and returns its handle.
    pub fn insert(&mut self, object: CollisionObject) -> ObjectId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            return ObjectId::from_raw(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            object: Some(object),
        });
        ObjectId::from_raw(index, 0)
    }

    /// Removes and returns the object, invalidating `id`.
    pub fn remove(&mut self, id: ObjectId) -> Option<CollisionObject> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let object = slot.object.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(object)
    }

    /// Whether `id` names a live object.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Looks up an object.
    pub fn get(&self, id: ObjectId) -> Option<&CollisionObject> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.object.as_ref())
    }

    /// Looks up an object mutably.
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut CollisionObject> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.object.as_mut())
    }

    /// Two distinct objects at once.
    pub fn get_pair_mut(
        &mut self,
        a: ObjectId,
        b: ObjectId,
    ) -> Option<(&mut CollisionObject, &mut CollisionObject)> {
        if a.index == b.index || !self.contains(a) || !self.contains(b) {
            return None;
        }
        let (lo, hi, swapped) = if a.index < b.index {
            (a, b, false)
        } else {
            (b, a, true)
        };
        let (left, right) = self.slots.split_at_mut(hi.index as usize);
        let first = left[lo.index as usize].object.as_mut()?;
        let second = right[0].object.as_mut()?;
        Some(if swapped {
            (second, first)
        } else {
            (first, second)
        })
    }

    /// Rigid body lookup.
    pub fn rigid(&self, id: ObjectId) -> Option<&RigidBody> {
        self.get(id).and_then(CollisionObject::as_rigid)
    }

    /// Mutable rigid body lookup.
    pub fn rigid_mut(&mut self, id: ObjectId) -> Option<&mut RigidBody> {
        self.get_mut(id).and_then(CollisionObject::as_rigid_mut)
    }

    /// Live object count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the arena holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Handles of every live object, in slot order.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Iterates live objects in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &CollisionObject)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.object
                .as_ref()
                .map(|o| (ObjectId::from_raw(i as u32, s.generation), o))
        })
    }

    /// Iterates live objects mutably in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ObjectId, &mut CollisionObject)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let generation = s.generation;
            s.object
                .as_mut()
                .map(|o| (ObjectId::from_raw(i as u32, generation), o))
        })
    }
}

/// Region bucket an object belongs in right now.
pub(crate) fn activity_of(object: &CollisionObject, arena: &ObjectArena) -> Activity {
    match object {
        CollisionObject::Rigid(b) => b.activity(),
        CollisionObject::Ray(r) => {
            if r.is_active() {
                Activity::Active
            } else {
                Activity::Inactive
            }
        }
        CollisionObject::Group(g) => {
            let mut any_dynamic = false;
            for child in g.children() {
                match arena.rigid(*child).map(RigidBody::activity) {
                    Some(Activity::Active) => return Activity::Active,
                    Some(Activity::Inactive) => any_dynamic = true,
                    _ => {}
                }
            }
            if any_dynamic {
                Activity::Inactive
            } else {
                Activity::Static
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::CollisionShape;

    fn ball() -> CollisionObject {
        CollisionObject::Rigid(RigidBody::dynamic(
            CollisionShape::sphere(1.0).unwrap(),
            1.0,
            glam::Vec3::ZERO,
        ))
    }

    #[test]
    fn test_stale_handle_rejected() {
        let mut arena = ObjectArena::new();
        let a = arena.insert(ball());
        assert!(arena.remove(a).is_some());
        let b = arena.insert(ball());
        assert_eq!(a.index(), b.index());
        assert!(arena.get(a).is_none());
        assert!(arena.get(b).is_some());
        assert!(arena.remove(a).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_pair_mut_order() {
        let mut arena = ObjectArena::new();
        let a = arena.insert(ball());
        let b = arena.insert(ball());
        arena.rigid_mut(a).unwrap().set_position(glam::Vec3::X);
        let (second, first) = arena.get_pair_mut(b, a).unwrap();
        assert_eq!(first.as_rigid().unwrap().position(), glam::Vec3::X);
        assert_eq!(second.as_rigid().unwrap().position(), glam::Vec3::ZERO);
        assert!(arena.get_pair_mut(a, a).is_none());
    }
}
