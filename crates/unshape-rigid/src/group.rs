//! Collision groups: several rigid bodies registered with the broad phase
//! as one object.
//!
//! The group is filed under the union of its children's boxes. Pairs found
//! against the group are expanded to its children, and children are only
//! tested against each other when the group allows it.

use glam::Vec3;

use crate::debug::{DebugRenderer, REGION_COLOR};
use crate::geom::Aabb;
use crate::object::{ObjectCore, ObjectId, UserEntity};

/// A set of rigid bodies moved and filed together.
#[derive(Debug, Clone, Default)]
pub struct CollisionGroup {
    pub(crate) core: ObjectCore,
    children: Vec<ObjectId>,
    collide_children: bool,
    bounds: Option<Aabb>,
}

impl CollisionGroup {
    /// Empty group whose children ignore each other.
    pub fn new() -> Self {
        Self::default()
    }

    /// Let children collide with each other.
    pub fn with_collide_children(mut self, collide: bool) -> Self {
        self.collide_children = collide;
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

    /// Member bodies.
    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    /// Whether members collide with each other.
    pub fn collide_children(&self) -> bool {
        self.collide_children
    }

    pub fn set_collide_children(&mut self, collide: bool) {
        self.collide_children = collide;
    }

    /// Union of the children's boxes at the last refresh.
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    pub(crate) fn push_child(&mut self, child: ObjectId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: ObjectId) -> bool {
        let before = self.children.len();
        self.children.retain(|c| *c != child);
        self.children.len() != before
    }

    /// Replaces the cached bounds with the union of `boxes`.
    pub(crate) fn refresh_bounds(&mut self, boxes: impl IntoIterator<Item = Aabb>) {
        self.bounds = boxes.into_iter().reduce(|acc, b| acc.union(&b));
    }

    /// Center of the cached bounds.
    pub fn center(&self) -> Option<Vec3> {
        self.bounds.map(|b| b.center())
    }

    pub fn debug_draw(&self, renderer: &mut dyn DebugRenderer) {
        if let Some(bounds) = &self.bounds {
            renderer.aabb(bounds, REGION_COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_unique() {
        let mut g = CollisionGroup::new();
        let a = ObjectId::from_raw(1, 0);
        g.push_child(a);
        g.push_child(a);
        assert_eq!(g.children(), &[a]);
        assert!(g.remove_child(a));
        assert!(!g.remove_child(a));
    }

    #[test]
    fn test_bounds_union() {
        let mut g = CollisionGroup::new();
        g.refresh_bounds([
            Aabb::new(Vec3::ZERO, Vec3::ONE),
            Aabb::new(Vec3::splat(-2.0), Vec3::splat(-1.0)),
        ]);
        let b = g.bounds().unwrap();
        assert_eq!(b.min, Vec3::splat(-2.0));
        assert_eq!(b.max, Vec3::ONE);

        g.refresh_bounds(std::iter::empty());
        assert!(g.bounds().is_none());
    }
}
