//! Physics regions and region sets.
//!
//! A [`PhysicsRegion`] is one cell of the broad phase. It keeps the objects
//! overlapping it, bucketed by activity and by shape type, so that candidate
//! lookup can skip sleeping or static sets cheaply.
//!
//! A [`RegionSet`] is the small hashed set of regions an object currently
//! overlaps. The same structure carries broad-phase query results.

use std::collections::BTreeSet;

use crate::debug::{DebugRenderer, REGION_COLOR};
use crate::geom::Aabb;
use crate::object::ObjectId;
use crate::shape::ShapeType;

/// Index of a region inside its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(pub u32);

/// Activity bucket an object is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Activity {
    /// Awake and simulated.
    Active,
    /// Asleep; simulated again once woken.
    Inactive,
    /// Never moves.
    Static,
}

impl Activity {
    /// Number of buckets.
    pub const COUNT: usize = 3;

    /// All buckets.
    pub const ALL: [Activity; Self::COUNT] =
        [Activity::Active, Activity::Inactive, Activity::Static];

    fn index(self) -> usize {
        self as usize
    }
}

const REGION_SET_BUCKETS: usize = 8;

/// Small fixed-bucket hash set of regions.
#[derive(Debug, Clone, Default)]
pub struct RegionSet {
    buckets: [Vec<RegionId>; REGION_SET_BUCKETS],
    count: usize,
}

impl RegionSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(id: RegionId) -> usize {
        // Fibonacci hashing spreads neighbouring grid cells across buckets.
        (id.0.wrapping_mul(0x9E37_79B9) >> 29) as usize % REGION_SET_BUCKETS
    }

    /// Inserts a region. Returns `false` if it was already present.
    pub fn insert(&mut self, id: RegionId) -> bool {
        let bucket = &mut self.buckets[Self::bucket(id)];
        if bucket.contains(&id) {
            return false;
        }
        bucket.push(id);
        self.count += 1;
        true
    }

    /// Removes a region. Returns `false` if it was not present.
    pub fn remove(&mut self, id: RegionId) -> bool {
        let bucket = &mut self.buckets[Self::bucket(id)];
        match bucket.iter().position(|&r| r == id) {
            Some(pos) => {
                bucket.swap_remove(pos);
                self.count -= 1;
                true
            }
            None => false,
        }
    }

    /// Membership test.
    pub fn contains(&self, id: RegionId) -> bool {
        self.buckets[Self::bucket(id)].contains(&id)
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Removes every region, keeping bucket capacity.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.count = 0;
    }

    /// Iterates regions in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = RegionId> + '_ {
        self.buckets.iter().flatten().copied()
    }

    /// Regions in `self` but not in `other`.
    pub fn difference<'a>(&'a self, other: &'a RegionSet) -> impl Iterator<Item = RegionId> + 'a {
        self.iter().filter(move |&r| !other.contains(r))
    }

    /// Sorted snapshot, for deterministic iteration.
    pub fn sorted(&self) -> Vec<RegionId> {
        let mut out: Vec<_> = self.iter().collect();
        out.sort_unstable();
        out
    }
}

impl PartialEq for RegionSet {
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count && self.iter().all(|r| other.contains(r))
    }
}

impl Eq for RegionSet {}

impl FromIterator<RegionId> for RegionSet {
    fn from_iter<I: IntoIterator<Item = RegionId>>(iter: I) -> Self {
        let mut set = RegionSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl Extend<RegionId> for RegionSet {
    fn extend<I: IntoIterator<Item = RegionId>>(&mut self, iter: I) {
        for id in iter {
            self.insert(id);
        }
    }
}

/// One cell of the broad phase.
#[derive(Debug, Clone)]
pub struct PhysicsRegion {
    id: RegionId,
    bounds: Aabb,
    buckets: [[BTreeSet<ObjectId>; ShapeType::COUNT]; Activity::COUNT],
}

impl PhysicsRegion {
    /// Empty region covering `bounds`.
    pub fn new(id: RegionId, bounds: Aabb) -> Self {
        Self {
            id,
            bounds,
            buckets: Default::default(),
        }
    }

    /// Region index.
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// World-space bounds.
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Files `object` under the given bucket.
    pub fn take_ownership(&mut self, object: ObjectId, shape: ShapeType, activity: Activity) {
        self.buckets[activity.index()][shape.index()].insert(object);
    }

    /// Removes `object` from whichever bucket holds it.
    pub fn disown(&mut self, object: ObjectId) -> bool {
        self.buckets
            .iter_mut()
            .flatten()
            .any(|bucket| bucket.remove(&object))
    }

    /// Moves `object` to a new activity bucket.
    pub fn set_activity(&mut self, object: ObjectId, shape: ShapeType, activity: Activity) {
        for bucket in &mut self.buckets {
            bucket[shape.index()].remove(&object);
        }
        self.take_ownership(object, shape, activity);
    }

    /// Whether `object` is filed here.
    pub fn owns(&self, object: ObjectId) -> bool {
        self.buckets.iter().flatten().any(|b| b.contains(&object))
    }

    /// Objects in one bucket.
    pub fn objects(&self, activity: Activity, shape: ShapeType) -> &BTreeSet<ObjectId> {
        &self.buckets[activity.index()][shape.index()]
    }

    /// Every object filed here under `activity`, any shape.
    pub fn objects_with_activity(&self, activity: Activity) -> impl Iterator<Item = ObjectId> + '_ {
        self.buckets[activity.index()].iter().flatten().copied()
    }

    /// Every object filed here.
    pub fn all_objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.buckets.iter().flatten().flatten().copied()
    }

    /// Number of objects filed here.
    pub fn len(&self) -> usize {
        self.buckets.iter().flatten().map(BTreeSet::len).sum()
    }

    /// Whether no objects are filed here.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Draws the region bounds.
    pub fn debug_draw(&self, renderer: &mut dyn DebugRenderer) {
        renderer.aabb(&self.bounds, REGION_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_region_set_insert_remove() {
        let mut set = RegionSet::new();
        assert!(set.insert(RegionId(3)));
        assert!(!set.insert(RegionId(3)));
        assert!(set.insert(RegionId(11)));
        assert_eq!(set.len(), 2);
        assert!(set.contains(RegionId(11)));
        assert!(set.remove(RegionId(3)));
        assert!(!set.remove(RegionId(3)));
        assert_eq!(set.sorted(), vec![RegionId(11)]);
    }

    #[test]
    fn test_region_set_difference() {
        let a: RegionSet = (0..6).map(RegionId).collect();
        let b: RegionSet = (3..9).map(RegionId).collect();
        let mut only_a: Vec<_> = a.difference(&b).collect();
        only_a.sort();
        assert_eq!(only_a, vec![RegionId(0), RegionId(1), RegionId(2)]);
    }

    #[test]
    fn test_region_buckets() {
        let mut region = PhysicsRegion::new(RegionId(0), Aabb::new(Vec3::ZERO, Vec3::ONE));
        let id = ObjectId::from_raw(1, 0);
        region.take_ownership(id, ShapeType::Sphere, Activity::Active);
        assert!(region.objects(Activity::Active, ShapeType::Sphere).contains(&id));

        region.set_activity(id, ShapeType::Sphere, Activity::Inactive);
        assert!(region.objects(Activity::Active, ShapeType::Sphere).is_empty());
        assert_eq!(region.objects_with_activity(Activity::Inactive).count(), 1);

        assert!(region.disown(id));
        assert!(region.is_empty());
        assert!(!region.disown(id));
    }
}
