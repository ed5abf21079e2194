//! Property tests for mass combination, batching, region reconciliation and
//! contact pool reuse.

use std::collections::HashSet;

use glam::{Mat3, Vec3};
use proptest::prelude::*;
use unshape_rigid::{
    Aabb, Activity, BroadBounds, BroadEntry, ConstraintLink, ContactPoint, GridConfig,
    GridRegionManager, MassInfo, ObjectId, Pool, RegionManager, ShapeType, batch_constraints,
};

fn vec3(range: std::ops::Range<f32>) -> impl Strategy<Value = Vec3> {
    (range.clone(), range.clone(), range).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn mass_info() -> impl Strategy<Value = MassInfo> {
    (0.1f32..10.0, vec3(-5.0..5.0), vec3(0.1..4.0)).prop_map(|(mass, com, diag)| MassInfo {
        mass,
        com,
        moi: Mat3::from_diagonal(diag),
    })
}

fn link() -> impl Strategy<Value = ConstraintLink> {
    (0u32..16, 0u32..16, any::<bool>(), any::<bool>()).prop_map(|(a, b, a_merges, b_merges)| {
        ConstraintLink {
            a: ObjectId::from_raw(a, 0),
            b: ObjectId::from_raw(b, 0),
            a_merges,
            b_merges,
        }
    })
}

fn close(a: &MassInfo, b: &MassInfo) -> bool {
    let scale = a.mass.max(1.0) * 100.0;
    (a.mass - b.mass).abs() < 1e-3 * scale
        && (a.com - b.com).length() < 1e-3
        && (a.moi - b.moi)
            .to_cols_array()
            .iter()
            .all(|d| d.abs() < 1e-3 * scale)
}

proptest! {
    #[test]
    fn mass_combination_is_associative(a in mass_info(), b in mass_info(), c in mass_info()) {
        let left = (a + b) + c;
        let right = a + (b + c);
        let shuffled = (c + a) + b;
        prop_assert!(close(&left, &right), "{left:?} vs {right:?}");
        prop_assert!(close(&left, &shuffled), "{left:?} vs {shuffled:?}");
    }

    #[test]
    fn batches_partition_without_conflicts(links in prop::collection::vec(link(), 0..64)) {
        let batches = batch_constraints(&links);

        let mut seen = HashSet::new();
        for batch in &batches {
            prop_assert!(!batch.is_empty());
            let mut used = HashSet::new();
            for &index in batch {
                prop_assert!(seen.insert(index), "constraint {index} batched twice");
                for body in links[index].merging() {
                    prop_assert!(used.insert(body), "{body:?} appears twice in one batch");
                }
            }
        }
        prop_assert_eq!(seen.len(), links.len());
    }

    #[test]
    fn region_update_is_idempotent(center in vec3(-140.0..140.0), half in vec3(0.01..20.0)) {
        let mut grid = GridRegionManager::new(&GridConfig::default()).unwrap();
        let entry = BroadEntry {
            id: ObjectId::from_raw(0, 0),
            shape: ShapeType::Sphere,
            activity: Activity::Active,
            bounds: BroadBounds::Finite(Aabb::from_center_half_extents(center, half)),
        };
        let mut regions = grid.on_object_added(&entry);
        let added = regions.clone();

        let first = grid.on_object_update(&entry, &mut regions);
        prop_assert!(first.is_unchanged());
        let second = grid.on_object_update(&entry, &mut regions);
        prop_assert!(second.is_unchanged());
        prop_assert_eq!(regions, added);
    }

    #[test]
    fn pool_reuses_slots_after_clear(n in 1usize..600) {
        let mut pool: Pool<ContactPoint> = Pool::new();
        let handles: Vec<_> = (0..n).map(|_| pool.allocate().0).collect();
        let chunks = pool.chunk_count();
        for handle in handles {
            pool.delete(handle).unwrap();
        }
        prop_assert_eq!(pool.live_count(), 0);

        for _ in 0..n {
            pool.allocate();
        }
        prop_assert_eq!(pool.chunk_count(), chunks);
        prop_assert_eq!(pool.live_count(), n);
    }
}
