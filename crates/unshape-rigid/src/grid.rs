//! Grid broad phase.
//!
//! [`GridRegionManager`] cuts a fixed box of space into cubic cells, each
//! owning one [`PhysicsRegion`]. Objects are filed in every cell their bounds
//! touch; infinite planes are filed in every cell the plane passes through.

use glam::Vec3;

use crate::config::GridConfig;
use crate::debug::DebugRenderer;
use crate::error::ConfigError;
use crate::geom::{Aabb, PlaneSide};
use crate::object::{BroadBounds, ObjectId};
use crate::region::{Activity, PhysicsRegion, RegionId, RegionSet};
use crate::shape::ShapeType;

/// What an object registers with the region manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BroadEntry {
    /// Object handle.
    pub id: ObjectId,
    /// Shape bucket.
    pub shape: ShapeType,
    /// Activity bucket.
    pub activity: Activity,
    /// Extent in world space.
    pub bounds: BroadBounds,
}

/// Result of reconciling one object's regions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionDelta {
    /// Regions newly entered.
    pub added: Vec<RegionId>,
    /// Regions vacated.
    pub removed: Vec<RegionId>,
    /// Whether the object now overlaps no region at all.
    pub orphaned: bool,
}

impl RegionDelta {
    /// Whether membership did not change.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Assigns objects to spatial regions.
pub trait RegionManager {
    /// Files a new object. Returns the regions it now belongs to.
    fn on_object_added(&mut self, entry: &BroadEntry) -> RegionSet;

    /// Re-files a moved object, updating `regions` in place.
    fn on_object_update(&mut self, entry: &BroadEntry, regions: &mut RegionSet) -> RegionDelta;

    /// Unfiles an object from every region in `regions`.
    fn on_object_removed(&mut self, id: ObjectId, regions: &RegionSet);

    /// Region containing `point`, clamped to the managed volume.
    fn get_region(&self, point: Vec3) -> RegionId;

    /// Regions the segment `from → to` passes through.
    fn get_regions_on_ray(&self, from: Vec3, to: Vec3) -> RegionSet;

    /// Looks up a region.
    fn region(&self, id: RegionId) -> Option<&PhysicsRegion>;
}

/// Uniform grid of regions.
#[derive(Debug, Clone)]
pub struct GridRegionManager {
    origin: Vec3,
    cell_size: f32,
    dims: [u32; 3],
    regions: Vec<PhysicsRegion>,
}

type CellRange = ([u32; 3], [u32; 3]);

impl GridRegionManager {
    /// Builds an empty grid.
    pub fn new(config: &GridConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let [nx, ny, nz] = config.cells;
        let mut regions = Vec::with_capacity((nx * ny * nz) as usize);
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let min = config.origin
                        + Vec3::new(x as f32, y as f32, z as f32) * config.cell_size;
                    let id = RegionId(regions.len() as u32);
                    regions.push(PhysicsRegion::new(
                        id,
                        Aabb::new(min, min + Vec3::splat(config.cell_size)),
                    ));
                }
            }
        }
        tracing::debug!(cells = regions.len(), "grid region manager created");
        Ok(Self {
            origin: config.origin,
            cell_size: config.cell_size,
            dims: config.cells,
            regions,
        })
    }

    /// Cell counts per axis.
    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    /// Every region, in index order.
    pub fn regions(&self) -> &[PhysicsRegion] {
        &self.regions
    }

    /// Bounds of the whole grid.
    pub fn bounds(&self) -> Aabb {
        let [x, y, z] = self.dims;
        Aabb::new(
            self.origin,
            self.origin + Vec3::new(x as f32, y as f32, z as f32) * self.cell_size,
        )
    }

    fn index(&self, [x, y, z]: [u32; 3]) -> RegionId {
        let [nx, ny, _] = self.dims;
        RegionId(x + nx * (y + ny * z))
    }

    fn clamped_cell(&self, point: Vec3) -> [u32; 3] {
        let rel = (point - self.origin) / self.cell_size;
        let clamp = |v: f32, n: u32| (v.floor().max(0.0) as u32).min(n - 1);
        [
            clamp(rel.x, self.dims[0]),
            clamp(rel.y, self.dims[1]),
            clamp(rel.z, self.dims[2]),
        ]
    }

    /// Cells overlapped by `aabb`, or `None` if it lies outside the grid.
    fn cell_range(&self, aabb: &Aabb) -> Option<CellRange> {
        if !self.bounds().intersects(aabb) {
            return None;
        }
        Some((self.clamped_cell(aabb.min), self.clamped_cell(aabb.max)))
    }

    fn cells_in(range: CellRange) -> impl Iterator<Item = [u32; 3]> {
        let (lo, hi) = range;
        (lo[2]..=hi[2]).flat_map(move |z| {
            (lo[1]..=hi[1]).flat_map(move |y| (lo[0]..=hi[0]).map(move |x| [x, y, z]))
        })
    }

    /// Regions an object with `bounds` belongs to.
    pub fn regions_for(&self, bounds: &BroadBounds) -> RegionSet {
        match bounds {
            BroadBounds::Finite(aabb) => match self.cell_range(aabb) {
                Some(range) => Self::cells_in(range)
                    .map(|cell| self.index(cell))
                    .filter(|id| self.regions[id.0 as usize].bounds().intersects(aabb))
                    .collect(),
                None => RegionSet::new(),
            },
            BroadBounds::Plane(plane) => self
                .regions
                .iter()
                .filter(|r| plane.classify_aabb(r.bounds()) == PlaneSide::Straddling)
                .map(PhysicsRegion::id)
                .collect(),
        }
    }

    fn region_mut(&mut self, id: RegionId) -> Option<&mut PhysicsRegion> {
        self.regions.get_mut(id.0 as usize)
    }

    /// Moves an object between activity buckets in every region it occupies.
    pub fn set_activity(&mut self, entry: &BroadEntry, regions: &RegionSet) {
        for id in regions.iter() {
            if let Some(region) = self.region_mut(id) {
                region.set_activity(entry.id, entry.shape, entry.activity);
            }
        }
    }

    /// Every object sharing at least one region with `regions`, excluding
    /// static ones when `skip_static` is set. Sorted and deduplicated.
    pub fn neighbours(&self, regions: &RegionSet, skip_static: bool) -> Vec<ObjectId> {
        let mut out = Vec::new();
        for id in regions.iter() {
            let Some(region) = self.region(id) else {
                continue;
            };
            for activity in Activity::ALL {
                if skip_static && activity == Activity::Static {
                    continue;
                }
                out.extend(region.objects_with_activity(activity));
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Draws every non-empty region.
    pub fn debug_draw(&self, renderer: &mut dyn DebugRenderer) {
        for region in self.regions.iter().filter(|r| !r.is_empty()) {
            region.debug_draw(renderer);
        }
    }
}

impl RegionManager for GridRegionManager {
    fn on_object_added(&mut self, entry: &BroadEntry) -> RegionSet {
        let regions = self.regions_for(&entry.bounds);
        for id in regions.iter() {
            if let Some(region) = self.region_mut(id) {
                region.take_ownership(entry.id, entry.shape, entry.activity);
            }
        }
        regions
    }

    fn on_object_update(&mut self, entry: &BroadEntry, regions: &mut RegionSet) -> RegionDelta {
        let next = self.regions_for(&entry.bounds);
        let added: Vec<_> = next.difference(regions).collect();
        let removed: Vec<_> = regions.difference(&next).collect();

        for &id in &added {
            if let Some(region) = self.region_mut(id) {
                region.take_ownership(entry.id, entry.shape, entry.activity);
            }
        }
        for &id in &removed {
            if let Some(region) = self.region_mut(id) {
                region.disown(entry.id);
            }
        }

        let orphaned = next.is_empty();
        *regions = next;
        RegionDelta {
            added,
            removed,
            orphaned,
        }
    }

    fn on_object_removed(&mut self, id: ObjectId, regions: &RegionSet) {
        for region_id in regions.iter() {
            if let Some(region) = self.region_mut(region_id) {
                region.disown(id);
            }
        }
    }

    fn get_region(&self, point: Vec3) -> RegionId {
        self.index(self.clamped_cell(point))
    }

    fn get_regions_on_ray(&self, from: Vec3, to: Vec3) -> RegionSet {
        let segment = Aabb::new(from.min(to), from.max(to));
        let Some(range) = self.cell_range(&segment) else {
            return RegionSet::new();
        };
        Self::cells_in(range)
            .map(|cell| self.index(cell))
            .filter(|id| {
                self.regions[id.0 as usize]
                    .bounds()
                    .intersect_segment(from, to)
                    .is_some()
            })
            .collect()
    }

    fn region(&self, id: RegionId) -> Option<&PhysicsRegion> {
        self.regions.get(id.0 as usize)
    }
}
