//! Region partitioning of the tile grid.
//!
//! Each cell stores the numeric id (`1..=N`) of the region it belongs to in a
//! flat `u16` array; region metadata lives in a separate table keyed by id.
//! [`RegionLayer::generate_regions`] cuts the row-major cell stream into `N`
//! contiguous runs whose sizes differ by at most one tile.

use crate::error::{MapError, MapResult};
use crate::surface::clip;
use crate::types::{MapArea, Region};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Region id of a cell that has not been assigned yet.
pub const UNASSIGNED_REGION: u16 = 0;

/// Fixed per-region bookkeeping estimate used by [`RegionLayer::memory_usage`].
const REGION_OVERHEAD_BYTES: usize = 100;

#[derive(Debug, Clone)]
pub struct RegionLayer {
    region_ids: Vec<u16>,
    regions: BTreeMap<u16, Region>,
    width: u32,
    height: u32,
}

impl RegionLayer {
    /// Creates a grid with every cell unassigned. Zero dimensions are rejected.
    pub fn new(width: u32, height: u32) -> MapResult<Self> {
        if width == 0 || height == 0 {
            return Err(MapError::InvalidArgument(format!(
                "Map dimensions must be positive, got {}x{}",
                width, height
            )));
        }

        Ok(Self {
            region_ids: vec![UNASSIGNED_REGION; width as usize * height as usize],
            regions: BTreeMap::new(),
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn regions(&self) -> &BTreeMap<u16, Region> {
        &self.regions
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn is_in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    fn index(&self, x: i32, y: i32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Clears previous state and partitions the grid into `count` balanced regions.
    ///
    /// The assignment depends only on the grid size and `count`: cells are taken
    /// in row-major order and the first `total % count` regions receive one extra
    /// tile. `seed` is accepted for API stability and recorded in the logs; it
    /// does not influence the layout, so repeated calls are reproducible.
    ///
    /// # Arguments
    ///
    /// * `count` - Number of regions, ids `1..=count`
    /// * `seed` - Logged only
    ///
    /// # Errors
    ///
    /// [`MapError::InvalidArgument`] when `count` is zero or exceeds `u16::MAX`.
    ///
    /// # Examples
    ///
    /// ```
    /// use map_core::RegionLayer;
    ///
    /// let mut regions = RegionLayer::new(10, 10)?;
    /// regions.generate_regions(3, None)?;
    ///
    /// assert_eq!(regions.region_count(), 3);
    /// assert_eq!(regions.get_region_id(0, 0)?, 1);
    /// assert_eq!(regions.get_region_id(9, 9)?, 3);
    /// # Ok::<(), map_core::MapError>(())
    /// ```
    pub fn generate_regions(&mut self, count: usize, seed: Option<u64>) -> MapResult<()> {
        if count == 0 {
            return Err(MapError::InvalidArgument(
                "Region count must be positive".to_string(),
            ));
        }
        if count > u16::MAX as usize {
            return Err(MapError::InvalidArgument(format!(
                "Region count {} exceeds the maximum of {}",
                count,
                u16::MAX
            )));
        }

        self.regions.clear();
        self.region_ids.fill(UNASSIGNED_REGION);

        let total = self.region_ids.len();
        let base = total / count;
        let extra = total % count;

        let mut start = 0;
        for index in 0..count {
            let id = (index + 1) as u16;
            let quota = base + usize::from(index < extra);
            self.region_ids[start..start + quota].fill(id);
            start += quota;

            self.regions.insert(
                id,
                Region {
                    id,
                    name: format!("Region {}", id),
                    tile_count: quota,
                    ..Default::default()
                },
            );
        }
        debug_assert_eq!(start, total);

        info!(
            "🗺️ Generated {} regions over {}x{} tiles (seed: {:?})",
            count, self.width, self.height, seed
        );
        Ok(())
    }

    /// Region owning the cell, or `0` if regions have not been generated.
    ///
    /// Fails with [`MapError::OutOfRange`] outside the grid; see
    /// [`RegionLayer::get_region_id_safe`] for a non-failing variant.
    pub fn get_region_id(&self, x: i32, y: i32) -> MapResult<u16> {
        if !self.is_in_bounds(x, y) {
            return Err(MapError::out_of_range(x, y, self.width, self.height));
        }
        Ok(self.region_ids[self.index(x, y)])
    }

    /// Returns `default` for coordinates outside the grid.
    pub fn get_region_id_safe(&self, x: i32, y: i32, default: u16) -> u16 {
        if self.is_in_bounds(x, y) {
            self.region_ids[self.index(x, y)]
        } else {
            default
        }
    }

    pub fn region(&self, id: u16) -> Option<&Region> {
        self.regions.get(&id)
    }

    pub fn tile_belongs_to_region(&self, x: i32, y: i32, id: u16) -> bool {
        self.is_in_bounds(x, y) && self.region_ids[self.index(x, y)] == id
    }

    /// Distinct region ids whose tiles intersect the (clipped) rectangle.
    pub fn get_regions_in_area(&self, area: MapArea) -> BTreeSet<u16> {
        let mut ids = BTreeSet::new();
        let Some((x1, y1, x2, y2)) =
            clip(area.x, area.y, area.width, area.height, self.width, self.height)
        else {
            return ids;
        };

        let row_len = self.width as usize;
        for cy in y1..y2 {
            let row_start = cy * row_len;
            ids.extend(&self.region_ids[row_start + x1..row_start + x2]);
        }
        ids
    }

    /// Region metadata for every region intersecting the rectangle.
    ///
    /// Ids without a metadata record (e.g. unassigned cells) are dropped.
    pub fn get_region_metadata_in_area(&self, area: MapArea) -> Vec<Region> {
        self.get_regions_in_area(area)
            .into_iter()
            .filter_map(|id| self.regions.get(&id).cloned())
            .collect()
    }

    /// Renames a region; unknown ids are ignored.
    pub fn set_region_name(&mut self, id: u16, name: impl Into<String>) {
        if let Some(region) = self.regions.get_mut(&id) {
            region.name = name.into();
        } else {
            debug!("Ignoring rename of unknown region {}", id);
        }
    }

    pub fn set_region_description(&mut self, id: u16, description: impl Into<String>) {
        if let Some(region) = self.regions.get_mut(&id) {
            region.description = description.into();
        }
    }

    /// Estimated footprint in bytes, for capacity planning only.
    pub fn memory_usage(&self) -> usize {
        self.region_ids.len() * std::mem::size_of::<u16>()
            + self.regions.len() * REGION_OVERHEAD_BYTES
    }
}
