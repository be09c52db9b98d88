//! Terrain surface: a fixed-size grid of tile codes.
//!
//! Tiles live in a flat byte array addressed by `y * width + x`. The strict
//! accessors fail with [`MapError::OutOfRange`]; the `_safe` accessor and the
//! area fill clip silently instead.

use crate::error::{MapError, MapResult};
use crate::types::{MapArea, TileType};

#[derive(Debug, Clone)]
pub struct SurfaceLayer {
    tiles: Vec<u8>,
    width: u32,
    height: u32,
}

impl SurfaceLayer {
    /// Creates a surface of `width x height` plain tiles.
    pub fn new(width: u32, height: u32) -> MapResult<Self> {
        if width == 0 || height == 0 {
            return Err(MapError::InvalidArgument(format!(
                "Map dimensions must be positive, got {}x{}",
                width, height
            )));
        }

        Ok(Self {
            tiles: vec![TileType::Plain.code(); width as usize * height as usize],
            width,
            height,
        })
    }

    /// Builds a surface from a row-major tile stream.
    ///
    /// Tiles beyond `width * height` are ignored; missing tiles stay plain.
    pub fn from_tiles<I>(width: u32, height: u32, tiles: I) -> MapResult<Self>
    where
        I: IntoIterator<Item = TileType>,
    {
        let mut layer = Self::new(width, height)?;
        for (slot, tile) in layer.tiles.iter_mut().zip(tiles) {
            *slot = tile.code();
        }
        Ok(layer)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    fn index(&self, x: i32, y: i32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    fn check_bounds(&self, x: i32, y: i32) -> MapResult<usize> {
        if self.is_in_bounds(x, y) {
            Ok(self.index(x, y))
        } else {
            Err(MapError::out_of_range(x, y, self.width, self.height))
        }
    }

    pub fn get_tile(&self, x: i32, y: i32) -> MapResult<TileType> {
        let index = self.check_bounds(x, y)?;
        Ok(TileType::from_code(self.tiles[index]))
    }

    /// Returns `default` for coordinates outside the grid.
    pub fn get_tile_safe(&self, x: i32, y: i32, default: TileType) -> TileType {
        if self.is_in_bounds(x, y) {
            TileType::from_code(self.tiles[self.index(x, y)])
        } else {
            default
        }
    }

    pub fn set_tile(&mut self, x: i32, y: i32, tile: TileType) -> MapResult<()> {
        let index = self.check_bounds(x, y)?;
        self.tiles[index] = tile.code();
        Ok(())
    }

    /// Fills a rectangle, clipped to the map. Never fails.
    pub fn fill_area(&mut self, x: i32, y: i32, width: i32, height: i32, tile: TileType) {
        let Some((x1, y1, x2, y2)) = clip(x, y, width, height, self.width, self.height) else {
            return;
        };

        let code = tile.code();
        let row_len = self.width as usize;
        for cy in y1..y2 {
            let row_start = cy * row_len;
            self.tiles[row_start + x1..row_start + x2].fill(code);
        }
    }

    pub fn fill_area_rect(&mut self, area: MapArea, tile: TileType) {
        self.fill_area(area.x, area.y, area.width, area.height, tile);
    }

    /// True when the whole rectangle is inside the map and every cell is placeable.
    pub fn can_place_object_in_area(&self, x: i32, y: i32, width: i32, height: i32) -> bool {
        let (x, y, w, h) = (x as i64, y as i64, width as i64, height as i64);
        if x < 0 || y < 0 || w < 0 || h < 0 {
            return false;
        }
        if x + w > self.width as i64 || y + h > self.height as i64 {
            return false;
        }

        let row_len = self.width as usize;
        (y as usize..(y + h) as usize).all(|cy| {
            let row_start = cy * row_len;
            self.tiles[row_start + x as usize..row_start + (x + w) as usize]
                .iter()
                .all(|&code| TileType::from_code(code).can_place_object())
        })
    }

    pub fn can_place_object_in(&self, area: MapArea) -> bool {
        self.can_place_object_in_area(area.x, area.y, area.width, area.height)
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        self.tiles.len() + std::mem::size_of::<Self>()
    }
}

/// Clips `[x, x+width) x [y, y+height)` to the grid, returning `(x1, y1, x2, y2)`
/// as array indices, or `None` when nothing remains.
pub(crate) fn clip(
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    grid_width: u32,
    grid_height: u32,
) -> Option<(usize, usize, usize, usize)> {
    let x1 = (x as i64).max(0);
    let y1 = (y as i64).max(0);
    let x2 = (x as i64 + width as i64).min(grid_width as i64);
    let y2 = (y as i64 + height as i64).min(grid_height as i64);

    if x1 >= x2 || y1 >= y2 {
        return None;
    }
    Some((x1 as usize, y1 as usize, x2 as usize, y2 as usize))
}
