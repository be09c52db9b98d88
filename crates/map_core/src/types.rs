//! Core value types shared by every map layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Terrain classification of a single grid cell.
///
/// Stored as one byte per cell; unknown bytes decode as [`TileType::Plain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TileType {
    #[default]
    Plain = 0,
    Mountain = 1,
    Water = 2,
    Forest = 3,
    Sand = 4,
}

impl TileType {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => TileType::Mountain,
            2 => TileType::Water,
            3 => TileType::Forest,
            4 => TileType::Sand,
            _ => TileType::Plain,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether an object may occupy a cell of this terrain.
    pub fn can_place_object(self) -> bool {
        self == TileType::Plain
    }

    /// Relative cost of crossing the tile; `u32::MAX` means impassable.
    pub fn movement_cost(self) -> u32 {
        match self {
            TileType::Plain => 1,
            TileType::Mountain => u32::MAX,
            TileType::Water => 3,
            TileType::Forest | TileType::Sand => 2,
        }
    }
}

/// Axis-aligned rectangle used as a query parameter.
///
/// Covers `[x, x + width) x [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MapArea {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl MapArea {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Builds an area from two opposite corners given in any order.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 as i64 - x1 as i64).unsigned_abs().min(i32::MAX as u64) as i32,
            height: (y2 as i64 - y1 as i64).unsigned_abs().min(i32::MAX as u64) as i32,
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        let (x, y) = (x as i64, y as i64);
        x >= self.x as i64
            && x < self.x as i64 + self.width as i64
            && y >= self.y as i64
            && y < self.y as i64 + self.height as i64
    }

    pub fn has_negative_size(&self) -> bool {
        self.width < 0 || self.height < 0
    }
}

/// A rectangular object positioned on the tile grid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MapObject {
    /// Unique key of the object.
    pub id: String,
    /// Left edge (inclusive).
    pub x: i32,
    /// Top edge (inclusive).
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Free-form classification: building, unit, resource, ...
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl MapObject {
    pub fn new(id: impl Into<String>, x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            width,
            height,
            ..Default::default()
        }
    }

    pub fn with_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = object_type.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn area(&self) -> MapArea {
        MapArea::new(self.x, self.y, self.width, self.height)
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.area().contains(x, y)
    }

    /// Half-open rectangle overlap test against `[x, x+width) x [y, y+height)`.
    pub fn intersects_area(&self, x: i32, y: i32, width: i32, height: i32) -> bool {
        let (ox, oy) = (self.x as i64, self.y as i64);
        let (ow, oh) = (self.width as i64, self.height as i64);
        let (x, y, w, h) = (x as i64, y as i64, width as i64, height as i64);
        !(ox + ow <= x || ox >= x + w || oy + oh <= y || oy >= y + h)
    }

    pub fn is_fully_within_area(&self, x: i32, y: i32, width: i32, height: i32) -> bool {
        let (ox, oy) = (self.x as i64, self.y as i64);
        let (ow, oh) = (self.width as i64, self.height as i64);
        let (x, y, w, h) = (x as i64, y as i64, width as i64, height as i64);
        ox >= x && oy >= y && ox + ow <= x + w && oy + oh <= y + h
    }

    /// Integer centroid used as the object's indexed position.
    ///
    /// Computed in `i64`, so it is exact for every `i32` position and size.
    pub fn center(&self) -> (i64, i64) {
        (
            self.x as i64 + self.width as i64 / 2,
            self.y as i64 + self.height as i64 / 2,
        )
    }
}

/// Metadata of one region of the partitioned grid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Region {
    pub id: u16,
    pub name: String,
    pub tile_count: usize,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_codes_round_trip() {
        for tile in [
            TileType::Plain,
            TileType::Mountain,
            TileType::Water,
            TileType::Forest,
            TileType::Sand,
        ] {
            assert_eq!(TileType::from_code(tile.code()), tile);
        }
        assert_eq!(TileType::from_code(200), TileType::Plain);
    }

    #[test]
    fn test_only_plain_is_placeable() {
        assert!(TileType::Plain.can_place_object());
        assert!(!TileType::Mountain.can_place_object());
        assert!(!TileType::Water.can_place_object());
        assert_eq!(TileType::Mountain.movement_cost(), u32::MAX);
        assert_eq!(TileType::Plain.movement_cost(), 1);
    }

    #[test]
    fn test_area_from_corners_normalizes() {
        let area = MapArea::from_corners(20, 5, 10, 15);
        assert_eq!(area, MapArea::new(10, 5, 10, 10));
        assert!(area.contains(10, 5));
        assert!(!area.contains(20, 5));
    }

    #[test]
    fn test_object_intersection_is_half_open() {
        let obj = MapObject::new("a", 10, 10, 5, 5);

        assert!(obj.intersects_area(12, 12, 10, 10));
        assert!(obj.intersects_area(14, 14, 1, 1));
        // touching edges do not overlap
        assert!(!obj.intersects_area(15, 10, 5, 5));
        assert!(!obj.intersects_area(10, 5, 5, 5));
        assert!(!obj.intersects_area(20, 20, 5, 5));
    }

    #[test]
    fn test_object_point_and_containment() {
        let obj = MapObject::new("a", 10, 20, 5, 5);

        assert!(obj.contains_point(10, 20));
        assert!(obj.contains_point(14, 24));
        assert!(!obj.contains_point(15, 24));
        assert!(obj.is_fully_within_area(8, 18, 10, 10));
        assert!(!obj.is_fully_within_area(12, 18, 10, 10));
        assert_eq!(obj.center(), (12, 22));
    }

    #[test]
    fn test_center_does_not_overflow() {
        let obj = MapObject::new("edge", i32::MAX - 1, i32::MAX, 10, i32::MAX);
        assert_eq!(obj.center(), (i32::MAX as i64 + 4, i32::MAX as i64 + (i32::MAX / 2) as i64));
    }

    #[test]
    fn test_object_serializes_type_field() {
        let obj = MapObject::new("tower", 1, 2, 3, 4)
            .with_type("Building")
            .with_metadata("owner", "guild");
        let json = serde_json::to_string(&obj).unwrap();
        assert!(json.contains("\"type\":\"Building\""));

        let back: MapObject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, obj);
    }
}
