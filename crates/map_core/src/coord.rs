//! Mapping between grid cells and the geo space of the radius index.
//!
//! Cell `(x, y)` projects linearly to `(lon, lat) = (x * SCALE_FACTOR, y * SCALE_FACTOR)`
//! degrees. One tile is 0.0001° (roughly 11 m at the equator), small enough to
//! keep every cell distinct in a geohash-backed index.

use crate::error::{MapError, MapResult};
use serde::{Deserialize, Serialize};

pub const BASE_LONGITUDE: f64 = 0.0;
pub const BASE_LATITUDE: f64 = 0.0;

/// Degrees per tile along both axes.
pub const SCALE_FACTOR: f64 = 0.0001;

/// Meters per degree used to express search radii.
///
/// Larger than the great-circle length of one degree on the index's earth model,
/// so radii computed with it never undershoot.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Headroom applied to every search radius to absorb rounding.
pub const SEARCH_RADIUS_MARGIN: f64 = 1.1;

pub const MAX_LONGITUDE: f64 = 180.0;

/// Highest latitude accepted by geohash-backed indexes.
pub const MAX_LATITUDE: f64 = 85.051_128_78;

/// A point in geo space, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateMapper {
    width: u32,
    height: u32,
}

impl CoordinateMapper {
    pub fn new(width: u32, height: u32) -> MapResult<Self> {
        if width == 0 || height == 0 {
            return Err(MapError::InvalidArgument(format!(
                "Map dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        if BASE_LONGITUDE + width as f64 * SCALE_FACTOR > MAX_LONGITUDE {
            return Err(MapError::InvalidArgument(format!(
                "Map width {} does not fit below longitude {}",
                width, MAX_LONGITUDE
            )));
        }
        if BASE_LATITUDE + height as f64 * SCALE_FACTOR > MAX_LATITUDE {
            return Err(MapError::InvalidArgument(format!(
                "Map height {} does not fit below latitude {}",
                height, MAX_LATITUDE
            )));
        }

        Ok(Self { width, height })
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

    /// Projects a grid cell into geo space.
    pub fn to_geo(&self, x: i32, y: i32) -> MapResult<GeoPoint> {
        if !self.is_in_bounds(x, y) {
            return Err(MapError::out_of_range(x, y, self.width, self.height));
        }
        Ok(self.project(x as f64, y as f64))
    }

    /// Unchecked projection of fractional grid coordinates.
    ///
    /// Used for query centres, which may fall between cells or off the grid.
    pub fn project(&self, x: f64, y: f64) -> GeoPoint {
        GeoPoint {
            lon: BASE_LONGITUDE + x * SCALE_FACTOR,
            lat: BASE_LATITUDE + y * SCALE_FACTOR,
        }
    }

    /// Inverse of [`to_geo`](Self::to_geo), rounded to the nearest cell and
    /// clamped into the grid. Never fails.
    pub fn from_geo(&self, point: GeoPoint) -> (i32, i32) {
        let x = ((point.lon - BASE_LONGITUDE) / SCALE_FACTOR).round();
        let y = ((point.lat - BASE_LATITUDE) / SCALE_FACTOR).round();

        // `as` saturates and maps NaN to zero
        let x = (x as i64).clamp(0, self.width as i64 - 1);
        let y = (y as i64).clamp(0, self.height as i64 - 1);
        (x as i32, y as i32)
    }

    /// Radius in meters of a circle enclosing a `width x height` rectangle when
    /// centred on it: the half-diagonal plus [`SEARCH_RADIUS_MARGIN`].
    pub fn search_radius(&self, width: i32, height: i32) -> MapResult<f64> {
        if width < 0 || height < 0 {
            return Err(MapError::InvalidArgument(format!(
                "Area dimensions must be non-negative, got {}x{}",
                width, height
            )));
        }
        Ok(Self::half_diagonal_meters(width as f64, height as f64) * SEARCH_RADIUS_MARGIN)
    }

    /// Exact half-diagonal of a `width x height` tile rectangle, in meters.
    pub fn half_diagonal_meters(width: f64, height: f64) -> f64 {
        let width_degrees = width * SCALE_FACTOR;
        let height_degrees = height * SCALE_FACTOR;
        let diagonal_degrees = width_degrees.hypot(height_degrees);
        diagonal_degrees * METERS_PER_DEGREE / 2.0
    }

    /// Geo position of the integer centre cell of an area.
    ///
    /// # Errors
    ///
    /// [`MapError::OutOfRange`] when the centre cell lies outside the grid,
    /// including centres beyond the `i32` range.
    pub fn area_center(&self, x: i32, y: i32, width: i32, height: i32) -> MapResult<GeoPoint> {
        let cx = x as i64 + width as i64 / 2;
        let cy = y as i64 + height as i64 / 2;
        self.to_geo_wide(cx, cy)
    }

    /// [`to_geo`](Self::to_geo) for centres computed in `i64`.
    pub fn to_geo_wide(&self, x: i64, y: i64) -> MapResult<GeoPoint> {
        match (i32::try_from(x), i32::try_from(y)) {
            (Ok(x), Ok(y)) => self.to_geo(x, y),
            _ => Err(MapError::out_of_range(x, y, self.width, self.height)),
        }
    }
}
