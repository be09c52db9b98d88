//! R-tree backed geo radius index.
//!
//! Members are stored at a single `(lon, lat)` point each in an [`RTree`].
//! Radius queries first collect the points inside a conservative degree
//! envelope and then apply the exact great-circle distance, so results match a
//! geohash index up to float noise.

use crate::coord::{GeoPoint, MAX_LATITUDE, MAX_LONGITUDE};
use crate::error::{BackendError, BackendResult};
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use std::collections::HashMap;

/// Earth radius used by the distance model, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_372_797.560_856;

/// Indexed `[lon, lat]` point tagged with its member name.
type IndexedPoint = GeomWithData<[f64; 2], String>;

/// Great-circle distance between two points, in meters.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let u = ((lat2 - lat1) / 2.0).sin();
    let v = ((b.lon - a.lon).to_radians() / 2.0).sin();
    let h = (u * u + lat1.cos() * lat2.cos() * v * v).min(1.0);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Degree envelope enclosing every point within `radius` meters of `center`.
///
/// Falls back to the full longitude range near the poles and when the circle
/// crosses the antimeridian.
fn envelope_around(center: GeoPoint, radius: f64) -> AABB<[f64; 2]> {
    let lat_delta = (radius / EARTH_RADIUS_METERS).to_degrees();
    let min_lat = center.lat - lat_delta;
    let max_lat = center.lat + lat_delta;

    let widest_lat = min_lat.abs().max(max_lat.abs());
    let (min_lon, max_lon) = if widest_lat >= 89.0 || lat_delta >= 90.0 {
        (-MAX_LONGITUDE, MAX_LONGITUDE)
    } else {
        let lon_delta = lat_delta / widest_lat.to_radians().cos();
        let (min_lon, max_lon) = (center.lon - lon_delta, center.lon + lon_delta);
        if min_lon < -MAX_LONGITUDE || max_lon > MAX_LONGITUDE {
            (-MAX_LONGITUDE, MAX_LONGITUDE)
        } else {
            (min_lon, max_lon)
        }
    };

    AABB::from_corners([min_lon, min_lat], [max_lon, max_lat])
}

/// Point index answering "members within R meters of P".
///
/// `positions` mirrors the tree so a member can be relocated or removed
/// without a search.
#[derive(Debug, Default)]
pub struct GeoIndex {
    tree: RTree<IndexedPoint>,
    positions: HashMap<String, GeoPoint>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(point: GeoPoint) -> BackendResult<()> {
        let valid = point.lon.is_finite()
            && point.lat.is_finite()
            && point.lon.abs() <= MAX_LONGITUDE
            && point.lat.abs() <= MAX_LATITUDE;
        if valid {
            Ok(())
        } else {
            Err(BackendError::InvalidCoordinate {
                lon: point.lon,
                lat: point.lat,
            })
        }
    }

    /// Inserts or relocates `member`. Returns `true` if it was not indexed before.
    pub fn insert(&mut self, member: &str, point: GeoPoint) -> BackendResult<bool> {
        Self::validate(point)?;

        let is_new = match self.positions.insert(member.to_string(), point) {
            Some(previous) => {
                self.tree
                    .remove(&GeomWithData::new([previous.lon, previous.lat], member.to_string()));
                false
            }
            None => true,
        };
        self.tree
            .insert(GeomWithData::new([point.lon, point.lat], member.to_string()));
        Ok(is_new)
    }

    /// Returns `true` if the member was indexed.
    pub fn remove(&mut self, member: &str) -> bool {
        match self.positions.remove(member) {
            Some(point) => self
                .tree
                .remove(&GeomWithData::new([point.lon, point.lat], member.to_string()))
                .is_some(),
            None => false,
        }
    }

    pub fn position(&self, member: &str) -> Option<GeoPoint> {
        self.positions.get(member).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Members within `radius_meters` of `center`, nearest first.
    ///
    /// A negative or NaN radius matches nothing. Ties are ordered by member name.
    pub fn query_radius(&self, center: GeoPoint, radius_meters: f64) -> BackendResult<Vec<(String, f64)>> {
        Self::validate(center)?;
        if radius_meters.is_nan() || radius_meters < 0.0 {
            return Ok(Vec::new());
        }

        let envelope = envelope_around(center, radius_meters);
        let mut hits: Vec<(String, f64)> = self
            .tree
            .locate_in_envelope(&envelope)
            .filter_map(|entry| {
                let [lon, lat] = *entry.geom();
                let distance = haversine_distance(center, GeoPoint::new(lon, lat));
                (distance <= radius_meters).then(|| (entry.data.clone(), distance))
            })
            .collect();

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(x: f64, y: f64) -> GeoPoint {
        GeoPoint::new(x * 0.0001, y * 0.0001)
    }

    #[test]
    fn test_haversine_matches_known_distance() {
        // one degree of latitude on this earth model
        let d = haversine_distance(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0));
        assert!((d - 111_226.29).abs() < 0.1, "got {d}");
        assert_eq!(haversine_distance(tile(3.0, 4.0), tile(3.0, 4.0)), 0.0);
    }

    #[test]
    fn test_query_returns_members_within_radius_sorted() {
        let mut index = GeoIndex::new();
        index.insert("near", tile(10.0, 10.0)).unwrap();
        index.insert("mid", tile(13.0, 10.0)).unwrap();
        index.insert("far", tile(500.0, 500.0)).unwrap();

        let hits = index.query_radius(tile(10.0, 10.0), 50.0).unwrap();
        let members: Vec<&str> = hits.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["near", "mid"]);
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn test_insert_relocates_existing_member() {
        let mut index = GeoIndex::new();
        assert!(index.insert("a", tile(1.0, 1.0)).unwrap());
        assert!(!index.insert("a", tile(900.0, 900.0)).unwrap());
        assert_eq!(index.len(), 1);
        assert_eq!(index.tree.size(), 1);

        assert!(index.query_radius(tile(1.0, 1.0), 20.0).unwrap().is_empty());
        assert_eq!(index.query_radius(tile(900.0, 900.0), 20.0).unwrap().len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut index = GeoIndex::new();
        index.insert("a", tile(1.0, 1.0)).unwrap();
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
        assert!(index.is_empty());
        assert_eq!(index.tree.size(), 0);
        assert!(index.query_radius(tile(1.0, 1.0), 1_000.0).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_invalid_coordinates() {
        let mut index = GeoIndex::new();
        for point in [
            GeoPoint::new(181.0, 0.0),
            GeoPoint::new(0.0, 86.0),
            GeoPoint::new(f64::NAN, 0.0),
        ] {
            assert!(matches!(
                index.insert("bad", point),
                Err(BackendError::InvalidCoordinate { .. })
            ));
        }
        assert!(index.is_empty());
    }

    #[test]
    fn test_dense_grid_is_fully_reachable() {
        let mut index = GeoIndex::new();
        for y in 0..40 {
            for x in 0..40 {
                index.insert(&format!("{x}:{y}"), tile(x as f64, y as f64)).unwrap();
            }
        }

        // radius covering the whole 40x40 block from its centre
        let hits = index.query_radius(tile(20.0, 20.0), 400.0).unwrap();
        assert_eq!(hits.len(), 1600);

        for y in (0..40).step_by(7) {
            for x in (0..40).step_by(5) {
                let hits = index.query_radius(tile(x as f64, y as f64), 1.0).unwrap();
                assert_eq!(hits.len(), 1);
                assert_eq!(hits[0].0, format!("{x}:{y}"));
            }
        }
    }

    #[test]
    fn test_many_members_at_one_point() {
        let mut index = GeoIndex::new();
        for i in 0..100 {
            index.insert(&format!("m{i}"), tile(5.0, 5.0)).unwrap();
        }
        assert_eq!(index.query_radius(tile(5.0, 5.0), 0.0).unwrap().len(), 100);

        // removing one co-located member leaves the others
        assert!(index.remove("m42"));
        assert_eq!(index.query_radius(tile(5.0, 5.0), 0.0).unwrap().len(), 99);
    }

    #[test]
    fn test_envelope_widens_near_antimeridian() {
        let mut index = GeoIndex::new();
        index.insert("east", GeoPoint::new(179.9999, 0.0)).unwrap();
        index.insert("west", GeoPoint::new(-179.9999, 0.0)).unwrap();

        let hits = index.query_radius(GeoPoint::new(179.9999, 0.0), 100.0).unwrap();
        let members: Vec<&str> = hits.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["east", "west"]);
    }
}
