//! Persistent object repository on top of a [`MapBackend`].
//!
//! Objects are indexed by their integer centroid in the backend's geo index.
//! Rectangle and point queries run in two phases: a radius search around the
//! query centre returns candidate ids, then the full records are fetched and
//! filtered by exact rectangle arithmetic.
//!
//! Every write records the largest object width and height seen so far. Query
//! radii are padded by that extent, so an object overlapping the query is
//! returned even when its centroid lies far outside the query rectangle.

use crate::backend::{Condition, DistanceUnit, MapBackend, Op, Transaction};
use crate::coord::{CoordinateMapper, GeoPoint, SEARCH_RADIUS_MARGIN};
use crate::error::{BackendError, MapError, MapResult, StorageError};
use crate::types::MapObject;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, error, instrument};

pub const GEO_KEY: &str = "map:objects:geo";
pub const ALL_IDS_KEY: &str = "map:objects:all";
pub const EXTENT_WIDTH_KEY: &str = "map:objects:extent:w";
pub const EXTENT_HEIGHT_KEY: &str = "map:objects:extent:h";
const RECORD_PREFIX: &str = "map:object:";

/// Tile span of the neighbourhood searched by point queries.
const POINT_QUERY_SPAN: i64 = 2;

pub fn record_key(id: &str) -> String {
    format!("{}{}", RECORD_PREFIX, id)
}

/// Storage contract for positioned objects.
///
/// Validation failures are reported before any I/O; backend failures surface
/// as [`MapError::Storage`].
#[async_trait]
pub trait MapObjectRepository: Send + Sync {
    /// Stores a new object together with its geo index entry.
    ///
    /// # Arguments
    ///
    /// * `object` - Object to store; its id must be non-empty and its centre
    ///   must lie on the grid
    ///
    /// # Returns
    ///
    /// `true` if the object was stored, `false` when the id is already taken.
    /// The existing object is left untouched in that case.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use map_core::{BackendObjectRepository, CoordinateMapper, InMemoryBackend, MapObject, MapObjectRepository};
    /// use std::sync::Arc;
    ///
    /// # async fn demo() -> map_core::MapResult<()> {
    /// let mapper = CoordinateMapper::new(100, 100)?;
    /// let repository = BackendObjectRepository::new(Arc::new(InMemoryBackend::new()), mapper);
    ///
    /// assert!(repository.add(&MapObject::new("tower", 10, 10, 2, 2)).await?);
    /// assert!(!repository.add(&MapObject::new("tower", 50, 50, 2, 2)).await?);
    /// # Ok(())
    /// # }
    /// ```
    async fn add(&self, object: &MapObject) -> MapResult<bool>;

    async fn get_by_id(&self, id: &str) -> MapResult<Option<MapObject>>;

    /// Deletes the object. Missing ids still report `true`.
    async fn remove(&self, id: &str) -> MapResult<bool>;

    /// Deletes the object only if it is stored, as one conditional write.
    ///
    /// # Returns
    ///
    /// `true` when this call deleted the record, `false` when it was already
    /// gone. Of several concurrent calls for one id, at most one returns `true`.
    async fn remove_existing(&self, id: &str) -> MapResult<bool>;

    /// Objects whose rectangle contains the cell `(x, y)`.
    async fn get_by_coordinates(&self, x: i32, y: i32) -> MapResult<Vec<MapObject>>;

    /// Objects whose rectangle intersects `[x, x+width) x [y, y+height)`.
    ///
    /// # Arguments
    ///
    /// * `x`, `y` - Top-left cell of the query rectangle; may lie off the grid
    /// * `width`, `height` - Size in tiles; zero matches nothing
    ///
    /// # Returns
    ///
    /// Every stored object overlapping the rectangle, each exactly once, in no
    /// particular order.
    ///
    /// # Errors
    ///
    /// [`MapError::InvalidArgument`] for a negative size, before any I/O.
    async fn get_in_area(&self, x: i32, y: i32, width: i32, height: i32) -> MapResult<Vec<MapObject>>;

    async fn exists(&self, id: &str) -> MapResult<bool>;

    /// Rewrites and relocates an existing object. Returns `false` when the id
    /// does not exist.
    async fn update(&self, object: &MapObject) -> MapResult<bool>;

    async fn count(&self) -> MapResult<u64>;

    async fn clear(&self) -> MapResult<()>;
}

/// [`MapObjectRepository`] storing JSON records in a [`MapBackend`].
#[derive(Debug, Clone)]
pub struct BackendObjectRepository {
    backend: Arc<dyn MapBackend>,
    mapper: CoordinateMapper,
}

impl BackendObjectRepository {
    pub fn new(backend: Arc<dyn MapBackend>, mapper: CoordinateMapper) -> Self {
        Self { backend, mapper }
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    fn backend_failure(operation: &str, source: BackendError) -> MapError {
        error!("❌ Backend operation '{}' failed: {}", operation, source);
        MapError::Storage(StorageError::backend(operation, source))
    }

    fn validate_id(id: &str) -> MapResult<()> {
        if id.is_empty() {
            return Err(MapError::InvalidArgument("Object id must not be empty".to_string()));
        }
        Ok(())
    }

    fn validate_object(&self, object: &MapObject) -> MapResult<GeoPoint> {
        Self::validate_id(&object.id)?;
        if object.width < 0 || object.height < 0 {
            return Err(MapError::InvalidArgument(format!(
                "Object {} has negative size {}x{}",
                object.id, object.width, object.height
            )));
        }

        let (cx, cy) = object.center();
        self.mapper.to_geo_wide(cx, cy)
    }

    /// Ops shared by add and update: index, record, id set, extents.
    fn write_ops(object: &MapObject, point: GeoPoint) -> MapResult<Vec<Op>> {
        let value = serde_json::to_vec(object).map_err(|source| StorageError::Serialization {
            id: object.id.clone(),
            source,
        })?;

        Ok(vec![
            Op::GeoAdd {
                key: GEO_KEY.to_string(),
                member: object.id.clone(),
                point,
            },
            Op::Set {
                key: record_key(&object.id),
                value,
            },
            Op::SetAdd {
                key: ALL_IDS_KEY.to_string(),
                member: object.id.clone(),
            },
            Op::SetMax {
                key: EXTENT_WIDTH_KEY.to_string(),
                value: object.width as u64,
            },
            Op::SetMax {
                key: EXTENT_HEIGHT_KEY.to_string(),
                value: object.height as u64,
            },
        ])
    }

    async fn write(&self, operation: &str, condition: Condition, object: &MapObject) -> MapResult<bool> {
        let point = self.validate_object(object)?;
        let transaction = Transaction {
            conditions: vec![condition],
            ops: Self::write_ops(object, point)?,
        };

        self.backend
            .execute(transaction)
            .await
            .map_err(|e| Self::backend_failure(operation, e))
    }

    /// Drops the index entry, the record and the id set member in one transaction.
    async fn delete(&self, operation: &str, id: &str, conditions: Vec<Condition>) -> MapResult<bool> {
        Self::validate_id(id)?;

        let transaction = Transaction {
            conditions,
            ops: vec![
                Op::GeoRemove {
                    key: GEO_KEY.to_string(),
                    member: id.to_string(),
                },
                Op::Delete { key: record_key(id) },
                Op::SetRemove {
                    key: ALL_IDS_KEY.to_string(),
                    member: id.to_string(),
                },
            ],
        };

        self.backend
            .execute(transaction)
            .await
            .map_err(|e| Self::backend_failure(operation, e))
    }

    async fn read_extent(&self, key: &str) -> MapResult<i64> {
        let raw = self
            .backend
            .get(key)
            .await
            .map_err(|e| Self::backend_failure("get_extent", e))?;

        match raw {
            None => Ok(0),
            Some(bytes) => {
                let value: u64 = serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupted {
                    key: key.to_string(),
                    source,
                })?;
                Ok(value.min(i32::MAX as u64) as i64)
            }
        }
    }

    /// Largest stored object width and height.
    async fn max_extent(&self) -> MapResult<(i64, i64)> {
        let (width, height) = futures::try_join!(
            self.read_extent(EXTENT_WIDTH_KEY),
            self.read_extent(EXTENT_HEIGHT_KEY)
        )?;
        Ok((width, height))
    }

    fn covering_radius(width: i64, height: i64) -> f64 {
        CoordinateMapper::half_diagonal_meters(width as f64, height as f64) * SEARCH_RADIUS_MARGIN
    }

    async fn candidates(&self, center: GeoPoint, radius: f64) -> MapResult<Vec<MapObject>> {
        let matches = self
            .backend
            .geo_radius(GEO_KEY, center, radius, DistanceUnit::Meters)
            .await
            .map_err(|e| Self::backend_failure("geo_radius", e))?;

        let records = try_join_all(matches.iter().map(|m| self.get_by_id(&m.member))).await?;

        // members removed between the radius search and the fetch are skipped
        Ok(records.into_iter().flatten().collect())
    }
}

#[async_trait]
impl MapObjectRepository for BackendObjectRepository {
    #[instrument(skip(self, object), fields(id = %object.id))]
    async fn add(&self, object: &MapObject) -> MapResult<bool> {
        let added = self
            .write("add", Condition::KeyNotExists(record_key(&object.id)), object)
            .await?;
        debug!("Add of {} applied: {}", object.id, added);
        Ok(added)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: &str) -> MapResult<Option<MapObject>> {
        Self::validate_id(id)?;

        let key = record_key(id);
        let raw = self
            .backend
            .get(&key)
            .await
            .map_err(|e| Self::backend_failure("get", e))?;

        match raw {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| {
                    error!("❌ Stored record {} could not be decoded: {}", key, source);
                    MapError::Storage(StorageError::Corrupted { key, source })
                }),
        }
    }

    #[instrument(skip(self))]
    async fn remove(&self, id: &str) -> MapResult<bool> {
        self.delete("remove", id, Vec::new()).await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn remove_existing(&self, id: &str) -> MapResult<bool> {
        let removed = self
            .delete("remove", id, vec![Condition::KeyExists(record_key(id))])
            .await?;
        debug!("Remove of {} applied: {}", id, removed);
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn get_by_coordinates(&self, x: i32, y: i32) -> MapResult<Vec<MapObject>> {
        let center = self.mapper.to_geo(x, y)?;
        let (extent_w, extent_h) = self.max_extent().await?;
        let radius = Self::covering_radius(
            POINT_QUERY_SPAN + 2 * extent_w,
            POINT_QUERY_SPAN + 2 * extent_h,
        );

        let objects: Vec<MapObject> = self
            .candidates(center, radius)
            .await?
            .into_iter()
            .filter(|object| object.contains_point(x, y))
            .collect();

        debug!("Point ({}, {}) is covered by {} objects", x, y, objects.len());
        Ok(objects)
    }

    #[instrument(skip(self))]
    async fn get_in_area(&self, x: i32, y: i32, width: i32, height: i32) -> MapResult<Vec<MapObject>> {
        if width < 0 || height < 0 {
            return Err(MapError::InvalidArgument(format!(
                "Area dimensions must be non-negative, got {}x{}",
                width, height
            )));
        }

        let (extent_w, extent_h) = self.max_extent().await?;

        // Every stored rectangle lies within the grid grown by the max extent.
        let x1 = (x as i64).max(-extent_w);
        let y1 = (y as i64).max(-extent_h);
        let x2 = (x as i64 + width as i64).min(self.mapper.width() as i64 + extent_w);
        let y2 = (y as i64 + height as i64).min(self.mapper.height() as i64 + extent_h);
        if x1 >= x2 || y1 >= y2 {
            return Ok(Vec::new());
        }

        let (w, h) = (x2 - x1, y2 - y1);
        let center = self
            .mapper
            .project(x1 as f64 + w as f64 / 2.0, y1 as f64 + h as f64 / 2.0);
        let radius = Self::covering_radius(w + 2 * extent_w, h + 2 * extent_h);

        let objects: Vec<MapObject> = self
            .candidates(center, radius)
            .await?
            .into_iter()
            .filter(|object| object.intersects_area(x, y, width, height))
            .collect();

        debug!("Area ({}, {}, {}, {}) matched {} objects", x, y, width, height, objects.len());
        Ok(objects)
    }

    async fn exists(&self, id: &str) -> MapResult<bool> {
        Self::validate_id(id)?;
        self.backend
            .exists(&record_key(id))
            .await
            .map_err(|e| Self::backend_failure("exists", e))
    }

    #[instrument(skip(self, object), fields(id = %object.id))]
    async fn update(&self, object: &MapObject) -> MapResult<bool> {
        let updated = self
            .write("update", Condition::KeyExists(record_key(&object.id)), object)
            .await?;
        debug!("Update of {} applied: {}", object.id, updated);
        Ok(updated)
    }

    async fn count(&self) -> MapResult<u64> {
        self.backend
            .set_cardinality(ALL_IDS_KEY)
            .await
            .map_err(|e| Self::backend_failure("count", e))
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> MapResult<()> {
        let ids = self
            .backend
            .set_members(ALL_IDS_KEY)
            .await
            .map_err(|e| Self::backend_failure("clear", e))?;

        let mut transaction = Transaction::new();
        for id in &ids {
            transaction = transaction.op(Op::Delete { key: record_key(id) });
        }
        for key in [ALL_IDS_KEY, GEO_KEY, EXTENT_WIDTH_KEY, EXTENT_HEIGHT_KEY] {
            transaction = transaction.op(Op::Delete { key: key.to_string() });
        }

        self.backend
            .execute(transaction)
            .await
            .map_err(|e| Self::backend_failure("clear", e))?;
        debug!("Cleared {} objects", ids.len());
        Ok(())
    }
}
