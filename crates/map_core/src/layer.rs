//! Object layer: existence checks and change events over the repository.

use crate::error::{MapError, MapResult};
use crate::events::{MapObjectEvent, ObjectEventHub};
use crate::repository::MapObjectRepository;
use crate::types::{MapArea, MapObject};
use std::sync::Arc;
use tracing::{debug, info};

/// Orchestrates the object repository and raises an event for every
/// successful mutation. Holds no cached object state.
#[derive(Clone)]
pub struct MapObjectLayer {
    repository: Arc<dyn MapObjectRepository>,
    events: Arc<ObjectEventHub>,
}

impl std::fmt::Debug for MapObjectLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapObjectLayer").finish_non_exhaustive()
    }
}

impl MapObjectLayer {
    pub fn new(repository: Arc<dyn MapObjectRepository>) -> Self {
        Self::with_events(repository, Arc::new(ObjectEventHub::new()))
    }

    pub fn with_events(repository: Arc<dyn MapObjectRepository>, events: Arc<ObjectEventHub>) -> Self {
        Self { repository, events }
    }

    pub fn events(&self) -> &Arc<ObjectEventHub> {
        &self.events
    }

    /// Stores a new object and raises `Created`.
    ///
    /// Fails with [`MapError::Conflict`] if the id is already taken.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use map_core::{BackendObjectRepository, CoordinateMapper, InMemoryBackend, MapObject, MapObjectLayer};
    /// use std::sync::Arc;
    ///
    /// # async fn demo() -> map_core::MapResult<()> {
    /// let mapper = CoordinateMapper::new(100, 100)?;
    /// let repository = BackendObjectRepository::new(Arc::new(InMemoryBackend::new()), mapper);
    /// let layer = MapObjectLayer::new(Arc::new(repository));
    ///
    /// layer.add_object(MapObject::new("tower", 10, 10, 2, 2).with_type("Tower")).await?;
    /// assert!(layer.add_object(MapObject::new("tower", 0, 0, 1, 1)).await.is_err());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn add_object(&self, object: MapObject) -> MapResult<()> {
        if !self.repository.add(&object).await? {
            return Err(MapError::Conflict(format!(
                "Object with id '{}' already exists",
                object.id
            )));
        }

        info!("➕ Added object {} at ({}, {})", object.id, object.x, object.y);
        self.events.emit(&MapObjectEvent::created(object)).await;
        Ok(())
    }

    pub async fn get_object_by_id(&self, id: &str) -> MapResult<Option<MapObject>> {
        self.repository.get_by_id(id).await
    }

    /// Replaces an existing object and raises `Updated` with both states.
    ///
    /// Fails with [`MapError::NotFound`] if the object does not exist.
    pub async fn update_object(&self, object: MapObject) -> MapResult<()> {
        let previous = self
            .repository
            .get_by_id(&object.id)
            .await?
            .ok_or_else(|| MapError::NotFound(format!("Object with id '{}' not found", object.id)))?;

        if !self.repository.update(&object).await? {
            // removed between the read and the conditional write
            return Err(MapError::NotFound(format!(
                "Object with id '{}' not found",
                object.id
            )));
        }

        debug!("✏️ Updated object {}", object.id);
        self.events.emit(&MapObjectEvent::updated(previous, object)).await;
        Ok(())
    }

    /// Deletes an object and raises `Removed` with its last state.
    ///
    /// The delete is conditional on the record still existing, so when several
    /// callers race to remove the same object exactly one of them wins and
    /// raises the event.
    ///
    /// # Returns
    ///
    /// `true` if this call deleted the object; `false`, without an event, when
    /// the object does not exist or another caller removed it first.
    pub async fn remove_object(&self, id: &str) -> MapResult<bool> {
        let Some(existing) = self.repository.get_by_id(id).await? else {
            return Ok(false);
        };

        if !self.repository.remove_existing(id).await? {
            debug!("Object {} was removed concurrently", id);
            return Ok(false);
        }

        info!("➖ Removed object {}", id);
        self.events.emit(&MapObjectEvent::removed(existing)).await;
        Ok(true)
    }

    pub async fn object_exists(&self, id: &str) -> MapResult<bool> {
        self.repository.exists(id).await
    }

    pub async fn get_objects_by_coordinates(&self, x: i32, y: i32) -> MapResult<Vec<MapObject>> {
        self.repository.get_by_coordinates(x, y).await
    }

    /// Objects overlapping the rectangle at `(x, y)` of `width` by `height` tiles.
    ///
    /// # Errors
    ///
    /// [`MapError::InvalidArgument`] for a negative width or height;
    /// [`MapError::Storage`] when the backend fails.
    pub async fn get_objects_in_area(&self, x: i32, y: i32, width: i32, height: i32) -> MapResult<Vec<MapObject>> {
        if width < 0 || height < 0 {
            return Err(MapError::InvalidArgument(format!(
                "Area dimensions must be non-negative, got {}x{}",
                width, height
            )));
        }
        self.repository.get_in_area(x, y, width, height).await
    }

    pub async fn get_objects_in(&self, area: MapArea) -> MapResult<Vec<MapObject>> {
        self.get_objects_in_area(area.x, area.y, area.width, area.height)
            .await
    }

    /// Whether the object exists and overlaps the area.
    pub async fn is_object_in_area(&self, id: &str, area: MapArea) -> MapResult<bool> {
        Ok(self
            .repository
            .get_by_id(id)
            .await?
            .is_some_and(|object| object.intersects_area(area.x, area.y, area.width, area.height)))
    }

    pub async fn get_object_count(&self) -> MapResult<u64> {
        self.repository.count().await
    }

    /// Drops every object. No events are raised.
    pub async fn clear_all_objects(&self) -> MapResult<()> {
        self.repository.clear().await?;
        info!("🧹 Cleared all map objects");
        Ok(())
    }
}
