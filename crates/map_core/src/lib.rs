//! # Map Core
//!
//! Spatial data model of the map service: a terrain tile grid, a balanced
//! region partition, and a store of rectangular objects answering rectangle
//! and point queries through a geo radius index.
//!
//! ## Layers
//!
//! - [`SurfaceLayer`]: one terrain byte per cell.
//! - [`RegionLayer`]: every cell assigned to one of `N` near-equal regions.
//! - [`CoordinateMapper`]: projection of grid cells into lon/lat space plus the
//!   covering radius for a rectangle.
//! - [`MapObjectRepository`]: persistent objects on top of a [`MapBackend`].
//!   Radius search provides recall, exact rectangle arithmetic provides
//!   precision.
//! - [`MapObjectLayer`]: existence rules and typed change events.
//! - [`MapEventBroadcaster`]: per-subscriber delivery of change messages.
//!
//! ## Example
//!
//! ```rust,no_run
//! use map_core::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> MapResult<()> {
//! let mapper = CoordinateMapper::new(100, 100)?;
//! let repository = BackendObjectRepository::new(Arc::new(InMemoryBackend::new()), mapper);
//! let layer = MapObjectLayer::new(Arc::new(repository));
//!
//! layer.add_object(MapObject::new("a", 10, 20, 5, 5)).await?;
//! let found = layer.get_objects_in_area(8, 18, 10, 10).await?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod broadcaster;
pub mod coord;
pub mod error;
pub mod events;
pub mod layer;
pub mod region;
pub mod repository;
pub mod service;
pub mod surface;
pub mod types;

pub use backend::{DistanceUnit, InMemoryBackend, MapBackend, Transaction};
pub use broadcaster::{
    BroadcasterStats, MapEventBroadcaster, MapSubscriber, MapUpdateMessage, ObjectSummary, SubscriberId,
    DEFAULT_QUEUE_CAPACITY,
};
pub use coord::{CoordinateMapper, GeoPoint};
pub use error::{BackendError, DeliveryError, EventError, MapError, MapResult, StorageError};
pub use events::{current_timestamp, EventChannel, HandlerId, MapObjectEvent, MapObjectEventKind, ObjectEventHub};
pub use layer::MapObjectLayer;
pub use region::RegionLayer;
pub use repository::{BackendObjectRepository, MapObjectRepository};
pub use service::MapService;
pub use surface::SurfaceLayer;
pub use types::{MapArea, MapObject, Region, TileType};
