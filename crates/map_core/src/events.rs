//! Typed change events raised by the object layer.
//!
//! Handlers register on a channel: one per event kind plus [`EventChannel::Changed`],
//! which receives every event. Handler failures are logged and never fail the
//! emitting operation.

use crate::error::EventError;
use crate::types::MapObject;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Current time as seconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapObjectEventKind {
    Created,
    Updated,
    Removed,
}

/// A successful mutation of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapObjectEvent {
    pub kind: MapObjectEventKind,
    /// New state for `Created`/`Updated`, the deleted object for `Removed`.
    pub object: MapObject,
    /// State before the change; only set for `Updated`.
    pub previous_state: Option<MapObject>,
    pub timestamp: u64,
}

impl MapObjectEvent {
    pub fn created(object: MapObject) -> Self {
        Self {
            kind: MapObjectEventKind::Created,
            object,
            previous_state: None,
            timestamp: current_timestamp(),
        }
    }

    pub fn updated(previous: MapObject, object: MapObject) -> Self {
        Self {
            kind: MapObjectEventKind::Updated,
            object,
            previous_state: Some(previous),
            timestamp: current_timestamp(),
        }
    }

    pub fn removed(object: MapObject) -> Self {
        Self {
            kind: MapObjectEventKind::Removed,
            object,
            previous_state: None,
            timestamp: current_timestamp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
    Created,
    Updated,
    Removed,
    /// Receives every event after the kind-specific channel.
    Changed,
}

impl EventChannel {
    pub fn for_kind(kind: MapObjectEventKind) -> Self {
        match kind {
            MapObjectEventKind::Created => EventChannel::Created,
            MapObjectEventKind::Updated => EventChannel::Updated,
            MapObjectEventKind::Removed => EventChannel::Removed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventChannel::Created => "object_created",
            EventChannel::Updated => "object_updated",
            EventChannel::Removed => "object_removed",
            EventChannel::Changed => "object_changed",
        }
    }
}

pub trait ObjectEventHandler: Send + Sync {
    fn handle(&self, event: &MapObjectEvent) -> Result<(), EventError>;

    fn handler_name(&self) -> &str;
}

/// Adapts a closure into an [`ObjectEventHandler`].
pub struct FnEventHandler<F>
where
    F: Fn(&MapObjectEvent) -> Result<(), EventError> + Send + Sync,
{
    name: String,
    handler: F,
}

impl<F> FnEventHandler<F>
where
    F: Fn(&MapObjectEvent) -> Result<(), EventError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> ObjectEventHandler for FnEventHandler<F>
where
    F: Fn(&MapObjectEvent) -> Result<(), EventError> + Send + Sync,
{
    fn handle(&self, event: &MapObjectEvent) -> Result<(), EventError> {
        (self.handler)(event)
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// Registration handle returned by [`ObjectEventHub::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventHubStats {
    pub total_handlers: usize,
    pub events_emitted: u64,
    pub handler_failures: u64,
}

/// Registry of object event handlers.
#[derive(Default)]
pub struct ObjectEventHub {
    handlers: RwLock<HashMap<EventChannel, Vec<(HandlerId, Arc<dyn ObjectEventHandler>)>>>,
    stats: RwLock<EventHubStats>,
}

impl std::fmt::Debug for ObjectEventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectEventHub").finish_non_exhaustive()
    }
}

impl ObjectEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure on `channel`.
    pub async fn on<F>(&self, channel: EventChannel, name: &str, handler: F) -> HandlerId
    where
        F: Fn(&MapObjectEvent) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.register(channel, Arc::new(FnEventHandler::new(name, handler)))
            .await
    }

    /// Registers a handler on `channel`.
    ///
    /// # Returns
    ///
    /// A [`HandlerId`] that can later be passed to [`off`](Self::off).
    pub async fn register(&self, channel: EventChannel, handler: Arc<dyn ObjectEventHandler>) -> HandlerId {
        let id = HandlerId(Uuid::new_v4());
        let name = handler.handler_name().to_string();
        self.handlers
            .write()
            .await
            .entry(channel)
            .or_default()
            .push((id, handler));
        self.stats.write().await.total_handlers += 1;

        info!("📝 Registered handler '{}' for {}", name, channel.as_str());
        id
    }

    /// Removes a handler. Returns `false` if the id is unknown.
    pub async fn off(&self, id: HandlerId) -> bool {
        let removed = {
            let mut handlers = self.handlers.write().await;
            let mut removed = None;
            for channel_handlers in handlers.values_mut() {
                if let Some(index) = channel_handlers.iter().position(|(handler_id, _)| *handler_id == id) {
                    removed = Some(channel_handlers.remove(index).1);
                    break;
                }
            }
            handlers.retain(|_, channel_handlers| !channel_handlers.is_empty());
            removed
        };

        match removed {
            Some(handler) => {
                let mut stats = self.stats.write().await;
                stats.total_handlers = stats.total_handlers.saturating_sub(1);
                info!("🗑️ Removed handler '{}'", handler.handler_name());
                true
            }
            None => false,
        }
    }

    /// Dispatches to the kind channel, then to [`EventChannel::Changed`].
    pub async fn emit(&self, event: &MapObjectEvent) {
        let mut failures = 0;
        {
            let handlers = self.handlers.read().await;
            for channel in [EventChannel::for_kind(event.kind), EventChannel::Changed] {
                let Some(channel_handlers) = handlers.get(&channel) else {
                    continue;
                };
                debug!(
                    "📤 Emitting {} for {} to {} handlers",
                    channel.as_str(),
                    event.object.id,
                    channel_handlers.len()
                );

                for (_, handler) in channel_handlers {
                    if let Err(e) = handler.handle(event) {
                        error!("❌ Handler {} failed: {}", handler.handler_name(), e);
                        failures += 1;
                    }
                }
            }
        }

        let mut stats = self.stats.write().await;
        stats.events_emitted += 1;
        stats.handler_failures += failures;
    }

    pub async fn get_stats(&self) -> EventHubStats {
        self.stats.read().await.clone()
    }
}
