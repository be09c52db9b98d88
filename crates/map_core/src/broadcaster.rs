//! Fan-out of object changes to live subscribers.
//!
//! The broadcaster registers one handler on the layer's `Changed` channel that
//! only enqueues the event. A dispatcher task converts each event into a
//! [`MapUpdateMessage`] and hands it to every subscriber's own queue; each
//! subscriber is served by a dedicated task, so a slow or failing subscriber
//! never delays the others or the emitting operation.
//!
//! Every queue is bounded. A subscriber that falls a full queue behind loses
//! the overflowing messages, which are counted in
//! [`BroadcasterStats::messages_dropped`].

use crate::error::DeliveryError;
use crate::events::{EventChannel, HandlerId, MapObjectEvent, MapObjectEventKind, ObjectEventHub};
use crate::layer::MapObjectLayer;
use crate::types::MapObject;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Messages buffered per subscriber, and events buffered ahead of the
/// dispatcher, when no capacity is given.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Lightweight projection of a [`MapObject`] sent to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    #[serde(rename = "type")]
    pub object_type: String,
}

impl From<&MapObject> for ObjectSummary {
    fn from(object: &MapObject) -> Self {
        Self {
            id: object.id.clone(),
            x: object.x,
            y: object.y,
            width: object.width,
            height: object.height,
            object_type: object.object_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MapUpdateMessage {
    Added { object: ObjectSummary, timestamp: u64 },
    Updated { object: ObjectSummary, timestamp: u64 },
    Deleted { object_id: String, timestamp: u64 },
}

impl MapUpdateMessage {
    pub fn object_id(&self) -> &str {
        match self {
            MapUpdateMessage::Added { object, .. } | MapUpdateMessage::Updated { object, .. } => &object.id,
            MapUpdateMessage::Deleted { object_id, .. } => object_id,
        }
    }
}

impl From<&MapObjectEvent> for MapUpdateMessage {
    fn from(event: &MapObjectEvent) -> Self {
        match event.kind {
            MapObjectEventKind::Created => MapUpdateMessage::Added {
                object: ObjectSummary::from(&event.object),
                timestamp: event.timestamp,
            },
            MapObjectEventKind::Updated => MapUpdateMessage::Updated {
                object: ObjectSummary::from(&event.object),
                timestamp: event.timestamp,
            },
            MapObjectEventKind::Removed => MapUpdateMessage::Deleted {
                object_id: event.object.id.clone(),
                timestamp: event.timestamp,
            },
        }
    }
}

/// Receiving end of map updates, e.g. a connected client session.
#[async_trait]
pub trait MapSubscriber: Send + Sync {
    /// Delivers one message. [`DeliveryError::Closed`] unsubscribes the receiver.
    async fn deliver(&self, message: &MapUpdateMessage) -> Result<(), DeliveryError>;

    fn name(&self) -> &str {
        "subscriber"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Subscriber feeding a [`futures::Stream`].
struct ChannelSubscriber {
    sender: mpsc::Sender<MapUpdateMessage>,
}

#[async_trait]
impl MapSubscriber for ChannelSubscriber {
    async fn deliver(&self, message: &MapUpdateMessage) -> Result<(), DeliveryError> {
        match self.sender.try_send(message.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Failed("stream buffer full".to_string())),
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    fn name(&self) -> &str {
        "stream"
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcasterStats {
    pub subscribers: usize,
    pub messages_published: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    /// Messages or events discarded because a bounded queue was full.
    pub messages_dropped: u64,
}

struct SubscriberEntry {
    id: SubscriberId,
    subscriber: Arc<dyn MapSubscriber>,
    queue: mpsc::Sender<Arc<MapUpdateMessage>>,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct SubscriberRegistry {
    entries: Mutex<Vec<SubscriberEntry>>,
    messages_published: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    messages_dropped: AtomicU64,
}

impl SubscriberRegistry {
    fn entries(&self) -> MutexGuard<'_, Vec<SubscriberEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: SubscriberId) -> Option<SubscriberEntry> {
        let mut entries = self.entries();
        let index = entries.iter().position(|entry| entry.id == id)?;
        Some(entries.swap_remove(index))
    }

    fn publish(&self, message: Arc<MapUpdateMessage>) {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<Arc<MapUpdateMessage>>)> = self
            .entries()
            .iter()
            .map(|entry| (entry.id, entry.queue.clone()))
            .collect();

        self.messages_published.fetch_add(1, Ordering::Relaxed);
        debug!(
            "📡 Publishing update for {} to {} subscribers",
            message.object_id(),
            snapshot.len()
        );

        for (id, queue) in snapshot {
            match queue.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("⚠️ Subscriber {} is lagging, dropped update for {}", id, message.object_id());
                }
                Err(TrySendError::Closed(_)) => {
                    // worker already stopped
                    self.remove(id);
                }
            }
        }
    }
}

async fn serve_subscriber(
    id: SubscriberId,
    subscriber: Arc<dyn MapSubscriber>,
    mut queue: mpsc::Receiver<Arc<MapUpdateMessage>>,
    registry: Weak<SubscriberRegistry>,
) {
    while let Some(message) = queue.recv().await {
        let result = subscriber.deliver(&message).await;
        let Some(registry) = registry.upgrade() else {
            return;
        };

        match result {
            Ok(()) => {
                registry.deliveries.fetch_add(1, Ordering::Relaxed);
            }
            Err(DeliveryError::Closed) => {
                info!("🔌 Subscriber {} ({}) closed, unsubscribing", id, subscriber.name());
                registry.remove(id);
                return;
            }
            Err(e) => {
                registry.delivery_failures.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️ Delivery to subscriber {} ({}) failed: {}", id, subscriber.name(), e);
            }
        }
    }
}

/// Owns the subscriber registry and the delivery tasks.
///
/// Must be created inside a Tokio runtime. Dropping the broadcaster stops all
/// of its tasks and deregisters its handler from the layer's event hub.
pub struct MapEventBroadcaster {
    registry: Arc<SubscriberRegistry>,
    dispatcher: JoinHandle<()>,
    hub: Weak<ObjectEventHub>,
    handler: HandlerId,
    capacity: usize,
}

impl std::fmt::Debug for MapEventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapEventBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl MapEventBroadcaster {
    /// Starts forwarding every change raised by `layer`, with
    /// [`DEFAULT_QUEUE_CAPACITY`] slots per queue.
    pub async fn attach(layer: &MapObjectLayer) -> Self {
        Self::attach_with_capacity(layer, DEFAULT_QUEUE_CAPACITY).await
    }

    /// Starts forwarding every change raised by `layer`.
    ///
    /// # Arguments
    ///
    /// * `layer` - Object layer whose `Changed` channel is observed
    /// * `capacity` - Bound of the dispatcher queue and of every subscriber
    ///   queue; zero is treated as one
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use map_core::*;
    /// # async fn demo(layer: MapObjectLayer) {
    /// let broadcaster = MapEventBroadcaster::attach_with_capacity(&layer, 64).await;
    /// let (_id, updates) = broadcaster.subscribe_stream();
    /// # }
    /// ```
    pub async fn attach_with_capacity(layer: &MapObjectLayer, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (events_tx, mut events_rx) = mpsc::channel::<MapObjectEvent>(capacity);
        let registry = Arc::new(SubscriberRegistry::default());

        let overflow = Arc::downgrade(&registry);
        let handler = layer
            .events()
            .on(EventChannel::Changed, "map_event_broadcaster", move |event: &MapObjectEvent| {
                match events_tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        if let Some(registry) = overflow.upgrade() {
                            registry.messages_dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        warn!("⚠️ Broadcaster queue full, dropping event for {}", event.object.id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Broadcaster stopped, dropping event for {}", event.object.id);
                    }
                }
                Ok(())
            })
            .await;

        let dispatch_registry = registry.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                dispatch_registry.publish(Arc::new(MapUpdateMessage::from(&event)));
            }
        });

        info!("📡 Map event broadcaster attached");
        Self {
            registry,
            dispatcher,
            hub: Arc::downgrade(layer.events()),
            handler,
            capacity,
        }
    }

    /// Adds a subscriber. Subscribing the same handle twice returns the
    /// existing id.
    pub fn subscribe(&self, subscriber: Arc<dyn MapSubscriber>) -> SubscriberId {
        let mut entries = self.registry.entries();
        if let Some(existing) = entries
            .iter()
            .find(|entry| Arc::ptr_eq(&entry.subscriber, &subscriber))
        {
            return existing.id;
        }

        let id = SubscriberId::new();
        let (queue, receiver) = mpsc::channel(self.capacity);
        let worker = tokio::spawn(serve_subscriber(
            id,
            subscriber.clone(),
            receiver,
            Arc::downgrade(&self.registry),
        ));

        info!("➕ Subscriber {} ({}) registered", id, subscriber.name());
        entries.push(SubscriberEntry {
            id,
            subscriber,
            queue,
            worker,
        });
        id
    }

    /// Subscribes a new stream of updates. The stream ends once the
    /// subscription is removed. Updates that arrive while the stream's buffer
    /// is full are counted as delivery failures and skipped.
    pub fn subscribe_stream(&self) -> (SubscriberId, impl Stream<Item = MapUpdateMessage> + Send + Unpin + 'static) {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = self.subscribe(Arc::new(ChannelSubscriber { sender }));
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (message, receiver))
        });
        (id, Box::pin(stream))
    }

    /// Removes a subscriber; unknown ids are ignored. Returns whether it was
    /// registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        match self.registry.remove(id) {
            Some(entry) => {
                entry.worker.abort();
                info!("➖ Subscriber {} ({}) removed", id, entry.subscriber.name());
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.entries().len()
    }

    pub fn get_stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            subscribers: self.subscriber_count(),
            messages_published: self.registry.messages_published.load(Ordering::Relaxed),
            deliveries: self.registry.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.registry.delivery_failures.load(Ordering::Relaxed),
            messages_dropped: self.registry.messages_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for MapEventBroadcaster {
    fn drop(&mut self) {
        self.dispatcher.abort();
        for entry in self.registry.entries().drain(..) {
            entry.worker.abort();
        }

        // the hub lock is async, so deregistration runs on the runtime
        if let (Some(hub), Ok(runtime)) = (self.hub.upgrade(), tokio::runtime::Handle::try_current()) {
            let handler = self.handler;
            runtime.spawn(async move {
                hub.off(handler).await;
            });
        }
    }
}
