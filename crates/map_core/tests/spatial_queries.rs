use async_trait::async_trait;
use futures::StreamExt;
use map_core::backend::GeoMatch;
use map_core::error::BackendResult;
use map_core::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct World {
    regions: RegionLayer,
    layer: MapObjectLayer,
}

fn world(width: u32, height: u32, region_count: usize) -> World {
    let mut regions = RegionLayer::new(width, height).unwrap();
    regions.generate_regions(region_count, Some(42)).unwrap();

    let mapper = CoordinateMapper::new(width, height).unwrap();
    let repository = BackendObjectRepository::new(Arc::new(InMemoryBackend::new()), mapper);
    World {
        regions,
        layer: MapObjectLayer::new(Arc::new(repository)),
    }
}

fn ids(objects: &[MapObject]) -> BTreeSet<String> {
    objects.iter().map(|o| o.id.clone()).collect()
}

#[tokio::test]
async fn test_reference_scenario() {
    let world = world(100, 100, 10);

    assert_eq!(world.regions.region_count(), 10);
    for y in 0..100 {
        for x in 0..100 {
            let id = world.regions.get_region_id(x, y).unwrap();
            assert!((1..=10).contains(&id));
        }
    }

    world
        .layer
        .add_object(MapObject::new("a", 10, 20, 5, 5))
        .await
        .unwrap();

    let found = world.layer.get_objects_in_area(8, 18, 10, 10).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "a");
    assert!(world.layer.get_objects_in_area(50, 50, 5, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_boundary_overlap_recall() {
    let world = world(200, 200, 4);
    let layer = &world.layer;
    layer.add_object(MapObject::new("target", 10, 10, 5, 5)).await.unwrap();

    assert_eq!(
        ids(&layer.get_objects_in_area(12, 12, 10, 10).await.unwrap()),
        BTreeSet::from(["target".to_string()])
    );
    assert!(layer.get_objects_in_area(20, 20, 5, 5).await.unwrap().is_empty());

    // touching on each side: no overlap
    for (x, y, w, h) in [(15, 10, 5, 5), (5, 10, 5, 5), (10, 15, 5, 5), (10, 5, 5, 5)] {
        assert!(
            layer.get_objects_in_area(x, y, w, h).await.unwrap().is_empty(),
            "touching query ({x}, {y}, {w}, {h}) must not match"
        );
    }
    // overlapping by one tile on each side
    for (x, y, w, h) in [(14, 10, 5, 5), (6, 10, 5, 5), (10, 14, 5, 5), (10, 6, 5, 5)] {
        assert_eq!(
            layer.get_objects_in_area(x, y, w, h).await.unwrap().len(),
            1,
            "overlapping query ({x}, {y}, {w}, {h}) must match"
        );
    }
    // disjoint by one tile
    for (x, y, w, h) in [(16, 10, 5, 5), (4, 10, 5, 5), (10, 16, 5, 5), (10, 4, 5, 5)] {
        assert!(layer.get_objects_in_area(x, y, w, h).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_area_queries_match_brute_force() {
    let world = world(300, 300, 9);
    let mut all = Vec::new();
    for i in 0..60 {
        let object = MapObject::new(
            format!("obj-{i}"),
            (i * 37) % 280,
            (i * 53) % 280,
            1 + (i * 7) % 40,
            1 + (i * 11) % 25,
        );
        world.layer.add_object(object.clone()).await.unwrap();
        all.push(object);
    }

    for (x, y, w, h) in [(0, 0, 10, 10), (100, 100, 1, 1), (50, 200, 80, 5), (250, 0, 50, 300), (-20, -20, 25, 25)] {
        let expected: BTreeSet<String> = all
            .iter()
            .filter(|o| o.intersects_area(x, y, w, h))
            .map(|o| o.id.clone())
            .collect();
        let actual = ids(&world.layer.get_objects_in_area(x, y, w, h).await.unwrap());
        assert_eq!(actual, expected, "query ({x}, {y}, {w}, {h})");
    }

    for (x, y) in [(0, 0), (37, 53), (150, 150), (299, 299)] {
        let expected: BTreeSet<String> = all
            .iter()
            .filter(|o| o.contains_point(x, y))
            .map(|o| o.id.clone())
            .collect();
        let actual = ids(&world.layer.get_objects_by_coordinates(x, y).await.unwrap());
        assert_eq!(actual, expected, "point ({x}, {y})");
    }
}

#[tokio::test]
async fn test_existence_invariant() {
    let world = world(50, 50, 2);
    world.layer.add_object(MapObject::new("dup", 1, 1, 1, 1)).await.unwrap();

    let err = world.layer.add_object(MapObject::new("dup", 2, 2, 1, 1)).await.unwrap_err();
    assert!(matches!(err, MapError::Conflict(_)));

    world.layer.remove_object("dup").await.unwrap();
    world.layer.add_object(MapObject::new("dup", 2, 2, 1, 1)).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_adds_have_one_winner() {
    let world = world(100, 100, 2);
    let layer = world.layer.clone();

    let attempts = (0..16).map(|i| {
        let layer = layer.clone();
        tokio::spawn(async move { layer.add_object(MapObject::new("contested", i, i, 1, 1)).await })
    });
    let results = futures::future::join_all(attempts).await;

    let winners = results.iter().filter(|r| matches!(r, Ok(Ok(())))).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(MapError::Conflict(_)))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(layer.get_object_count().await.unwrap(), 1);
}

/// Backend that yields to the scheduler before every call, widening the window
/// between a layer's read and its write.
#[derive(Debug, Default)]
struct YieldingBackend {
    inner: InMemoryBackend,
}

#[async_trait]
impl MapBackend for YieldingBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        tokio::task::yield_now().await;
        self.inner.exists(key).await
    }

    async fn set_members(&self, key: &str) -> BackendResult<Vec<String>> {
        self.inner.set_members(key).await
    }

    async fn set_cardinality(&self, key: &str) -> BackendResult<u64> {
        self.inner.set_cardinality(key).await
    }

    async fn geo_radius(
        &self,
        key: &str,
        center: GeoPoint,
        radius: f64,
        unit: DistanceUnit,
    ) -> BackendResult<Vec<GeoMatch>> {
        self.inner.geo_radius(key, center, radius, unit).await
    }

    async fn execute(&self, transaction: Transaction) -> BackendResult<bool> {
        tokio::task::yield_now().await;
        self.inner.execute(transaction).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_removes_raise_one_event() {
    for round in 0..8 {
        let mapper = CoordinateMapper::new(100, 100).unwrap();
        let repository = BackendObjectRepository::new(Arc::new(YieldingBackend::default()), mapper);
        let layer = MapObjectLayer::new(Arc::new(repository));
        layer.add_object(MapObject::new("a", 5, 5, 2, 2)).await.unwrap();

        let removed = Arc::new(Mutex::new(0usize));
        let sink = removed.clone();
        layer
            .events()
            .on(EventChannel::Removed, "counter", move |_: &MapObjectEvent| {
                *sink.lock().unwrap() += 1;
                Ok(())
            })
            .await;

        let attempts = (0..16).map(|_| {
            let layer = layer.clone();
            tokio::spawn(async move { layer.remove_object("a").await })
        });
        let results = futures::future::join_all(attempts).await;

        let winners = results.iter().filter(|r| matches!(r, Ok(Ok(true)))).count();
        assert_eq!(winners, 1, "round {round}");
        assert_eq!(*removed.lock().unwrap(), 1, "round {round}");
        assert!(!layer.object_exists("a").await.unwrap());
    }
}

#[tokio::test]
async fn test_event_correctness() {
    let world = world(100, 100, 2);
    let seen: Arc<Mutex<Vec<(EventChannel, MapObjectEvent)>>> = Arc::new(Mutex::new(Vec::new()));
    for channel in [
        EventChannel::Created,
        EventChannel::Updated,
        EventChannel::Removed,
        EventChannel::Changed,
    ] {
        let sink = seen.clone();
        world
            .layer
            .events()
            .on(channel, "recorder", move |event: &MapObjectEvent| {
                sink.lock().unwrap().push((channel, event.clone()));
                Ok(())
            })
            .await;
    }

    let original = MapObject::new("e", 1, 1, 2, 2);
    let moved = MapObject::new("e", 40, 40, 2, 2);
    world.layer.add_object(original.clone()).await.unwrap();
    world.layer.update_object(moved.clone()).await.unwrap();
    world.layer.remove_object("e").await.unwrap();

    // failures raise nothing
    let _ = world.layer.add_object(MapObject::new("", 1, 1, 1, 1)).await;
    let _ = world.layer.update_object(MapObject::new("missing", 1, 1, 1, 1)).await;
    assert!(!world.layer.remove_object("missing").await.unwrap());

    let seen = seen.lock().unwrap();
    let channels: Vec<EventChannel> = seen.iter().map(|(c, _)| *c).collect();
    assert_eq!(
        channels,
        vec![
            EventChannel::Created,
            EventChannel::Changed,
            EventChannel::Updated,
            EventChannel::Changed,
            EventChannel::Removed,
            EventChannel::Changed,
        ]
    );
    assert_eq!(seen[0].1.object, original);
    assert_eq!(seen[2].1.previous_state, Some(original.clone()));
    assert_eq!(seen[2].1.object, moved);
    assert_eq!(seen[4].1.object, moved);
}

#[tokio::test]
async fn test_broadcast_stream_follows_layer() {
    let world = world(100, 100, 2);
    let broadcaster = MapEventBroadcaster::attach(&world.layer).await;
    let (_, mut updates) = broadcaster.subscribe_stream();

    world.layer.add_object(MapObject::new("s", 3, 3, 1, 1)).await.unwrap();
    world.layer.remove_object("s").await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), updates.next())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), updates.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, MapUpdateMessage::Added { .. }));
    assert!(matches!(second, MapUpdateMessage::Deleted { ref object_id, .. } if object_id == "s"));
}
