//! In-process [`MapBackend`] implementation.

use super::{Condition, DistanceUnit, GeoIndex, GeoMatch, MapBackend, Op, Transaction};
use crate::coord::GeoPoint;
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, Vec<u8>>,
    sets: HashMap<String, BTreeSet<String>>,
    geo: HashMap<String, GeoIndex>,
}

impl State {
    fn key_exists(&self, key: &str) -> bool {
        self.records.contains_key(key) || self.sets.contains_key(key) || self.geo.contains_key(key)
    }

    fn counter(&self, key: &str) -> BackendResult<u64> {
        let Some(raw) = self.records.get(key) else {
            return Ok(0);
        };
        std::str::from_utf8(raw)
            .ok()
            .and_then(|text| text.trim().parse::<u64>().ok())
            .ok_or_else(|| BackendError::InvalidValue {
                key: key.to_string(),
                reason: "not an unsigned integer".to_string(),
            })
    }

    /// Rejects the batch before any op touches state.
    fn validate(&self, ops: &[Op]) -> BackendResult<()> {
        for op in ops {
            match op {
                Op::GeoAdd { point, .. } => GeoIndex::validate(*point)?,
                Op::SetMax { key, .. } => {
                    self.counter(key)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, op: Op) -> BackendResult<()> {
        match op {
            Op::Set { key, value } => {
                self.records.insert(key, value);
            }
            Op::Delete { key } => {
                self.records.remove(&key);
                self.sets.remove(&key);
                self.geo.remove(&key);
            }
            Op::SetAdd { key, member } => {
                self.sets.entry(key).or_default().insert(member);
            }
            Op::SetRemove { key, member } => {
                if let Some(set) = self.sets.get_mut(&key) {
                    set.remove(&member);
                    if set.is_empty() {
                        self.sets.remove(&key);
                    }
                }
            }
            Op::GeoAdd { key, member, point } => {
                self.geo.entry(key).or_default().insert(&member, point)?;
            }
            Op::GeoRemove { key, member } => {
                if let Some(index) = self.geo.get_mut(&key) {
                    index.remove(&member);
                    if index.is_empty() {
                        self.geo.remove(&key);
                    }
                }
            }
            Op::SetMax { key, value } => {
                let current = self.counter(&key)?;
                if value > current {
                    self.records.insert(key, value.to_string().into_bytes());
                }
            }
        }
        Ok(())
    }
}

/// Backend holding every key in process memory behind a single lock.
///
/// Transactions are applied while holding the write lock, so concurrent
/// readers observe either none or all of a transaction's effects.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys across all value kinds.
    pub async fn key_count(&self) -> usize {
        let state = self.state.read().await;
        state.records.len() + state.sets.len() + state.geo.len()
    }

    /// Indexed position of `member` under the geo key, if any.
    pub async fn geo_position(&self, key: &str, member: &str) -> Option<GeoPoint> {
        let state = self.state.read().await;
        state.geo.get(key).and_then(|index| index.position(member))
    }

    /// Writes a raw record, bypassing transactions. Intended for fixtures.
    pub async fn put_raw(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.state.write().await.records.insert(key.into(), value.into());
    }
}

#[async_trait]
impl MapBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.state.read().await.records.get(key).cloned())
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        Ok(self.state.read().await.key_exists(key))
    }

    async fn set_members(&self, key: &str) -> BackendResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_cardinality(&self, key: &str) -> BackendResult<u64> {
        let state = self.state.read().await;
        Ok(state.sets.get(key).map_or(0, |set| set.len() as u64))
    }

    #[instrument(skip(self))]
    async fn geo_radius(
        &self,
        key: &str,
        center: GeoPoint,
        radius: f64,
        unit: DistanceUnit,
    ) -> BackendResult<Vec<GeoMatch>> {
        GeoIndex::validate(center)?;

        let state = self.state.read().await;
        let Some(index) = state.geo.get(key) else {
            return Ok(Vec::new());
        };

        let matches: Vec<GeoMatch> = index
            .query_radius(center, unit.to_meters(radius))?
            .into_iter()
            .map(|(member, meters)| GeoMatch {
                member,
                distance: unit.from_meters(meters),
            })
            .collect();

        debug!("Geo radius query matched {} members", matches.len());
        Ok(matches)
    }

    #[instrument(skip(self, transaction), fields(conditions = transaction.conditions.len(), ops = transaction.ops.len()))]
    async fn execute(&self, transaction: Transaction) -> BackendResult<bool> {
        let mut state = self.state.write().await;

        let satisfied = transaction.conditions.iter().all(|condition| match condition {
            Condition::KeyExists(key) => state.key_exists(key),
            Condition::KeyNotExists(key) => !state.key_exists(key),
        });
        if !satisfied {
            debug!("Transaction precondition failed");
            return Ok(false);
        }

        state.validate(&transaction.ops)?;
        for op in transaction.ops {
            state.apply(op)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(key: &str, value: &str) -> Op {
        Op::Set {
            key: key.to_string(),
            value: value.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_conditional_transaction() {
        let backend = InMemoryBackend::new();

        let create = Transaction::new()
            .when(Condition::KeyNotExists("k".to_string()))
            .op(set("k", "v1"));
        assert!(backend.execute(create.clone()).await.unwrap());
        assert!(!backend.execute(create).await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v1".to_vec()));

        let update = Transaction::new()
            .when(Condition::KeyExists("missing".to_string()))
            .op(set("k", "v2"));
        assert!(!backend.execute(update).await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn test_invalid_geo_point_applies_nothing() {
        let backend = InMemoryBackend::new();
        let tx = Transaction::new().op(set("record", "x")).op(Op::GeoAdd {
            key: "geo".to_string(),
            member: "a".to_string(),
            point: GeoPoint::new(0.0, 89.0),
        });

        assert!(matches!(
            backend.execute(tx).await,
            Err(BackendError::InvalidCoordinate { .. })
        ));
        assert!(!backend.exists("record").await.unwrap());
        assert_eq!(backend.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_sets_and_delete() {
        let backend = InMemoryBackend::new();
        let tx = Transaction::new()
            .op(Op::SetAdd {
                key: "ids".to_string(),
                member: "b".to_string(),
            })
            .op(Op::SetAdd {
                key: "ids".to_string(),
                member: "a".to_string(),
            })
            .op(Op::SetAdd {
                key: "ids".to_string(),
                member: "a".to_string(),
            });
        backend.execute(tx).await.unwrap();

        assert_eq!(backend.set_cardinality("ids").await.unwrap(), 2);
        assert_eq!(backend.set_members("ids").await.unwrap(), vec!["a", "b"]);

        backend
            .execute(Transaction::new().op(Op::SetRemove {
                key: "ids".to_string(),
                member: "a".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(backend.set_cardinality("ids").await.unwrap(), 1);

        backend
            .execute(Transaction::new().op(Op::Delete { key: "ids".to_string() }))
            .await
            .unwrap();
        assert!(!backend.exists("ids").await.unwrap());
        assert!(backend.set_members("ids").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_max_keeps_largest_value() {
        let backend = InMemoryBackend::new();
        for value in [3, 10, 7] {
            backend
                .execute(Transaction::new().op(Op::SetMax {
                    key: "max".to_string(),
                    value,
                }))
                .await
                .unwrap();
        }
        assert_eq!(backend.get("max").await.unwrap(), Some(b"10".to_vec()));

        backend.put_raw("garbage", "abc").await;
        let result = backend
            .execute(Transaction::new().op(Op::SetMax {
                key: "garbage".to_string(),
                value: 1,
            }))
            .await;
        assert!(matches!(result, Err(BackendError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_geo_radius_units() {
        let backend = InMemoryBackend::new();
        let tx = Transaction::new()
            .op(Op::GeoAdd {
                key: "geo".to_string(),
                member: "origin".to_string(),
                point: GeoPoint::new(0.0, 0.0),
            })
            .op(Op::GeoAdd {
                key: "geo".to_string(),
                member: "east".to_string(),
                point: GeoPoint::new(0.01, 0.0),
            });
        backend.execute(tx).await.unwrap();

        let meters = backend
            .geo_radius("geo", GeoPoint::new(0.0, 0.0), 2_000.0, DistanceUnit::Meters)
            .await
            .unwrap();
        assert_eq!(meters.len(), 2);
        assert_eq!(meters[0].member, "origin");
        assert!((meters[1].distance - 1_112.26).abs() < 0.5);

        let km = backend
            .geo_radius("geo", GeoPoint::new(0.0, 0.0), 1.0, DistanceUnit::Kilometers)
            .await
            .unwrap();
        assert_eq!(km.len(), 1);

        assert!(backend
            .geo_radius("nothing", GeoPoint::new(0.0, 0.0), 1.0, DistanceUnit::Meters)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(backend.geo_position("geo", "east").await, Some(GeoPoint::new(0.01, 0.0)));
    }
}
