//! Storage backend contract.
//!
//! The object repository talks to its persistence layer only through
//! [`MapBackend`]: keyed byte records, string sets, a geo radius index and a
//! conditional multi-key [`Transaction`]. The trait mirrors the primitives of a
//! Redis-like store so a networked backend can be dropped in; the crate ships
//! [`InMemoryBackend`] as the reference implementation.

mod geo_index;
mod memory;

pub use geo_index::{haversine_distance, GeoIndex, EARTH_RADIUS_METERS};
pub use memory::InMemoryBackend;

use crate::coord::GeoPoint;
use crate::error::BackendResult;
use async_trait::async_trait;

/// Unit of a radius query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Meters,
    Kilometers,
}

impl DistanceUnit {
    pub fn to_meters(self, value: f64) -> f64 {
        match self {
            DistanceUnit::Meters => value,
            DistanceUnit::Kilometers => value * 1000.0,
        }
    }

    pub fn from_meters(self, meters: f64) -> f64 {
        match self {
            DistanceUnit::Meters => meters,
            DistanceUnit::Kilometers => meters / 1000.0,
        }
    }
}

/// One hit of a radius query; `distance` is expressed in the query's unit.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    pub member: String,
    pub distance: f64,
}

/// Precondition checked before a transaction applies any operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    KeyExists(String),
    KeyNotExists(String),
}

/// A single write inside a [`Transaction`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
    SetAdd { key: String, member: String },
    SetRemove { key: String, member: String },
    /// Inserts or relocates `member` in the geo index stored under `key`.
    GeoAdd { key: String, member: String, point: GeoPoint },
    GeoRemove { key: String, member: String },
    /// Stores `max(current, value)` as a decimal counter under `key`.
    SetMax { key: String, value: u64 },
}

/// Conditional batch of writes.
///
/// Either every condition holds and every op is applied, or nothing changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub conditions: Vec<Condition>,
    pub ops: Vec<Op>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn op(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Keyed record store with set and geo primitives.
#[async_trait]
pub trait MapBackend: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    async fn exists(&self, key: &str) -> BackendResult<bool>;

    async fn set_members(&self, key: &str) -> BackendResult<Vec<String>>;

    async fn set_cardinality(&self, key: &str) -> BackendResult<u64>;

    /// Members of the geo index under `key` within `radius` of `center`,
    /// ordered by ascending distance.
    async fn geo_radius(
        &self,
        key: &str,
        center: GeoPoint,
        radius: f64,
        unit: DistanceUnit,
    ) -> BackendResult<Vec<GeoMatch>>;

    /// Applies the transaction; returns `false` when a condition failed.
    async fn execute(&self, transaction: Transaction) -> BackendResult<bool>;
}
