//! Error types for the map core.
//!
//! Validation failures (`InvalidArgument`, `OutOfRange`) are raised before any
//! backend I/O. Backend and decoding failures are wrapped once at the repository
//! boundary into [`StorageError`] and surfaced through [`MapError::Storage`].

use thiserror::Error;

/// Errors raised by a [`crate::backend::MapBackend`] implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid coordinate (lon {lon}, lat {lat})")]
    InvalidCoordinate { lon: f64, lat: f64 },

    #[error("Invalid value stored under {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Storage failures surfaced by the object repository.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Backend operation '{operation}' failed: {source}")]
    Backend {
        operation: String,
        #[source]
        source: BackendError,
    },

    #[error("Stored record {key} is corrupted: {source}")]
    Corrupted {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize object {id}: {source}")]
    Serialization {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub(crate) fn backend(operation: impl Into<String>, source: BackendError) -> Self {
        StorageError::Backend {
            operation: operation.into(),
            source,
        }
    }
}

/// Domain-level error returned by every public map operation.
#[derive(Debug, Error)]
pub enum MapError {
    /// Malformed input: empty id, negative dimensions, non-positive sizes.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Well-formed coordinate outside the `width x height` grid.
    #[error("Coordinates ({x}, {y}) are outside the map bounds ({width}, {height})")]
    OutOfRange {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    },

    /// The write conflicts with existing state (e.g. duplicate id).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The operation depends on an object that does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MapError {
    pub(crate) fn out_of_range(x: impl Into<i64>, y: impl Into<i64>, width: u32, height: u32) -> Self {
        MapError::OutOfRange {
            x: x.into(),
            y: y.into(),
            width,
            height,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MapError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MapError::NotFound(_))
    }
}

/// Errors raised by object event handlers.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
}

/// Errors raised while delivering an update to a subscriber.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The subscriber's receiving side has gone away.
    #[error("Subscriber channel closed")]
    Closed,

    #[error("Delivery failed: {0}")]
    Failed(String),
}

pub type MapResult<T> = Result<T, MapError>;
pub type BackendResult<T> = Result<T, BackendError>;
