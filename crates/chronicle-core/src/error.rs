//! Domain error types.

use std::fmt::Display;

use thiserror::Error;

use crate::event::StreamId;

/// Top-level error type shared by the stores, the repository and the
/// projection engine.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(StreamId),

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on stream {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream_id: StreamId,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// A validation error in domain logic or configuration.
    #[error("validation error: {0}")]
    Validation(String),

    /// An event or state payload could not be encoded, decoded or upcast.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transient storage failure. Callers should retry with backoff.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A projection handler failed on a specific event.
    #[error("projection {projection} failed at global sequence {global_sequence}: {message}")]
    ProjectionHandler {
        /// The projection whose handler failed.
        projection: String,
        /// The global sequence of the failing event.
        global_sequence: i64,
        /// The handler's error message.
        message: String,
    },

    /// A non-transient infrastructure fault (corrupt stream, panicked task).
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for errors worth retrying with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Returns `true` for optimistic concurrency conflicts, which callers
    /// resolve by reloading and re-running their business operation.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Prefixes the message of string-carrying variants with `context`.
    ///
    /// The variant itself never changes, so callers can keep matching on it.
    #[must_use]
    pub fn with_context(self, context: impl Display) -> Self {
        match self {
            Self::Validation(msg) => Self::Validation(format!("{context}: {msg}")),
            Self::Serialization(msg) => Self::Serialization(format!("{context}: {msg}")),
            Self::StorageUnavailable(msg) => {
                Self::StorageUnavailable(format!("{context}: {msg}"))
            }
            Self::Infrastructure(msg) => Self::Infrastructure(format!("{context}: {msg}")),
            other => other,
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
