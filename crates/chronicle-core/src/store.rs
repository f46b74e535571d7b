//! Event store abstraction.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::{NewEvent, StoredEvent, StreamId};

/// Append-only, versioned per-stream event log with a global order.
///
/// Implementations must assign versions and global sequences inside the same
/// atomic unit as the durability write: a batch is either fully appended or
/// not at all.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to a stream with optimistic concurrency.
    ///
    /// `expected_version` must equal the stream's current version (0 for a
    /// new stream). The batch receives versions `expected_version + 1 ..=
    /// expected_version + events.len()`. An empty batch appends nothing and
    /// returns the current version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the stream has moved on,
    /// `DomainError::StorageUnavailable` on transient storage failures and
    /// `DomainError::Serialization` if an event cannot be written.
    async fn append(
        &self,
        stream_id: &StreamId,
        expected_version: i64,
        events: &[NewEvent],
    ) -> Result<i64, DomainError>;

    /// Reads up to `batch_size` events of one stream with `version >
    /// from_version`, ordered by version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` on transient storage failures.
    async fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version: i64,
        batch_size: usize,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Reads up to `batch_size` events across all streams with
    /// `global_sequence > from_global_sequence`, in global order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` on transient storage failures.
    async fn read_all(
        &self,
        from_global_sequence: i64,
        batch_size: usize,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Current version of a stream; 0 if it has no events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` on transient storage failures.
    async fn stream_version(&self, stream_id: &StreamId) -> Result<i64, DomainError>;

    /// Highest global sequence assigned so far; 0 for an empty store.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` on transient storage failures.
    async fn head_global_sequence(&self) -> Result<i64, DomainError>;
}
