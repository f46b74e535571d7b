//! Snapshot support for bounded aggregate replay.
//!
//! Snapshots are a cache: they can be deleted or regenerated at any time and
//! are never a source of truth. The repository falls back to full replay
//! whenever a snapshot is missing, unreadable or fails to deserialize.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::event::StreamId;

/// Point-in-time serialized aggregate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Stream the snapshot was taken from.
    pub stream_id: StreamId,
    /// Stream version the state reflects.
    pub version: i64,
    /// Serialized aggregate state.
    pub state: serde_json::Value,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

/// Persistence for aggregate snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Stores a snapshot. Saving the same `(stream_id, version)` twice
    /// replaces the earlier state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` on storage failures.
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError>;

    /// Loads the snapshot with the highest version for a stream.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` on storage failures and
    /// `DomainError::Serialization` if the stored row cannot be read.
    async fn load_latest(&self, stream_id: &StreamId) -> Result<Option<Snapshot>, DomainError>;
}

/// Snapshot store that never stores anything.
///
/// The default for repositories that are not configured with snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSnapshots;

#[async_trait]
impl SnapshotStore for NoSnapshots {
    async fn save(&self, _snapshot: Snapshot) -> Result<(), DomainError> {
        Ok(())
    }

    async fn load_latest(&self, _stream_id: &StreamId) -> Result<Option<Snapshot>, DomainError> {
        Ok(None)
    }
}
