//! Projection checkpoints and dead letters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::event::StoredEvent;

/// The last globally-ordered event a projection has durably processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Name of the projection (or projection shard).
    pub projection_name: String,
    /// Global sequence of the last processed event.
    pub global_sequence: i64,
}

/// Persistence for projection checkpoints.
///
/// Checkpoints are monotonic: saving a lower sequence than the stored one is
/// a no-op.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the stored checkpoint, or 0 if the projection has none.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` on storage failures.
    async fn get_checkpoint(&self, projection_name: &str) -> Result<i64, DomainError>;

    /// Advances the checkpoint to `global_sequence`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` on storage failures.
    async fn save_checkpoint(
        &self,
        projection_name: &str,
        global_sequence: i64,
    ) -> Result<(), DomainError>;

    /// Lists every stored checkpoint ordered by projection name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` on storage failures.
    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, DomainError>;
}

/// An event whose projection handler failed, parked for manual replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Projection (or shard) whose handler failed.
    pub projection_name: String,
    /// The event as read from the store, before upcasting.
    pub event: StoredEvent,
    /// The failure message.
    pub error: String,
    /// When the failure happened.
    pub failed_at: DateTime<Utc>,
}

/// Storage for dead-lettered projection events.
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Records a failed event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` on storage failures.
    async fn push(&self, dead_letter: DeadLetter) -> Result<(), DomainError>;

    /// Lists the dead letters of one projection in failure order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` on storage failures.
    async fn list(&self, projection_name: &str) -> Result<Vec<DeadLetter>, DomainError>;
}
