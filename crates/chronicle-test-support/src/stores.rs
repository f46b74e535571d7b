//! Test stores — failing and flaky storage implementations for tests.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chronicle_core::checkpoint::{Checkpoint, CheckpointStore};
use chronicle_core::error::DomainError;
use chronicle_core::event::{NewEvent, StoredEvent, StreamId};
use chronicle_core::memory::{InMemoryCheckpointStore, InMemoryEventStore};
use chronicle_core::snapshot::{Snapshot, SnapshotStore};
use chronicle_core::store::EventStore;

fn unavailable() -> DomainError {
    DomainError::StorageUnavailable("connection refused".into())
}

/// Decrements `remaining` and reports whether this call should fail.
fn take_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// An event store whose every operation fails with a transient storage
/// error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append(
        &self,
        _stream_id: &StreamId,
        _expected_version: i64,
        _events: &[NewEvent],
    ) -> Result<i64, DomainError> {
        Err(unavailable())
    }

    async fn read_stream(
        &self,
        _stream_id: &StreamId,
        _from_version: i64,
        _batch_size: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Err(unavailable())
    }

    async fn read_all(
        &self,
        _from_global_sequence: i64,
        _batch_size: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Err(unavailable())
    }

    async fn stream_version(&self, _stream_id: &StreamId) -> Result<i64, DomainError> {
        Err(unavailable())
    }

    async fn head_global_sequence(&self) -> Result<i64, DomainError> {
        Err(unavailable())
    }
}

/// An in-memory event store whose next `failures` reads (`read_stream` and
/// `read_all`) fail with a transient storage error.
#[derive(Debug, Default)]
pub struct FlakyEventStore {
    inner: InMemoryEventStore,
    remaining_failures: AtomicU32,
}

impl FlakyEventStore {
    /// Wraps `inner`, failing the next `failures` reads.
    #[must_use]
    pub fn new(inner: InMemoryEventStore, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
        }
    }

    /// Returns the number of failures not yet triggered.
    #[must_use]
    pub fn remaining_failures(&self) -> u32 {
        self.remaining_failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStore for FlakyEventStore {
    async fn append(
        &self,
        stream_id: &StreamId,
        expected_version: i64,
        events: &[NewEvent],
    ) -> Result<i64, DomainError> {
        self.inner.append(stream_id, expected_version, events).await
    }

    async fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version: i64,
        batch_size: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        if take_failure(&self.remaining_failures) {
            return Err(unavailable());
        }
        self.inner
            .read_stream(stream_id, from_version, batch_size)
            .await
    }

    async fn read_all(
        &self,
        from_global_sequence: i64,
        batch_size: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        if take_failure(&self.remaining_failures) {
            return Err(unavailable());
        }
        self.inner.read_all(from_global_sequence, batch_size).await
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<i64, DomainError> {
        self.inner.stream_version(stream_id).await
    }

    async fn head_global_sequence(&self) -> Result<i64, DomainError> {
        self.inner.head_global_sequence().await
    }
}

/// A snapshot store that always fails. Repositories must treat snapshots as
/// optional, so saves and loads against this store still succeed from the
/// caller's point of view.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSnapshotStore;

#[async_trait]
impl SnapshotStore for FailingSnapshotStore {
    async fn save(&self, _snapshot: Snapshot) -> Result<(), DomainError> {
        Err(unavailable())
    }

    async fn load_latest(&self, _stream_id: &StreamId) -> Result<Option<Snapshot>, DomainError> {
        Err(unavailable())
    }
}

/// An in-memory checkpoint store whose next `failures` saves fail.
///
/// Simulates a process that dies after a projection handled a batch but
/// before its checkpoint was written.
#[derive(Debug, Default)]
pub struct FlakyCheckpointStore {
    inner: InMemoryCheckpointStore,
    remaining_failures: AtomicU32,
}

impl FlakyCheckpointStore {
    /// Wraps `inner`, failing the next `failures` saves.
    #[must_use]
    pub fn new(inner: InMemoryCheckpointStore, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl CheckpointStore for FlakyCheckpointStore {
    async fn get_checkpoint(&self, projection_name: &str) -> Result<i64, DomainError> {
        self.inner.get_checkpoint(projection_name).await
    }

    async fn save_checkpoint(
        &self,
        projection_name: &str,
        global_sequence: i64,
    ) -> Result<(), DomainError> {
        if take_failure(&self.remaining_failures) {
            return Err(unavailable());
        }
        self.inner
            .save_checkpoint(projection_name, global_sequence)
            .await
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, DomainError> {
        self.inner.list_checkpoints().await
    }
}
