//! In-memory store implementations.
//!
//! Thread-safe reference implementations of every storage trait, suitable for
//! tests, examples and single-process deployments. Locks are never held across
//! an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::checkpoint::{Checkpoint, CheckpointStore, DeadLetter, DeadLetterQueue};
use crate::error::DomainError;
use crate::event::{NewEvent, StoredEvent, StreamId};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::store::EventStore;

fn poisoned<T>(_: PoisonError<T>) -> DomainError {
    DomainError::Infrastructure("in-memory store lock poisoned".into())
}

fn to_i64(n: usize) -> Result<i64, DomainError> {
    i64::try_from(n).map_err(|_| DomainError::Infrastructure("event count overflow".into()))
}

/// Clamps a non-negative position to an index; negative positions read from
/// the start.
fn to_index(position: i64) -> usize {
    usize::try_from(position).unwrap_or(0)
}

#[derive(Debug, Default)]
struct EventLog {
    /// Every event in global order; `log[i].global_sequence == i + 1`.
    log: Vec<StoredEvent>,
    /// Indices into `log` per stream, in version order.
    streams: HashMap<StreamId, Vec<usize>>,
}

/// In-memory event store.
///
/// A single write lock covers the version check, position assignment and
/// insertion, so every append is atomic and global sequences follow commit
/// order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<EventLog>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[instrument(skip(self, events), fields(event_count = events.len()))]
    async fn append(
        &self,
        stream_id: &StreamId,
        expected_version: i64,
        events: &[NewEvent],
    ) -> Result<i64, DomainError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let current = to_i64(inner.streams.get(stream_id).map_or(0, Vec::len))?;

        if current != expected_version {
            debug!(current, "version mismatch, rejecting append");
            return Err(DomainError::ConcurrencyConflict {
                stream_id: stream_id.clone(),
                expected: expected_version,
                actual: current,
            });
        }
        if events.is_empty() {
            return Ok(current);
        }

        let mut version = current;
        let mut indices = Vec::with_capacity(events.len());
        for event in events {
            version += 1;
            let index = inner.log.len();
            let global_sequence = to_i64(index + 1)?;
            inner.log.push(StoredEvent::from_new(
                stream_id.clone(),
                version,
                global_sequence,
                event,
            ));
            indices.push(index);
        }
        inner
            .streams
            .entry(stream_id.clone())
            .or_default()
            .extend(indices);
        drop(inner);

        debug!(new_version = version, "events appended to stream");
        Ok(version)
    }

    async fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version: i64,
        batch_size: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let inner = self.inner.read().map_err(poisoned)?;
        let Some(indices) = inner.streams.get(stream_id) else {
            return Ok(Vec::new());
        };
        Ok(indices
            .iter()
            .skip(to_index(from_version))
            .take(batch_size)
            .map(|&i| inner.log[i].clone())
            .collect())
    }

    async fn read_all(
        &self,
        from_global_sequence: i64,
        batch_size: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .log
            .iter()
            .skip(to_index(from_global_sequence))
            .take(batch_size)
            .cloned()
            .collect())
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<i64, DomainError> {
        let inner = self.inner.read().map_err(poisoned)?;
        to_i64(inner.streams.get(stream_id).map_or(0, Vec::len))
    }

    async fn head_global_sequence(&self) -> Result<i64, DomainError> {
        let inner = self.inner.read().map_err(poisoned)?;
        to_i64(inner.log.len())
    }
}

/// In-memory snapshot store that keeps every snapshot version.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    inner: Arc<RwLock<HashMap<StreamId, BTreeMap<i64, Snapshot>>>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Versions at which snapshots exist for a stream, ascending.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the lock is poisoned.
    pub fn saved_versions(&self, stream_id: &StreamId) -> Result<Vec<i64>, DomainError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .get(stream_id)
            .map(|by_version| by_version.keys().copied().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner
            .entry(snapshot.stream_id.clone())
            .or_default()
            .insert(snapshot.version, snapshot);
        Ok(())
    }

    async fn load_latest(&self, stream_id: &StreamId) -> Result<Option<Snapshot>, DomainError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .get(stream_id)
            .and_then(|by_version| by_version.last_key_value())
            .map(|(_, snapshot)| snapshot.clone()))
    }
}

/// In-memory checkpoint store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    inner: Arc<Mutex<BTreeMap<String, i64>>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get_checkpoint(&self, projection_name: &str) -> Result<i64, DomainError> {
        let inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner.get(projection_name).copied().unwrap_or(0))
    }

    async fn save_checkpoint(
        &self,
        projection_name: &str,
        global_sequence: i64,
    ) -> Result<(), DomainError> {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        let stored = inner.entry(projection_name.to_owned()).or_insert(0);
        *stored = (*stored).max(global_sequence);
        Ok(())
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, DomainError> {
        let inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner
            .iter()
            .map(|(name, &global_sequence)| Checkpoint {
                projection_name: name.clone(),
                global_sequence,
            })
            .collect())
    }
}

/// In-memory dead-letter queue.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterQueue {
    inner: Arc<Mutex<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn push(&self, dead_letter: DeadLetter) -> Result<(), DomainError> {
        self.inner.lock().map_err(poisoned)?.push(dead_letter);
        Ok(())
    }

    async fn list(&self, projection_name: &str) -> Result<Vec<DeadLetter>, DomainError> {
        let inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner
            .iter()
            .filter(|letter| letter.projection_name == projection_name)
            .cloned()
            .collect())
    }
}
