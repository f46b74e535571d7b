//! Aggregate repository: snapshot-aware load and optimistic save.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::aggregate::{Aggregate, AggregateRoot};
use crate::clock::Clock;
use crate::config::RepositoryConfig;
use crate::error::DomainError;
use crate::event::{DomainEvent, StreamId};
use crate::snapshot::{NoSnapshots, Snapshot, SnapshotStore};
use crate::store::EventStore;
use crate::upcast::UpcasterRegistry;

/// Loads and saves aggregates of type `R`.
///
/// Loading reads the latest snapshot (if any) and replays the events after
/// it, upcasting each one first. Saving appends the uncommitted events with
/// the aggregate's version as the expected version and, when the new version
/// reaches a multiple of the snapshot interval, stores a snapshot.
///
/// The repository never retries a conflicting save: the caller must reload
/// and re-run its business logic (see
/// [`retry_on_conflict`](crate::command::retry_on_conflict)).
pub struct AggregateRepository<R: AggregateRoot> {
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    upcasters: Arc<UpcasterRegistry>,
    clock: Arc<dyn Clock>,
    config: RepositoryConfig,
    _aggregate: PhantomData<fn() -> R>,
}

impl<R: AggregateRoot> Clone for AggregateRepository<R> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            snapshots: Arc::clone(&self.snapshots),
            upcasters: Arc::clone(&self.upcasters),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            _aggregate: PhantomData,
        }
    }
}

impl<R: AggregateRoot> std::fmt::Debug for AggregateRepository<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateRepository")
            .field("aggregate_type", &R::AGGREGATE_TYPE)
            .field("upcasters", &self.upcasters)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<R: AggregateRoot> AggregateRepository<R> {
    /// Creates a repository without snapshots or upcasters.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            events,
            snapshots: Arc::new(NoSnapshots),
            upcasters: Arc::new(UpcasterRegistry::new()),
            clock,
            config: RepositoryConfig::default(),
            _aggregate: PhantomData,
        }
    }

    /// Uses `snapshots` to bound replay cost.
    #[must_use]
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Upcasts every loaded event through `upcasters`.
    #[must_use]
    pub fn with_upcasters(mut self, upcasters: Arc<UpcasterRegistry>) -> Self {
        self.upcasters = upcasters;
        self
    }

    /// Replaces the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the configuration is invalid.
    pub fn with_config(mut self, config: RepositoryConfig) -> Result<Self, DomainError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Returns the repository configuration.
    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Returns the clock shared with command handlers.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Reconstitutes an aggregate. A stream without events yields a new
    /// aggregate at version 0.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageUnavailable` if the event store fails,
    /// `DomainError::Serialization` if an event cannot be upcast or decoded,
    /// and `DomainError::Infrastructure` if the stream has a version gap.
    #[instrument(skip(self), fields(aggregate_type = R::AGGREGATE_TYPE))]
    pub async fn load(&self, id: &StreamId) -> Result<Aggregate<R>, DomainError> {
        let (mut state, snapshot_version) = match self.load_snapshot(id).await {
            Some((state, version)) => (state, version),
            None => (R::default(), 0),
        };
        let mut version = snapshot_version;

        loop {
            let batch = self
                .events
                .read_stream(id, version, self.config.read_batch_size)
                .await
                .map_err(|e| e.with_context(format!("load {id}")))?;
            let batch_len = batch.len();

            for stored in batch {
                if stored.version != version + 1 {
                    return Err(DomainError::Infrastructure(format!(
                        "stream {id} jumps from version {version} to {}",
                        stored.version
                    )));
                }
                let stored_version = stored.version;
                let upcast = self
                    .upcasters
                    .upcast(stored)
                    .map_err(|e| e.with_context(format!("load {id} v{stored_version}")))?;
                let event = R::Event::from_payload(&upcast.event_type, upcast.payload)
                    .map_err(|e| e.with_context(format!("load {id} v{stored_version}")))?;
                state.apply(&event);
                version = stored_version;
            }

            if batch_len < self.config.read_batch_size {
                break;
            }
        }

        debug!(
            snapshot_version,
            version,
            replayed = version - snapshot_version,
            "aggregate loaded"
        );
        Ok(Aggregate::from_parts(id.clone(), version, state))
    }

    /// Like [`load`](Self::load), but a stream without events is an error.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the stream is empty, and
    /// every error [`load`](Self::load) can return.
    pub async fn load_existing(&self, id: &StreamId) -> Result<Aggregate<R>, DomainError> {
        let aggregate = self.load(id).await?;
        if aggregate.is_new() {
            return Err(DomainError::AggregateNotFound(id.clone()));
        }
        Ok(aggregate)
    }

    /// Persists the aggregate's uncommitted events.
    ///
    /// On success the events are cleared and the aggregate's version is
    /// advanced. On failure the aggregate is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the stream advanced since
    /// the aggregate was loaded, and any other event store error with save
    /// context added.
    #[instrument(
        skip(self, aggregate),
        fields(
            aggregate_type = R::AGGREGATE_TYPE,
            stream_id = %aggregate.id(),
            expected_version = aggregate.version(),
        )
    )]
    pub async fn save(&self, aggregate: &mut Aggregate<R>) -> Result<i64, DomainError> {
        if aggregate.uncommitted_events().is_empty() {
            return Ok(aggregate.version());
        }

        let previous_version = aggregate.version();
        let new_version = self
            .events
            .append(
                aggregate.id(),
                previous_version,
                aggregate.uncommitted_events(),
            )
            .await
            .map_err(|e| e.with_context(format!("save {}", aggregate.id())))?;
        aggregate.mark_committed(new_version);
        debug!(new_version, "aggregate saved");

        if self.snapshot_due(previous_version, new_version) {
            self.take_snapshot(aggregate).await;
        }
        Ok(new_version)
    }

    async fn load_snapshot(&self, id: &StreamId) -> Option<(R, i64)> {
        let snapshot = match self.snapshots.load_latest(id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "snapshot load failed, replaying full stream");
                return None;
            }
        };
        match serde_json::from_value::<R>(snapshot.state) {
            Ok(state) => Some((state, snapshot.version)),
            Err(e) => {
                warn!(
                    error = %e,
                    snapshot_version = snapshot.version,
                    "snapshot state is unreadable, replaying full stream"
                );
                None
            }
        }
    }

    /// A snapshot is due when a save crosses a multiple of the interval.
    fn snapshot_due(&self, previous_version: i64, new_version: i64) -> bool {
        let interval = self.config.snapshot_interval;
        interval > 0 && new_version / interval > previous_version / interval
    }

    async fn take_snapshot(&self, aggregate: &Aggregate<R>) {
        let state = match serde_json::to_value(aggregate.state()) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "snapshot serialization failed, skipping");
                return;
            }
        };
        let snapshot = Snapshot {
            stream_id: aggregate.id().clone(),
            version: aggregate.version(),
            state,
            created_at: self.clock.now(),
        };

        if self.config.background_snapshots
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let snapshots = Arc::clone(&self.snapshots);
            handle.spawn(save_snapshot(snapshots, snapshot));
        } else {
            save_snapshot(Arc::clone(&self.snapshots), snapshot).await;
        }
    }
}

/// Best-effort snapshot write: failures are logged, never propagated.
async fn save_snapshot(snapshots: Arc<dyn SnapshotStore>, snapshot: Snapshot) {
    let stream_id = snapshot.stream_id.clone();
    let version = snapshot.version;
    match snapshots.save(snapshot).await {
        Ok(()) => debug!(%stream_id, version, "snapshot saved"),
        Err(e) => warn!(%stream_id, version, error = %e, "snapshot save failed"),
    }
}
