//! Projection engine.
//!
//! Each registered projection (or projection shard) runs its own loop on a
//! tokio task:
//!
//! 1. read its checkpoint (0 if none),
//! 2. read the next batch of events in global order,
//! 3. upcast and hand every event it handles to the projection,
//! 4. advance the checkpoint to the last event of the batch.
//!
//! Delivery is at-least-once: a crash between step 3 and step 4 replays the
//! batch, so handlers must be idempotent. The checkpoint never moves past an
//! event whose handler has not returned successfully.
//!
//! A handler failure halts only the failing loop; transient storage failures
//! are retried with capped exponential backoff. Shutdown is observed between
//! batches, never in the middle of one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::checkpoint::{CheckpointStore, DeadLetter, DeadLetterQueue};
use crate::clock::{Clock, SystemClock};
use crate::config::ProjectionConfig;
use crate::error::DomainError;
use crate::event::{StoredEvent, StreamId};
use crate::store::EventStore;
use crate::upcast::UpcasterRegistry;

/// A read model fed from the global event order.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Unique name; also the checkpoint key.
    fn name(&self) -> &str;

    /// Event types this projection handles. Other events are skipped but
    /// still advance the checkpoint.
    fn handled_event_types(&self) -> &[&'static str];

    /// Applies one (already upcast) event to the read model.
    ///
    /// Must be idempotent, e.g. an upsert keyed by a natural key, because an
    /// event is re-delivered if the process stops before its checkpoint is
    /// saved.
    ///
    /// # Errors
    ///
    /// Any error halts this projection. `DomainError::StorageUnavailable` is
    /// treated as transient and retried instead.
    async fn handle(&self, event: &StoredEvent) -> Result<(), DomainError>;
}

/// A hash partition of streams handled by one projection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    index: u32,
    count: u32,
}

impl Shard {
    /// Creates shard `index` of `count`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `count` is zero or `index` is out
    /// of range.
    pub fn new(index: u32, count: u32) -> Result<Self, DomainError> {
        if count == 0 || index >= count {
            return Err(DomainError::Validation(format!(
                "invalid shard {index} of {count}"
            )));
        }
        Ok(Self { index, count })
    }

    /// Returns the shard index.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the number of shards.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Returns `true` if events of `stream_id` belong to this shard.
    ///
    /// Assignment uses the first eight bytes of the SHA-256 of the stream id,
    /// so it is stable across processes and releases.
    #[must_use]
    pub fn owns(&self, stream_id: &StreamId) -> bool {
        let digest = Sha256::digest(stream_id.as_str().as_bytes());
        let mut prefix = [0_u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix) % u64::from(self.count) == u64::from(self.index)
    }

    fn checkpoint_name(&self, projection_name: &str) -> String {
        format!("{projection_name}[{}/{}]", self.index, self.count)
    }
}

/// Result of a single batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// No events after the checkpoint.
    Idle,
    /// A batch was processed and the checkpoint advanced.
    Advanced {
        /// Events read in the batch.
        processed: usize,
        /// Events handed to the projection.
        handled: usize,
        /// The new checkpoint.
        checkpoint: i64,
    },
}

/// Drives one projection (or one shard of it).
pub struct ProjectionRunner {
    projection: Arc<dyn Projection>,
    checkpoint_name: String,
    shard: Option<Shard>,
    events: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    upcasters: Arc<UpcasterRegistry>,
    dead_letters: Option<Arc<dyn DeadLetterQueue>>,
    clock: Arc<dyn Clock>,
    config: ProjectionConfig,
}

impl std::fmt::Debug for ProjectionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionRunner")
            .field("checkpoint_name", &self.checkpoint_name)
            .field("shard", &self.shard)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProjectionRunner {
    /// Creates an unsharded runner with default configuration.
    #[must_use]
    pub fn new(
        projection: Arc<dyn Projection>,
        events: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            checkpoint_name: projection.name().to_owned(),
            projection,
            shard: None,
            events,
            checkpoints,
            upcasters: Arc::new(UpcasterRegistry::new()),
            dead_letters: None,
            clock: Arc::new(SystemClock),
            config: ProjectionConfig::default(),
        }
    }

    /// Restricts the runner to one shard, with its own checkpoint.
    #[must_use]
    pub fn with_shard(mut self, shard: Shard) -> Self {
        self.checkpoint_name = shard.checkpoint_name(self.projection.name());
        self.shard = Some(shard);
        self
    }

    /// Upcasts events before handing them to the projection.
    #[must_use]
    pub fn with_upcasters(mut self, upcasters: Arc<UpcasterRegistry>) -> Self {
        self.upcasters = upcasters;
        self
    }

    /// Parks failing events in `dead_letters`.
    #[must_use]
    pub fn with_dead_letters(mut self, dead_letters: Arc<dyn DeadLetterQueue>) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    /// Uses `clock` to timestamp dead letters.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the configuration is invalid.
    pub fn with_config(mut self, config: ProjectionConfig) -> Result<Self, DomainError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Name under which this runner's checkpoint is stored.
    #[must_use]
    pub fn checkpoint_name(&self) -> &str {
        &self.checkpoint_name
    }

    /// Processes the next batch after the stored checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ProjectionHandler` if the projection failed on an
    /// event (the checkpoint then points at the last event that completed),
    /// or the storage error that interrupted the batch.
    #[instrument(skip(self), fields(projection = %self.checkpoint_name))]
    pub async fn run_batch(&self) -> Result<BatchOutcome, DomainError> {
        let checkpoint = self.checkpoints.get_checkpoint(&self.checkpoint_name).await?;
        let batch = self
            .events
            .read_all(checkpoint, self.config.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(BatchOutcome::Idle);
        }

        let processed = batch.len();
        let mut completed = checkpoint;
        let mut handled = 0;
        for stored in batch {
            if stored.global_sequence <= completed {
                continue;
            }
            if self.shard.is_none_or(|shard| shard.owns(&stored.stream_id)) {
                match self.dispatch(&stored).await {
                    Ok(true) => handled += 1,
                    Ok(false) => {}
                    Err(err) => return Err(self.fail(checkpoint, completed, stored, err).await),
                }
            }
            completed = stored.global_sequence;
        }

        self.checkpoints
            .save_checkpoint(&self.checkpoint_name, completed)
            .await?;
        debug!(processed, handled, checkpoint = completed, "batch applied");
        Ok(BatchOutcome::Advanced {
            processed,
            handled,
            checkpoint: completed,
        })
    }

    /// Runs batches until `shutdown` flips to `true` (or its sender is
    /// dropped) or the projection fails.
    ///
    /// # Errors
    ///
    /// Returns the error that halted the projection. Transient storage errors
    /// are retried and never returned.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), DomainError> {
        info!(projection = %self.checkpoint_name, "projection started");
        let mut backoff = self.config.initial_backoff;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let wait = match self.run_batch().await {
                Ok(BatchOutcome::Advanced { .. }) => {
                    backoff = self.config.initial_backoff;
                    continue;
                }
                Ok(BatchOutcome::Idle) => {
                    backoff = self.config.initial_backoff;
                    self.log_lag().await;
                    self.config.poll_interval
                }
                Err(err) if err.is_retryable() => {
                    let delay = with_jitter(backoff);
                    warn!(
                        projection = %self.checkpoint_name,
                        error = %err,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "projection storage failure, retrying"
                    );
                    backoff = backoff.saturating_mul(2).min(self.config.max_backoff);
                    delay
                }
                Err(err) => {
                    error!(projection = %self.checkpoint_name, error = %err, "projection halted");
                    return Err(err);
                }
            };

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(projection = %self.checkpoint_name, "projection stopped");
        Ok(())
    }

    /// Upcasts and hands an event to the projection if it handles the type.
    async fn dispatch(&self, stored: &StoredEvent) -> Result<bool, DomainError> {
        let event = self.upcasters.upcast(stored.clone())?;
        if !self
            .projection
            .handled_event_types()
            .contains(&event.event_type.as_str())
        {
            return Ok(false);
        }
        self.projection.handle(&event).await?;
        Ok(true)
    }

    /// Records progress up to the last completed event and turns the handler
    /// error into the runner's result.
    async fn fail(
        &self,
        checkpoint: i64,
        completed: i64,
        stored: StoredEvent,
        err: DomainError,
    ) -> DomainError {
        if completed > checkpoint
            && let Err(save_err) = self
                .checkpoints
                .save_checkpoint(&self.checkpoint_name, completed)
                .await
        {
            warn!(error = %save_err, checkpoint = completed, "failed to save partial progress");
        }

        if err.is_retryable() {
            return err;
        }

        error!(
            global_sequence = stored.global_sequence,
            stream_id = %stored.stream_id,
            event_type = %stored.event_type,
            error = %err,
            "projection handler failed"
        );
        let failure = DomainError::ProjectionHandler {
            projection: self.checkpoint_name.clone(),
            global_sequence: stored.global_sequence,
            message: err.to_string(),
        };
        if let Some(dead_letters) = &self.dead_letters {
            let letter = DeadLetter {
                projection_name: self.checkpoint_name.clone(),
                event: stored,
                error: err.to_string(),
                failed_at: self.clock.now(),
            };
            if let Err(dlq_err) = dead_letters.push(letter).await {
                warn!(error = %dlq_err, "failed to dead-letter event");
            }
        }
        failure
    }

    async fn log_lag(&self) {
        let (Ok(head), Ok(checkpoint)) = (
            self.events.head_global_sequence().await,
            self.checkpoints.get_checkpoint(&self.checkpoint_name).await,
        ) else {
            return;
        };
        debug!(
            projection = %self.checkpoint_name,
            checkpoint,
            lag = head - checkpoint,
            "projection idle"
        );
    }
}

/// Adds up to 25% random jitter to a retry delay.
fn with_jitter(delay: Duration) -> Duration {
    let quarter = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
    if quarter == 0 {
        return delay;
    }
    let jitter = rand::rng().random_range(0..=quarter);
    delay.saturating_add(Duration::from_millis(jitter))
}

/// How a projection task ended.
#[derive(Debug)]
pub struct ProjectionExit {
    /// Checkpoint name of the runner.
    pub projection: String,
    /// `Ok` after a clean shutdown, the halting error otherwise.
    pub result: Result<(), DomainError>,
}

/// Registers projections and starts one task per projection (or shard).
pub struct ProjectionEngine {
    events: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    upcasters: Arc<UpcasterRegistry>,
    dead_letters: Option<Arc<dyn DeadLetterQueue>>,
    clock: Arc<dyn Clock>,
    config: ProjectionConfig,
    registrations: Vec<(Arc<dyn Projection>, Option<Shard>)>,
}

impl std::fmt::Debug for ProjectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionEngine")
            .field("runners", &self.runner_names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProjectionEngine {
    /// Creates an engine with no projections.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            events,
            checkpoints,
            upcasters: Arc::new(UpcasterRegistry::new()),
            dead_letters: None,
            clock: Arc::new(SystemClock),
            config: ProjectionConfig::default(),
            registrations: Vec::new(),
        }
    }

    /// Upcasts events for every projection.
    #[must_use]
    pub fn with_upcasters(mut self, upcasters: Arc<UpcasterRegistry>) -> Self {
        self.upcasters = upcasters;
        self
    }

    /// Dead-letters failing events for every projection.
    #[must_use]
    pub fn with_dead_letters(mut self, dead_letters: Arc<dyn DeadLetterQueue>) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    /// Uses `clock` for dead-letter timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the configuration is invalid.
    pub fn with_config(mut self, config: ProjectionConfig) -> Result<Self, DomainError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Registers a projection with a single loop.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if a projection with the same name is
    /// already registered.
    pub fn register(&mut self, projection: Arc<dyn Projection>) -> Result<(), DomainError> {
        self.ensure_unique(projection.name())?;
        self.registrations.push((projection, None));
        Ok(())
    }

    /// Registers a projection split into `shard_count` loops by stream hash.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a duplicate name or a zero
    /// shard count.
    pub fn register_sharded(
        &mut self,
        projection: Arc<dyn Projection>,
        shard_count: u32,
    ) -> Result<(), DomainError> {
        self.ensure_unique(projection.name())?;
        if shard_count == 0 {
            return Err(DomainError::Validation(
                "shard_count must be greater than zero".into(),
            ));
        }
        for index in 0..shard_count {
            let shard = Shard::new(index, shard_count)?;
            self.registrations
                .push((Arc::clone(&projection), Some(shard)));
        }
        Ok(())
    }

    /// Checkpoint names of all registered runners.
    #[must_use]
    pub fn runner_names(&self) -> Vec<String> {
        self.runners().map(|r| r.checkpoint_name).collect()
    }

    /// Spawns every runner on the current tokio runtime.
    #[must_use]
    pub fn start(self) -> ProjectionEngineHandle {
        let (shutdown, receiver) = watch::channel(false);
        let tasks = self
            .runners()
            .map(|runner| {
                let name = runner.checkpoint_name.clone();
                let task = tokio::spawn(runner.run(receiver.clone()));
                (name, task)
            })
            .collect();
        ProjectionEngineHandle { shutdown, tasks }
    }

    fn runners(&self) -> impl Iterator<Item = ProjectionRunner> + '_ {
        self.registrations.iter().map(|(projection, shard)| {
            let mut runner = ProjectionRunner::new(
                Arc::clone(projection),
                Arc::clone(&self.events),
                Arc::clone(&self.checkpoints),
            )
            .with_upcasters(Arc::clone(&self.upcasters))
            .with_clock(Arc::clone(&self.clock));
            runner.config = self.config.clone();
            if let Some(dead_letters) = &self.dead_letters {
                runner = runner.with_dead_letters(Arc::clone(dead_letters));
            }
            match shard {
                Some(shard) => runner.with_shard(*shard),
                None => runner,
            }
        })
    }

    fn ensure_unique(&self, name: &str) -> Result<(), DomainError> {
        if self
            .registrations
            .iter()
            .any(|(projection, _)| projection.name() == name)
        {
            return Err(DomainError::Validation(format!(
                "projection {name} is already registered"
            )));
        }
        Ok(())
    }
}

/// Handle to the running projection tasks.
///
/// Dropping the handle does not stop the tasks; call
/// [`shutdown`](Self::shutdown).
#[derive(Debug)]
pub struct ProjectionEngineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<Result<(), DomainError>>)>,
}

impl ProjectionEngineHandle {
    /// Checkpoint names of the spawned runners.
    #[must_use]
    pub fn projection_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Returns `true` while the named runner's task has not finished.
    #[must_use]
    pub fn is_running(&self, projection: &str) -> bool {
        self.tasks
            .iter()
            .any(|(name, task)| name == projection && !task.is_finished())
    }

    /// Signals every runner to stop after its current batch and waits for
    /// all of them.
    pub async fn shutdown(self) -> Vec<ProjectionExit> {
        self.shutdown.send_replace(true);
        let mut exits = Vec::with_capacity(self.tasks.len());
        for (projection, task) in self.tasks {
            let result = task.await.unwrap_or_else(|join_err| {
                Err(DomainError::Infrastructure(format!(
                    "projection task failed: {join_err}"
                )))
            });
            exits.push(ProjectionExit { projection, result });
        }
        exits
    }
}
