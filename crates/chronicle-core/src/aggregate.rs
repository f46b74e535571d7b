//! Aggregate root abstraction.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::clock::Clock;
use crate::command::EventContext;
use crate::error::DomainError;
use crate::event::{DomainEvent, NewEvent, StreamId};

/// Domain state of an aggregate, reconstituted by applying its events.
///
/// `Default` is the zero-value state replay starts from when no snapshot is
/// available. The state is serialized as-is into snapshots.
pub trait AggregateRoot:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Aggregate type name, used for logging.
    const AGGREGATE_TYPE: &'static str;

    /// Apply an event to mutate internal state. Must not fail and must not
    /// consult anything but the event and the current state.
    fn apply(&mut self, event: &Self::Event);
}

/// An aggregate loaded by the repository, together with the events recorded
/// since it was loaded.
///
/// The uncommitted buffer belongs to this envelope rather than to the domain
/// state: it is handed to the repository on save and cleared only once the
/// append is confirmed.
#[derive(Debug, Clone)]
pub struct Aggregate<R: AggregateRoot> {
    id: StreamId,
    version: i64,
    state: R,
    uncommitted_events: Vec<NewEvent>,
}

impl<R: AggregateRoot> Aggregate<R> {
    /// Creates an aggregate with no history.
    #[must_use]
    pub fn new(id: StreamId) -> Self {
        Self::from_parts(id, 0, R::default())
    }

    pub(crate) fn from_parts(id: StreamId, version: i64, state: R) -> Self {
        Self {
            id,
            version,
            state,
            uncommitted_events: Vec::new(),
        }
    }

    /// Returns the stream identifier.
    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    /// Returns the persisted version (number of committed events applied).
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns `true` if the stream has no committed events.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    /// Returns the current state, including uncommitted changes.
    #[must_use]
    pub fn state(&self) -> &R {
        &self.state
    }

    /// Returns the events recorded since the last load or save.
    #[must_use]
    pub fn uncommitted_events(&self) -> &[NewEvent] {
        &self.uncommitted_events
    }

    /// Applies `event` to the state and buffers it for the next save.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the event payload cannot be
    /// encoded; the state is left untouched in that case.
    pub fn record(
        &mut self,
        event: R::Event,
        context: &EventContext,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        let new_event = event.to_new_event(context, clock.now())?;
        self.state.apply(&event);
        self.uncommitted_events.push(new_event);
        Ok(())
    }

    /// Marks the uncommitted events as persisted at `new_version`.
    pub(crate) fn mark_committed(&mut self, new_version: i64) {
        self.version = new_version;
        self.uncommitted_events.clear();
    }
}
