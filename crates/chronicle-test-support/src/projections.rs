//! Test projections — recording and failing `Projection` implementations.

use std::sync::Mutex;

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::event::StoredEvent;
use chronicle_core::projection::Projection;

/// A projection that records every event it is handed.
#[derive(Debug)]
pub struct RecordingProjection {
    name: String,
    event_types: Vec<&'static str>,
    seen: Mutex<Vec<StoredEvent>>,
}

impl RecordingProjection {
    /// Creates a projection named `name` handling `event_types`.
    #[must_use]
    pub fn new(name: impl Into<String>, event_types: &[&'static str]) -> Self {
        Self {
            name: name.into(),
            event_types: event_types.to_vec(),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Returns a snapshot of all events handled so far, in delivery order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn seen(&self) -> Vec<StoredEvent> {
        self.seen.lock().unwrap().clone()
    }

    /// Returns the global sequences handled so far, in delivery order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn seen_sequences(&self) -> Vec<i64> {
        self.seen().iter().map(|e| e.global_sequence).collect()
    }
}

#[async_trait]
impl Projection for RecordingProjection {
    fn name(&self) -> &str {
        &self.name
    }

    fn handled_event_types(&self) -> &[&'static str] {
        &self.event_types
    }

    async fn handle(&self, event: &StoredEvent) -> Result<(), DomainError> {
        self.seen.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A projection whose handler always fails with a validation error.
#[derive(Debug)]
pub struct FailingProjection {
    name: String,
    event_types: Vec<&'static str>,
}

impl FailingProjection {
    /// Creates a projection named `name` that fails on every `event_types`
    /// event.
    #[must_use]
    pub fn new(name: impl Into<String>, event_types: &[&'static str]) -> Self {
        Self {
            name: name.into(),
            event_types: event_types.to_vec(),
        }
    }
}

#[async_trait]
impl Projection for FailingProjection {
    fn name(&self) -> &str {
        &self.name
    }

    fn handled_event_types(&self) -> &[&'static str] {
        &self.event_types
    }

    async fn handle(&self, _event: &StoredEvent) -> Result<(), DomainError> {
        Err(DomainError::Validation("read model rejected event".into()))
    }
}
