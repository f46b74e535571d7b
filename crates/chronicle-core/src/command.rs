//! Command abstractions.

use std::future::Future;

use tracing::warn;
use uuid::Uuid;

use crate::error::DomainError;

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;

    /// Context stamped onto every event this command produces.
    fn event_context(&self) -> EventContext {
        EventContext::new(self.correlation_id())
    }
}

/// Correlation and causation identifiers carried by new events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContext {
    /// Correlation ID shared by everything a request causes.
    pub correlation_id: Uuid,
    /// The command or event that directly caused the new events.
    pub causation_id: Uuid,
}

impl EventContext {
    /// Context for events caused directly by a command; causation equals
    /// correlation.
    #[must_use]
    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            causation_id: correlation_id,
        }
    }

    /// Context for events caused by another message in the same flow.
    #[must_use]
    pub fn caused_by(correlation_id: Uuid, causation_id: Uuid) -> Self {
        Self {
            correlation_id,
            causation_id,
        }
    }
}

/// Runs a complete load–mutate–save operation, re-running it from scratch when
/// it fails with `ConcurrencyConflict`.
///
/// `op` must reload the aggregate on every call so business rules are
/// re-validated against the latest state. Any other error is returned
/// immediately.
///
/// # Errors
///
/// Returns the last `ConcurrencyConflict` once `max_attempts` is exhausted,
/// or the first non-conflict error.
pub async fn retry_on_conflict<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_conflict() && attempt < max_attempts => {
                warn!(attempt, error = %err, "concurrency conflict, retrying command");
                attempt += 1;
            }
            result => return result,
        }
    }
}
