//! Domain event abstractions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::EventContext;
use crate::error::DomainError;

/// Identity of an event stream (one aggregate instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Creates a stream identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for StreamId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An event produced by an aggregate mutation that has not been appended yet.
///
/// The store assigns the stream, version and global sequence on append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name used as the decoding discriminator.
    pub event_type: String,
    /// Schema version of `payload`.
    pub schema_version: i32,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the event/command that caused it.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Stream this event belongs to.
    pub stream_id: StreamId,
    /// Type name for deserialization routing.
    pub event_type: String,
    /// Schema version of `payload`.
    pub schema_version: i32,
    /// Version within the stream, starting at 1.
    pub version: i64,
    /// Store-assigned position in the global order.
    pub global_sequence: i64,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Builds the stored form of `event` once the store has assigned its
    /// position.
    #[must_use]
    pub fn from_new(
        stream_id: StreamId,
        version: i64,
        global_sequence: i64,
        event: &NewEvent,
    ) -> Self {
        Self {
            event_id: event.event_id,
            stream_id,
            event_type: event.event_type.clone(),
            schema_version: event.schema_version,
            version,
            global_sequence,
            payload: event.payload.clone(),
            correlation_id: event.correlation_id,
            causation_id: event.causation_id,
            occurred_at: event.occurred_at,
        }
    }
}

/// Trait that all domain event enums implement.
///
/// Each variant maps to one `event_type` string; decoding dispatches on that
/// string rather than on a type hierarchy.
pub trait DomainEvent: Send + Sync + fmt::Debug + Sized {
    /// Returns the event type name (used for serialization routing).
    fn event_type(&self) -> &'static str;

    /// Current schema version written for this event's type.
    fn schema_version(&self) -> i32 {
        1
    }

    /// Serializes the event payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    fn to_payload(&self) -> Result<serde_json::Value, DomainError>;

    /// Decodes an event from its type discriminator and current-schema payload.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` for unknown event types or
    /// payloads that do not match the type's schema.
    fn from_payload(event_type: &str, payload: serde_json::Value) -> Result<Self, DomainError>;

    /// Wraps the event for appending.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    fn to_new_event(
        &self,
        context: &EventContext,
        occurred_at: DateTime<Utc>,
    ) -> Result<NewEvent, DomainError> {
        Ok(NewEvent {
            event_id: Uuid::new_v4(),
            event_type: self.event_type().to_owned(),
            schema_version: self.schema_version(),
            payload: self.to_payload()?,
            correlation_id: context.correlation_id,
            causation_id: context.causation_id,
            occurred_at,
        })
    }
}

/// Decodes a typed payload, tagging failures with the event type.
///
/// # Errors
///
/// Returns `DomainError::Serialization` if `payload` does not match `T`.
pub fn decode_payload<T: DeserializeOwned>(
    event_type: &str,
    payload: serde_json::Value,
) -> Result<T, DomainError> {
    serde_json::from_value(payload)
        .map_err(|e| DomainError::Serialization(format!("invalid {event_type} payload: {e}")))
}

/// Encodes a typed payload.
///
/// # Errors
///
/// Returns `DomainError::Serialization` if `payload` cannot be encoded.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(payload).map_err(DomainError::from)
}
