//! Event upcasting.
//!
//! Historical events are rewritten into the current payload shape before they
//! reach aggregate or projection code. Each registered step maps
//! `(event_type, schema_version)` to a target type/version and a pure
//! transformation of the payload. Steps are chained until no further step
//! matches.
//!
//! Transformations must be deterministic: fields missing from an old schema
//! are filled from static defaults or from fields already present in the
//! payload, never from external state, so that replay stays reproducible.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::DomainError;
use crate::event::StoredEvent;

/// A pure payload transformation.
pub type UpcastFn =
    Arc<dyn Fn(serde_json::Value) -> Result<serde_json::Value, DomainError> + Send + Sync>;

#[derive(Clone)]
struct UpcastStep {
    target_event_type: String,
    target_schema_version: i32,
    transform: UpcastFn,
}

/// Registry of upcasting steps keyed by event type and source schema version.
#[derive(Clone, Default)]
pub struct UpcasterRegistry {
    steps: HashMap<String, HashMap<i32, UpcastStep>>,
    current_versions: HashMap<String, i32>,
    step_count: usize,
}

impl fmt::Debug for UpcasterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<(&str, i32)> = self
            .steps
            .iter()
            .flat_map(|(event_type, by_version)| {
                by_version.keys().map(move |v| (event_type.as_str(), *v))
            })
            .collect();
        keys.sort_unstable();
        f.debug_struct("UpcasterRegistry")
            .field("steps", &keys)
            .field("current_versions", &self.current_versions)
            .finish()
    }
}

impl UpcasterRegistry {
    /// Creates an empty registry; every event passes through unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step upgrading `event_type` from `from_version` to
    /// `to_version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `to_version` is not greater than
    /// `from_version` or a step for the same key already exists.
    pub fn register<F>(
        &mut self,
        event_type: &str,
        from_version: i32,
        to_version: i32,
        transform: F,
    ) -> Result<(), DomainError>
    where
        F: Fn(serde_json::Value) -> Result<serde_json::Value, DomainError> + Send + Sync + 'static,
    {
        if to_version <= from_version {
            return Err(DomainError::Validation(format!(
                "upcaster for {event_type} must raise the schema version (v{from_version} -> v{to_version})"
            )));
        }
        self.insert(event_type, from_version, event_type, to_version, Arc::new(transform))
    }

    /// Registers a step that also renames the event type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if a step for the same key already
    /// exists, or if the type is unchanged and the version does not increase.
    pub fn register_renaming<F>(
        &mut self,
        event_type: &str,
        from_version: i32,
        target_event_type: &str,
        to_version: i32,
        transform: F,
    ) -> Result<(), DomainError>
    where
        F: Fn(serde_json::Value) -> Result<serde_json::Value, DomainError> + Send + Sync + 'static,
    {
        if target_event_type == event_type && to_version <= from_version {
            return Err(DomainError::Validation(format!(
                "upcaster for {event_type} must raise the schema version (v{from_version} -> v{to_version})"
            )));
        }
        self.insert(
            event_type,
            from_version,
            target_event_type,
            to_version,
            Arc::new(transform),
        )
    }

    /// Declares the schema version aggregates and projections expect for an
    /// event type. Events of that type that do not reach this version after
    /// upcasting are rejected.
    pub fn declare_current(&mut self, event_type: &str, schema_version: i32) {
        self.current_versions
            .insert(event_type.to_owned(), schema_version);
    }

    /// Number of registered steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.step_count
    }

    /// Returns `true` if no steps are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.step_count == 0
    }

    /// Upgrades an event to the newest registered shape.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if a transformation fails, the
    /// chain does not terminate, or the result does not match a declared
    /// current schema version.
    pub fn upcast(&self, mut event: StoredEvent) -> Result<StoredEvent, DomainError> {
        let mut applied = 0;
        while let Some(step) = self
            .steps
            .get(event.event_type.as_str())
            .and_then(|by_version| by_version.get(&event.schema_version))
        {
            if applied == self.step_count {
                return Err(DomainError::Serialization(format!(
                    "upcaster chain for {} does not terminate",
                    event.event_type
                )));
            }
            let payload = std::mem::take(&mut event.payload);
            event.payload = (step.transform)(payload).map_err(|e| {
                e.with_context(format!(
                    "upcasting {} v{} -> {} v{}",
                    event.event_type,
                    event.schema_version,
                    step.target_event_type,
                    step.target_schema_version
                ))
            })?;
            event.event_type.clone_from(&step.target_event_type);
            event.schema_version = step.target_schema_version;
            applied += 1;
        }

        if let Some(&current) = self.current_versions.get(event.event_type.as_str())
            && event.schema_version != current
        {
            return Err(DomainError::Serialization(format!(
                "no upcaster registered for {} v{} (current schema is v{current})",
                event.event_type, event.schema_version
            )));
        }

        Ok(event)
    }

    fn insert(
        &mut self,
        event_type: &str,
        from_version: i32,
        target_event_type: &str,
        to_version: i32,
        transform: UpcastFn,
    ) -> Result<(), DomainError> {
        let by_version = self.steps.entry(event_type.to_owned()).or_default();
        if by_version.contains_key(&from_version) {
            return Err(DomainError::Validation(format!(
                "upcaster for {event_type} v{from_version} is already registered"
            )));
        }
        by_version.insert(
            from_version,
            UpcastStep {
                target_event_type: target_event_type.to_owned(),
                target_schema_version: to_version,
                transform,
            },
        );
        self.step_count += 1;
        Ok(())
    }
}
