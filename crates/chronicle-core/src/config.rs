//! Tuning knobs for the repository and the projection engine.

use std::time::Duration;

use crate::error::DomainError;

/// Repository configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Take a snapshot whenever a save reaches a multiple of this version.
    /// `0` disables snapshotting.
    pub snapshot_interval: i64,
    /// Page size used when reading a stream during load.
    pub read_batch_size: usize,
    /// Save snapshots on a spawned task instead of inline.
    pub background_snapshots: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: 100,
            read_batch_size: 500,
            background_snapshots: true,
        }
    }
}

impl RepositoryConfig {
    /// Checks the configuration for values the repository cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a zero read batch size or a
    /// negative snapshot interval.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.read_batch_size == 0 {
            return Err(DomainError::Validation(
                "read_batch_size must be greater than zero".into(),
            ));
        }
        if self.snapshot_interval < 0 {
            return Err(DomainError::Validation(
                "snapshot_interval must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Projection runner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionConfig {
    /// Maximum number of events read per batch.
    pub batch_size: usize,
    /// How long an idle runner waits before polling again.
    pub poll_interval: Duration,
    /// First delay after a transient storage failure.
    pub initial_backoff: Duration,
    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            poll_interval: Duration::from_millis(500),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ProjectionConfig {
    /// Checks the configuration for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a zero batch size or an initial
    /// backoff larger than the maximum.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.batch_size == 0 {
            return Err(DomainError::Validation(
                "batch_size must be greater than zero".into(),
            ));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(DomainError::Validation(
                "initial_backoff must not exceed max_backoff".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RepositoryConfig::default().validate().is_ok());
        assert!(ProjectionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_read_batch_size_is_rejected() {
        let config = RepositoryConfig {
            read_batch_size: 0,
            ..RepositoryConfig::default()
        };

        assert!(matches!(config.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_inverted_backoff_is_rejected() {
        let config = ProjectionConfig {
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(1),
            ..ProjectionConfig::default()
        };

        match config.validate() {
            Err(DomainError::Validation(msg)) => {
                assert_eq!(msg, "initial_backoff must not exceed max_backoff");
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
