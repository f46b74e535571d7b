//! Chronicle projector — startup and runtime errors.

use chronicle_core::error::DomainError;
use thiserror::Error;

/// Errors that stop the projector process.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The tracing subscriber or the OTLP exporter could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Schema migration, engine wiring or signal handling failed.
    #[error("server error: {0}")]
    Server(String),
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        Self::Server(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Server(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_becomes_server_error() {
        let err = AppError::from(DomainError::Validation("batch_size must be greater than zero".into()));

        assert_eq!(
            err.to_string(),
            "server error: validation error: batch_size must be greater than zero"
        );
    }

    #[test]
    fn test_sqlx_error_becomes_database_error() {
        let err = AppError::from(sqlx::Error::PoolTimedOut);

        assert!(matches!(err, AppError::Database(_)));
    }
}
