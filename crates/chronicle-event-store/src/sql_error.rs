//! Classification of `sqlx` errors into `DomainError`.

use chronicle_core::error::DomainError;

/// `SQLSTATE` codes worth retrying: connection exceptions (class 08), admin
/// shutdown, serialization failure and deadlock.
fn is_transient_code(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P03" | "40001" | "40P01")
}

/// Maps a `sqlx` error onto the domain error taxonomy.
///
/// Shared with read-model stores that live outside this crate.
#[must_use]
pub fn storage_error(err: sqlx::Error) -> DomainError {
    match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => DomainError::StorageUnavailable(err.to_string()),
        sqlx::Error::Database(db) if db.code().is_some_and(|code| is_transient_code(&code)) => {
            DomainError::StorageUnavailable(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => DomainError::Serialization(err.to_string()),
        _ => DomainError::Infrastructure(err.to_string()),
    }
}

/// Returns `true` if the error is a unique-constraint violation.
#[must_use]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_retryable() {
        assert!(storage_error(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn test_missing_column_is_a_serialization_error() {
        let err = storage_error(sqlx::Error::ColumnNotFound("payload".into()));

        assert!(matches!(err, DomainError::Serialization(_)));
    }

    #[test]
    fn test_row_not_found_is_not_retryable() {
        let err = storage_error(sqlx::Error::RowNotFound);

        assert!(matches!(err, DomainError::Infrastructure(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_connection_exception_codes_are_transient() {
        assert!(is_transient_code("08006"));
        assert!(is_transient_code("40P01"));
        assert!(!is_transient_code("23505"));
    }
}
