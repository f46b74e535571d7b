//! Event store database schema.
//!
//! The DDL lives in the workspace `migrations/` directory and is embedded
//! at compile time.

use chronicle_core::error::DomainError;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tracing::info;

/// Embedded migrations for the event store and the read models.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Applies any pending migrations.
///
/// # Errors
///
/// Returns `DomainError::StorageUnavailable` if the database cannot be
/// reached and `DomainError::Infrastructure` if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), DomainError> {
    MIGRATOR.run(pool).await.map_err(|err| match err {
        sqlx::migrate::MigrateError::Execute(inner) => crate::sql_error::storage_error(inner),
        other => DomainError::Infrastructure(format!("migration failed: {other}")),
    })?;
    info!("event store schema is up to date");
    Ok(())
}
