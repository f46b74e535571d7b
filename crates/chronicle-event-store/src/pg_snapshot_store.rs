//! `PostgreSQL` implementation of the `SnapshotStore` trait.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use chronicle_core::error::DomainError;
use chronicle_core::event::StreamId;
use chronicle_core::snapshot::{Snapshot, SnapshotStore};

use crate::sql_error::storage_error;

/// PostgreSQL-backed snapshot store. Older snapshots are retained; only the
/// highest version is ever loaded.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    /// Creates a new `PgSnapshotStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes every snapshot of `stream_id` below `version`.
    ///
    /// Returns the number of deleted rows.
    ///
    /// # Errors
    ///
    /// Returns the mapped storage error if the delete fails.
    pub async fn prune(&self, stream_id: &StreamId, version: i64) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM snapshots WHERE stream_id = $1 AND version < $2")
            .bind(stream_id.as_str())
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    #[instrument(skip(self, snapshot), fields(stream_id = %snapshot.stream_id, version = snapshot.version))]
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO snapshots (stream_id, version, payload, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (stream_id, version)
            DO UPDATE SET payload = EXCLUDED.payload, created_at = EXCLUDED.created_at
            ",
        )
        .bind(snapshot.stream_id.as_str())
        .bind(snapshot.version)
        .bind(sqlx::types::Json(&snapshot.state))
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(stream_id = %stream_id))]
    async fn load_latest(&self, stream_id: &StreamId) -> Result<Option<Snapshot>, DomainError> {
        let row = sqlx::query(
            r"
            SELECT version, payload, created_at
            FROM snapshots
            WHERE stream_id = $1
            ORDER BY version DESC
            LIMIT 1
            ",
        )
        .bind(stream_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: sqlx::types::Json<serde_json::Value> =
            row.try_get("payload").map_err(storage_error)?;
        Ok(Some(Snapshot {
            stream_id: stream_id.clone(),
            version: row.try_get("version").map_err(storage_error)?,
            state: state.0,
            created_at: row.try_get("created_at").map_err(storage_error)?,
        }))
    }
}
