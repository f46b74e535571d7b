//! `PostgreSQL` implementation of the `CheckpointStore` trait.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use chronicle_core::checkpoint::{Checkpoint, CheckpointStore};
use chronicle_core::error::DomainError;

use crate::sql_error::storage_error;

/// PostgreSQL-backed checkpoint store.
///
/// Saves use `GREATEST`, so a stale writer can never move a checkpoint back.
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    /// Creates a new `PgCheckpointStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn get_checkpoint(&self, projection_name: &str) -> Result<i64, DomainError> {
        let checkpoint: Option<i64> = sqlx::query_scalar(
            "SELECT global_sequence FROM projection_checkpoints WHERE projection_name = $1",
        )
        .bind(projection_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(checkpoint.unwrap_or(0))
    }

    #[instrument(skip(self))]
    async fn save_checkpoint(
        &self,
        projection_name: &str,
        global_sequence: i64,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO projection_checkpoints (projection_name, global_sequence, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (projection_name) DO UPDATE
            SET global_sequence = GREATEST(
                    projection_checkpoints.global_sequence,
                    EXCLUDED.global_sequence
                ),
                updated_at = NOW()
            ",
        )
        .bind(projection_name)
        .bind(global_sequence)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, DomainError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT projection_name, global_sequence FROM projection_checkpoints \
             ORDER BY projection_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(rows
            .into_iter()
            .map(|(projection_name, global_sequence)| Checkpoint {
                projection_name,
                global_sequence,
            })
            .collect())
    }
}
