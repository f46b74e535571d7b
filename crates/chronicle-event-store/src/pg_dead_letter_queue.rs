//! `PostgreSQL` implementation of the `DeadLetterQueue` trait.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use chronicle_core::checkpoint::{DeadLetter, DeadLetterQueue};
use chronicle_core::error::DomainError;
use chronicle_core::event::StoredEvent;

use crate::sql_error::storage_error;

/// PostgreSQL-backed dead-letter queue. The failed event is stored whole as
/// JSON so it can be replayed without the events table.
#[derive(Debug, Clone)]
pub struct PgDeadLetterQueue {
    pool: PgPool,
}

impl PgDeadLetterQueue {
    /// Creates a new `PgDeadLetterQueue`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterQueue for PgDeadLetterQueue {
    #[instrument(
        skip(self, dead_letter),
        fields(
            projection = %dead_letter.projection_name,
            global_sequence = dead_letter.event.global_sequence
        )
    )]
    async fn push(&self, dead_letter: DeadLetter) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO projection_dead_letters
                (projection_name, global_sequence, stream_id, event, error, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(&dead_letter.projection_name)
        .bind(dead_letter.event.global_sequence)
        .bind(dead_letter.event.stream_id.as_str())
        .bind(sqlx::types::Json(&dead_letter.event))
        .bind(&dead_letter.error)
        .bind(dead_letter.failed_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn list(&self, projection_name: &str) -> Result<Vec<DeadLetter>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT projection_name, event, error, failed_at
            FROM projection_dead_letters
            WHERE projection_name = $1
            ORDER BY id
            ",
        )
        .bind(projection_name)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter()
            .map(|row| {
                let event: sqlx::types::Json<StoredEvent> =
                    row.try_get("event").map_err(storage_error)?;
                Ok(DeadLetter {
                    projection_name: row.try_get("projection_name").map_err(storage_error)?,
                    event: event.0,
                    error: row.try_get("error").map_err(storage_error)?,
                    failed_at: row.try_get("failed_at").map_err(storage_error)?,
                })
            })
            .collect()
    }
}
