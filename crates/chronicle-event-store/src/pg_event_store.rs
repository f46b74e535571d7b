//! `PostgreSQL` implementation of the `EventStore` trait.
//!
//! Each append runs in one transaction:
//!
//! 1. lock the stream row (`SELECT ... FOR UPDATE`) and compare versions,
//! 2. insert or bump the `event_streams` row,
//! 3. take the global-sequence advisory lock,
//! 4. insert the events and commit.
//!
//! `BIGSERIAL` values are allocated before commit, so without step 3 a
//! reader could see sequence 7 committed while 6 is still in flight and move
//! its checkpoint past 6. Holding a transaction-scoped advisory lock from the
//! events insert until commit makes sequences become visible in order.
//! Version checks stay optimistic and per stream.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};

use chronicle_core::error::DomainError;
use chronicle_core::event::{NewEvent, StoredEvent, StreamId};
use chronicle_core::store::EventStore;

use crate::sql_error::{is_unique_violation, storage_error};

/// Advisory lock key serializing the tail of every append.
pub const GLOBAL_SEQUENCE_LOCK_KEY: i64 = 0x6368_726f_6e69_636c;

const EVENT_COLUMNS: &str = "global_sequence, event_id, stream_id, version, event_type, \
                             schema_version, payload, causation_id, correlation_id, occurred_at";

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conflict(&self, stream_id: &StreamId, expected: i64) -> DomainError {
        let actual = match self.stream_version(stream_id).await {
            Ok(actual) => actual,
            Err(err) => return err,
        };
        DomainError::ConcurrencyConflict {
            stream_id: stream_id.clone(),
            expected,
            actual,
        }
    }
}

fn decode_event(row: &PgRow) -> Result<StoredEvent, DomainError> {
    let stream_id: String = row.try_get("stream_id").map_err(storage_error)?;
    let payload: sqlx::types::Json<serde_json::Value> =
        row.try_get("payload").map_err(storage_error)?;
    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(storage_error)?,
        stream_id: StreamId::new(stream_id),
        event_type: row.try_get("event_type").map_err(storage_error)?,
        schema_version: row.try_get("schema_version").map_err(storage_error)?,
        version: row.try_get("version").map_err(storage_error)?,
        global_sequence: row.try_get("global_sequence").map_err(storage_error)?,
        payload: payload.0,
        correlation_id: row.try_get("correlation_id").map_err(storage_error)?,
        causation_id: row.try_get("causation_id").map_err(storage_error)?,
        occurred_at: row.try_get("occurred_at").map_err(storage_error)?,
    })
}

fn limit(batch_size: usize) -> i64 {
    i64::try_from(batch_size).unwrap_or(i64::MAX)
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip(self, events), fields(stream_id = %stream_id, event_count = events.len()))]
    async fn append(
        &self,
        stream_id: &StreamId,
        expected_version: i64,
        events: &[NewEvent],
    ) -> Result<i64, DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let current: i64 = sqlx::query_scalar(
            "SELECT version FROM event_streams WHERE stream_id = $1 FOR UPDATE",
        )
        .bind(stream_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?
        .unwrap_or(0);

        if current != expected_version {
            debug!(current, "version mismatch, rejecting append");
            return Err(DomainError::ConcurrencyConflict {
                stream_id: stream_id.clone(),
                expected: expected_version,
                actual: current,
            });
        }
        if events.is_empty() {
            return Ok(current);
        }

        let count = i64::try_from(events.len())
            .map_err(|_| DomainError::Validation("too many events in one append".into()))?;
        let new_version = expected_version + count;

        if current == 0 {
            let inserted = sqlx::query(
                "INSERT INTO event_streams (stream_id, version, updated_at) VALUES ($1, $2, NOW())",
            )
            .bind(stream_id.as_str())
            .bind(new_version)
            .execute(&mut *tx)
            .await;
            if let Err(err) = inserted {
                if is_unique_violation(&err) {
                    drop(tx);
                    debug!("stream created concurrently, rejecting append");
                    return Err(self.conflict(stream_id, expected_version).await);
                }
                return Err(storage_error(err));
            }
        } else {
            sqlx::query(
                "UPDATE event_streams SET version = $2, updated_at = NOW() WHERE stream_id = $1",
            )
            .bind(stream_id.as_str())
            .bind(new_version)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        }

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(GLOBAL_SEQUENCE_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO events (event_id, stream_id, version, event_type, schema_version, \
             payload, causation_id, correlation_id, occurred_at) ",
        );
        qb.push_values(
            events.iter().zip(expected_version + 1..),
            |mut b, (event, version)| {
                b.push_bind(event.event_id)
                    .push_bind(stream_id.as_str())
                    .push_bind(version)
                    .push_bind(event.event_type.as_str())
                    .push_bind(event.schema_version)
                    .push_bind(sqlx::types::Json(&event.payload))
                    .push_bind(event.causation_id)
                    .push_bind(event.correlation_id)
                    .push_bind(event.occurred_at);
            },
        );
        qb.push(" RETURNING global_sequence");

        let sequences: Vec<i64> = qb
            .build_query_scalar()
            .fetch_all(&mut *tx)
            .await
            .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)?;

        debug!(
            new_version,
            first_global_sequence = sequences.first().copied(),
            last_global_sequence = sequences.last().copied(),
            "events appended to stream"
        );
        Ok(new_version)
    }

    #[instrument(skip(self), fields(stream_id = %stream_id))]
    async fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version: i64,
        batch_size: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE stream_id = $1 AND version > $2 ORDER BY version LIMIT $3"
        ))
        .bind(stream_id.as_str())
        .bind(from_version)
        .bind(limit(batch_size))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(decode_event).collect()
    }

    #[instrument(skip(self))]
    async fn read_all(
        &self,
        from_global_sequence: i64,
        batch_size: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE global_sequence > $1 ORDER BY global_sequence LIMIT $2"
        ))
        .bind(from_global_sequence)
        .bind(limit(batch_size))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(decode_event).collect()
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<i64, DomainError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM event_streams WHERE stream_id = $1")
                .bind(stream_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(version.unwrap_or(0))
    }

    async fn head_global_sequence(&self) -> Result<i64, DomainError> {
        sqlx::query_scalar("SELECT COALESCE(MAX(global_sequence), 0) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }
}
