//! `PostgreSQL` read-model tables maintained by the projector.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_core::error::DomainError;
use chronicle_event_store::sql_error::storage_error;
use chronicle_orders::application::projections::{OrderSummary, OrderSummaryStore};
use chronicle_orders::domain::aggregates::OrderStatus;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

type OrderSummaryRow = (Uuid, Uuid, String, String, i64, i64, i64, DateTime<Utc>);

/// The `order_summaries` table.
///
/// The upsert only replaces a row whose `last_version` is lower than the
/// incoming one, so redelivered events never roll a row back.
#[derive(Debug, Clone)]
pub struct PgOrderSummaryStore {
    pool: PgPool,
}

impl PgOrderSummaryStore {
    /// Creates a new `PgOrderSummaryStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Summaries of one customer, newest first.
    ///
    /// # Errors
    ///
    /// Returns the classified storage error.
    pub async fn list_by_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<OrderSummary>, DomainError> {
        let rows: Vec<OrderSummaryRow> = sqlx::query_as(
            r"
            SELECT order_id, customer_id, customer_email, status,
                   item_count, total_cents, last_version, updated_at
            FROM order_summaries
            WHERE customer_id = $1
            ORDER BY updated_at DESC, order_id
            ",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        rows.into_iter().map(decode_summary).collect()
    }
}

fn decode_summary(row: OrderSummaryRow) -> Result<OrderSummary, DomainError> {
    let (
        order_id,
        customer_id,
        customer_email,
        status,
        item_count,
        total_cents,
        last_version,
        updated_at,
    ) = row;
    Ok(OrderSummary {
        order_id,
        customer_id,
        customer_email,
        status: OrderStatus::parse(&status)?,
        item_count,
        total_cents,
        last_version,
        updated_at,
    })
}

#[async_trait]
impl OrderSummaryStore for PgOrderSummaryStore {
    async fn get(&self, order_id: Uuid) -> Result<Option<OrderSummary>, DomainError> {
        let row: Option<OrderSummaryRow> = sqlx::query_as(
            r"
            SELECT order_id, customer_id, customer_email, status,
                   item_count, total_cents, last_version, updated_at
            FROM order_summaries
            WHERE order_id = $1
            ",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;
        row.map(decode_summary).transpose()
    }

    #[instrument(skip(self, summary), fields(order_id = %summary.order_id, last_version = summary.last_version))]
    async fn upsert(&self, summary: OrderSummary) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO order_summaries (
                order_id, customer_id, customer_email, status,
                item_count, total_cents, last_version, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (order_id) DO UPDATE
            SET customer_id = EXCLUDED.customer_id,
                customer_email = EXCLUDED.customer_email,
                status = EXCLUDED.status,
                item_count = EXCLUDED.item_count,
                total_cents = EXCLUDED.total_cents,
                last_version = EXCLUDED.last_version,
                updated_at = EXCLUDED.updated_at
            WHERE order_summaries.last_version < EXCLUDED.last_version
            ",
        )
        .bind(summary.order_id)
        .bind(summary.customer_id)
        .bind(&summary.customer_email)
        .bind(summary.status.as_str())
        .bind(summary.item_count)
        .bind(summary.total_cents)
        .bind(summary.last_version)
        .bind(summary.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }
}
