//! Read-model projections for the Orders context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, StoredEvent};
use chronicle_core::projection::Projection;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::aggregates::OrderStatus;
use crate::domain::events::{ORDER_EVENT_TYPES, OrderEvent};

/// Name (and checkpoint key) of the order summary projection.
pub const ORDER_SUMMARIES_PROJECTION: &str = "order_summaries";

/// One row of the order summary read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    /// The order identifier.
    pub order_id: Uuid,
    /// The customer who placed the order.
    pub customer_id: Uuid,
    /// Contact address.
    pub customer_email: String,
    /// Current status.
    pub status: OrderStatus,
    /// Units across all lines.
    pub item_count: i64,
    /// Order total in cents.
    pub total_cents: i64,
    /// Stream version of the last event folded into this row.
    pub last_version: i64,
    /// When that event occurred.
    pub updated_at: DateTime<Utc>,
}

/// Storage for order summaries.
#[async_trait]
pub trait OrderSummaryStore: Send + Sync {
    /// Loads one summary.
    ///
    /// # Errors
    ///
    /// Returns the store's error on failure.
    async fn get(&self, order_id: Uuid) -> Result<Option<OrderSummary>, DomainError>;

    /// Inserts or replaces a summary, unless the stored row already has a
    /// `last_version` at or above the new one.
    ///
    /// # Errors
    ///
    /// Returns the store's error on failure.
    async fn upsert(&self, summary: OrderSummary) -> Result<(), DomainError>;
}

/// In-memory order summary store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderSummaryStore {
    rows: Arc<Mutex<HashMap<Uuid, OrderSummary>>>,
}

impl InMemoryOrderSummaryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every row, ordered by order id.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the lock is poisoned.
    pub fn all(&self) -> Result<Vec<OrderSummary>, DomainError> {
        let rows = self.rows.lock().map_err(poisoned)?;
        let mut all: Vec<OrderSummary> = rows.values().cloned().collect();
        all.sort_by_key(|s| s.order_id);
        Ok(all)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> DomainError {
    DomainError::Infrastructure("order summary store lock poisoned".into())
}

#[async_trait]
impl OrderSummaryStore for InMemoryOrderSummaryStore {
    async fn get(&self, order_id: Uuid) -> Result<Option<OrderSummary>, DomainError> {
        Ok(self.rows.lock().map_err(poisoned)?.get(&order_id).cloned())
    }

    async fn upsert(&self, summary: OrderSummary) -> Result<(), DomainError> {
        let mut rows = self.rows.lock().map_err(poisoned)?;
        let stale = rows
            .get(&summary.order_id)
            .is_some_and(|existing| existing.last_version >= summary.last_version);
        if !stale {
            rows.insert(summary.order_id, summary);
        }
        Ok(())
    }
}

/// Maintains [`OrderSummary`] rows from order events.
///
/// Idempotent: an event at or below a row's `last_version` is ignored, so
/// replaying a batch after a crash leaves the read model unchanged.
#[derive(Clone)]
pub struct OrderSummaryProjection {
    store: Arc<dyn OrderSummaryStore>,
}

impl std::fmt::Debug for OrderSummaryProjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderSummaryProjection").finish_non_exhaustive()
    }
}

impl OrderSummaryProjection {
    /// Creates the projection over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn OrderSummaryStore>) -> Self {
        Self { store }
    }

    /// Folds one event into the current row.
    fn fold(
        current: Option<OrderSummary>,
        event: &OrderEvent,
        stored: &StoredEvent,
    ) -> Result<OrderSummary, DomainError> {
        if let OrderEvent::Created(created) = event {
            return Ok(OrderSummary {
                order_id: created.order_id,
                customer_id: created.customer_id,
                customer_email: created.customer_email.clone(),
                status: OrderStatus::Placed,
                item_count: 0,
                total_cents: 0,
                last_version: stored.version,
                updated_at: stored.occurred_at,
            });
        }

        let mut summary = current.ok_or_else(|| {
            DomainError::Validation(format!(
                "no summary for order {} before {} v{}",
                event.order_id(),
                stored.event_type,
                stored.version
            ))
        })?;
        match event {
            OrderEvent::ItemAdded(item) => {
                let quantity = i64::from(item.quantity);
                let (Some(item_count), Some(total_cents)) = (
                    summary.item_count.checked_add(quantity),
                    quantity
                        .checked_mul(item.unit_price_cents)
                        .and_then(|line| summary.total_cents.checked_add(line)),
                ) else {
                    return Err(DomainError::Validation(format!(
                        "order {} totals overflow at v{}",
                        item.order_id, stored.version
                    )));
                };
                summary.item_count = item_count;
                summary.total_cents = total_cents;
            }
            OrderEvent::Shipped(_) => summary.status = OrderStatus::Shipped,
            OrderEvent::Cancelled(_) => summary.status = OrderStatus::Cancelled,
            OrderEvent::Created(_) => {}
        }
        summary.last_version = stored.version;
        summary.updated_at = stored.occurred_at;
        Ok(summary)
    }
}

#[async_trait]
impl Projection for OrderSummaryProjection {
    fn name(&self) -> &str {
        ORDER_SUMMARIES_PROJECTION
    }

    fn handled_event_types(&self) -> &[&'static str] {
        &ORDER_EVENT_TYPES
    }

    async fn handle(&self, stored: &StoredEvent) -> Result<(), DomainError> {
        let event = OrderEvent::from_payload(&stored.event_type, stored.payload.clone())?;
        let current = self.store.get(event.order_id()).await?;
        if current
            .as_ref()
            .is_some_and(|row| row.last_version >= stored.version)
        {
            debug!(
                order_id = %event.order_id(),
                version = stored.version,
                "event already projected"
            );
            return Ok(());
        }
        let summary = Self::fold(current, &event, stored)?;
        self.store.upsert(summary).await
    }
}
