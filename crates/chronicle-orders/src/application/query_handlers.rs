//! Query handlers for the Orders context.
//!
//! `get_order_by_id` replays the stream and is always current;
//! `get_order_summary` reads the projected model and may lag behind.

use chronicle_core::error::DomainError;
use chronicle_core::repository::AggregateRepository;
use serde::Serialize;
use uuid::Uuid;

use crate::application::projections::{OrderSummary, OrderSummaryStore};
use crate::domain::aggregates::{Order, OrderLine, OrderStatus, order_stream_id};

/// Read-only view of an order aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderView {
    /// The order identifier.
    pub order_id: Uuid,
    /// The customer who placed the order.
    pub customer_id: Option<Uuid>,
    /// Contact address.
    pub customer_email: String,
    /// Current status.
    pub status: OrderStatus,
    /// Lines in the order they were added.
    pub lines: Vec<OrderLine>,
    /// Order total in cents.
    pub total_cents: i64,
    /// Current version (event count).
    pub version: i64,
}

/// Retrieves an order by replaying its stream.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the order has no events and
/// `DomainError::Serialization` if an event cannot be decoded.
pub async fn get_order_by_id(
    order_id: Uuid,
    repo: &AggregateRepository<Order>,
) -> Result<OrderView, DomainError> {
    let order = repo.load_existing(&order_stream_id(order_id)).await?;
    let state = order.state();
    Ok(OrderView {
        order_id,
        customer_id: state.customer_id,
        customer_email: state.customer_email.clone(),
        status: state.status,
        lines: state.lines.clone(),
        total_cents: state.total_cents(),
        version: order.version(),
    })
}

/// Retrieves the projected summary of an order.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the projection has no row for
/// the order (yet), or the store's error.
pub async fn get_order_summary(
    order_id: Uuid,
    store: &dyn OrderSummaryStore,
) -> Result<OrderSummary, DomainError> {
    store
        .get(order_id)
        .await?
        .ok_or_else(|| DomainError::AggregateNotFound(order_stream_id(order_id)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use chronicle_core::command::EventContext;
    use chronicle_core::event::DomainEvent;
    use chronicle_core::memory::InMemoryEventStore;
    use chronicle_core::store::EventStore;
    use chronicle_test_support::FixedClock;
    use serde_json::json;

    use super::*;
    use crate::application::projections::InMemoryOrderSummaryStore;
    use crate::domain::events::{ItemAdded, OrderCreated, OrderEvent};

    fn repo(events: &InMemoryEventStore) -> AggregateRepository<Order> {
        AggregateRepository::new(
            Arc::new(events.clone()),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())),
        )
    }

    #[tokio::test]
    async fn test_get_order_by_id_returns_view_with_lines() {
        // Arrange
        let events = InMemoryEventStore::new();
        let order_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let context = EventContext::new(Uuid::new_v4());
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let history = [
            OrderEvent::Created(OrderCreated {
                order_id,
                customer_id,
                customer_email: "ada@example.com".to_owned(),
            }),
            OrderEvent::ItemAdded(ItemAdded {
                order_id,
                sku: "SKU-1".to_owned(),
                quantity: 3,
                unit_price_cents: 200,
            }),
        ];
        let new_events: Vec<_> = history
            .iter()
            .map(|e| e.to_new_event(&context, now).unwrap())
            .collect();
        events
            .append(&order_stream_id(order_id), 0, &new_events)
            .await
            .unwrap();

        // Act
        let view = get_order_by_id(order_id, &repo(&events)).await.unwrap();

        // Assert
        assert_eq!(view.order_id, order_id);
        assert_eq!(view.customer_id, Some(customer_id));
        assert_eq!(view.status, OrderStatus::Placed);
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.total_cents, 600);
        assert_eq!(view.version, 2);
        assert_eq!(serde_json::to_value(&view).unwrap()["status"], json!("placed"));
    }

    #[tokio::test]
    async fn test_get_order_by_id_returns_not_found_when_no_events() {
        // Arrange
        let order_id = Uuid::new_v4();

        // Act
        let result = get_order_by_id(order_id, &repo(&InMemoryEventStore::new())).await;

        // Assert
        match result {
            Err(DomainError::AggregateNotFound(id)) => assert_eq!(id, order_stream_id(order_id)),
            other => panic!("expected AggregateNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_order_summary_returns_not_found_before_projection() {
        let store = InMemoryOrderSummaryStore::new();

        let result = get_order_summary(Uuid::new_v4(), &store).await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(_))));
    }
}
