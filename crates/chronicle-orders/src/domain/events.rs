//! Domain events for the Orders context.

use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, decode_payload, encode_payload};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type for [`OrderCreated`].
pub const ORDER_CREATED_EVENT_TYPE: &str = "order.created";
/// Event type for [`ItemAdded`].
pub const ITEM_ADDED_EVENT_TYPE: &str = "order.item_added";
/// Event type for [`OrderShipped`].
pub const ORDER_SHIPPED_EVENT_TYPE: &str = "order.shipped";
/// Event type for [`OrderCancelled`].
pub const ORDER_CANCELLED_EVENT_TYPE: &str = "order.cancelled";

/// Current schema of `order.created`. Version 1 had no `customer_email`.
pub const ORDER_CREATED_SCHEMA_VERSION: i32 = 2;

/// All event types of the Orders context.
pub const ORDER_EVENT_TYPES: [&str; 4] = [
    ORDER_CREATED_EVENT_TYPE,
    ITEM_ADDED_EVENT_TYPE,
    ORDER_SHIPPED_EVENT_TYPE,
    ORDER_CANCELLED_EVENT_TYPE,
];

/// Emitted when an order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// The order identifier.
    pub order_id: Uuid,
    /// The customer placing the order.
    pub customer_id: Uuid,
    /// Contact address for the order.
    pub customer_email: String,
}

/// Emitted when a line is added to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    /// The order identifier.
    pub order_id: Uuid,
    /// Stock keeping unit.
    pub sku: String,
    /// Number of units.
    pub quantity: u32,
    /// Price of one unit in cents.
    pub unit_price_cents: i64,
}

/// Emitted when an order leaves the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    /// The order identifier.
    pub order_id: Uuid,
    /// Carrier name.
    pub carrier: String,
    /// Carrier tracking number.
    pub tracking_number: String,
}

/// Emitted when an order is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    /// The order identifier.
    pub order_id: Uuid,
    /// Why the order was cancelled.
    pub reason: String,
}

/// Events of the Orders context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    /// An order has been placed.
    Created(OrderCreated),
    /// A line has been added.
    ItemAdded(ItemAdded),
    /// The order has shipped.
    Shipped(OrderShipped),
    /// The order has been cancelled.
    Cancelled(OrderCancelled),
}

impl OrderEvent {
    /// The order this event belongs to.
    #[must_use]
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::Created(e) => e.order_id,
            Self::ItemAdded(e) => e.order_id,
            Self::Shipped(e) => e.order_id,
            Self::Cancelled(e) => e.order_id,
        }
    }
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => ORDER_CREATED_EVENT_TYPE,
            Self::ItemAdded(_) => ITEM_ADDED_EVENT_TYPE,
            Self::Shipped(_) => ORDER_SHIPPED_EVENT_TYPE,
            Self::Cancelled(_) => ORDER_CANCELLED_EVENT_TYPE,
        }
    }

    fn schema_version(&self) -> i32 {
        match self {
            Self::Created(_) => ORDER_CREATED_SCHEMA_VERSION,
            _ => 1,
        }
    }

    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        match self {
            Self::Created(e) => encode_payload(e),
            Self::ItemAdded(e) => encode_payload(e),
            Self::Shipped(e) => encode_payload(e),
            Self::Cancelled(e) => encode_payload(e),
        }
    }

    fn from_payload(event_type: &str, payload: serde_json::Value) -> Result<Self, DomainError> {
        match event_type {
            ORDER_CREATED_EVENT_TYPE => Ok(Self::Created(decode_payload(event_type, payload)?)),
            ITEM_ADDED_EVENT_TYPE => Ok(Self::ItemAdded(decode_payload(event_type, payload)?)),
            ORDER_SHIPPED_EVENT_TYPE => Ok(Self::Shipped(decode_payload(event_type, payload)?)),
            ORDER_CANCELLED_EVENT_TYPE => {
                Ok(Self::Cancelled(decode_payload(event_type, payload)?))
            }
            other => Err(DomainError::Serialization(format!(
                "unknown order event type: {other}"
            ))),
        }
    }
}
