//! Aggregate root for the Orders context.
//!
//! Business rules live in the `decide_*` methods: each checks the current
//! state and returns the event to record, or a validation error. `apply`
//! only folds events into state and never fails.

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::error::DomainError;
use chronicle_core::event::StreamId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{ItemAdded, OrderCancelled, OrderCreated, OrderEvent, OrderShipped};

/// Stream id of an order.
#[must_use]
pub fn order_stream_id(order_id: Uuid) -> StreamId {
    StreamId::new(format!("order-{order_id}"))
}

/// Lifecycle of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// No `order.created` event yet.
    #[default]
    New,
    /// Created and accepting items.
    Placed,
    /// Handed to a carrier.
    Shipped,
    /// Cancelled before shipping.
    Cancelled,
}

impl OrderStatus {
    /// Stable lowercase name, as stored in read models.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Placed => "placed",
            Self::Shipped => "shipped",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a name produced by [`as_str`](Self::as_str).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` for unknown names.
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "new" => Ok(Self::New),
            "placed" => Ok(Self::Placed),
            "shipped" => Ok(Self::Shipped),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::Serialization(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

/// A line on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Stock keeping unit.
    pub sku: String,
    /// Number of units.
    pub quantity: u32,
    /// Price of one unit in cents.
    pub unit_price_cents: i64,
}

/// Order state, rebuilt from `order-<id>` streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Set by `order.created`.
    pub order_id: Option<Uuid>,
    /// Set by `order.created`.
    pub customer_id: Option<Uuid>,
    /// Contact address; the legacy default for orders created before emails
    /// were recorded.
    pub customer_email: String,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Lines in the order they were added.
    pub lines: Vec<OrderLine>,
    /// Carrier tracking number once shipped.
    pub tracking_number: Option<String>,
}

impl Order {
    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> i64 {
        self.lines.iter().map(|l| i64::from(l.quantity)).sum()
    }

    /// Order total in cents.
    ///
    /// Saturates at `i64::MAX`; `decide_add_item` rejects lines that would
    /// overflow it.
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        self.lines.iter().fold(0_i64, |total, l| {
            total.saturating_add(i64::from(l.quantity).saturating_mul(l.unit_price_cents))
        })
    }

    /// Decides whether an order can be placed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order already exists or the
    /// email is blank or malformed.
    pub fn decide_create(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
        customer_email: &str,
    ) -> Result<OrderEvent, DomainError> {
        if self.status != OrderStatus::New {
            return Err(DomainError::Validation(format!(
                "order {order_id} already exists"
            )));
        }
        let email = customer_email.trim();
        if email.is_empty() {
            return Err(DomainError::Validation(
                "customer email must not be empty".into(),
            ));
        }
        if !email.contains('@') {
            return Err(DomainError::Validation(format!(
                "customer email {email} is not an address"
            )));
        }
        Ok(OrderEvent::Created(OrderCreated {
            order_id,
            customer_id,
            customer_email: email.to_owned(),
        }))
    }

    /// Decides whether a line can be added.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` unless the order is placed, the SKU
    /// is non-empty, the quantity is positive, the price is not negative and
    /// the order total stays within `i64`.
    pub fn decide_add_item(
        &self,
        sku: &str,
        quantity: u32,
        unit_price_cents: i64,
    ) -> Result<OrderEvent, DomainError> {
        let order_id = self.placed_order_id("add items to")?;
        if sku.trim().is_empty() {
            return Err(DomainError::Validation("sku must not be empty".into()));
        }
        if quantity == 0 {
            return Err(DomainError::Validation(
                "quantity must be greater than zero".into(),
            ));
        }
        if unit_price_cents < 0 {
            return Err(DomainError::Validation(
                "unit price must not be negative".into(),
            ));
        }
        i64::from(quantity)
            .checked_mul(unit_price_cents)
            .and_then(|line| self.total_cents().checked_add(line))
            .ok_or_else(|| {
                DomainError::Validation(format!("order {order_id} total would overflow"))
            })?;
        Ok(OrderEvent::ItemAdded(ItemAdded {
            order_id,
            sku: sku.trim().to_owned(),
            quantity,
            unit_price_cents,
        }))
    }

    /// Decides whether the order can ship.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` unless the order is placed, has at
    /// least one line and a tracking number is given.
    pub fn decide_ship(&self, carrier: &str, tracking_number: &str) -> Result<OrderEvent, DomainError> {
        let order_id = self.placed_order_id("ship")?;
        if self.lines.is_empty() {
            return Err(DomainError::Validation(format!(
                "cannot ship empty order {order_id}"
            )));
        }
        if tracking_number.trim().is_empty() {
            return Err(DomainError::Validation(
                "tracking number must not be empty".into(),
            ));
        }
        Ok(OrderEvent::Shipped(OrderShipped {
            order_id,
            carrier: carrier.trim().to_owned(),
            tracking_number: tracking_number.trim().to_owned(),
        }))
    }

    /// Decides whether the order can be cancelled.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` unless the order is placed.
    pub fn decide_cancel(&self, reason: &str) -> Result<OrderEvent, DomainError> {
        let order_id = self.placed_order_id("cancel")?;
        Ok(OrderEvent::Cancelled(OrderCancelled {
            order_id,
            reason: reason.trim().to_owned(),
        }))
    }

    fn placed_order_id(&self, action: &str) -> Result<Uuid, DomainError> {
        match (self.status, self.order_id) {
            (OrderStatus::Placed, Some(order_id)) => Ok(order_id),
            (OrderStatus::New, _) | (_, None) => Err(DomainError::Validation(format!(
                "cannot {action} an order that does not exist"
            ))),
            (status, Some(order_id)) => Err(DomainError::Validation(format!(
                "cannot {action} {} order {order_id}",
                status.as_str()
            ))),
        }
    }
}

impl AggregateRoot for Order {
    type Event = OrderEvent;
    const AGGREGATE_TYPE: &'static str = "order";

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Created(e) => {
                self.order_id = Some(e.order_id);
                self.customer_id = Some(e.customer_id);
                self.customer_email.clone_from(&e.customer_email);
                self.status = OrderStatus::Placed;
            }
            OrderEvent::ItemAdded(e) => self.lines.push(OrderLine {
                sku: e.sku.clone(),
                quantity: e.quantity,
                unit_price_cents: e.unit_price_cents,
            }),
            OrderEvent::Shipped(e) => {
                self.status = OrderStatus::Shipped;
                self.tracking_number = Some(e.tracking_number.clone());
            }
            OrderEvent::Cancelled(_) => self.status = OrderStatus::Cancelled,
        }
    }
}
