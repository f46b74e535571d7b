//! Commands for the Orders context.

use chronicle_core::command::Command;
use uuid::Uuid;

/// Command to place a new order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Identifier chosen by the caller.
    pub order_id: Uuid,
    /// The customer placing the order.
    pub customer_id: Uuid,
    /// Contact address.
    pub customer_email: String,
}

/// Command to add a line to an order.
#[derive(Debug, Clone)]
pub struct AddItem {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
    /// Stock keeping unit.
    pub sku: String,
    /// Number of units.
    pub quantity: u32,
    /// Price of one unit in cents.
    pub unit_price_cents: i64,
}

/// Command to ship an order.
#[derive(Debug, Clone)]
pub struct ShipOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
    /// Carrier name.
    pub carrier: String,
    /// Carrier tracking number.
    pub tracking_number: String,
}

/// Command to cancel an order.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
    /// Why the order is cancelled.
    pub reason: String,
}

impl Command for CreateOrder {
    fn command_type(&self) -> &'static str {
        "order.create"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for AddItem {
    fn command_type(&self) -> &'static str {
        "order.add_item"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for ShipOrder {
    fn command_type(&self) -> &'static str {
        "order.ship"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for CancelOrder {
    fn command_type(&self) -> &'static str {
        "order.cancel"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}
