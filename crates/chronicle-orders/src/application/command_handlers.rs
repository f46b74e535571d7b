//! Command handlers for the Orders context.
//!
//! Each handler loads the order through the repository, asks the aggregate
//! to decide, records the resulting event and saves. Handlers for existing
//! orders re-run the whole cycle on a concurrency conflict so the business
//! rules are checked against the latest state.

use chronicle_core::command::{Command, retry_on_conflict};
use chronicle_core::error::DomainError;
use chronicle_core::repository::AggregateRepository;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::aggregates::{Order, order_stream_id};
use crate::domain::commands::{AddItem, CancelOrder, CreateOrder, ShipOrder};
use crate::domain::events::OrderEvent;

/// How many times a command is re-run after losing a concurrency race.
pub const MAX_COMMAND_ATTEMPTS: u32 = 3;

/// Result of a successfully handled command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCommandResult {
    /// The order affected by the command.
    pub order_id: Uuid,
    /// Stream version after the command's events were appended.
    pub version: i64,
}

/// Loads an existing order, applies `decide`, and saves the event.
async fn execute<C, F>(
    command: &C,
    order_id: Uuid,
    repo: &AggregateRepository<Order>,
    decide: F,
) -> Result<OrderCommandResult, DomainError>
where
    C: Command,
    F: Fn(&Order) -> Result<OrderEvent, DomainError>,
{
    let stream_id = order_stream_id(order_id);
    let context = command.event_context();
    let decide = &decide;
    let stream_id = &stream_id;
    let version = retry_on_conflict(MAX_COMMAND_ATTEMPTS, move || async move {
        let mut order = repo.load_existing(stream_id).await?;
        let event = decide(order.state())?;
        order.record(event, &context, repo.clock())?;
        repo.save(&mut order).await
    })
    .await?;

    info!(
        command_type = command.command_type(),
        %order_id,
        version,
        "command handled"
    );
    Ok(OrderCommandResult { order_id, version })
}

/// Handles `CreateOrder`: places a new order.
///
/// Not retried on conflict: losing the race means the order already exists.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the order exists or the email is
/// invalid, `DomainError::ConcurrencyConflict` if another writer created it
/// first, or the storage error.
#[instrument(skip(command, repo), fields(order_id = %command.order_id))]
pub async fn handle_create_order(
    command: &CreateOrder,
    repo: &AggregateRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    let mut order = repo.load(&order_stream_id(command.order_id)).await?;
    let event = order.state().decide_create(
        command.order_id,
        command.customer_id,
        &command.customer_email,
    )?;
    order.record(event, &command.event_context(), repo.clock())?;
    let version = repo.save(&mut order).await?;

    info!(command_type = command.command_type(), version, "order created");
    Ok(OrderCommandResult {
        order_id: command.order_id,
        version,
    })
}

/// Handles `AddItem`.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for unknown orders,
/// `DomainError::Validation` if the line is rejected, or the storage error.
#[instrument(skip(command, repo), fields(order_id = %command.order_id))]
pub async fn handle_add_item(
    command: &AddItem,
    repo: &AggregateRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(command, command.order_id, repo, |order| {
        order.decide_add_item(&command.sku, command.quantity, command.unit_price_cents)
    })
    .await
}

/// Handles `ShipOrder`.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for unknown orders,
/// `DomainError::Validation` if the order cannot ship, or the storage error.
#[instrument(skip(command, repo), fields(order_id = %command.order_id))]
pub async fn handle_ship_order(
    command: &ShipOrder,
    repo: &AggregateRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(command, command.order_id, repo, |order| {
        order.decide_ship(&command.carrier, &command.tracking_number)
    })
    .await
}

/// Handles `CancelOrder`.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for unknown orders,
/// `DomainError::Validation` if the order cannot be cancelled, or the
/// storage error.
#[instrument(skip(command, repo), fields(order_id = %command.order_id))]
pub async fn handle_cancel_order(
    command: &CancelOrder,
    repo: &AggregateRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(command, command.order_id, repo, |order| {
        order.decide_cancel(&command.reason)
    })
    .await
}
