//! Wires the PostgreSQL stores and the read-model projections into a
//! projection engine.

use std::sync::Arc;

use chronicle_core::error::DomainError;
use chronicle_core::projection::{ProjectionEngine, ProjectionEngineHandle};
use chronicle_event_store::pg_checkpoint_store::PgCheckpointStore;
use chronicle_event_store::pg_dead_letter_queue::PgDeadLetterQueue;
use chronicle_event_store::pg_event_store::PgEventStore;
use chronicle_orders::application::projections::OrderSummaryProjection;
use chronicle_orders::domain::upcasters::order_upcasters;
use sqlx::PgPool;
use tracing::{error, info};

use crate::config::ProjectorConfig;
use crate::read_models::PgOrderSummaryStore;

/// Builds the engine with every read-model projection registered.
///
/// # Errors
///
/// Returns `DomainError::Validation` for an invalid projection
/// configuration and the upcaster registry's error if it cannot be built.
pub fn build_engine(pool: &PgPool, config: &ProjectorConfig) -> Result<ProjectionEngine, DomainError> {
    let mut engine = ProjectionEngine::new(
        Arc::new(PgEventStore::new(pool.clone())),
        Arc::new(PgCheckpointStore::new(pool.clone())),
    )
    .with_dead_letters(Arc::new(PgDeadLetterQueue::new(pool.clone())))
    .with_upcasters(Arc::new(order_upcasters()?))
    .with_config(config.projection.clone())?;

    let order_summaries = Arc::new(OrderSummaryProjection::new(Arc::new(
        PgOrderSummaryStore::new(pool.clone()),
    )));
    if config.order_summary_shards > 1 {
        engine.register_sharded(order_summaries, config.order_summary_shards)?;
    } else {
        engine.register(order_summaries)?;
    }
    Ok(engine)
}

/// Stops the engine and logs how each runner ended.
///
/// Returns the number of runners that ended with an error.
pub async fn stop(handle: ProjectionEngineHandle) -> usize {
    let mut failed = 0;
    for exit in handle.shutdown().await {
        match exit.result {
            Ok(()) => info!(projection = %exit.projection, "projection exited cleanly"),
            Err(err) => {
                failed += 1;
                error!(projection = %exit.projection, error = %err, "projection exited with error");
            }
        }
    }
    failed
}
