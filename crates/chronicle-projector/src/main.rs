//! Chronicle projector entry point.

use chronicle_event_store::schema;
use chronicle_projector::config::ProjectorConfig;
use chronicle_projector::error::AppError;
use chronicle_projector::{telemetry, worker};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = ProjectorConfig::from_env()?;
    let telemetry = telemetry::init(config.otlp_endpoint.as_deref())?;

    let result = run(&config).await;
    if let Err(err) = &result {
        tracing::error!(error = %err, "projector stopped");
    }
    telemetry.shutdown();
    result
}

async fn run(config: &ProjectorConfig) -> Result<(), AppError> {
    tracing::info!(
        shards = config.order_summary_shards,
        batch_size = config.projection.batch_size,
        "starting Chronicle projector"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    schema::migrate(&pool).await?;

    let engine = worker::build_engine(&pool, config)?;
    let handle = engine.start();
    tracing::info!(projections = ?handle.projection_names(), "projections running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    let failed = worker::stop(handle).await;
    pool.close().await;
    if failed > 0 {
        return Err(AppError::Server(format!("{failed} projection(s) exited with errors")));
    }
    Ok(())
}
