//! Environment configuration for the projector.

use std::str::FromStr;
use std::time::Duration;

use chronicle_core::config::ProjectionConfig;

use crate::error::AppError;

/// Default size of the database pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Settings read from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectorConfig {
    /// `PostgreSQL` connection string (`DATABASE_URL`).
    pub database_url: String,
    /// Pool size (`DATABASE_MAX_CONNECTIONS`).
    pub max_connections: u32,
    /// Runner tuning (`PROJECTION_BATCH_SIZE`, `PROJECTION_POLL_INTERVAL_MS`).
    pub projection: ProjectionConfig,
    /// Loops for the order summary projection (`ORDER_SUMMARY_SHARDS`);
    /// `1` runs it unsharded.
    pub order_summary_shards: u32,
    /// OTLP gRPC endpoint (`OTEL_EXPORTER_OTLP_ENDPOINT`); spans are only
    /// exported when set.
    pub otlp_endpoint: Option<String>,
}

impl ProjectorConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or a value
    /// does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config("DATABASE_URL environment variable must be set".into())
            })?;

        let defaults = ProjectionConfig::default();
        let projection = ProjectionConfig {
            batch_size: parse_or(&lookup, "PROJECTION_BATCH_SIZE", defaults.batch_size)?,
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "PROJECTION_POLL_INTERVAL_MS",
                u64::try_from(defaults.poll_interval.as_millis()).unwrap_or(u64::MAX),
            )?),
            ..defaults
        };
        projection
            .validate()
            .map_err(|err| AppError::Config(err.to_string()))?;

        let order_summary_shards = parse_or(&lookup, "ORDER_SUMMARY_SHARDS", 1)?;
        if order_summary_shards == 0 {
            return Err(AppError::Config(
                "ORDER_SUMMARY_SHARDS must be greater than zero".into(),
            ));
        }

        Ok(Self {
            database_url,
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            projection,
            order_summary_shards,
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|e| !e.trim().is_empty()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid ({raw:?}): {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_apply_when_only_database_url_is_set() {
        let config =
            ProjectorConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/db")]))
                .unwrap();

        assert_eq!(config.database_url, "postgres://localhost/db");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.projection, ProjectionConfig::default());
        assert_eq!(config.order_summary_shards, 1);
        assert_eq!(config.otlp_endpoint, None);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = ProjectorConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("PROJECTION_BATCH_SIZE", "50"),
            ("PROJECTION_POLL_INTERVAL_MS", "250"),
            ("ORDER_SUMMARY_SHARDS", "3"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
        ]))
        .unwrap();

        assert_eq!(config.max_connections, 4);
        assert_eq!(config.projection.batch_size, 50);
        assert_eq!(config.projection.poll_interval, Duration::from_millis(250));
        assert_eq!(config.order_summary_shards, 3);
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4317"));
    }

    #[test]
    fn test_missing_database_url_is_a_config_error() {
        let result = ProjectorConfig::from_lookup(lookup(&[]));

        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_unparseable_number_names_the_variable() {
        let result = ProjectorConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("PROJECTION_BATCH_SIZE", "lots"),
        ]));

        match result {
            Err(AppError::Config(msg)) => assert!(msg.starts_with("PROJECTION_BATCH_SIZE"), "{msg}"),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let result = ProjectorConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("PROJECTION_BATCH_SIZE", "0"),
        ]));

        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_zero_shards_is_rejected() {
        let result = ProjectorConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("ORDER_SUMMARY_SHARDS", "0"),
        ]));

        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
