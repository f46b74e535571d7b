//! Chronicle Event Store — `PostgreSQL` implementations of the storage traits.
//!
//! All stores share one `PgPool`. Run [`schema::migrate`] once at startup
//! before using them.

pub mod pg_checkpoint_store;
pub mod pg_dead_letter_queue;
pub mod pg_event_store;
pub mod pg_snapshot_store;
pub mod schema;
pub mod sql_error;
