//! Application layer: command handlers, queries and read-model projections.

pub mod command_handlers;
pub mod projections;
pub mod query_handlers;
