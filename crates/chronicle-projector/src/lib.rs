//! Chronicle projector — keeps read models current from the event store.

pub mod config;
pub mod error;
pub mod read_models;
pub mod telemetry;
pub mod worker;
