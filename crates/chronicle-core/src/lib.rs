//! Chronicle Core — event sourcing building blocks.
//!
//! Storage traits (events, snapshots, checkpoints, dead letters), the
//! aggregate repository, schema upcasting and the projection engine. The
//! in-memory stores in [`memory`] implement every storage trait for tests
//! and embedded use; the Postgres implementations live in
//! `chronicle-event-store`.

pub mod aggregate;
pub mod checkpoint;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod projection;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod upcast;
