//! Domain layer: aggregate, events, commands and schema upcasters.

pub mod aggregates;
pub mod commands;
pub mod events;
pub mod upcasters;
