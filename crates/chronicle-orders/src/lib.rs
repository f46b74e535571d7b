//! Chronicle Orders — order management bounded context.
//!
//! Orders are event-sourced through the core repository; the
//! `order_summaries` projection keeps a denormalized read model.

pub mod application;
pub mod domain;
