//! Shared test doubles for Chronicle.

mod clock;
mod projections;
mod stores;

pub use clock::FixedClock;
pub use projections::{FailingProjection, RecordingProjection};
pub use stores::{FailingEventStore, FailingSnapshotStore, FlakyCheckpointStore, FlakyEventStore};
