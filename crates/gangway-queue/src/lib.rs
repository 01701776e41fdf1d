//! gangway-queue — the admission backlog of pending groups.
//!
//! Orders candidates by queue weight (descending), then group priority
//! (descending), then arrival time (ascending — FIFO within a tier).
//! Higher-weight tenants drain first without starving arrival order
//! among equals.
//!
//! A group that fails admission is requeued with exponential backoff so
//! the loop does not spin against a resource shortage that has not
//! changed.

pub mod queue;

pub use queue::{AdmissionQueue, QueuedGroup};
