//! gangway-state — embedded state store for Gangway.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for task groups, nodes, queues, and committed allocations.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{group_id}:{task_id}` for allocations) enable prefix
//! scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
