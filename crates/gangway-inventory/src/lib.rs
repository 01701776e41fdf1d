//! gangway-inventory — the single source of truth for node capacity.
//!
//! Tracks free allocatable resources per node and hands out reservations.
//! Two access paths exist:
//!
//! - `reserve` / `release`: single-node operations, atomic under the
//!   inventory lock. Running out of room is an expected outcome
//!   (`InsufficientCapacity`), not a failure to propagate upward.
//! - `begin()`: a multi-node [`Transaction`] used by the binding planner.
//!   Tentative reserves accumulate in the transaction and all of them are
//!   released again unless `commit()` is called — dropping an uncommitted
//!   transaction rolls back every hold.

pub mod error;
pub mod inventory;

pub use error::{InventoryError, InventoryResult};
pub use inventory::{Inventory, NodeAvailability, Transaction};
