//! gangway-planner — joint placement for gang-scheduled groups.
//!
//! Given a candidate group and the inventory, the planner searches for a
//! feasible assignment covering at least `min_available` tasks and commits
//! every reservation atomically, or none at all. This commit-or-rollback
//! step is what separates gang scheduling from independent per-task
//! scheduling: a half-placed group never consumes capacity.

pub mod planner;

pub use planner::{Assignment, PlanError, Placement, try_place};
