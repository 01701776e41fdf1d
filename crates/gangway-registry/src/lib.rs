//! gangway-registry — the group and task lifecycle authority.
//!
//! Validates submissions, owns every Group/Task phase transition, and
//! writes group and allocation records through to the state store so a
//! restarted daemon can rebuild its view.
//!
//! Transitions are monotonic with one exception: Running → Pending on
//! eviction, which unbinds ALL of a group's tasks together so the gang
//! invariant (bound count is 0 or ≥ min_available) is never violated.

pub mod error;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use registry::{GroupSubmission, Registry};
