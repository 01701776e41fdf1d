//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur while handling an event or admission attempt.
///
/// These never escape the loop: each is logged against the group or node
/// it concerns and the loop moves on.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("registry error: {0}")]
    Registry(#[from] gangway_registry::RegistryError),

    #[error("state store error: {0}")]
    State(#[from] gangway_state::StateError),

    #[error("planner error: {0}")]
    Planner(#[from] gangway_planner::PlanError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
