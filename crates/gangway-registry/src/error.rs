//! Registry error types.

use thiserror::Error;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Rejected at submission; the group never enters the queue.
    #[error("invalid group spec: {0}")]
    InvalidGroupSpec(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("task {task_id} not found in group {group_id}")]
    TaskNotFound { group_id: String, task_id: String },

    #[error("group {group_id} has {bound} bound tasks, below min_available {min_available}")]
    GangUnsatisfied {
        group_id: String,
        bound: u32,
        min_available: u32,
    },

    #[error("state store error: {0}")]
    State(#[from] gangway_state::StateError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
