//! Inventory error types.

use thiserror::Error;

/// Errors from inventory operations.
///
/// `InsufficientCapacity` is an expected signal for the planner to try
/// another node; callers never surface it to users as a hard failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("node {0} has insufficient free capacity")]
    InsufficientCapacity(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),
}

pub type InventoryResult<T> = Result<T, InventoryError>;
