//! External collaborator interfaces.
//!
//! The core never blocks on these: implementations are expected to hand
//! the work off (enqueue an API call, write to a channel) and return.

use tracing::info;

use gangway_state::AllocationRecord;

/// A cluster resource provider (e.g. a cloud autoscaler). The scheduler
/// calls this when the admission backlog exceeds its threshold.
pub trait CapacityProvider: Send + Sync {
    /// Ask for `amount` more of `resource` (e.g. "gpu").
    fn request_capacity(&self, resource: &str, amount: u64);
}

/// The node-side runtime that actually launches tasks. The scheduler
/// emits one `bind` per committed allocation; task lifecycle comes back
/// as events through the API.
pub trait NodeAgent: Send + Sync {
    fn bind(&self, allocation: &AllocationRecord);
}

/// Default provider: logs the request and otherwise does nothing. Used
/// when no autoscaler is wired up.
#[derive(Debug, Default)]
pub struct LoggingCapacityProvider;

impl CapacityProvider for LoggingCapacityProvider {
    fn request_capacity(&self, resource: &str, amount: u64) {
        info!(resource, amount, "capacity requested (no provider configured)");
    }
}

/// Default agent: logs bind commands. Used in tests and in dry-run mode.
#[derive(Debug, Default)]
pub struct LoggingNodeAgent;

impl NodeAgent for LoggingNodeAgent {
    fn bind(&self, allocation: &AllocationRecord) {
        info!(
            group_id = %allocation.group_id,
            task_id = %allocation.task_id,
            node_id = %allocation.node_id,
            "bind command emitted"
        );
    }
}
