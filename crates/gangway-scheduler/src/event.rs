//! Events feeding the scheduler loop.

use gangway_state::{GroupId, NodeId, NodeRecord, TaskId};

/// A capacity-changing occurrence the loop must react to.
///
/// Events may arrive from many sources in parallel (API handlers, the
/// membership sweeper); the channel serializes them.
#[derive(Debug, Clone)]
pub enum Event {
    /// A validated group entered the registry and awaits admission.
    GroupSubmitted { group_id: GroupId },
    /// The user deleted a group; roll back anything it holds.
    GroupDeleted { group_id: GroupId },
    /// A node joined; its capacity becomes available.
    NodeJoined { node: NodeRecord },
    /// A node left gracefully.
    NodeLeft { node_id: NodeId },
    /// A node stopped heartbeating and was reaped.
    NodeLost { node_id: NodeId },
    /// A bound task was launched by its node agent.
    TaskStarted { group_id: GroupId, task_id: TaskId },
    /// A task finished successfully; its resources free up.
    TaskCompleted { group_id: GroupId, task_id: TaskId },
    /// A task failed; the gang invariant must be re-checked.
    TaskFailed { group_id: GroupId, task_id: TaskId },
}
