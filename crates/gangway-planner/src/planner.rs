//! The binding planner: greedy best-fit search plus two-phase commit.

use thiserror::Error;
use tracing::{debug, trace};

use gangway_inventory::{Inventory, InventoryError, NodeAvailability};
use gangway_state::{GroupRecord, NodeId, TaskId, TaskPhase, TaskSpec};

/// A planned (task, node) pairing with the resources reserved for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub request: gangway_state::ResourceVec,
}

/// Outcome of a placement attempt.
#[derive(Debug)]
pub enum Placement {
    /// All reservations committed; the inventory has been decremented.
    Placed { assignments: Vec<Assignment> },
    /// Fewer than min_available tasks were feasible. Zero side effects
    /// on the inventory.
    Pending { reason: String },
}

/// Bug-class planner failure. Logged and skipped by the loop; never
/// surfaced to the submitter.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner invariant violated: {0}")]
    Internal(String),
}

/// Attempt an all-or-nothing placement for `group`.
///
/// Nodes are tried in descending order of free GPU capacity (memory breaks
/// ties) to reduce fragmentation. Tasks beyond min_available are placed
/// opportunistically in the same attempt when capacity allows.
pub fn try_place(group: &GroupRecord, inventory: &Inventory) -> Result<Placement, PlanError> {
    // Tasks still waiting for a node. Terminal tasks are out of the gang;
    // already-bound tasks keep their existing allocations.
    let pending: Vec<&TaskSpec> = group
        .spec
        .tasks
        .iter()
        .filter(|spec| {
            group
                .tasks
                .iter()
                .any(|s| s.id == spec.id && s.phase == TaskPhase::Pending)
        })
        .collect();

    let already_bound = group.bound_count();
    let needed = group.spec.min_available.saturating_sub(already_bound) as usize;
    if needed > pending.len() {
        return Ok(Placement::Pending {
            reason: format!(
                "only {} schedulable tasks for min_available {}",
                pending.len() + already_bound as usize,
                group.spec.min_available
            ),
        });
    }

    let mut nodes = inventory.snapshot();
    sort_by_free_desc(&mut nodes);

    let mut txn = inventory.begin();
    let mut assignments = Vec::with_capacity(pending.len());

    for task in &pending {
        let Some(node_idx) = nodes
            .iter()
            .position(|n| tolerates(task, n) && n.free.fits(&task.request))
        else {
            trace!(group_id = %group.spec.id, task_id = %task.id, "no feasible node");
            continue;
        };

        let node_id = nodes[node_idx].node_id.clone();
        match txn.reserve(&node_id, &task.request) {
            Ok(()) => {
                assignments.push(Assignment {
                    task_id: task.id.clone(),
                    node_id: node_id.clone(),
                    request: task.request,
                });
                // Mirror the tentative hold locally and keep the
                // descending-free order for the next task.
                nodes[node_idx].free = nodes[node_idx].free.minus(&task.request);
                sort_by_free_desc(&mut nodes);
            }
            // The node vanished or changed between snapshot and reserve;
            // treat it as infeasible rather than aborting the attempt.
            Err(InventoryError::UnknownNode(_) | InventoryError::InsufficientCapacity(_)) => {
                trace!(group_id = %group.spec.id, task_id = %task.id, %node_id, "reserve lost race");
            }
        }
    }

    if assignments.len() < needed {
        // Dropping the uncommitted transaction rolls back every hold.
        drop(txn);
        debug!(
            group_id = %group.spec.id,
            feasible = assignments.len(),
            needed,
            "placement infeasible, all tentative reservations rolled back"
        );
        return Ok(Placement::Pending {
            reason: format!(
                "{} of {} required tasks feasible",
                assignments.len(),
                needed
            ),
        });
    }

    let committed = txn.commit();
    if committed.len() != assignments.len() {
        return Err(PlanError::Internal(format!(
            "committed {} holds for {} assignments",
            committed.len(),
            assignments.len()
        )));
    }

    debug!(
        group_id = %group.spec.id,
        placed = assignments.len(),
        min_available = group.spec.min_available,
        "placement committed"
    );
    Ok(Placement::Placed { assignments })
}

/// True if the task tolerates every taint on the node.
fn tolerates(task: &TaskSpec, node: &NodeAvailability) -> bool {
    node.taints.iter().all(|t| task.tolerations.contains(t))
}

fn sort_by_free_desc(nodes: &mut [NodeAvailability]) {
    nodes.sort_by(|a, b| {
        b.free
            .gpus
            .cmp(&a.free.gpus)
            .then(b.free.memory_bytes.cmp(&a.free.memory_bytes))
            .then(a.node_id.cmp(&b.node_id))
    });
}
