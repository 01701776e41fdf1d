//! Domain types for the Gangway state store.
//!
//! These types represent the persisted state of gang-scheduled task groups,
//! cluster nodes, admission queues, and committed task-to-node allocations.
//! All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a task group.
pub type GroupId = String;

/// Unique identifier for a task within a group.
pub type TaskId = String;

/// Unique identifier for a node in the cluster.
pub type NodeId = String;

// ── Resources ─────────────────────────────────────────────────────

/// A resource request or capacity vector.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceVec {
    /// Whole GPU slots.
    pub gpus: u32,
    /// Memory in bytes.
    pub memory_bytes: u64,
}

impl ResourceVec {
    /// True if `self` can accommodate `request` in every dimension.
    pub fn fits(&self, request: &ResourceVec) -> bool {
        self.gpus >= request.gpus && self.memory_bytes >= request.memory_bytes
    }

    /// Saturating component-wise subtraction.
    pub fn minus(&self, other: &ResourceVec) -> ResourceVec {
        ResourceVec {
            gpus: self.gpus.saturating_sub(other.gpus),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
        }
    }

    /// Component-wise addition.
    pub fn plus(&self, other: &ResourceVec) -> ResourceVec {
        ResourceVec {
            gpus: self.gpus + other.gpus,
            memory_bytes: self.memory_bytes + other.memory_bytes,
        }
    }
}

// ── Group ─────────────────────────────────────────────────────────

/// Specification of one task inside a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub id: TaskId,
    /// Resources this task needs on its node.
    pub request: ResourceVec,
    /// Taint keys this task tolerates. A task may only bind to a node
    /// whose every taint appears here.
    #[serde(default)]
    pub tolerations: Vec<String>,
}

/// Specification for a gang-scheduled task group.
///
/// Tasks are ordered; insertion order is submission order. The group
/// starts only when at least `min_available` tasks can be bound at once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupSpec {
    pub id: GroupId,
    pub name: String,
    /// Target admission queue name.
    pub queue: String,
    /// Priority within the queue tier (higher = more important).
    pub priority: u32,
    /// Gang threshold: minimum tasks that must bind simultaneously.
    pub min_available: u32,
    pub tasks: Vec<TaskSpec>,
    /// Unix timestamp (seconds) of submission.
    pub submitted_at: u64,
}

/// Lifecycle phase of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Lifecycle phase of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Pending,
    Bound,
    Running,
    Succeeded,
    Failed,
}

impl TaskPhase {
    /// True for phases that hold an allocation.
    pub fn holds_allocation(&self) -> bool {
        matches!(self, TaskPhase::Bound | TaskPhase::Running)
    }

    /// True for phases a task can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Succeeded | TaskPhase::Failed)
    }
}

/// Observed status of one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatus {
    pub id: TaskId,
    pub phase: TaskPhase,
    /// Node the task is bound to, while Bound or Running.
    pub node_id: Option<NodeId>,
}

/// Persisted record of a group: its spec plus current status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupRecord {
    pub spec: GroupSpec,
    pub phase: GroupPhase,
    pub tasks: Vec<TaskStatus>,
    /// Unix timestamp of last phase change.
    pub updated_at: u64,
}

impl GroupRecord {
    /// Number of tasks currently holding an allocation.
    pub fn bound_count(&self) -> u32 {
        self.tasks
            .iter()
            .filter(|t| t.phase.holds_allocation())
            .count() as u32
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// Persisted record of a cluster node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub address: String,
    /// Total allocatable capacity on this node.
    pub capacity: ResourceVec,
    /// Taint keys restricting which tasks may bind here.
    #[serde(default)]
    pub taints: Vec<String>,
    /// Unix timestamp of last heartbeat.
    pub last_heartbeat: u64,
}

// ── Queue ─────────────────────────────────────────────────────────

/// An admission queue: a named bucket with a weight ordering groups
/// across tenants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSpec {
    pub name: String,
    /// Ordering weight (higher drains first).
    pub weight: u32,
    pub created_at: u64,
}

// ── Allocation ────────────────────────────────────────────────────

/// A committed (task, node) pairing. Exists only while the task is
/// Bound or Running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationRecord {
    pub group_id: GroupId,
    pub task_id: TaskId,
    pub node_id: NodeId,
    /// Resources reserved on the node for this task.
    pub request: ResourceVec,
    /// Unix timestamp when the binding was committed.
    pub bound_at: u64,
}

impl AllocationRecord {
    /// Build the composite key for the allocations table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.group_id, self.task_id)
    }
}
