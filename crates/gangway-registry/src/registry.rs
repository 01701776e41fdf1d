//! Group registry — submissions, phase transitions, and allocation records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use gangway_state::*;

use crate::error::{RegistryError, RegistryResult};

/// A group submission as received from a client, before the registry
/// assigns an ID and timestamps it.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GroupSubmission {
    pub name: String,
    pub queue: String,
    #[serde(default)]
    pub priority: u32,
    pub min_available: u32,
    pub tasks: Vec<TaskSpec>,
}

/// The registry owns group and task state.
///
/// In-memory records serve the hot path; every mutation is written
/// through to the `StateStore` so state survives a daemon restart.
#[derive(Clone)]
pub struct Registry {
    store: StateStore,
    groups: Arc<RwLock<HashMap<GroupId, GroupRecord>>>,
    seq: Arc<AtomicU64>,
}

impl Registry {
    /// Create an empty registry on top of a state store.
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            groups: Arc::new(RwLock::new(HashMap::new())),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Reload all persisted groups into memory. Returns how many were
    /// recovered.
    pub fn recover(&self) -> RegistryResult<usize> {
        let records = self.store.list_groups()?;
        let count = records.len();
        let mut groups = self.groups.write().expect("registry lock poisoned");
        for record in records {
            groups.insert(record.spec.id.clone(), record);
        }
        if count > 0 {
            info!(count, "recovered groups from state store");
        }
        Ok(count)
    }

    /// Validate and register a new group. Returns the assigned group ID.
    ///
    /// Invalid specs (zero tasks, min_available of zero or above the task
    /// count, duplicate task IDs) are rejected here and never reach the
    /// admission queue.
    pub fn submit(&self, submission: GroupSubmission) -> RegistryResult<GroupId> {
        if submission.tasks.is_empty() {
            return Err(RegistryError::InvalidGroupSpec(
                "group has no tasks".to_string(),
            ));
        }
        if submission.min_available == 0 {
            return Err(RegistryError::InvalidGroupSpec(
                "min_available must be at least 1".to_string(),
            ));
        }
        if submission.min_available as usize > submission.tasks.len() {
            return Err(RegistryError::InvalidGroupSpec(format!(
                "min_available {} exceeds task count {}",
                submission.min_available,
                submission.tasks.len()
            )));
        }
        {
            let mut seen = std::collections::HashSet::new();
            for task in &submission.tasks {
                if !seen.insert(task.id.as_str()) {
                    return Err(RegistryError::InvalidGroupSpec(format!(
                        "duplicate task id: {}",
                        task.id
                    )));
                }
            }
        }

        let now = epoch_secs();
        let group_id = format!("grp-{now:x}-{:04x}", self.seq.fetch_add(1, Ordering::Relaxed));
        let statuses = submission
            .tasks
            .iter()
            .map(|t| TaskStatus {
                id: t.id.clone(),
                phase: TaskPhase::Pending,
                node_id: None,
            })
            .collect();
        let record = GroupRecord {
            spec: GroupSpec {
                id: group_id.clone(),
                name: submission.name,
                queue: submission.queue,
                priority: submission.priority,
                min_available: submission.min_available,
                tasks: submission.tasks,
                submitted_at: now,
            },
            phase: GroupPhase::Pending,
            tasks: statuses,
            updated_at: now,
        };

        self.store.put_group(&record)?;
        {
            let mut groups = self.groups.write().expect("registry lock poisoned");
            groups.insert(group_id.clone(), record);
        }
        info!(%group_id, "group submitted");
        Ok(group_id)
    }

    /// Get a group by ID.
    pub fn get(&self, group_id: &str) -> Option<GroupRecord> {
        let groups = self.groups.read().expect("registry lock poisoned");
        groups.get(group_id).cloned()
    }

    /// List all groups.
    pub fn list(&self) -> Vec<GroupRecord> {
        let groups = self.groups.read().expect("registry lock poisoned");
        groups.values().cloned().collect()
    }

    /// Record committed bindings for a group: the named tasks move to
    /// Bound and allocation records are persisted.
    pub fn commit_bindings(
        &self,
        group_id: &str,
        allocations: &[AllocationRecord],
    ) -> RegistryResult<()> {
        let mut groups = self.groups.write().expect("registry lock poisoned");
        let record = groups
            .get_mut(group_id)
            .ok_or_else(|| RegistryError::GroupNotFound(group_id.to_string()))?;

        for alloc in allocations {
            let task = record
                .tasks
                .iter_mut()
                .find(|t| t.id == alloc.task_id)
                .ok_or_else(|| RegistryError::TaskNotFound {
                    group_id: group_id.to_string(),
                    task_id: alloc.task_id.clone(),
                })?;
            task.phase = TaskPhase::Bound;
            task.node_id = Some(alloc.node_id.clone());
            self.store.put_allocation(alloc)?;
        }
        record.updated_at = epoch_secs();
        self.store.put_group(record)?;
        debug!(%group_id, bound = allocations.len(), "bindings committed");
        Ok(())
    }

    /// Transition a group to Running. Requires the gang invariant: at
    /// least min_available tasks Bound.
    pub fn mark_running(&self, group_id: &str) -> RegistryResult<()> {
        let mut groups = self.groups.write().expect("registry lock poisoned");
        let record = groups
            .get_mut(group_id)
            .ok_or_else(|| RegistryError::GroupNotFound(group_id.to_string()))?;

        let bound = record.bound_count();
        if bound < record.spec.min_available {
            return Err(RegistryError::GangUnsatisfied {
                group_id: group_id.to_string(),
                bound,
                min_available: record.spec.min_available,
            });
        }
        record.phase = GroupPhase::Running;
        record.updated_at = epoch_secs();
        self.store.put_group(record)?;
        info!(%group_id, bound, "group running");
        Ok(())
    }

    /// Evict a group back to Pending: ALL non-terminal tasks are unbound
    /// together and every allocation record is deleted. Returns the
    /// released allocations so the caller can return them to the
    /// inventory.
    pub fn mark_pending(&self, group_id: &str) -> RegistryResult<Vec<AllocationRecord>> {
        let mut groups = self.groups.write().expect("registry lock poisoned");
        let record = groups
            .get_mut(group_id)
            .ok_or_else(|| RegistryError::GroupNotFound(group_id.to_string()))?;

        let released = self.store.list_allocations_for_group(group_id)?;
        self.store.delete_allocations_for_group(group_id)?;

        for task in &mut record.tasks {
            if !task.phase.is_terminal() {
                task.phase = TaskPhase::Pending;
                task.node_id = None;
            }
        }
        record.phase = GroupPhase::Pending;
        record.updated_at = epoch_secs();
        self.store.put_group(record)?;
        info!(%group_id, released = released.len(), "group evicted to pending");
        Ok(released)
    }

    /// A bound task reported started by its node agent.
    pub fn task_started(&self, group_id: &str, task_id: &str) -> RegistryResult<()> {
        self.update_task(group_id, task_id, |task| {
            if task.phase == TaskPhase::Bound {
                task.phase = TaskPhase::Running;
            } else {
                warn!(%group_id, %task_id, phase = ?task.phase, "started callback for task not bound");
            }
        })
    }

    /// A task finished successfully. Its allocation is deleted and
    /// returned; the group becomes Succeeded once every task is terminal
    /// and none failed.
    pub fn task_completed(
        &self,
        group_id: &str,
        task_id: &str,
    ) -> RegistryResult<Option<AllocationRecord>> {
        let released = self.take_allocation(group_id, task_id)?;
        self.update_task(group_id, task_id, |task| {
            task.phase = TaskPhase::Succeeded;
            task.node_id = None;
        })?;

        let mut groups = self.groups.write().expect("registry lock poisoned");
        if let Some(record) = groups.get_mut(group_id)
            && record.tasks.iter().all(|t| t.phase == TaskPhase::Succeeded)
        {
            record.phase = GroupPhase::Succeeded;
            record.updated_at = epoch_secs();
            self.store.put_group(record)?;
            info!(%group_id, "group succeeded");
        }
        Ok(released)
    }

    /// A task failed. Its allocation is deleted and returned; the caller
    /// re-evaluates the gang invariant (a Running group that drops below
    /// min_available bound tasks must be evicted).
    pub fn task_failed(
        &self,
        group_id: &str,
        task_id: &str,
    ) -> RegistryResult<Option<AllocationRecord>> {
        let released = self.take_allocation(group_id, task_id)?;
        self.update_task(group_id, task_id, |task| {
            task.phase = TaskPhase::Failed;
            task.node_id = None;
        })?;
        Ok(released)
    }

    /// Delete a group, releasing all of its allocations. Returns the
    /// released allocations, or `GroupNotFound`.
    pub fn delete(&self, group_id: &str) -> RegistryResult<Vec<AllocationRecord>> {
        let removed = {
            let mut groups = self.groups.write().expect("registry lock poisoned");
            groups.remove(group_id)
        };
        if removed.is_none() {
            return Err(RegistryError::GroupNotFound(group_id.to_string()));
        }

        let released = self.store.list_allocations_for_group(group_id)?;
        self.store.delete_allocations_for_group(group_id)?;
        self.store.delete_group(group_id)?;
        info!(%group_id, released = released.len(), "group deleted");
        Ok(released)
    }

    /// Groups on a given node (any task Bound or Running there).
    pub fn groups_on_node(&self, node_id: &str) -> Vec<GroupId> {
        let groups = self.groups.read().expect("registry lock poisoned");
        groups
            .values()
            .filter(|record| {
                record.tasks.iter().any(|t| {
                    t.phase.holds_allocation() && t.node_id.as_deref() == Some(node_id)
                })
            })
            .map(|record| record.spec.id.clone())
            .collect()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn update_task(
        &self,
        group_id: &str,
        task_id: &str,
        apply: impl FnOnce(&mut TaskStatus),
    ) -> RegistryResult<()> {
        let mut groups = self.groups.write().expect("registry lock poisoned");
        let record = groups
            .get_mut(group_id)
            .ok_or_else(|| RegistryError::GroupNotFound(group_id.to_string()))?;
        let task = record
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| RegistryError::TaskNotFound {
                group_id: group_id.to_string(),
                task_id: task_id.to_string(),
            })?;
        apply(task);
        record.updated_at = epoch_secs();
        self.store.put_group(record)?;
        Ok(())
    }

    /// Delete the allocation record for one task, returning it if it
    /// existed. Idempotent: a second call returns None.
    fn take_allocation(
        &self,
        group_id: &str,
        task_id: &str,
    ) -> RegistryResult<Option<AllocationRecord>> {
        let key = format!("{group_id}:{task_id}");
        let existing = self
            .store
            .list_allocations_for_group(group_id)?
            .into_iter()
            .find(|a| a.task_id == task_id);
        if existing.is_some() {
            self.store.delete_allocation(&key)?;
        }
        Ok(existing)
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
