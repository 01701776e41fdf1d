//! The admission control loop.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use gangway_cluster::{CapacityProvider, NodeAgent};
use gangway_inventory::Inventory;
use gangway_planner::{Placement, try_place};
use gangway_queue::{AdmissionQueue, QueuedGroup};
use gangway_registry::Registry;
use gangway_state::*;

use crate::error::SchedulerResult;
use crate::event::Event;

/// Weight used for groups submitted to a queue that was never created.
const DEFAULT_QUEUE_WEIGHT: u32 = 1;

/// Tunables for the loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Periodic wake-up when no events arrive.
    pub tick_interval: Duration,
    /// First requeue delay after a failed admission.
    pub backoff_base: Duration,
    /// Upper bound on the requeue delay.
    pub backoff_cap: Duration,
    /// How long a group must wait before it counts toward the backlog.
    pub backlog_staleness: Duration,
    /// Backlog size at which the capacity provider is asked for more.
    pub backlog_threshold: usize,
    /// Allow evicting lower-priority Running groups to admit a starved
    /// candidate. Off by default; priority then affects admission order
    /// only.
    pub enable_preemption: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            backlog_staleness: Duration::from_secs(30),
            backlog_threshold: 1,
            enable_preemption: false,
        }
    }
}

/// The scheduler owns the admission queue and is the only component that
/// commits planner reservations or transitions group state.
pub struct Scheduler {
    store: StateStore,
    registry: Registry,
    inventory: Inventory,
    queue: AdmissionQueue,
    provider: Arc<dyn CapacityProvider>,
    agent: Arc<dyn NodeAgent>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: StateStore,
        registry: Registry,
        inventory: Inventory,
        provider: Arc<dyn CapacityProvider>,
        agent: Arc<dyn NodeAgent>,
        config: SchedulerConfig,
    ) -> Self {
        let queue = AdmissionQueue::new(config.backoff_base, config.backoff_cap);
        Self {
            store,
            registry,
            inventory,
            queue,
            provider,
            agent,
            config,
        }
    }

    /// Rebuild in-memory state from the store after a restart: nodes into
    /// the inventory, committed allocations re-reserved, pending groups
    /// back into the queue. Returns the number of groups recovered.
    pub fn recover(&mut self) -> SchedulerResult<usize> {
        let recovered = self.registry.recover()?;

        for node in self.store.list_nodes()? {
            self.inventory.add_node(&node.id, node.capacity, node.taints);
        }
        let mut broken: Vec<GroupId> = Vec::new();
        for alloc in self.store.list_allocations()? {
            if let Err(e) = self.inventory.reserve(&alloc.node_id, &alloc.request) {
                // A stale allocation for a node that never came back.
                warn!(
                    group_id = %alloc.group_id,
                    task_id = %alloc.task_id,
                    error = %e,
                    "dropping unrecoverable allocation"
                );
                self.store.delete_allocation(&alloc.table_key())?;
                if !broken.contains(&alloc.group_id) {
                    broken.push(alloc.group_id.clone());
                }
            }
        }
        // A group that lost any binding cannot keep the rest of its gang;
        // evict it whole, releasing the reservations that did recover.
        for group_id in &broken {
            match self.registry.mark_pending(group_id) {
                Ok(released) => self.release_all(&released, None),
                Err(gangway_registry::RegistryError::GroupNotFound(_)) => {
                    warn!(%group_id, "stale allocation for a group no longer registered");
                }
                Err(e) => return Err(e.into()),
            }
        }
        for record in self.registry.list() {
            if record.phase == GroupPhase::Pending {
                self.enqueue_group(&record);
            }
        }
        info!(groups = recovered, nodes = self.inventory.node_count(), "scheduler state recovered");
        Ok(recovered)
    }

    /// Run until the event channel closes or shutdown is signalled.
    pub async fn run(
        &mut self,
        events: &mut mpsc::Receiver<Event>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        info!(tick_secs = self.config.tick_interval.as_secs(), "scheduler loop started");
        loop {
            // Wake early if a backed-off group becomes eligible first.
            let wait = self
                .queue
                .next_eligible_in(Instant::now())
                .unwrap_or(self.config.tick_interval)
                .min(self.config.tick_interval)
                .max(Duration::from_millis(10));

            tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(event) => {
                        self.handle_event(event);
                        self.schedule_cycle();
                    }
                    None => {
                        info!("event channel closed, scheduler stopping");
                        break;
                    }
                },
                _ = tokio::time::sleep(wait) => {
                    self.schedule_cycle();
                }
                _ = shutdown.changed() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// React to one event. Failures are logged against the group or node
    /// concerned; the loop continues regardless.
    fn handle_event(&mut self, event: Event) {
        if let Err(e) = self.dispatch(event) {
            error!(error = %e, "event handling failed");
        }
    }

    fn dispatch(&mut self, event: Event) -> SchedulerResult<()> {
        match event {
            Event::GroupSubmitted { group_id } => {
                if let Some(record) = self.registry.get(&group_id) {
                    self.enqueue_group(&record);
                } else {
                    warn!(%group_id, "submitted group vanished before enqueue");
                }
            }
            Event::GroupDeleted { group_id } => {
                self.queue.remove(&group_id);
                match self.registry.delete(&group_id) {
                    Ok(released) => self.release_all(&released, None),
                    Err(gangway_registry::RegistryError::GroupNotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Event::NodeJoined { node } => {
                self.inventory.add_node(&node.id, node.capacity, node.taints);
                // The shortage the backoffs were waiting out has changed.
                self.queue.reset_backoffs(Instant::now());
            }
            Event::NodeLeft { node_id } => self.handle_node_gone(&node_id, false)?,
            Event::NodeLost { node_id } => self.handle_node_gone(&node_id, true)?,
            Event::TaskStarted { group_id, task_id } => {
                self.registry.task_started(&group_id, &task_id)?;
            }
            Event::TaskCompleted { group_id, task_id } => {
                if let Some(alloc) = self.registry.task_completed(&group_id, &task_id)? {
                    self.inventory.release(&alloc.node_id, &alloc.request);
                }
            }
            Event::TaskFailed { group_id, task_id } => {
                if let Some(alloc) = self.registry.task_failed(&group_id, &task_id)? {
                    self.inventory.release(&alloc.node_id, &alloc.request);
                }
                self.enforce_gang(&group_id)?;
            }
        }
        Ok(())
    }

    /// One admission cycle: attempt every currently eligible candidate in
    /// admission order; failed candidates are requeued with backoff after
    /// the pass so a zero backoff cannot spin the cycle.
    fn schedule_cycle(&mut self) {
        let now = Instant::now();
        let mut deferred = Vec::new();

        while let Some(entry) = self.queue.take_next(now) {
            match self.attempt(&entry) {
                Ok(true) => {}
                Ok(false) => deferred.push(entry),
                Err(e) => {
                    // Bug-class failure: skip this candidate, keep going.
                    error!(group_id = %entry.group_id, error = %e, "admission attempt failed");
                    deferred.push(entry);
                }
            }
        }
        for entry in deferred {
            self.queue.requeue(entry, now);
        }

        self.check_backlog(now);
    }

    /// Attempt admission for one candidate. Returns true when the entry is
    /// finished with the queue (admitted, or no longer schedulable).
    fn attempt(&mut self, entry: &QueuedGroup) -> SchedulerResult<bool> {
        // Deleted while queued, or already past Pending.
        let Some(record) = self.registry.get(&entry.group_id) else {
            return Ok(true);
        };
        if record.phase != GroupPhase::Pending {
            return Ok(true);
        }

        match try_place(&record, &self.inventory)? {
            Placement::Pending { reason } => {
                debug!(group_id = %entry.group_id, %reason, "admission deferred");
                if self.config.enable_preemption {
                    self.preempt_for(&record)?;
                }
                Ok(false)
            }
            Placement::Placed { assignments } => {
                let now = epoch_secs();
                let allocations: Vec<AllocationRecord> = assignments
                    .into_iter()
                    .map(|a| AllocationRecord {
                        group_id: record.spec.id.clone(),
                        task_id: a.task_id,
                        node_id: a.node_id,
                        request: a.request,
                        bound_at: now,
                    })
                    .collect();

                if let Err(e) = self.registry.commit_bindings(&entry.group_id, &allocations) {
                    // Registry refused the bindings; hand the capacity back.
                    self.release_all(&allocations, None);
                    return Err(e.into());
                }
                self.registry.mark_running(&entry.group_id)?;
                for alloc in &allocations {
                    self.agent.bind(alloc);
                }
                info!(
                    group_id = %entry.group_id,
                    bound = allocations.len(),
                    "group admitted"
                );
                Ok(true)
            }
        }
    }

    /// A node disappeared: drop its capacity and evict every group bound
    /// there, all-or-nothing, back to Pending.
    fn handle_node_gone(&mut self, node_id: &str, lost: bool) -> SchedulerResult<()> {
        self.inventory.remove_node(node_id);
        if lost {
            warn!(%node_id, "node lost, evicting bound groups");
        } else {
            info!(%node_id, "node left, evicting bound groups");
        }

        for group_id in self.registry.groups_on_node(node_id) {
            let released = self.registry.mark_pending(&group_id)?;
            // Allocations on the gone node vanished with it; the rest
            // return to the inventory.
            self.release_all(&released, Some(node_id));
            if let Some(record) = self.registry.get(&group_id) {
                self.enqueue_group(&record);
            }
        }
        Ok(())
    }

    /// Re-check the gang invariant after a task failure: a Running group
    /// below min_available bound tasks is evicted whole.
    fn enforce_gang(&mut self, group_id: &str) -> SchedulerResult<()> {
        let Some(record) = self.registry.get(group_id) else {
            return Ok(());
        };
        if record.phase == GroupPhase::Running && record.bound_count() < record.spec.min_available
        {
            warn!(
                %group_id,
                bound = record.bound_count(),
                min_available = record.spec.min_available,
                "gang broken, evicting group"
            );
            let released = self.registry.mark_pending(group_id)?;
            self.release_all(&released, None);
            if let Some(record) = self.registry.get(group_id) {
                self.enqueue_group(&record);
            }
        }
        Ok(())
    }

    /// Preemption pass (opt-in): evict the lowest-priority Running group
    /// strictly below the starved candidate, freeing capacity for the
    /// next cycle.
    fn preempt_for(&mut self, candidate: &GroupRecord) -> SchedulerResult<()> {
        let mut victims: Vec<GroupRecord> = self
            .registry
            .list()
            .into_iter()
            .filter(|g| g.phase == GroupPhase::Running && g.spec.priority < candidate.spec.priority)
            .collect();
        victims.sort_by_key(|g| g.spec.priority);

        if let Some(victim) = victims.first() {
            info!(
                victim = %victim.spec.id,
                candidate = %candidate.spec.id,
                "preempting lower-priority group"
            );
            let released = self.registry.mark_pending(&victim.spec.id)?;
            self.release_all(&released, None);
            if let Some(record) = self.registry.get(&victim.spec.id) {
                self.enqueue_group(&record);
            }
        }
        Ok(())
    }

    /// When stale pending groups pile up, ask the capacity provider for
    /// the GPU shortfall. One request per cycle at most; the provider is
    /// expected to do its own rate limiting.
    fn check_backlog(&mut self, now: Instant) {
        let backlog = self.queue.backlog(now, self.config.backlog_staleness);
        if backlog < self.config.backlog_threshold {
            return;
        }

        let demanded: u64 = self
            .registry
            .list()
            .iter()
            .filter(|g| g.phase == GroupPhase::Pending)
            .flat_map(|g| g.spec.tasks.iter())
            .map(|t| u64::from(t.request.gpus))
            .sum();
        let free = u64::from(self.inventory.total_free().gpus);
        let shortfall = demanded.saturating_sub(free);
        if shortfall > 0 {
            debug!(backlog, shortfall, "requesting more capacity");
            self.provider.request_capacity("gpu", shortfall);
        }
    }

    fn enqueue_group(&mut self, record: &GroupRecord) {
        let weight = self
            .store
            .get_queue(&record.spec.queue)
            .ok()
            .flatten()
            .map_or(DEFAULT_QUEUE_WEIGHT, |q| q.weight);
        self.queue.enqueue(
            &record.spec.id,
            weight,
            record.spec.priority,
            record.spec.submitted_at,
        );
    }

    fn release_all(&self, allocations: &[AllocationRecord], skip_node: Option<&str>) {
        for alloc in allocations {
            if skip_node.is_some_and(|n| n == alloc.node_id) {
                continue;
            }
            self.inventory.release(&alloc.node_id, &alloc.request);
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
