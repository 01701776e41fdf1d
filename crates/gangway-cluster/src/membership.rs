//! Membership manager — tracks cluster node state.
//!
//! Manages the set of nodes in the partition, their heartbeats, and
//! detects dead nodes based on missed heartbeats. Dead nodes become
//! NodeLost events for the scheduler, which evicts the groups bound
//! to them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use gangway_state::*;

/// Status of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Ready,
    Dead,
}

/// View of a cluster member, as served by the nodes endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Member {
    pub node_id: NodeId,
    pub address: String,
    pub status: MemberStatus,
    pub capacity: ResourceVec,
    pub taints: Vec<String>,
    pub last_heartbeat: u64,
}

/// Manages cluster membership state.
///
/// Persists node records to the `StateStore`; the inventory is kept in
/// sync by the scheduler reacting to join/leave/lost events.
pub struct MembershipManager {
    state: StateStore,
    /// Missed-heartbeat window after which a node counts as dead.
    dead_timeout: Duration,
}

impl MembershipManager {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            dead_timeout: Duration::from_secs(30),
        }
    }

    /// Set the dead node detection timeout.
    pub fn with_dead_timeout(mut self, timeout: Duration) -> Self {
        self.dead_timeout = timeout;
        self
    }

    /// Register a new node. Generates a node ID, persists the record, and
    /// returns the assigned ID.
    pub fn join(
        &self,
        address: &str,
        capacity: ResourceVec,
        taints: Vec<String>,
    ) -> StateResult<NodeRecord> {
        let node_id = generate_node_id(address);
        let node = NodeRecord {
            id: node_id.clone(),
            address: address.to_string(),
            capacity,
            taints,
            last_heartbeat: epoch_secs(),
        };
        self.state.put_node(&node)?;
        info!(%node_id, %address, gpus = capacity.gpus, "node joined cluster");
        Ok(node)
    }

    /// Process a heartbeat from a node. Returns false for unknown nodes
    /// (the agent should re-join).
    pub fn heartbeat(&self, node_id: &str) -> StateResult<bool> {
        match self.state.get_node(node_id)? {
            Some(mut node) => {
                node.last_heartbeat = epoch_secs();
                self.state.put_node(&node)?;
                debug!(%node_id, "heartbeat received");
                Ok(true)
            }
            None => {
                warn!(%node_id, "heartbeat from unknown node");
                Ok(false)
            }
        }
    }

    /// Remove a node from the cluster.
    pub fn leave(&self, node_id: &str) -> StateResult<bool> {
        let existed = self.state.delete_node(node_id)?;
        if existed {
            info!(%node_id, "node left cluster");
        }
        Ok(existed)
    }

    /// List all current members with their status.
    pub fn list_members(&self) -> StateResult<Vec<Member>> {
        let now = epoch_secs();
        let members = self
            .state
            .list_nodes()?
            .into_iter()
            .map(|n| {
                let status = if now.saturating_sub(n.last_heartbeat) > self.dead_timeout.as_secs()
                {
                    MemberStatus::Dead
                } else {
                    MemberStatus::Ready
                };
                Member {
                    node_id: n.id,
                    address: n.address,
                    status,
                    capacity: n.capacity,
                    taints: n.taints,
                    last_heartbeat: n.last_heartbeat,
                }
            })
            .collect();
        Ok(members)
    }

    /// Detect and remove dead nodes. Returns the IDs of nodes removed so
    /// the caller can emit NodeLost events for them.
    pub fn reap_dead_nodes(&self) -> StateResult<Vec<NodeId>> {
        let members = self.list_members()?;
        let mut reaped = Vec::new();
        for member in members {
            if member.status == MemberStatus::Dead {
                self.state.delete_node(&member.node_id)?;
                warn!(node_id = %member.node_id, "reaped dead node");
                reaped.push(member.node_id);
            }
        }
        Ok(reaped)
    }

    /// Count of ready (alive) nodes.
    pub fn ready_count(&self) -> StateResult<usize> {
        let members = self.list_members()?;
        Ok(members
            .iter()
            .filter(|m| m.status == MemberStatus::Ready)
            .count())
    }
}

/// Generate a node ID from the address and join time.
fn generate_node_id(address: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    address.hash(&mut hasher);
    epoch_secs().hash(&mut hasher);
    format!("node-{:08x}", hasher.finish() as u32)
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
