//! Per-node capacity accounting and the two-phase reservation protocol.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use gangway_state::{NodeId, ResourceVec};

use crate::error::{InventoryError, InventoryResult};

/// Capacity bookkeeping for one node.
#[derive(Debug, Clone)]
struct NodeSlot {
    capacity: ResourceVec,
    used: ResourceVec,
    taints: Vec<String>,
}

impl NodeSlot {
    fn free(&self) -> ResourceVec {
        self.capacity.minus(&self.used)
    }
}

/// Point-in-time view of one node's availability, as returned by
/// [`Inventory::snapshot`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeAvailability {
    pub node_id: NodeId,
    pub capacity: ResourceVec,
    pub free: ResourceVec,
    pub taints: Vec<String>,
}

/// Thread-safe resource inventory.
///
/// All mutations go through the single internal lock, so no interleaving
/// of concurrent reserves can oversubscribe a node.
#[derive(Clone, Default)]
pub struct Inventory {
    nodes: Arc<Mutex<HashMap<NodeId, NodeSlot>>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node with its total capacity. Replaces any previous
    /// entry for the same ID, resetting its used amount.
    pub fn add_node(&self, node_id: &str, capacity: ResourceVec, taints: Vec<String>) {
        let mut nodes = self.nodes.lock().expect("inventory lock poisoned");
        nodes.insert(
            node_id.to_string(),
            NodeSlot {
                capacity,
                used: ResourceVec::default(),
                taints,
            },
        );
        debug!(%node_id, ?capacity, "node added to inventory");
    }

    /// Remove a node. Returns true if it was present.
    pub fn remove_node(&self, node_id: &str) -> bool {
        let mut nodes = self.nodes.lock().expect("inventory lock poisoned");
        let existed = nodes.remove(node_id).is_some();
        if existed {
            debug!(%node_id, "node removed from inventory");
        }
        existed
    }

    /// Reserve `request` on a node, atomically. Fails with
    /// `InsufficientCapacity` when the node cannot fit the request.
    pub fn reserve(&self, node_id: &str, request: &ResourceVec) -> InventoryResult<()> {
        let mut nodes = self.nodes.lock().expect("inventory lock poisoned");
        let slot = nodes
            .get_mut(node_id)
            .ok_or_else(|| InventoryError::UnknownNode(node_id.to_string()))?;
        if !slot.free().fits(request) {
            return Err(InventoryError::InsufficientCapacity(node_id.to_string()));
        }
        slot.used = slot.used.plus(request);
        Ok(())
    }

    /// Release `request` on a node. Saturates at zero; releasing on a node
    /// that has since left the cluster is a no-op.
    pub fn release(&self, node_id: &str, request: &ResourceVec) {
        let mut nodes = self.nodes.lock().expect("inventory lock poisoned");
        match nodes.get_mut(node_id) {
            Some(slot) => {
                slot.used = slot.used.minus(request);
            }
            None => {
                warn!(%node_id, "release for a node no longer in inventory");
            }
        }
    }

    /// Free capacity on a single node, if present.
    pub fn free(&self, node_id: &str) -> Option<ResourceVec> {
        let nodes = self.nodes.lock().expect("inventory lock poisoned");
        nodes.get(node_id).map(NodeSlot::free)
    }

    /// Sum of free capacity across all nodes.
    pub fn total_free(&self) -> ResourceVec {
        let nodes = self.nodes.lock().expect("inventory lock poisoned");
        nodes
            .values()
            .fold(ResourceVec::default(), |acc, slot| acc.plus(&slot.free()))
    }

    /// Per-node availability view. The planner sorts this; no ordering is
    /// guaranteed here.
    pub fn snapshot(&self) -> Vec<NodeAvailability> {
        let nodes = self.nodes.lock().expect("inventory lock poisoned");
        nodes
            .iter()
            .map(|(id, slot)| NodeAvailability {
                node_id: id.clone(),
                capacity: slot.capacity,
                free: slot.free(),
                taints: slot.taints.clone(),
            })
            .collect()
    }

    /// Number of nodes currently tracked.
    pub fn node_count(&self) -> usize {
        self.nodes.lock().expect("inventory lock poisoned").len()
    }

    /// Begin a multi-node reservation transaction.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            inventory: self,
            holds: Vec::new(),
            committed: false,
        }
    }
}

/// A two-phase, multi-node reservation.
///
/// Each `reserve` call takes effect immediately (so later reserves in the
/// same transaction see the reduced free capacity), but every hold is
/// released again when the transaction is dropped without `commit()`.
pub struct Transaction<'a> {
    inventory: &'a Inventory,
    holds: Vec<(NodeId, ResourceVec)>,
    committed: bool,
}

impl<'a> Transaction<'a> {
    /// Tentatively reserve `request` on a node.
    pub fn reserve(&mut self, node_id: &str, request: &ResourceVec) -> InventoryResult<()> {
        self.inventory.reserve(node_id, request)?;
        self.holds.push((node_id.to_string(), *request));
        Ok(())
    }

    /// Number of tentative holds in this transaction.
    pub fn hold_count(&self) -> usize {
        self.holds.len()
    }

    /// Make every tentative hold permanent and return the committed
    /// (node, request) pairs.
    pub fn commit(mut self) -> Vec<(NodeId, ResourceVec)> {
        self.committed = true;
        std::mem::take(&mut self.holds)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            for (node_id, request) in &self.holds {
                self.inventory.release(node_id, request);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpus(n: u32) -> ResourceVec {
        ResourceVec { gpus: n, memory_bytes: 0 }
    }

    fn inventory_with(nodes: &[(&str, u32)]) -> Inventory {
        let inv = Inventory::new();
        for (id, cap) in nodes {
            inv.add_node(id, gpus(*cap), Vec::new());
        }
        inv
    }

    #[test]
    fn reserve_and_release() {
        let inv = inventory_with(&[("n-1", 4)]);

        inv.reserve("n-1", &gpus(3)).unwrap();
        assert_eq!(inv.free("n-1"), Some(gpus(1)));

        inv.release("n-1", &gpus(3));
        assert_eq!(inv.free("n-1"), Some(gpus(4)));
    }

    #[test]
    fn reserve_beyond_capacity_is_insufficient() {
        let inv = inventory_with(&[("n-1", 2)]);

        inv.reserve("n-1", &gpus(2)).unwrap();
        let err = inv.reserve("n-1", &gpus(1)).unwrap_err();
        assert_eq!(err, InventoryError::InsufficientCapacity("n-1".to_string()));
        // The failed reserve left nothing behind.
        assert_eq!(inv.free("n-1"), Some(gpus(0)));
    }

    #[test]
    fn reserve_unknown_node() {
        let inv = Inventory::new();
        let err = inv.reserve("ghost", &gpus(1)).unwrap_err();
        assert_eq!(err, InventoryError::UnknownNode("ghost".to_string()));
    }

    #[test]
    fn release_saturates_at_zero() {
        let inv = inventory_with(&[("n-1", 4)]);
        inv.reserve("n-1", &gpus(1)).unwrap();

        // Over-release must not create phantom capacity.
        inv.release("n-1", &gpus(3));
        assert_eq!(inv.free("n-1"), Some(gpus(4)));
    }

    #[test]
    fn release_on_departed_node_is_noop() {
        let inv = inventory_with(&[("n-1", 4)]);
        inv.remove_node("n-1");
        inv.release("n-1", &gpus(1));
        assert_eq!(inv.node_count(), 0);
    }

    #[test]
    fn concurrent_reserves_never_oversubscribe() {
        let inv = inventory_with(&[("n-1", 100)]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let inv = inv.clone();
                std::thread::spawn(move || {
                    let mut granted = 0u32;
                    for _ in 0..50 {
                        if inv.reserve("n-1", &gpus(1)).is_ok() {
                            granted += 1;
                        }
                    }
                    granted
                })
            })
            .collect();

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
        assert_eq!(inv.free("n-1"), Some(gpus(0)));
    }

    #[test]
    fn transaction_commit_keeps_holds() {
        let inv = inventory_with(&[("n-1", 2), ("n-2", 2)]);

        let mut txn = inv.begin();
        txn.reserve("n-1", &gpus(1)).unwrap();
        txn.reserve("n-2", &gpus(2)).unwrap();
        let committed = txn.commit();

        assert_eq!(committed.len(), 2);
        assert_eq!(inv.free("n-1"), Some(gpus(1)));
        assert_eq!(inv.free("n-2"), Some(gpus(0)));
    }

    #[test]
    fn transaction_drop_rolls_back_all_holds() {
        let inv = inventory_with(&[("n-1", 2), ("n-2", 2)]);

        {
            let mut txn = inv.begin();
            txn.reserve("n-1", &gpus(2)).unwrap();
            txn.reserve("n-2", &gpus(1)).unwrap();
            assert_eq!(txn.hold_count(), 2);
            // Dropped without commit.
        }

        assert_eq!(inv.free("n-1"), Some(gpus(2)));
        assert_eq!(inv.free("n-2"), Some(gpus(2)));
    }

    #[test]
    fn transaction_sees_its_own_holds() {
        let inv = inventory_with(&[("n-1", 2)]);

        let mut txn = inv.begin();
        txn.reserve("n-1", &gpus(2)).unwrap();
        // Same transaction cannot double-book the node.
        assert!(txn.reserve("n-1", &gpus(1)).is_err());
    }

    #[test]
    fn snapshot_reflects_usage() {
        let inv = inventory_with(&[("n-1", 4), ("n-2", 8)]);
        inv.reserve("n-2", &gpus(5)).unwrap();

        let mut snap = inv.snapshot();
        snap.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].free, gpus(4));
        assert_eq!(snap[1].free, gpus(3));
        assert_eq!(inv.total_free(), gpus(7));
    }

    #[test]
    fn re_adding_node_resets_usage() {
        let inv = inventory_with(&[("n-1", 4)]);
        inv.reserve("n-1", &gpus(4)).unwrap();

        inv.add_node("n-1", gpus(4), Vec::new());
        assert_eq!(inv.free("n-1"), Some(gpus(4)));
    }
}
