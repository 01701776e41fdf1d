//! StateStore — redb-backed state persistence for Gangway.
//!
//! Provides typed CRUD operations over groups, nodes, queues, and
//! allocations. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(GROUPS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(QUEUES).map_err(map_err!(Table))?;
        txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Txn))?;
        Ok(())
    }

    // ── Groups ─────────────────────────────────────────────────────

    /// Insert or update a group record.
    pub fn put_group(&self, record: &GroupRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        {
            let mut table = txn.open_table(GROUPS).map_err(map_err!(Table))?;
            table
                .insert(record.spec.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Txn))?;
        debug!(group_id = %record.spec.id, phase = ?record.phase, "group stored");
        Ok(())
    }

    /// Get a group by ID.
    pub fn get_group(&self, group_id: &str) -> StateResult<Option<GroupRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Txn))?;
        let table = txn.open_table(GROUPS).map_err(map_err!(Table))?;
        match table.get(group_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: GroupRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all groups.
    pub fn list_groups(&self) -> StateResult<Vec<GroupRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Txn))?;
        let table = txn.open_table(GROUPS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: GroupRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Delete a group by ID. Returns true if it existed.
    pub fn delete_group(&self, group_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        let existed;
        {
            let mut table = txn.open_table(GROUPS).map_err(map_err!(Table))?;
            existed = table.remove(group_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Txn))?;
        debug!(%group_id, existed, "group deleted");
        Ok(existed)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node record.
    pub fn put_node(&self, node: &NodeRecord) -> StateResult<()> {
        let value = serde_json::to_vec(node).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            table
                .insert(node.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Txn))?;
        Ok(())
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: &str) -> StateResult<Option<NodeRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Txn))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        match table.get(node_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let node: NodeRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// List all nodes.
    pub fn list_nodes(&self) -> StateResult<Vec<NodeRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Txn))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let node: NodeRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(node);
        }
        Ok(results)
    }

    /// Delete a node by ID. Returns true if it existed.
    pub fn delete_node(&self, node_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        let existed;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            existed = table.remove(node_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Txn))?;
        Ok(existed)
    }

    // ── Queues ─────────────────────────────────────────────────────

    /// Insert or update a queue spec.
    pub fn put_queue(&self, queue: &QueueSpec) -> StateResult<()> {
        let value = serde_json::to_vec(queue).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        {
            let mut table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            table
                .insert(queue.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Txn))?;
        Ok(())
    }

    /// Get a queue by name.
    pub fn get_queue(&self, name: &str) -> StateResult<Option<QueueSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Txn))?;
        let table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let queue: QueueSpec =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(queue))
            }
            None => Ok(None),
        }
    }

    /// List all queues.
    pub fn list_queues(&self) -> StateResult<Vec<QueueSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Txn))?;
        let table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let queue: QueueSpec =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(queue);
        }
        Ok(results)
    }

    /// Delete a queue by name. Returns true if it existed. Groups already
    /// submitted to the queue keep running; new submissions fall back to
    /// the default weight.
    pub fn delete_queue(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        let existed;
        {
            let mut table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Txn))?;
        Ok(existed)
    }

    // ── Allocations ────────────────────────────────────────────────

    /// Insert or update an allocation record.
    pub fn put_allocation(&self, alloc: &AllocationRecord) -> StateResult<()> {
        let key = alloc.table_key();
        let value = serde_json::to_vec(alloc).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        {
            let mut table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Txn))?;
        Ok(())
    }

    /// List all allocations for a given group ID.
    pub fn list_allocations_for_group(
        &self,
        group_id: &str,
    ) -> StateResult<Vec<AllocationRecord>> {
        let prefix = format!("{group_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Txn))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let alloc: AllocationRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
                results.push(alloc);
            }
        }
        Ok(results)
    }

    /// List every committed allocation (used to rebuild the inventory on
    /// daemon restart).
    pub fn list_allocations(&self) -> StateResult<Vec<AllocationRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Txn))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let alloc: AllocationRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(alloc);
        }
        Ok(results)
    }

    /// Delete a single allocation by `{group_id}:{task_id}` key.
    /// Returns true if it existed.
    pub fn delete_allocation(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        let existed;
        {
            let mut table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Txn))?;
        Ok(existed)
    }

    /// Delete all allocations for a group. Returns the number deleted.
    pub fn delete_allocations_for_group(&self, group_id: &str) -> StateResult<u32> {
        let prefix = format!("{group_id}:");
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Txn))?;
            let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect()
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Txn))?;
        Ok(count)
    }
}
