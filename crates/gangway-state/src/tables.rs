//! redb table definitions for the Gangway state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). The allocations table uses composite `{group_id}:{task_id}` keys
//! so a group's allocations can be found with a prefix scan.

use redb::TableDefinition;

/// Group records keyed by `{group_id}`.
pub const GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("groups");

/// Node records keyed by `{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Queue specs keyed by `{queue_name}`.
pub const QUEUES: TableDefinition<&str, &[u8]> = TableDefinition::new("queues");

/// Allocation records keyed by `{group_id}:{task_id}`.
pub const ALLOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("allocations");
