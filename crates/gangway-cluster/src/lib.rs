//! gangway-cluster — node membership and the outward-facing seams.
//!
//! The membership manager tracks which nodes are in the cluster partition,
//! processes heartbeats, and flags nodes that miss heartbeats past a dead
//! timeout so the scheduler can evict the groups bound to them.
//!
//! The [`CapacityProvider`] and [`NodeAgent`] traits are the only points
//! where the core talks to the outside world (an autoscaler and the
//! per-node runtime); everything else is events in, state out.

pub mod membership;
pub mod provider;

pub use membership::{Member, MemberStatus, MembershipManager};
pub use provider::{CapacityProvider, LoggingCapacityProvider, LoggingNodeAgent, NodeAgent};
