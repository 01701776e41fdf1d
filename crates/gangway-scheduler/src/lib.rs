//! gangway-scheduler — the single scheduling authority for a partition.
//!
//! All capacity-changing events (node join/leave, task completion and
//! failure, group submission and deletion) arrive over one mpsc channel;
//! the loop reacts to each event and then runs an admission cycle:
//!
//! ```text
//! Idle → SelectCandidate → Plan → (Commit | Requeue) → Idle
//! ```
//!
//! Because every planner commit happens inside this loop, no interleaving
//! plan can partially consume capacity another plan is counting on. Any
//! single group's failure stays local to that group's attempt; the loop
//! itself never dies short of process shutdown.

pub mod error;
pub mod event;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use event::Event;
pub use scheduler::{Scheduler, SchedulerConfig};
