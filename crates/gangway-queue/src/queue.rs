//! Admission queue implementation.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use tracing::debug;

/// A group waiting for admission.
#[derive(Debug, Clone)]
pub struct QueuedGroup {
    pub group_id: String,
    /// Weight of the group's target queue (higher drains first).
    pub queue_weight: u32,
    /// Group priority within the tier.
    pub priority: u32,
    /// Unix timestamp of submission; the FIFO key within a tier.
    pub submitted_at: u64,
    /// Consecutive failed admission attempts.
    pub failures: u32,
    /// Earliest instant this group may be attempted again.
    pub not_before: Instant,
    /// When the group first entered the queue (for backlog staleness).
    pub enqueued_at: Instant,
}

impl QueuedGroup {
    /// Admission order: weight desc, priority desc, arrival asc. Group ID
    /// breaks remaining ties deterministically.
    fn admission_cmp(&self, other: &Self) -> Ordering {
        other
            .queue_weight
            .cmp(&self.queue_weight)
            .then(other.priority.cmp(&self.priority))
            .then(self.submitted_at.cmp(&other.submitted_at))
            .then(self.group_id.cmp(&other.group_id))
    }
}

/// The admission queue. Owned by the scheduler loop; not shared.
pub struct AdmissionQueue {
    entries: Vec<QueuedGroup>,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl AdmissionQueue {
    pub fn new(backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            entries: Vec::new(),
            backoff_base,
            backoff_cap,
        }
    }

    /// Add a newly submitted group, immediately eligible.
    pub fn enqueue(&mut self, group_id: &str, queue_weight: u32, priority: u32, submitted_at: u64) {
        let now = Instant::now();
        self.entries.push(QueuedGroup {
            group_id: group_id.to_string(),
            queue_weight,
            priority,
            submitted_at,
            failures: 0,
            not_before: now,
            enqueued_at: now,
        });
        debug!(%group_id, queue_weight, priority, "group enqueued");
    }

    /// The best eligible candidate at `now`, without removing it.
    pub fn peek_next(&self, now: Instant) -> Option<&QueuedGroup> {
        self.entries
            .iter()
            .filter(|e| e.not_before <= now)
            .min_by(|a, b| a.admission_cmp(b))
    }

    /// Remove and return the best eligible candidate at `now`.
    pub fn take_next(&mut self, now: Instant) -> Option<QueuedGroup> {
        let best = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.not_before <= now)
            .min_by(|(_, a), (_, b)| a.admission_cmp(b))
            .map(|(i, _)| i)?;
        Some(self.entries.swap_remove(best))
    }

    /// Put a failed candidate back with exponential backoff: the delay
    /// doubles per consecutive failure, capped.
    pub fn requeue(&mut self, mut entry: QueuedGroup, now: Instant) {
        entry.failures += 1;
        let exp = entry.failures.saturating_sub(1).min(16);
        let delay = self
            .backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_cap);
        entry.not_before = now + delay;
        debug!(
            group_id = %entry.group_id,
            failures = entry.failures,
            delay_ms = delay.as_millis() as u64,
            "group requeued with backoff"
        );
        self.entries.push(entry);
    }

    /// Make every entry immediately eligible again. Called when capacity
    /// grows (node joined): the shortage backoffs were waiting out no
    /// longer describes the cluster.
    pub fn reset_backoffs(&mut self, now: Instant) {
        for entry in &mut self.entries {
            entry.not_before = now;
            entry.failures = 0;
        }
    }

    /// Drop a group from the queue (deleted by the user). Returns true if
    /// it was queued.
    pub fn remove(&mut self, group_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.group_id != group_id);
        self.entries.len() < before
    }

    /// Groups that have been waiting longer than `staleness`. This is the
    /// signal for asking the capacity provider for more nodes.
    pub fn backlog(&self, now: Instant, staleness: Duration) -> usize {
        self.entries
            .iter()
            .filter(|e| now.duration_since(e.enqueued_at) >= staleness)
            .count()
    }

    /// Time until the soonest backed-off entry becomes eligible, if every
    /// current entry is under backoff.
    pub fn next_eligible_in(&self, now: Instant) -> Option<Duration> {
        if self.entries.iter().any(|e| e.not_before <= now) {
            return Some(Duration::ZERO);
        }
        self.entries
            .iter()
            .map(|e| e.not_before.duration_since(now))
            .min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> AdmissionQueue {
        AdmissionQueue::new(Duration::from_millis(100), Duration::from_secs(10))
    }

    #[test]
    fn higher_weight_drains_first() {
        let mut q = queue();
        q.enqueue("low", 1, 0, 100);
        q.enqueue("high", 10, 0, 200);

        let next = q.take_next(Instant::now()).unwrap();
        assert_eq!(next.group_id, "high");
    }

    #[test]
    fn fifo_within_a_tier() {
        let mut q = queue();
        q.enqueue("second", 5, 0, 200);
        q.enqueue("first", 5, 0, 100);

        assert_eq!(q.take_next(Instant::now()).unwrap().group_id, "first");
        assert_eq!(q.take_next(Instant::now()).unwrap().group_id, "second");
        assert!(q.take_next(Instant::now()).is_none());
    }

    #[test]
    fn priority_breaks_ties_within_weight() {
        let mut q = queue();
        q.enqueue("normal", 5, 0, 100);
        q.enqueue("urgent", 5, 9, 200);

        // Later arrival but higher priority wins.
        assert_eq!(q.take_next(Instant::now()).unwrap().group_id, "urgent");
    }

    #[test]
    fn backoff_makes_entry_ineligible() {
        let mut q = queue();
        q.enqueue("g", 1, 0, 100);
        let now = Instant::now();

        let entry = q.take_next(now).unwrap();
        q.requeue(entry, now);

        assert!(q.peek_next(now).is_none());
        // Eligible again once the backoff elapses.
        assert!(q.peek_next(now + Duration::from_millis(150)).is_some());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut q = queue();
        q.enqueue("g", 1, 0, 100);
        let now = Instant::now();

        let mut entry = q.take_next(now).unwrap();
        for _ in 0..10 {
            q.requeue(entry, now);
            entry = q.entries.pop().unwrap();
        }
        // 100ms * 2^9 would be 51.2s; capped at 10s.
        assert_eq!(entry.failures, 10);
        assert!(entry.not_before.duration_since(now) <= Duration::from_secs(10));
    }

    #[test]
    fn backed_off_entry_does_not_block_others() {
        let mut q = queue();
        q.enqueue("stuck", 10, 0, 100);
        let now = Instant::now();

        let stuck = q.take_next(now).unwrap();
        q.requeue(stuck, now);
        q.enqueue("fresh", 1, 0, 200);

        // Lower weight, but the only eligible entry. The fresh entry's
        // not-before is its enqueue instant, so ask at a time past it.
        assert_eq!(q.take_next(Instant::now()).unwrap().group_id, "fresh");
    }

    #[test]
    fn reset_backoffs_restores_eligibility() {
        let mut q = queue();
        q.enqueue("g", 1, 0, 100);
        let now = Instant::now();

        let entry = q.take_next(now).unwrap();
        q.requeue(entry, now);
        assert!(q.peek_next(now).is_none());

        q.reset_backoffs(now);
        assert_eq!(q.peek_next(now).unwrap().group_id, "g");
        assert_eq!(q.peek_next(now).unwrap().failures, 0);
    }

    #[test]
    fn remove_deleted_group() {
        let mut q = queue();
        q.enqueue("g-1", 1, 0, 100);
        q.enqueue("g-2", 1, 0, 200);

        assert!(q.remove("g-1"));
        assert!(!q.remove("g-1"));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn backlog_counts_stale_entries() {
        let mut q = queue();
        q.enqueue("g-1", 1, 0, 100);

        let now = Instant::now();
        assert_eq!(q.backlog(now + Duration::from_secs(31), Duration::from_secs(30)), 1);
        assert_eq!(q.backlog(now, Duration::from_secs(30)), 0);
    }

    #[test]
    fn next_eligible_reports_backoff_window() {
        let mut q = queue();
        assert!(q.next_eligible_in(Instant::now()).is_none());

        q.enqueue("g", 1, 0, 100);
        let now = Instant::now();
        assert_eq!(q.next_eligible_in(now), Some(Duration::ZERO));

        let entry = q.take_next(now).unwrap();
        q.requeue(entry, now);
        let wait = q.next_eligible_in(now).unwrap();
        assert!(wait > Duration::ZERO && wait <= Duration::from_millis(100));
    }
}
