use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use finch_api::{deadline_after, ActorClock, TimerHandle};

struct TimerEntry<J> {
    due: Instant,
    /// Insertion sequence, breaks ties between equal due times.
    seq: u64,
    handle: TimerHandle,
    job: J,
}

impl<J> PartialEq for TimerEntry<J> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<J> Eq for TimerEntry<J> {}

impl<J> Ord for TimerEntry<J> {
    // BinaryHeap is a max-heap, so we reverse the ordering to get a min-heap by due time.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<J> PartialOrd for TimerEntry<J> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Pending timers of one actor thread, ordered by due time.
///
/// Firing order is ascending by due time; timers due at the same instant
/// fire in the order they were scheduled. Entries cancelled through their
/// [`TimerHandle`] stay in the heap until they reach the top and are then
/// dropped without being returned.
pub struct TimerQueue<J> {
    heap: BinaryHeap<TimerEntry<J>>,
    clock: Arc<dyn ActorClock>,
    next_seq: u64,
}

impl<J> fmt::Debug for TimerQueue<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("entries", &self.heap.len())
            .field("next_due", &self.heap.peek().map(|entry| entry.due))
            .finish()
    }
}

impl<J> TimerQueue<J> {
    pub fn new(clock: Arc<dyn ActorClock>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            clock,
            next_seq: 0,
        }
    }

    /// Schedules `job` to become due `delay` after the clock's current reading.
    pub fn schedule(&mut self, delay: Duration, job: J) -> TimerHandle {
        let due = deadline_after(self.clock.now(), delay);
        self.schedule_at(due, job)
    }

    /// Schedules `job` to become due at `due`.
    pub fn schedule_at(&mut self, due: Instant, job: J) -> TimerHandle {
        let handle = TimerHandle::new();
        self.insert(due, handle.clone(), job);
        handle
    }

    /// Re-inserts a job under an existing handle, used by periodic timers.
    pub fn schedule_with_handle(&mut self, due: Instant, handle: TimerHandle, job: J) {
        self.insert(due, handle, job);
    }

    fn insert(&mut self, due: Instant, handle: TimerHandle, job: J) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.heap.push(TimerEntry { due, seq, handle, job });
    }

    /// Cancels a pending timer and removes it. Returns `false` if it already
    /// fired or was cancelled.
    pub fn cancel(&mut self, handle: &TimerHandle) -> bool {
        if !handle.cancel() {
            return false;
        }
        self.heap.retain(|entry| entry.handle != *handle);
        true
    }

    /// Removes and returns every entry due at or before `now`, ascending by
    /// due time.
    pub fn poll_expired(&mut self, now: Instant) -> Vec<(TimerHandle, J)> {
        let mut expired = Vec::new();
        while self.heap.peek().is_some_and(|entry| entry.due <= now) {
            let Some(entry) = self.heap.pop() else { break };
            if entry.handle.mark_fired() {
                expired.push((entry.handle, entry.job));
            }
        }
        expired
    }

    /// Due time of the earliest live entry.
    pub fn next_due(&mut self) -> Option<Instant> {
        while self.heap.peek().is_some_and(|entry| entry.handle.is_cancelled()) {
            self.heap.pop();
        }
        self.heap.peek().map(|entry| entry.due)
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Number of entries, including cancelled ones not yet purged.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finch_api::ControlledClock;

    fn queue() -> (Arc<ControlledClock>, TimerQueue<&'static str>) {
        let clock = Arc::new(ControlledClock::new());
        let queue = TimerQueue::new(clock.clone() as Arc<dyn ActorClock>);
        (clock, queue)
    }

    fn jobs(expired: Vec<(TimerHandle, &'static str)>) -> Vec<&'static str> {
        expired.into_iter().map(|(_, job)| job).collect()
    }

    #[test]
    fn fires_in_due_order_regardless_of_submission_order() {
        let (clock, mut queue) = queue();
        queue.schedule(Duration::from_millis(30), "third");
        queue.schedule(Duration::from_millis(10), "first");
        queue.schedule(Duration::from_millis(20), "second");

        clock.advance(Duration::from_millis(30));
        assert_eq!(jobs(queue.poll_expired(clock.now())), vec!["first", "second", "third"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn ties_fire_in_insertion_order() {
        let (clock, mut queue) = queue();
        for job in ["a", "b", "c", "d"] {
            queue.schedule(Duration::from_millis(5), job);
        }
        clock.advance(Duration::from_millis(5));
        assert_eq!(jobs(queue.poll_expired(clock.now())), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn only_expired_entries_are_returned() {
        let (clock, mut queue) = queue();
        queue.schedule(Duration::from_millis(100), "late");
        queue.schedule(Duration::from_millis(10), "early");

        clock.advance(Duration::from_millis(50));
        assert_eq!(jobs(queue.poll_expired(clock.now())), vec!["early"]);
        assert_eq!(queue.len(), 1);

        clock.advance(Duration::from_millis(60));
        assert_eq!(jobs(queue.poll_expired(clock.now())), vec!["late"]);
    }

    #[test]
    fn cancel_removes_pending_and_ignores_fired() {
        let (clock, mut queue) = queue();
        let cancelled = queue.schedule(Duration::from_millis(10), "cancelled");
        let fired = queue.schedule(Duration::from_millis(10), "fired");

        assert!(queue.cancel(&cancelled));
        assert!(!queue.cancel(&cancelled));
        assert_eq!(queue.len(), 1);

        clock.advance(Duration::from_millis(10));
        assert_eq!(jobs(queue.poll_expired(clock.now())), vec!["fired"]);
        assert!(fired.is_fired());
        assert!(!queue.cancel(&fired));
    }

    #[test]
    fn handle_cancel_skips_entry_lazily() {
        let (clock, mut queue) = queue();
        let handle = queue.schedule(Duration::from_millis(1), "skipped");
        queue.schedule(Duration::from_millis(2), "kept");

        assert!(handle.cancel());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next_due(), Some(clock.now() + Duration::from_millis(2)));

        clock.advance(Duration::from_millis(2));
        assert_eq!(jobs(queue.poll_expired(clock.now())), vec!["kept"]);
    }

    #[test]
    fn unbounded_delay_is_never_due() {
        let (clock, mut queue) = queue();
        queue.schedule(Duration::MAX, "never");
        queue.schedule(Duration::from_secs(1), "soon");

        clock.advance(Duration::from_secs(86_400 * 365));
        assert_eq!(jobs(queue.poll_expired(clock.now())), vec!["soon"]);
        assert_eq!(queue.len(), 1);
    }
}
