//! Cancelable handle for scheduled timers.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

static TIMER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_timer_id() -> u64 {
    TIMER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Handle to a scheduled timer.
///
/// Cloning shares the same underlying timer. A timer is pending until it
/// either fires or is cancelled, whichever happens first.
#[derive(Clone)]
pub struct TimerHandle {
    id: u64,
    state: Arc<AtomicU8>,
}

impl TimerHandle {
    /// Creates a new pending handle.
    pub fn new() -> Self {
        Self {
            id: next_timer_id(),
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// Creates a handle for a timer that already fired.
    pub fn fired() -> Self {
        let handle = Self::new();
        handle.state.store(FIRED, Ordering::SeqCst);
        handle
    }

    /// Cancels the timer.
    ///
    /// Returns `true` if the timer was still pending. Cancelling a timer that
    /// already fired or was cancelled is a no-op.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Marks the timer as fired. Returns `false` if it was cancelled first.
    pub fn mark_fired(&self) -> bool {
        self.state
            .compare_exchange(PENDING, FIRED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Puts a fired periodic timer back into the pending state.
    ///
    /// Returns `false` if the timer was cancelled in the meantime.
    pub fn rearm(&self) -> bool {
        self.state
            .compare_exchange(FIRED, PENDING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::SeqCst) == PENDING
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
    }

    pub fn is_fired(&self) -> bool {
        self.state.load(Ordering::SeqCst) == FIRED
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TimerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TimerHandle {}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("pending", &self.is_pending())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_only_once() {
        let handle = TimerHandle::new();
        assert!(handle.is_pending());
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_cancelled());
        assert!(!handle.mark_fired());
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let handle = TimerHandle::new();
        assert!(handle.mark_fired());
        assert!(!handle.cancel());
        assert!(handle.is_fired());
    }

    #[test]
    fn rearm_fails_once_cancelled() {
        let handle = TimerHandle::new();
        assert!(handle.mark_fired());
        assert!(handle.rearm());
        assert!(handle.cancel());
        assert!(!handle.rearm());
    }

    #[test]
    fn clones_share_state() {
        let handle = TimerHandle::new();
        let clone = handle.clone();
        assert_eq!(handle, clone);
        clone.cancel();
        assert!(handle.is_cancelled());
    }
}
