//! Time sources for the scheduler.
//!
//! The runtime never calls `Instant::now()` directly; it reads an
//! [`ActorClock`]. Production code uses [`SystemClock`], tests use
//! [`ControlledClock`] to fire timers without sleeping.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// Horizon used for deadlines that would overflow `Instant`, about 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Returns `now + delay`. Delays beyond the representable range saturate to
/// a deadline far enough ahead to never be reached.
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Source of the current instant.
pub trait ActorClock: Send + Sync + fmt::Debug {
    /// Returns the current instant. Never decreases between calls.
    fn now(&self) -> Instant;
}

/// Monotonic wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ActorClock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Advancing the clock makes timers whose due time has passed eligible to
/// fire on the next scheduler pass; it does not run anything by itself.
#[derive(Debug)]
pub struct ControlledClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ControlledClock {
    /// Creates a clock pinned to the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset = offset.saturating_add(duration);
    }

    /// Sets the clock to `instant`. Instants before the current reading are
    /// ignored, the clock never runs backwards.
    pub fn set_time(&self, instant: Instant) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        let target = instant.saturating_duration_since(self.origin);
        if target < *offset {
            warn!(
                current_ms = offset.as_millis() as u64,
                requested_ms = target.as_millis() as u64,
                "Ignoring attempt to move controlled clock backwards"
            );
            return;
        }
        *offset = target;
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the clock to its creation instant.
    pub fn reset(&self) {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner()) = Duration::ZERO;
    }
}

impl Default for ControlledClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorClock for ControlledClock {
    fn now(&self) -> Instant {
        deadline_after(self.origin, self.elapsed())
    }
}
