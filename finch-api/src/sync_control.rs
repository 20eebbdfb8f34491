//! Synchronous [`ConcurrencyControl`] for unit-testing actor logic without a
//! scheduler.
//!
//! Timing deliberately differs from production:
//!
//! - jobs and callables run right away on the calling thread; a job submitted
//!   from inside another job runs as soon as the current one returns
//! - scheduled jobs run immediately, the delay is ignored
//! - futures resolve eagerly, so completion callbacks run as soon as their
//!   future resolves
//!
//! Code that passes tests against this double can still misbehave under the
//! real scheduler if it depends on jobs being deferred.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error};

use crate::control::{ConcurrencyControl, Executor, Job};
use crate::errors::{ActorError, ActorResult};
use crate::timer::TimerHandle;

type StateJob<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

struct Inner<S> {
    state: Mutex<S>,
    pending: Mutex<VecDeque<StateJob<S>>>,
    draining: AtomicBool,
}

/// Runs every job synchronously against an owned state.
pub struct SyncConcurrencyControl<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for SyncConcurrencyControl<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for SyncConcurrencyControl<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConcurrencyControl")
            .field("draining", &self.inner.draining.load(Ordering::Relaxed))
            .finish()
    }
}

impl<S> SyncConcurrencyControl<S>
where
    S: Send + 'static,
{
    pub fn new(state: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                pending: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Gives read/write access to the state, e.g. for assertions.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut *self.state())
    }

    fn state(&self) -> MutexGuard<'_, S> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<StateJob<S>>> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(&self) {
        loop {
            if self.inner.draining.swap(true, Ordering::AcqRel) {
                // an outer frame is draining and will pick the job up
                return;
            }

            loop {
                let next = self.pending().pop_front();
                let Some(job) = next else { break };
                let mut state = self.state();
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(&mut *state))) {
                    let error = ActorError::from_panic(payload);
                    error!(error = %error, "Job failed in synchronous concurrency control");
                }
            }

            self.inner.draining.store(false, Ordering::Release);
            if self.pending().is_empty() {
                return;
            }
        }
    }
}

impl<S> Executor for SyncConcurrencyControl<S>
where
    S: Send + 'static,
{
    fn execute(&self, job: Job) -> ActorResult<()> {
        self.run(move |_| job())
    }
}

impl<S> ConcurrencyControl<S> for SyncConcurrencyControl<S>
where
    S: Send + 'static,
{
    fn run<F>(&self, job: F) -> ActorResult<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.pending().push_back(Box::new(job));
        self.drain();
        Ok(())
    }

    fn schedule<F>(&self, delay: Duration, job: F) -> ActorResult<TimerHandle>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        debug!(delay_ms = delay.as_millis() as u64, "Ignoring timer delay, running job now");
        self.run(job)?;
        Ok(TimerHandle::fired())
    }
}
