//! # Actor Scheduler
//!
//! Multiplexes many actors onto two small, fixed groups of OS threads: one
//! sized to the machine's cores for CPU-bound actors and a separate one for
//! actors that sit next to blocking I/O.
//!
//! ## Usage
//! ```rust,no_run
//! use std::time::Duration;
//! use finch::{Actor, ActorScheduler, ConcurrencyControl, SchedulerConfig};
//!
//! struct Counter(u64);
//! impl Actor for Counter {}
//!
//! let scheduler = ActorScheduler::new(SchedulerConfig::default())?;
//! scheduler.start()?;
//!
//! let counter = scheduler.submit_actor(Counter(0))?;
//! let value = counter.control().call(|counter: &mut Counter| {
//!     counter.0 += 1;
//!     Ok(counter.0)
//! });
//! assert_eq!(value.join()?, 1);
//!
//! scheduler.close(Duration::from_secs(5)).join()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub(crate) mod group;
pub(crate) mod idle;
pub(crate) mod task;
pub(crate) mod timer;
pub(crate) mod worker;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use finch_api::{deadline_after, ActorClock, ActorError, ActorFuture, SystemClock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actor::{Actor, SchedulingHint};
use crate::config::{ActorConfig, SchedulerConfig};
use crate::control::ActorControl;
use crate::error::{ActorFailure, SchedulerError};
use crate::log_scheduler;
use crate::logging;

use self::group::ThreadGroup;
use self::task::{ActorTask, FailureReporter, TaskRunner};
use self::worker::ActorThreadCore;

pub use self::task::ActorState;
pub use self::timer::TimerQueue;

/// Grace period for threads to leave their loop once the close timeout
/// already elapsed.
const JOIN_GRACE: Duration = Duration::from_millis(100);

/// Lifecycle of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Created, threads not started.
    New,
    /// Accepting actors.
    Running,
    /// `close` called, waiting for actors and threads.
    Closing,
    /// All threads stopped or detached.
    Closed,
}

/// Handle to a submitted actor.
pub struct ActorHandle<A: Actor> {
    task: Arc<ActorTask<A>>,
    hint: SchedulingHint,
}

impl<A: Actor> Clone for ActorHandle<A> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            hint: self.hint,
        }
    }
}

impl<A: Actor> fmt::Debug for ActorHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("task", &self.task)
            .field("hint", &self.hint)
            .finish()
    }
}

impl<A: Actor> ActorHandle<A> {
    pub fn id(&self) -> Uuid {
        self.task.id()
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn scheduling_hint(&self) -> SchedulingHint {
        self.hint
    }

    /// Name of the actor thread the actor is bound to.
    pub fn thread_name(&self) -> &str {
        self.task.thread_name()
    }

    pub fn control(&self) -> ActorControl<A> {
        self.task.control()
    }

    /// Resolves once the start hook succeeded; fails if it did not.
    pub fn startup(&self) -> ActorFuture<()> {
        self.task.startup_future()
    }

    /// Requests the actor to close, see [`ActorControl::close`].
    pub fn close(&self) -> ActorFuture<()> {
        self.task.request_close()
    }

    /// Resolves once the actor reached `Closed`, without requesting it.
    pub fn closed(&self) -> ActorFuture<()> {
        self.task.closed_future()
    }

    pub fn state(&self) -> ActorState {
        self.task.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ActorState::Closed
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    clock: Arc<dyn ActorClock>,
    cpu: ThreadGroup,
    io: ThreadGroup,
    state: Mutex<SchedulerState>,
    failures_tx: flume::Sender<ActorFailure>,
    failures_rx: flume::Receiver<ActorFailure>,
    close_future: Mutex<Option<ActorFuture<()>>>,
}

impl SchedulerInner {
    fn group(&self, hint: SchedulingHint) -> &ThreadGroup {
        match hint {
            SchedulingHint::CpuBound => &self.cpu,
            SchedulingHint::IoBound => &self.io,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> Vec<Arc<dyn TaskRunner>> {
        let mut tasks = self.cpu.tasks();
        tasks.extend(self.io.tasks());
        tasks
    }

    /// Waits for the actors, then stops and joins the threads.
    fn finish_close(&self, closing: Vec<ActorFuture<()>>, timeout: Duration, result: &ActorFuture<()>) {
        let deadline = deadline_after(Instant::now(), timeout);
        let all_closed = ActorFuture::all_of(closing);
        if let Err(error) = all_closed.join_timeout(timeout) {
            warn!(error = %error, "Not every actor closed in time");
        }

        let remaining = self
            .tasks()
            .iter()
            .filter(|task| task.state() != ActorState::Closed)
            .count();

        self.cpu.stop();
        self.io.stop();
        let join_deadline = deadline.max(Instant::now() + JOIN_GRACE);
        let unjoined = self.cpu.join(join_deadline) + self.io.join(join_deadline);

        *self.lock_state() = SchedulerState::Closed;

        if remaining == 0 && unjoined == 0 {
            log_scheduler!("scheduler", "closed");
            let _ = result.complete(());
        } else {
            let error = SchedulerError::UncleanShutdown {
                remaining,
                threads: unjoined,
                timeout,
            };
            error!(error = %error, "Scheduler closed uncleanly");
            let _ = result.complete_exceptionally(error.into());
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        // threads hold no reference to the scheduler, they must be told to stop
        self.cpu.stop();
        self.io.stop();
    }
}

/// # ActorScheduler
///
/// Owns the thread groups, assigns submitted actors to threads and drives
/// the shutdown sequence.
///
/// ## Key Responsibilities
/// - Starting one OS thread per configured actor thread
/// - Assigning every actor to exactly one thread of the group its
///   [`SchedulingHint`] selects
/// - Collecting actor failures on a bounded channel
/// - Closing all actors and joining all threads within a timeout
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct ActorScheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for ActorScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorScheduler")
            .field("state", &self.state())
            .field("cpu", &self.inner.cpu)
            .field("io", &self.inner.io)
            .finish()
    }
}

impl ActorScheduler {
    /// Creates a scheduler reading time from the system clock.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a scheduler reading time from `clock`.
    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn ActorClock>) -> Result<Self, SchedulerError> {
        config.validate()?;
        let (failures_tx, failures_rx) = flume::bounded(config.failure_channel_capacity);
        let cpu = ThreadGroup::new(SchedulingHint::CpuBound, &config, Arc::clone(&clock));
        let io = ThreadGroup::new(SchedulingHint::IoBound, &config, Arc::clone(&clock));

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                clock,
                cpu,
                io,
                state: Mutex::new(SchedulerState::New),
                failures_tx,
                failures_rx,
                close_future: Mutex::new(None),
            }),
        })
    }

    /// Starts the actor threads. The current `tracing` dispatcher is
    /// installed on each of them.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.inner.lock_state();
        match *state {
            SchedulerState::New => {}
            SchedulerState::Running => return Err(SchedulerError::AlreadyStarted),
            SchedulerState::Closing | SchedulerState::Closed => return Err(SchedulerError::ShuttingDown),
        }

        let dispatch = logging::current_subscriber();
        self.inner.cpu.start(&dispatch)?;
        if let Err(error) = self.inner.io.start(&dispatch) {
            self.inner.cpu.stop();
            return Err(error);
        }

        *state = SchedulerState::Running;
        log_scheduler!(
            "scheduler",
            "started",
            cpu_threads = self.inner.cpu.thread_count(),
            io_threads = self.inner.io.thread_count()
        );
        Ok(())
    }

    /// Marks the scheduler running without spawning threads and hands out
    /// the thread loops instead.
    pub(crate) fn start_controlled(&self) -> Result<Vec<ActorThreadCore>, SchedulerError> {
        let mut state = self.inner.lock_state();
        if *state != SchedulerState::New {
            return Err(SchedulerError::AlreadyStarted);
        }
        let mut cores = self.inner.cpu.take_cores();
        cores.extend(self.inner.io.take_cores());
        *state = SchedulerState::Running;
        Ok(cores)
    }

    /// Submits an actor to the group its own [`Actor::scheduling_hint`] selects.
    pub fn submit_actor<A: Actor>(&self, actor: A) -> Result<ActorHandle<A>, SchedulerError> {
        self.submit_actor_with_config(actor, ActorConfig::default())
    }

    pub fn submit_actor_with_hint<A: Actor>(
        &self,
        actor: A,
        hint: SchedulingHint,
    ) -> Result<ActorHandle<A>, SchedulerError> {
        self.submit_actor_with_config(actor, ActorConfig::default().with_hint(hint))
    }

    /// Submits an actor with per-actor overrides.
    ///
    /// The actor is bound to one thread for its whole life; its start hook
    /// is the first job that thread runs for it.
    pub fn submit_actor_with_config<A: Actor>(
        &self,
        actor: A,
        config: ActorConfig,
    ) -> Result<ActorHandle<A>, SchedulerError> {
        let resolved = self.inner.config.merge_with_actor_config(&config);
        if resolved.job_queue_capacity == 0 {
            return Err(SchedulerError::InvalidConfig(
                "job_queue_capacity must be greater than zero".to_string(),
            ));
        }
        let hint = resolved.scheduling_hint.unwrap_or_else(|| actor.scheduling_hint());
        let name = resolved.name.unwrap_or_else(|| actor.name());

        // held while placing and queueing the start hook, so close() sees
        // every actor it has to close and never overtakes its start
        let state = self.inner.lock_state();
        match *state {
            SchedulerState::Running => {}
            SchedulerState::New => return Err(SchedulerError::NotRunning),
            SchedulerState::Closing | SchedulerState::Closed => return Err(SchedulerError::ShuttingDown),
        }

        let reporter = FailureReporter::new(self.inner.failures_tx.clone());
        let capacity = resolved.job_queue_capacity;
        let task = self.inner.group(hint).place(|thread| {
            ActorTask::new(actor, name, capacity, thread, reporter)
        })?;
        task.schedule_start();
        drop(state);

        Ok(ActorHandle { task, hint })
    }

    /// Closes every actor, then stops and joins the actor threads.
    ///
    /// Returns immediately; the future resolves once shutdown finished, or
    /// fails with [`SchedulerError::UncleanShutdown`] if actors or threads
    /// were still running after `timeout`. Calling it again returns the same
    /// future.
    pub fn close(&self, timeout: Duration) -> ActorFuture<()> {
        let result = {
            let mut slot = self.inner.close_future.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = slot.as_ref() {
                return existing.clone();
            }
            let result = ActorFuture::new();
            *slot = Some(result.clone());
            result
        };

        let Some(closing) = self.begin_close() else {
            let _ = result.complete(());
            return result;
        };

        let inner = Arc::clone(&self.inner);
        let target = result.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-shutdown", self.inner.config.thread_name_prefix))
            .spawn(move || inner.finish_close(closing, timeout, &target));
        if let Err(e) = spawned {
            let error = SchedulerError::ThreadSetup(format!("Failed to spawn shutdown thread: {e}"));
            let _ = result.complete_exceptionally(ActorError::from(error));
        }
        result
    }

    /// Closes with [`SchedulerConfig::shutdown_timeout`].
    pub fn shutdown(&self) -> ActorFuture<()> {
        self.close(self.inner.config.shutdown_timeout)
    }

    /// Switches to `Closing` and requests every actor to close. `None` if
    /// the scheduler never started.
    pub(crate) fn begin_close(&self) -> Option<Vec<ActorFuture<()>>> {
        {
            let mut state = self.inner.lock_state();
            let previous = std::mem::replace(&mut *state, SchedulerState::Closing);
            if previous == SchedulerState::New {
                *state = SchedulerState::Closed;
                info!("Scheduler closed before it was started");
                return None;
            }
        }
        let tasks = self.inner.tasks();
        log_scheduler!("scheduler", "closing", actors = tasks.len());
        Some(tasks.iter().map(|task| task.request_close()).collect())
    }

    pub(crate) fn mark_closed(&self) {
        *self.inner.lock_state() = SchedulerState::Closed;
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.lock_state()
    }

    /// Actor failures: failed jobs, failed lifecycle hooks and undeliverable
    /// timer jobs. Bounded; overflow is logged and dropped.
    pub fn failures(&self) -> flume::Receiver<ActorFailure> {
        self.inner.failures_rx.clone()
    }

    pub fn clock(&self) -> Arc<dyn ActorClock> {
        Arc::clone(&self.inner.clock)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Live actors over both groups.
    pub fn actor_count(&self) -> usize {
        self.inner.cpu.actor_count() + self.inner.io.actor_count()
    }

    /// Live actors per thread of the group serving `hint`.
    pub fn thread_loads(&self, hint: SchedulingHint) -> Vec<usize> {
        self.inner.group(hint).loads()
    }
}
