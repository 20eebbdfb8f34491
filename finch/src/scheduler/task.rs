//! # Actor Task
//!
//! The scheduling record of one actor: its bounded job queue, its lifecycle
//! state and the futures that report startup and closing.
//!
//! ## Ownership
//! - Any thread may submit jobs; submission is a lock-free push plus, if the
//!   task was not already queued, a hand-off to the owning actor thread.
//! - Only the owning actor thread runs jobs. It does so while holding the
//!   task's core lock, which is therefore never contended.
//! - The `scheduled` flag guarantees a task sits in at most one run queue.
//!
//! ## Lifecycle
//! `NotScheduled -> Scheduled -> Active -> (Waiting <-> Active)* -> Closing -> Closed`
//!
//! Phase-blocking completions (`run_on_completion_blocking`) hold the start
//! report and the close sequence until their future resolved. Jobs keep
//! running while a phase is blocked.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use finch_api::{deadline_after, enter_actor, ActorError, ActorExecutor, ActorFuture, ActorResult, TimerHandle};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::actor::Actor;
use crate::control::ActorControl;
use crate::error::{ActorFailure, FailurePhase};
use crate::scheduler::worker::{ThreadHandle, TimerJob};
use crate::{actor_span, log_lifecycle};

/// Lifecycle state of an actor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Created, not yet handed to a thread.
    NotScheduled = 0,
    /// Assigned to a thread, start hook pending.
    Scheduled = 1,
    /// Currently running jobs.
    Active = 2,
    /// Parked without runnable jobs; holds no thread.
    Waiting = 3,
    /// Closing hook running or about to run.
    Closing = 4,
    /// Final state.
    Closed = 5,
}

impl ActorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ActorState::NotScheduled,
            1 => ActorState::Scheduled,
            2 => ActorState::Active,
            3 => ActorState::Waiting,
            4 => ActorState::Closing,
            _ => ActorState::Closed,
        }
    }
}

/// What a visit of the actor thread left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// The quantum was used up and jobs remain.
    MoreWork,
    /// No jobs remain; the task parks until woken.
    Idle,
    /// The task reached `Closed`.
    Closed,
}

/// Type-erased view of an actor task used by actor threads.
pub(crate) trait TaskRunner: Send + Sync {
    fn id(&self) -> Uuid;
    fn name(&self) -> &str;
    fn state(&self) -> ActorState;
    /// Runs at most `quantum` jobs.
    fn run(&self, quantum: usize) -> RunOutcome;
    /// Clears the scheduled flag after an `Idle` outcome.
    fn park(&self);
    /// Sets the scheduled flag; `false` if someone else already did.
    fn try_claim(&self) -> bool;
    fn has_pending_work(&self) -> bool;
    fn request_close(&self) -> ActorFuture<()>;
}

pub(crate) enum TaskJob<A> {
    Start,
    Run(Box<dyn FnOnce(&mut A) + Send + 'static>),
    /// Callback of a phase-blocking completion; accepted while closing.
    Resume(Box<dyn FnOnce(&mut A) + Send + 'static>),
}

struct TaskCore<A: Actor> {
    actor: A,
    control: ActorControl<A>,
}

/// Forwards failures to the scheduler's failure channel.
#[derive(Clone, Debug)]
pub(crate) struct FailureReporter {
    sender: flume::Sender<ActorFailure>,
}

impl FailureReporter {
    pub(crate) fn new(sender: flume::Sender<ActorFailure>) -> Self {
        Self { sender }
    }

    pub(crate) fn report(&self, failure: ActorFailure) {
        match self.sender.try_send(failure) {
            Ok(()) => {}
            Err(flume::TrySendError::Full(failure)) => {
                warn!(failure = %failure, "Failure channel is full, failure only logged");
            }
            Err(flume::TrySendError::Disconnected(_)) => {}
        }
    }
}

pub(crate) struct ActorTask<A: Actor> {
    id: Uuid,
    name: String,
    state: AtomicU8,
    scheduled: AtomicBool,
    close_requested: AtomicBool,
    /// Outstanding phase-blocking completions.
    blocked: AtomicUsize,
    /// Start hook ran, but `startup` waits for blocked completions.
    start_pending: AtomicBool,
    jobs: ArrayQueue<TaskJob<A>>,
    core: Mutex<TaskCore<A>>,
    timers: Mutex<Vec<TimerHandle>>,
    thread: Arc<ThreadHandle>,
    this: Weak<ActorTask<A>>,
    executor: ActorExecutor,
    startup: ActorFuture<()>,
    closed: ActorFuture<()>,
    failures: FailureReporter,
}

impl<A: Actor> fmt::Debug for ActorTask<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("queued_jobs", &self.jobs.len())
            .field("thread", &self.thread.name())
            .finish()
    }
}

impl<A: Actor> ActorTask<A> {
    pub(crate) fn new(
        actor: A,
        name: String,
        queue_capacity: usize,
        thread: Arc<ThreadHandle>,
        failures: FailureReporter,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        Arc::new_cyclic(|this: &Weak<ActorTask<A>>| {
            let control = ActorControl::new(this.clone(), id, name.clone());
            Self {
                id,
                name,
                state: AtomicU8::new(ActorState::NotScheduled as u8),
                scheduled: AtomicBool::new(false),
                close_requested: AtomicBool::new(false),
                blocked: AtomicUsize::new(0),
                start_pending: AtomicBool::new(false),
                jobs: ArrayQueue::new(queue_capacity),
                executor: Arc::new(control.clone()),
                core: Mutex::new(TaskCore { actor, control }),
                timers: Mutex::new(Vec::new()),
                thread,
                this: this.clone(),
                startup: ActorFuture::new(),
                closed: ActorFuture::new(),
                failures,
            }
        })
    }

    pub(crate) fn control(&self) -> ActorControl<A> {
        ActorControl::new(self.this.clone(), self.id, self.name.clone())
    }

    pub(crate) fn startup_future(&self) -> ActorFuture<()> {
        self.startup.clone()
    }

    pub(crate) fn closed_future(&self) -> ActorFuture<()> {
        self.closed.clone()
    }

    pub(crate) fn thread_name(&self) -> &str {
        self.thread.name()
    }

    /// Queues the start hook and hands the task to its thread. Only the
    /// first call on a task that was never run has an effect.
    pub(crate) fn schedule_start(&self) -> bool {
        let claimed = self
            .state
            .compare_exchange(
                ActorState::NotScheduled as u8,
                ActorState::Scheduled as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if !claimed {
            debug!(actor = %self.name, state = ?self.state(), "Start already scheduled or actor closed");
            return false;
        }
        if self.jobs.push(TaskJob::Start).is_err() {
            // fresh queue with capacity >= 1, cannot be full
            error!(actor = %self.name, "Could not queue start hook");
            return false;
        }
        self.wake();
        log_lifecycle!(self.name, self.id, "scheduled", thread = %self.thread.name());
        true
    }

    /// Enqueues a job. Callable from any thread.
    pub(crate) fn submit(&self, job: TaskJob<A>) -> ActorResult<()> {
        if self.close_requested.load(Ordering::SeqCst) {
            return Err(ActorError::Closed);
        }
        if self.jobs.push(job).is_err() {
            return Err(ActorError::QueueFull {
                capacity: self.jobs.capacity(),
            });
        }
        self.wake();
        Ok(())
    }

    /// Submits a job on behalf of the runtime (timer, continuation), where
    /// nobody is left to receive a rejection.
    pub(crate) fn deliver(&self, job: TaskJob<A>) {
        match self.submit(job) {
            Ok(()) => {}
            Err(ActorError::Closed) => {
                debug!(actor = %self.name, "Discarding job delivered to closed actor");
            }
            Err(error) => {
                warn!(actor = %self.name, error = %error, "Dropping delivered job");
                self.report(FailurePhase::Delivery, error);
            }
        }
    }

    /// Registers a phase-blocking completion; see [`TaskJob::Resume`].
    pub(crate) fn block_phase(&self) {
        self.blocked.fetch_add(1, Ordering::SeqCst);
    }

    /// Queues the callback of a phase-blocking completion. Bypasses the
    /// close check: a blocked close waits for exactly this job.
    pub(crate) fn resume(&self, job: Box<dyn FnOnce(&mut A) + Send + 'static>) {
        if self.state() == ActorState::Closed {
            debug!(actor = %self.name, "Discarding completion callback of closed actor");
            return;
        }
        if self.jobs.push(TaskJob::Resume(job)).is_err() {
            warn!(actor = %self.name, "Job queue full, dropping completion callback");
            self.report(
                FailurePhase::Delivery,
                ActorError::QueueFull {
                    capacity: self.jobs.capacity(),
                },
            );
            // the phase must not stay blocked on a callback that will never run
            self.blocked.fetch_sub(1, Ordering::SeqCst);
        }
        self.wake();
    }

    fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst) > 0
    }

    fn wake(&self) {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.this.upgrade() {
            self.thread.make_runnable(task);
        }
    }

    pub(crate) fn schedule_timer(
        &self,
        delay: Duration,
        job: Box<dyn FnOnce(&mut A) + Send + 'static>,
    ) -> ActorResult<TimerHandle> {
        if self.close_requested.load(Ordering::SeqCst) {
            return Err(ActorError::Closed);
        }
        let task = self.this.clone();
        let fire: TimerJob = Box::new(move || {
            if let Some(task) = task.upgrade() {
                task.deliver(TaskJob::Run(job));
            }
        });
        let handle = self.thread.schedule_timer(delay, fire);
        self.track_timer(handle.clone());
        Ok(handle)
    }

    /// Schedules `job` every `interval` until the returned handle is
    /// cancelled or the actor closes. Each firing reschedules the next one
    /// from within the fired job.
    pub(crate) fn schedule_fixed_rate(
        &self,
        interval: Duration,
        job: Box<dyn FnMut(&mut A) + Send + 'static>,
    ) -> ActorResult<TimerHandle> {
        if interval.is_zero() {
            return Err(ActorError::InvalidArgument(
                "fixed rate interval must be greater than zero".to_string(),
            ));
        }
        if self.close_requested.load(Ordering::SeqCst) {
            return Err(ActorError::Closed);
        }
        let handle = TimerHandle::new();
        self.arm_periodic(interval, handle.clone(), job);
        self.track_timer(handle.clone());
        Ok(handle)
    }

    fn arm_periodic(
        &self,
        interval: Duration,
        handle: TimerHandle,
        mut job: Box<dyn FnMut(&mut A) + Send + 'static>,
    ) {
        let task = self.this.clone();
        let timer = handle.clone();
        let fire: TimerJob = Box::new(move || {
            // back to pending right away so a cancel during the job is honoured
            if !timer.rearm() {
                return;
            }
            let Some(task) = task.upgrade() else { return };
            let owner = Arc::downgrade(&task);
            task.deliver(TaskJob::Run(Box::new(move |actor: &mut A| {
                if !timer.is_pending() {
                    return;
                }
                job(actor);
                if timer.is_pending() {
                    if let Some(task) = owner.upgrade() {
                        task.arm_periodic(interval, timer, job);
                    }
                }
            })));
        });
        let due = deadline_after(self.thread.now(), interval);
        self.thread.schedule_timer_with_handle(due, handle, fire);
    }

    fn track_timer(&self, handle: TimerHandle) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers.retain(TimerHandle::is_pending);
        timers.push(handle);
    }

    fn set_state(&self, state: ActorState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn lock_core(&self) -> MutexGuard<'_, TaskCore<A>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, phase: FailurePhase, error: ActorError) {
        self.failures.report(ActorFailure {
            actor_id: self.id,
            actor_name: self.name.clone(),
            phase,
            error,
        });
    }

    fn run_start(&self, core: &mut TaskCore<A>) {
        let TaskCore { actor, control } = &mut *core;
        let result = panic::catch_unwind(AssertUnwindSafe(|| actor.on_actor_started(control)))
            .unwrap_or_else(|payload| Err(ActorError::from_panic(payload)));

        match result {
            Ok(()) if self.is_blocked() => {
                debug!(actor = %self.name, "Start hook waits on blocking completions");
                self.start_pending.store(true, Ordering::SeqCst);
            }
            Ok(()) => self.report_started(),
            Err(error) => {
                error!(actor = %self.name, error = %error, "Actor failed to start, closing it");
                self.report(FailurePhase::Started, error.clone());
                let _ = self.startup.complete_exceptionally(error.clone());
                self.fail(core, &error);
            }
        }
    }

    fn report_started(&self) {
        log_lifecycle!(self.name, self.id, "started");
        let _ = self.startup.complete(());
    }

    fn report_started_if_unblocked(&self) {
        if !self.is_blocked() && self.start_pending.swap(false, Ordering::SeqCst) {
            self.report_started();
        }
    }

    fn run_job(&self, core: &mut TaskCore<A>, job: Box<dyn FnOnce(&mut A) + Send + 'static>) {
        let actor = &mut core.actor;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(actor))) {
            let error = ActorError::from_panic(payload);
            error!(actor = %self.name, error = %error, "Job failed, dropping it");
            self.report(FailurePhase::Job, error);
        }
    }

    /// Lifecycle hook failure: skip the closing hook and close right away.
    fn fail(&self, core: &mut TaskCore<A>, error: &ActorError) {
        self.close_requested.store(true, Ordering::SeqCst);
        self.set_state(ActorState::Closing);
        self.cancel_timers();
        let actor = &mut core.actor;
        if panic::catch_unwind(AssertUnwindSafe(|| actor.on_actor_failed(error))).is_err() {
            warn!(actor = %self.name, "on_actor_failed panicked");
        }
        self.finish_close(core);
    }

    /// Runs the closing hook. The close finishes once no completion blocks
    /// it any more.
    fn run_closing(&self, core: &mut TaskCore<A>) {
        self.set_state(ActorState::Closing);
        log_lifecycle!(self.name, self.id, "closing");
        self.cancel_timers();
        if !self.startup.is_done() {
            debug!(actor = %self.name, "Actor never started, skipping closing hook");
            return;
        }

        let TaskCore { actor, control } = &mut *core;
        let result = panic::catch_unwind(AssertUnwindSafe(|| actor.on_actor_closing(control)))
            .unwrap_or_else(|payload| Err(ActorError::from_panic(payload)));
        if let Err(error) = result {
            error!(actor = %self.name, error = %error, "Closing hook failed");
            self.report(FailurePhase::Closing, error.clone());
            if panic::catch_unwind(AssertUnwindSafe(|| actor.on_actor_failed(&error))).is_err() {
                warn!(actor = %self.name, "on_actor_failed panicked");
            }
        }
    }

    fn finish_close(&self, core: &mut TaskCore<A>) {
        let mut discarded = 0_usize;
        while self.jobs.pop().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(actor = %self.name, discarded, "Discarded pending jobs of closing actor");
        }

        let actor = &mut core.actor;
        if panic::catch_unwind(AssertUnwindSafe(|| actor.on_actor_closed())).is_err() {
            warn!(actor = %self.name, "on_actor_closed panicked");
        }

        self.set_state(ActorState::Closed);
        if !self.startup.is_done() {
            let _ = self.startup.complete_exceptionally(ActorError::Closed);
        }
        let _ = self.closed.complete(());
        log_lifecycle!(self.name, self.id, "closed");
    }

    fn cancel_timers(&self) {
        let timers = std::mem::take(&mut *self.timers.lock().unwrap_or_else(PoisonError::into_inner));
        for timer in timers {
            timer.cancel();
        }
    }

    fn is_closing(&self) -> bool {
        matches!(self.state(), ActorState::Closing | ActorState::Closed)
    }
}

impl<A: Actor> TaskRunner for ActorTask<A> {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ActorState {
        ActorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn run(&self, quantum: usize) -> RunOutcome {
        let mut core = self.lock_core();
        if self.state() == ActorState::Closed {
            return RunOutcome::Closed;
        }
        let _span = actor_span!(self.name, self.id).entered();
        let _actor = enter_actor(Arc::clone(&self.executor));

        if !self.is_closing() {
            self.set_state(ActorState::Active);
        }

        let mut executed = 0;
        while executed < quantum {
            let Some(job) = self.jobs.pop() else { break };
            executed += 1;
            match job {
                TaskJob::Start => self.run_start(&mut core),
                TaskJob::Run(job) => self.run_job(&mut core, job),
                TaskJob::Resume(job) => {
                    self.run_job(&mut core, job);
                    self.blocked.fetch_sub(1, Ordering::SeqCst);
                }
            }
            if self.state() == ActorState::Closed {
                return RunOutcome::Closed;
            }
            self.report_started_if_unblocked();
        }
        self.report_started_if_unblocked();

        if !self.jobs.is_empty() {
            return RunOutcome::MoreWork;
        }
        if self.close_requested.load(Ordering::SeqCst) && !self.is_blocked() {
            if self.state() != ActorState::Closing {
                self.run_closing(&mut core);
            }
            if !self.is_blocked() {
                self.finish_close(&mut core);
                return RunOutcome::Closed;
            }
            debug!(actor = %self.name, "Closing hook waits on blocking completions");
        }
        if !self.is_closing() {
            self.set_state(ActorState::Waiting);
        }
        RunOutcome::Idle
    }

    fn park(&self) {
        self.scheduled.store(false, Ordering::SeqCst);
    }

    fn try_claim(&self) -> bool {
        !self.scheduled.swap(true, Ordering::SeqCst)
    }

    fn has_pending_work(&self) -> bool {
        !self.jobs.is_empty()
            || (self.close_requested.load(Ordering::SeqCst)
                && !self.is_blocked()
                && self.state() != ActorState::Closed)
    }

    fn request_close(&self) -> ActorFuture<()> {
        if !self.close_requested.swap(true, Ordering::SeqCst) {
            log_lifecycle!(self.name, self.id, "close requested");
            self.wake();
        }
        self.closed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdleStrategyConfig;
    use crate::scheduler::worker::ActorThreadCore;
    use finch_api::{ActorClock, ControlledClock};

    #[derive(Default)]
    struct Hooks {
        started: Arc<AtomicUsize>,
        closing: Arc<AtomicUsize>,
    }

    impl Actor for Hooks {
        fn on_actor_started(&mut self, _control: &ActorControl<Self>) -> ActorResult<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_actor_closing(&mut self, _control: &ActorControl<Self>) -> ActorResult<()> {
            self.closing.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn task_on_thread(actor: Hooks) -> (Arc<ActorTask<Hooks>>, ActorThreadCore) {
        let clock: Arc<dyn ActorClock> = Arc::new(ControlledClock::new());
        let (thread, core) =
            ActorThreadCore::create("task-test".to_string(), clock, 4, 8, IdleStrategyConfig::default());
        let (failures, _) = flume::bounded(8);
        let task = ActorTask::new(actor, "hooks".to_string(), 16, Arc::clone(&thread), FailureReporter::new(failures));
        thread.register(Arc::clone(&task) as Arc<dyn TaskRunner>);
        (task, core)
    }

    fn drain(core: &mut ActorThreadCore) {
        while core.work_once() {}
    }

    #[test]
    fn start_after_close_keeps_task_closed() {
        let hooks = Hooks::default();
        let started = Arc::clone(&hooks.started);
        let closing = Arc::clone(&hooks.closing);
        let (task, mut core) = task_on_thread(hooks);

        let closed = task.request_close();
        drain(&mut core);
        assert_eq!(task.state(), ActorState::Closed);
        assert!(closed.is_done());

        assert!(!task.schedule_start());
        drain(&mut core);
        assert_eq!(task.state(), ActorState::Closed);
        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(closing.load(Ordering::SeqCst), 0);
        assert!(matches!(task.startup_future().try_get(), Some(Err(ActorError::Closed))));
    }

    #[test]
    fn start_is_scheduled_once() {
        let hooks = Hooks::default();
        let started = Arc::clone(&hooks.started);
        let (task, mut core) = task_on_thread(hooks);

        assert!(task.schedule_start());
        assert!(!task.schedule_start());
        drain(&mut core);

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(task.startup_future().is_done());
        assert_eq!(task.state(), ActorState::Waiting);
    }
}
