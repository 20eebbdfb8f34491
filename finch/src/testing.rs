//! Deterministic scheduler for tests.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use finch_api::{enter_actor_thread, ActorClock, ActorFuture, ControlledClock};

use crate::actor::{Actor, SchedulingHint};
use crate::config::{ActorConfig, SchedulerConfig};
use crate::error::{ActorFailure, SchedulerError};
use crate::scheduler::worker::ActorThreadCore;
use crate::scheduler::{ActorHandle, ActorScheduler};

/// An [`ActorScheduler`] without threads of its own.
///
/// Each group has a single actor thread whose loop is driven on the test's
/// thread by [`work_until_done`](Self::work_until_done). Time only moves when
/// the test advances the [`ControlledClock`].
///
/// ```rust
/// use std::time::Duration;
/// use finch::testing::ControlledActorScheduler;
/// use finch::{Actor, ConcurrencyControl};
///
/// struct Alarm { rang: bool }
/// impl Actor for Alarm {}
///
/// let mut scheduler = ControlledActorScheduler::new().unwrap();
/// let alarm = scheduler.submit_actor(Alarm { rang: false }).unwrap();
/// alarm
///     .control()
///     .schedule(Duration::from_secs(5), |alarm: &mut Alarm| alarm.rang = true)
///     .unwrap();
///
/// scheduler.work_until_done();
/// scheduler.advance(Duration::from_secs(5));
/// scheduler.work_until_done();
/// ```
pub struct ControlledActorScheduler {
    scheduler: ActorScheduler,
    clock: Arc<ControlledClock>,
    cores: Vec<ActorThreadCore>,
}

impl fmt::Debug for ControlledActorScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlledActorScheduler")
            .field("scheduler", &self.scheduler)
            .field("clock", &self.clock)
            .field("cores", &self.cores)
            .finish()
    }
}

impl ControlledActorScheduler {
    /// One CPU-bound and one I/O-bound thread, default settings otherwise.
    pub fn new() -> Result<Self, SchedulerError> {
        Self::with_config(SchedulerConfig {
            cpu_threads: 1,
            io_threads: 1,
            ..SchedulerConfig::default()
        })
    }

    /// Scheduler with a custom configuration, e.g. a smaller quantum or
    /// queue capacity. Thread counts are honoured as given.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let clock = Arc::new(ControlledClock::new());
        let scheduler = ActorScheduler::with_clock(config, Arc::clone(&clock) as Arc<dyn ActorClock>)?;
        Self::from_parts(scheduler, clock)
    }

    fn from_parts(scheduler: ActorScheduler, clock: Arc<ControlledClock>) -> Result<Self, SchedulerError> {
        let cores = scheduler.start_controlled()?;
        Ok(Self {
            scheduler,
            clock,
            cores,
        })
    }

    pub fn scheduler(&self) -> &ActorScheduler {
        &self.scheduler
    }

    pub fn clock(&self) -> &Arc<ControlledClock> {
        &self.clock
    }

    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    pub fn submit_actor<A: Actor>(&self, actor: A) -> Result<ActorHandle<A>, SchedulerError> {
        self.scheduler.submit_actor(actor)
    }

    pub fn submit_actor_with_hint<A: Actor>(
        &self,
        actor: A,
        hint: SchedulingHint,
    ) -> Result<ActorHandle<A>, SchedulerError> {
        self.scheduler.submit_actor_with_hint(actor, hint)
    }

    pub fn submit_actor_with_config<A: Actor>(
        &self,
        actor: A,
        config: ActorConfig,
    ) -> Result<ActorHandle<A>, SchedulerError> {
        self.scheduler.submit_actor_with_config(actor, config)
    }

    /// Drives every actor thread until none has anything left to do at the
    /// current clock reading. Returns the number of passes that did work.
    pub fn work_until_done(&mut self) -> usize {
        let _actor_thread = enter_actor_thread();
        let mut passes = 0;
        loop {
            let mut worked = false;
            for core in &mut self.cores {
                worked |= core.work_once();
            }
            if !worked {
                return passes;
            }
            passes += 1;
        }
    }

    /// Runs a single pass over every actor thread.
    pub fn work_once(&mut self) -> bool {
        let _actor_thread = enter_actor_thread();
        let mut worked = false;
        for core in &mut self.cores {
            worked |= core.work_once();
        }
        worked
    }

    /// Closes one actor and runs until it reached `Closed`.
    pub fn close_actor<A: Actor>(&mut self, actor: &ActorHandle<A>) -> ActorFuture<()> {
        let closed = actor.close();
        self.work_until_done();
        closed
    }

    /// Closes every actor and marks the scheduler closed.
    pub fn close_all(&mut self) -> ActorFuture<()> {
        let closing = self.scheduler.begin_close().unwrap_or_default();
        let all = ActorFuture::all_of(closing);
        self.work_until_done();
        self.scheduler.mark_closed();
        match all.try_get() {
            Some(Ok(_)) => ActorFuture::completed(()),
            Some(Err(error)) => ActorFuture::completed_exceptionally(error),
            None => ActorFuture::completed_exceptionally(
                SchedulerError::UncleanShutdown {
                    remaining: self.scheduler.actor_count(),
                    threads: 0,
                    timeout: Duration::ZERO,
                }
                .into(),
            ),
        }
    }

    /// Failures reported so far, without blocking.
    pub fn drain_failures(&self) -> Vec<ActorFailure> {
        self.scheduler.failures().try_iter().collect()
    }

    pub fn actor_count(&self) -> usize {
        self.scheduler.actor_count()
    }
}
