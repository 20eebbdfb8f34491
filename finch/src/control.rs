//! [`ActorControl`], the handle through which work reaches an actor.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use finch_api::{
    ActorError, ActorFuture, ActorResult, ConcurrencyControl, Executor, InlineExecutor, Job, TimerHandle,
};
use tracing::debug;
use uuid::Uuid;

use crate::actor::Actor;
use crate::scheduler::task::{ActorState, ActorTask, TaskJob, TaskRunner};

/// Schedules jobs onto one actor.
///
/// Cheap to clone and safe to share with any thread. It holds the actor only
/// weakly; once the scheduler dropped a closed actor every operation fails
/// with [`ActorError::Closed`].
pub struct ActorControl<A: Actor> {
    task: Weak<ActorTask<A>>,
    id: Uuid,
    name: Arc<str>,
}

impl<A: Actor> Clone for ActorControl<A> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            id: self.id,
            name: Arc::clone(&self.name),
        }
    }
}

impl<A: Actor> fmt::Debug for ActorControl<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorControl")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl<A: Actor> ActorControl<A> {
    pub(crate) fn new(task: Weak<ActorTask<A>>, id: Uuid, name: String) -> Self {
        Self {
            task,
            id,
            name: Arc::from(name),
        }
    }

    fn task(&self) -> ActorResult<Arc<ActorTask<A>>> {
        self.task.upgrade().ok_or(ActorError::Closed)
    }

    pub fn actor_id(&self) -> Uuid {
        self.id
    }

    pub fn actor_name(&self) -> &str {
        &self.name
    }

    /// Runs `job` every `interval`, first `interval` after now, until the
    /// returned handle is cancelled or the actor closes. A zero interval is
    /// rejected with [`ActorError::InvalidArgument`].
    pub fn schedule_at_fixed_rate<F>(&self, interval: Duration, job: F) -> ActorResult<TimerHandle>
    where
        F: FnMut(&mut A) + Send + 'static,
    {
        self.task()?.schedule_fixed_rate(interval, Box::new(job))
    }

    /// Requests the actor to close. Jobs queued before the request still
    /// run; the returned future resolves once the actor reached `Closed`.
    pub fn close(&self) -> ActorFuture<()> {
        match self.task.upgrade() {
            Some(task) => task.request_close(),
            None => ActorFuture::completed(()),
        }
    }

    pub fn state(&self) -> ActorState {
        self.task
            .upgrade()
            .map_or(ActorState::Closed, |task| task.state())
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ActorState::Closed
    }
}

impl<A: Actor> Executor for ActorControl<A> {
    fn execute(&self, job: Job) -> ActorResult<()> {
        self.run(move |_: &mut A| job())
    }
}

impl<A: Actor> ConcurrencyControl<A> for ActorControl<A> {
    fn run<F>(&self, job: F) -> ActorResult<()>
    where
        F: FnOnce(&mut A) + Send + 'static,
    {
        self.task()?.submit(TaskJob::Run(Box::new(job)))
    }

    fn schedule<F>(&self, delay: Duration, job: F) -> ActorResult<TimerHandle>
    where
        F: FnOnce(&mut A) + Send + 'static,
    {
        self.task()?.schedule_timer(delay, Box::new(job))
    }

    /// Holds the actor's start report or close until `future` resolved
    /// and `callback` ran as a job of this actor.
    fn run_on_completion_blocking<T, F>(&self, future: &ActorFuture<T>, callback: F)
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut A, ActorResult<T>) + Send + 'static,
    {
        let Ok(task) = self.task() else {
            debug!(actor = %self.name, "Dropping blocking completion callback of closed actor");
            return;
        };
        task.block_phase();
        let owner = self.task.clone();
        future.on_complete_on(&InlineExecutor, move |result| {
            if let Some(task) = owner.upgrade() {
                task.resume(Box::new(move |actor: &mut A| callback(actor, result)));
            }
        });
    }
}
