//! # Concurrency Control
//!
//! [`ConcurrencyControl`] is the only sanctioned way for code that cooperates
//! with an actor to schedule work onto it. Jobs receive exclusive `&mut S`
//! access to the state they operate on; the implementation guarantees that no
//! two jobs for the same state ever run at the same time, so the state itself
//! needs no locking.
//!
//! Two implementations exist: the production handle of the runtime, and
//! [`SyncConcurrencyControl`](crate::sync_control::SyncConcurrencyControl),
//! a synchronous test double.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tracing::debug;

use crate::errors::{ActorError, ActorResult};
use crate::future::{ActorFuture, CompletionGuard};
use crate::timer::TimerHandle;

/// A unit of deferred work that needs no state.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs [`Job`]s, now or later.
pub trait Executor {
    /// Accepts `job` for execution, or rejects it.
    fn execute(&self, job: Job) -> ActorResult<()>;
}

/// Runs every job immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) -> ActorResult<()> {
        job();
        Ok(())
    }
}

/// Schedules work onto the owner of some state `S`.
pub trait ConcurrencyControl<S>: Executor + Clone + Send + Sync + 'static {
    /// Enqueues `job`. Jobs submitted from one thread run in submission order.
    fn run<F>(&self, job: F) -> ActorResult<()>
    where
        F: FnOnce(&mut S) + Send + 'static;

    /// Runs `delay` after now. The returned handle cancels the timer.
    fn schedule<F>(&self, delay: Duration, job: F) -> ActorResult<TimerHandle>
    where
        F: FnOnce(&mut S) + Send + 'static;

    /// Enqueues `callable` and returns a future of its result.
    ///
    /// A panic inside `callable` fails the future. If the job is rejected or
    /// discarded before running, the future fails as well.
    fn call<T, F>(&self, callable: F) -> ActorFuture<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut S) -> ActorResult<T> + Send + 'static,
    {
        // the guard fails `pending` if the job is dropped unexecuted; a
        // rejection is reported on `future` with its own error instead
        let pending: ActorFuture<T> = ActorFuture::new();
        let guard = CompletionGuard::new(pending.clone());
        let future = ActorFuture::new();

        let submitted = self.run(move |state| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callable(state)))
                .unwrap_or_else(|payload| Err(ActorError::from_panic(payload)));
            guard.complete_with(result);
        });

        match submitted {
            Ok(()) => {
                let target = future.clone();
                pending.register(Box::new(move |result| {
                    target.settle(result);
                }));
            }
            Err(error) => {
                future.settle(Err(error));
            }
        }
        future
    }

    /// Creates a pending future.
    fn create_future<T>(&self) -> ActorFuture<T>
    where
        T: Clone + Send + 'static,
    {
        ActorFuture::new()
    }

    /// Runs `callback` as a job once `future` resolves.
    fn run_on_completion<T, F>(&self, future: &ActorFuture<T>, callback: F)
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut S, ActorResult<T>) + Send + 'static,
    {
        let control = self.clone();
        future.register(Box::new(move |result| {
            if let Err(error) = control.run(move |state| callback(state, result)) {
                debug!(error = %error, "Dropping completion callback, owner rejected it");
            }
        }));
    }

    /// Like [`run_on_completion`](Self::run_on_completion), but the owner
    /// stays in its current lifecycle phase until `future` resolved and
    /// `callback` ran: a pending start is not reported as started and a
    /// requested close waits. Other jobs keep running meanwhile.
    ///
    /// Owners without lifecycle phases treat it as `run_on_completion`.
    fn run_on_completion_blocking<T, F>(&self, future: &ActorFuture<T>, callback: F)
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut S, ActorResult<T>) + Send + 'static,
    {
        self.run_on_completion(future, callback);
    }

    /// Runs `callback` once every future succeeded, or once with the first
    /// failure.
    fn run_on_completion_all<T, F>(&self, futures: Vec<ActorFuture<T>>, callback: F)
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut S, ActorResult<Vec<T>>) + Send + 'static,
    {
        let combined = ActorFuture::all_of(futures);
        self.run_on_completion(&combined, callback);
    }
}
