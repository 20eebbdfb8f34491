//! # Actor Future
//!
//! [`ActorFuture`] is a single-assignment result cell. It starts pending and
//! is resolved exactly once, either with a value or with an [`ActorError`].
//! Continuations registered on it run exactly once, in registration order,
//! after resolution; a continuation registered on an already resolved future
//! runs immediately so no notification is ever lost.
//!
//! ## Combinators
//!
//! [`and_then`](ActorFuture::and_then), [`and_then_result`](ActorFuture::and_then_result)
//! and [`then_apply`](ActorFuture::then_apply) run their function through an
//! [`Executor`]. Passing an actor's control handle keeps the function on that
//! actor's thread; [`InlineExecutor`](crate::control::InlineExecutor) runs it on
//! whichever thread resolved the upstream future.
//!
//! ## Blocking
//!
//! [`join`](ActorFuture::join) and [`join_timeout`](ActorFuture::join_timeout)
//! block the calling thread and are meant for code outside the runtime (tests,
//! entry points). On an actor thread they fail with
//! [`ActorError::JoinOnActorThread`]. Async code can `.await` the future
//! instead.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::context::{current_actor, is_actor_thread};
use crate::control::{Executor, Job};
use crate::errors::{ActorError, ActorResult};

type Continuation<T> = Box<dyn FnOnce(ActorResult<T>) + Send + 'static>;

enum State<T> {
    Pending {
        continuations: Vec<Continuation<T>>,
        wakers: Vec<Waker>,
    },
    Resolved(ActorResult<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
}

/// Single-assignment result cell with continuation registration.
pub struct ActorFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ActorFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> ActorFuture<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a pending future.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending {
                    continuations: Vec::new(),
                    wakers: Vec::new(),
                }),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Creates a future already resolved with `value`.
    pub fn completed(value: T) -> Self {
        Self::resolved(Ok(value))
    }

    /// Creates a future already resolved with `error`.
    pub fn completed_exceptionally(error: ActorError) -> Self {
        Self::resolved(Err(error))
    }

    fn resolved(result: ActorResult<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Resolved(result)),
                resolved: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves the future with a value.
    pub fn complete(&self, value: T) -> ActorResult<()> {
        self.complete_with(Ok(value))
    }

    /// Resolves the future with a failure.
    pub fn complete_exceptionally(&self, error: ActorError) -> ActorResult<()> {
        self.complete_with(Err(error))
    }

    /// Resolves the future with `result`.
    ///
    /// A future resolves exactly once; a second call leaves the first result
    /// in place and returns [`ActorError::AlreadyCompleted`].
    pub fn complete_with(&self, result: ActorResult<T>) -> ActorResult<()> {
        if self.settle(result) {
            Ok(())
        } else {
            warn!("Rejected second resolution of an already completed future");
            Err(ActorError::AlreadyCompleted)
        }
    }

    /// Resolves the future if it is still pending. Used by combinators where
    /// losing a race against another resolution is expected.
    pub(crate) fn settle(&self, result: ActorResult<T>) -> bool {
        let (continuations, wakers) = {
            let mut state = self.lock();
            if matches!(*state, State::Resolved(_)) {
                return false;
            }
            match std::mem::replace(&mut *state, State::Resolved(result.clone())) {
                State::Pending {
                    continuations,
                    wakers,
                } => (continuations, wakers),
                State::Resolved(_) => (Vec::new(), Vec::new()),
            }
        };

        self.shared.resolved.notify_all();
        wakers.into_iter().for_each(Waker::wake);
        for continuation in continuations {
            invoke(continuation, result.clone());
        }
        true
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.lock(), State::Resolved(_))
    }

    pub fn is_completed_exceptionally(&self) -> bool {
        matches!(*self.lock(), State::Resolved(Err(_)))
    }

    /// Returns the result if the future is resolved, without blocking.
    pub fn try_get(&self) -> Option<ActorResult<T>> {
        match &*self.lock() {
            State::Resolved(result) => Some(result.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Registers a callback invoked with the result exactly once.
    ///
    /// Called from within an actor job, the callback is submitted as a job to
    /// that actor once the future resolves, so it may touch the actor's state
    /// like any other job. Called from anywhere else, it runs on the thread
    /// that resolves the future, or right away if the future is already
    /// resolved.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(ActorResult<T>) + Send + 'static,
    {
        match current_actor() {
            Some(actor) => self.register(Box::new(move |result| {
                if let Err(e) = actor.execute(Box::new(move || callback(result))) {
                    warn!(error = %e, "Actor rejected future callback, dropping it");
                }
            })),
            None => self.register(Box::new(callback)),
        }
    }

    /// Registers a callback that is submitted to `executor` once the future
    /// resolves, instead of running inline.
    pub fn on_complete_on<E, F>(&self, executor: &E, callback: F)
    where
        E: Executor + Clone + Send + 'static,
        F: FnOnce(ActorResult<T>) + Send + 'static,
    {
        let executor = executor.clone();
        self.register(Box::new(move |result| {
            if let Err(e) = executor.execute(Box::new(move || callback(result))) {
                warn!(error = %e, "Executor rejected future continuation, dropping it");
            }
        }));
    }

    /// Runs `continuation` on the resolving thread, or now if resolved.
    pub(crate) fn register(&self, continuation: Continuation<T>) {
        let result = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending { continuations, .. } => {
                    continuations.push(continuation);
                    return;
                }
                State::Resolved(result) => result.clone(),
            }
        };
        invoke(continuation, result);
    }

    /// Chains a future-producing function that runs once this future
    /// succeeds. A failure of this future skips `next` and fails the chain.
    pub fn and_then<U, E, F>(&self, next: F, executor: &E) -> ActorFuture<U>
    where
        U: Clone + Send + 'static,
        E: Executor + Clone + Send + 'static,
        F: FnOnce(T) -> ActorFuture<U> + Send + 'static,
    {
        self.and_then_result(
            move |result| match result {
                Ok(value) => next(value),
                Err(error) => ActorFuture::completed_exceptionally(error),
            },
            executor,
        )
    }

    /// Chains a function receiving either the value or the error. The
    /// returned future may succeed even if this one failed.
    pub fn and_then_result<U, E, F>(&self, next: F, executor: &E) -> ActorFuture<U>
    where
        U: Clone + Send + 'static,
        E: Executor + Clone + Send + 'static,
        F: FnOnce(ActorResult<T>) -> ActorFuture<U> + Send + 'static,
    {
        let chained = ActorFuture::new();
        let target = chained.clone();
        let executor = executor.clone();

        self.register(Box::new(move |result| {
            let on_reject = target.clone();
            let job: Job = Box::new(move || {
                match panic::catch_unwind(AssertUnwindSafe(move || next(result))) {
                    Ok(inner) => inner.register(Box::new(move |r| {
                        target.settle(r);
                    })),
                    Err(payload) => {
                        target.settle(Err(ActorError::from_panic(payload)));
                    }
                }
            });
            if let Err(e) = executor.execute(job) {
                on_reject.settle(Err(e));
            }
        }));

        chained
    }

    /// Maps the value of this future. A failure skips `apply`.
    pub fn then_apply<U, E, F>(&self, apply: F, executor: &E) -> ActorFuture<U>
    where
        U: Clone + Send + 'static,
        E: Executor + Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(move |value| ActorFuture::completed(apply(value)), executor)
    }

    /// Combines futures into one that succeeds with every value, in input
    /// order, or fails with the first failure observed.
    ///
    /// An empty input resolves immediately.
    pub fn all_of(futures: Vec<ActorFuture<T>>) -> ActorFuture<Vec<T>> {
        let combined = ActorFuture::new();
        if futures.is_empty() {
            combined.settle(Ok(Vec::new()));
            return combined;
        }

        let slots = Arc::new(Mutex::new(vec![None; futures.len()]));
        let remaining = Arc::new(AtomicUsize::new(futures.len()));

        for (index, future) in futures.into_iter().enumerate() {
            let combined = combined.clone();
            let slots = Arc::clone(&slots);
            let remaining = Arc::clone(&remaining);
            future.register(Box::new(move |result| match result {
                Ok(value) => {
                    let mut values = slots.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(slot) = values.get_mut(index) {
                        *slot = Some(value);
                    }
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        let collected = values.drain(..).flatten().collect();
                        drop(values);
                        combined.settle(Ok(collected));
                    }
                }
                Err(error) => {
                    combined.settle(Err(error));
                }
            }));
        }

        combined
    }

    /// Blocks until the future resolves.
    pub fn join(&self) -> ActorResult<T> {
        if is_actor_thread() {
            error!("join() called on an actor thread, this would block every actor sharing it");
            return Err(ActorError::JoinOnActorThread);
        }

        let mut state = self.lock();
        loop {
            if let State::Resolved(result) = &*state {
                return result.clone();
            }
            state = self
                .shared
                .resolved
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the future resolves or `timeout` elapses.
    pub fn join_timeout(&self, timeout: Duration) -> ActorResult<T> {
        if is_actor_thread() {
            error!("join_timeout() called on an actor thread, this would block every actor sharing it");
            return Err(ActorError::JoinOnActorThread);
        }

        let Some(deadline) = Instant::now().checked_add(timeout) else {
            // beyond any representable deadline
            return self.join();
        };
        let mut state = self.lock();
        loop {
            if let State::Resolved(result) = &*state {
                return result.clone();
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ActorError::Timeout(timeout));
            }
            let (guard, _) = self
                .shared
                .resolved
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

impl<T> Default for ActorFuture<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Future for ActorFuture<T>
where
    T: Clone + Send + 'static,
{
    type Output = ActorResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.lock();
        match &mut *state {
            State::Resolved(result) => Poll::Ready(result.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for ActorFuture<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            State::Pending { continuations, .. } => f
                .debug_struct("ActorFuture")
                .field("state", &"pending")
                .field("continuations", &continuations.len())
                .finish(),
            State::Resolved(result) => f
                .debug_struct("ActorFuture")
                .field("state", &"resolved")
                .field("result", result)
                .finish(),
        }
    }
}

fn invoke<T>(continuation: Continuation<T>, result: ActorResult<T>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || continuation(result))) {
        let error = ActorError::from_panic(payload);
        error!(error = %error, "Future continuation panicked");
    }
}

/// Fails the wrapped future with [`ActorError::Closed`] if it is dropped
/// before being resolved, e.g. because the job that owned it was discarded.
pub(crate) struct CompletionGuard<T>
where
    T: Clone + Send + 'static,
{
    future: Option<ActorFuture<T>>,
}

impl<T> CompletionGuard<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(future: ActorFuture<T>) -> Self {
        Self {
            future: Some(future),
        }
    }

    pub(crate) fn complete_with(mut self, result: ActorResult<T>) {
        if let Some(future) = self.future.take() {
            future.settle(result);
        }
    }
}

impl<T> Drop for CompletionGuard<T>
where
    T: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(future) = self.future.take() {
            future.settle(Err(ActorError::Closed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::enter_actor_thread;
    use crate::control::InlineExecutor;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn completes_once() {
        let future = ActorFuture::new();
        assert!(!future.is_done());
        assert!(future.complete(1).is_ok());
        assert!(matches!(future.complete(2), Err(ActorError::AlreadyCompleted)));
        assert!(matches!(
            future.complete_exceptionally(ActorError::failure("late")),
            Err(ActorError::AlreadyCompleted)
        ));
        assert_eq!(future.join().unwrap(), 1);
    }

    #[test]
    fn continuations_run_in_registration_order() {
        let future = ActorFuture::<u32>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            future.on_complete(move |_| order.lock().unwrap().push(i));
        }
        future.complete(7).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn late_continuation_runs_immediately() {
        let future = ActorFuture::completed("done".to_string());
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        future.on_complete(move |r| *sink.lock().unwrap() = Some(r.unwrap()));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("done"));
    }

    #[test]
    fn panicking_continuation_does_not_stop_others() {
        let future = ActorFuture::<u8>::new();
        let reached = Arc::new(AtomicBool::new(false));
        future.on_complete(|_| panic!("bad continuation"));
        let flag = reached.clone();
        future.on_complete(move |_| flag.store(true, Ordering::SeqCst));
        future.complete(1).unwrap();
        assert!(reached.load(Ordering::SeqCst));
    }

    #[test]
    fn join_timeout_expires() {
        let future = ActorFuture::<u8>::new();
        let result = future.join_timeout(Duration::from_millis(20));
        assert!(matches!(result, Err(ActorError::Timeout(_))));
    }

    #[test]
    fn join_on_actor_thread_fails_fast() {
        let future = ActorFuture::completed(1);
        let _guard = enter_actor_thread();
        assert!(matches!(future.join(), Err(ActorError::JoinOnActorThread)));
        assert!(matches!(
            future.join_timeout(Duration::from_millis(1)),
            Err(ActorError::JoinOnActorThread)
        ));
    }

    #[test]
    fn dropped_guard_fails_future() {
        let future = ActorFuture::<u8>::new();
        drop(CompletionGuard::new(future.clone()));
        assert!(matches!(future.try_get(), Some(Err(ActorError::Closed))));
    }

    #[test]
    fn then_apply_panic_fails_chain() {
        let future = ActorFuture::completed(1);
        let chained: ActorFuture<u8> = future.then_apply(|_| panic!("mapping failed"), &InlineExecutor);
        match chained.try_get() {
            Some(Err(ActorError::Panicked(message))) => assert_eq!(message, "mapping failed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[derive(Clone, Default)]
    struct CountingExecutor {
        executed: Arc<AtomicUsize>,
    }

    impl Executor for CountingExecutor {
        fn execute(&self, job: Job) -> ActorResult<()> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            job();
            Ok(())
        }
    }

    #[test]
    fn on_complete_inside_actor_goes_through_its_executor() {
        let executor = CountingExecutor::default();
        let future = ActorFuture::<u8>::new();
        {
            let _actor = crate::context::enter_actor(Arc::new(executor.clone()));
            future.on_complete(|_| {});
        }
        // registered outside any actor, runs inline
        future.on_complete(|_| {});

        future.complete(1).unwrap();
        assert_eq!(executor.executed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn join_timeout_accepts_unbounded_duration() {
        let future = ActorFuture::completed(3_u8);
        assert_eq!(future.join_timeout(Duration::MAX).unwrap(), 3);
    }
}
