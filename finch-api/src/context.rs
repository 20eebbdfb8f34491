//! Marks OS threads that run actor jobs, and the actor whose job is
//! currently running on them.
//!
//! Blocking on a future from such a thread would stall every actor that
//! shares it, so [`ActorFuture::join`](crate::future::ActorFuture::join)
//! consults [`is_actor_thread`] and fails fast.
//! [`ActorFuture::on_complete`](crate::future::ActorFuture::on_complete)
//! consults [`current_actor`] to run callbacks on the registering actor.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use crate::control::Executor;

/// Executor submitting jobs to one actor.
pub type ActorExecutor = Arc<dyn Executor + Send + Sync>;

thread_local! {
    static ACTOR_THREAD: Cell<bool> = const { Cell::new(false) };
    static CURRENT_ACTOR: RefCell<Option<ActorExecutor>> = const { RefCell::new(None) };
}

/// Returns `true` while the current thread is executing an actor loop.
pub fn is_actor_thread() -> bool {
    ACTOR_THREAD.with(Cell::get)
}

/// Marks the current thread as an actor thread until the guard is dropped.
#[must_use = "the thread is unmarked as soon as the guard is dropped"]
pub fn enter_actor_thread() -> ActorThreadGuard {
    let previous = ACTOR_THREAD.with(|flag| flag.replace(true));
    ActorThreadGuard { previous }
}

/// Restores the previous marker on drop.
#[derive(Debug)]
pub struct ActorThreadGuard {
    previous: bool,
}

impl Drop for ActorThreadGuard {
    fn drop(&mut self) {
        ACTOR_THREAD.with(|flag| flag.set(self.previous));
    }
}

/// Returns the executor of the actor whose job runs on this thread.
pub fn current_actor() -> Option<ActorExecutor> {
    CURRENT_ACTOR.with(|current| current.borrow().clone())
}

/// Makes `executor` the current actor until the guard is dropped.
#[must_use = "the actor is unset as soon as the guard is dropped"]
pub fn enter_actor(executor: ActorExecutor) -> CurrentActorGuard {
    let previous = CURRENT_ACTOR.with(|current| current.replace(Some(executor)));
    CurrentActorGuard { previous }
}

/// Restores the previous current actor on drop.
pub struct CurrentActorGuard {
    previous: Option<ActorExecutor>,
}

impl std::fmt::Debug for CurrentActorGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentActorGuard")
            .field("nested", &self.previous.is_some())
            .finish()
    }
}

impl Drop for CurrentActorGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_ACTOR.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::InlineExecutor;

    #[test]
    fn guard_nests_and_restores() {
        assert!(!is_actor_thread());
        {
            let _outer = enter_actor_thread();
            assert!(is_actor_thread());
            {
                let _inner = enter_actor_thread();
                assert!(is_actor_thread());
            }
            assert!(is_actor_thread());
        }
        assert!(!is_actor_thread());
    }

    #[test]
    fn current_actor_is_scoped() {
        assert!(current_actor().is_none());
        {
            let _actor = enter_actor(Arc::new(InlineExecutor));
            assert!(current_actor().is_some());
        }
        assert!(current_actor().is_none());
    }
}
