//! # Finch Actor API
//!
//! Runtime-independent contracts of the finch actor scheduler. Code that
//! collaborates with actors depends on this crate only; the scheduler itself
//! lives in the `finch` crate.
//!
//! ## Core Components
//!
//! - [`ActorFuture`]: single-assignment result cell with continuations and
//!   combinators, the currency of every asynchronous interaction
//! - [`ConcurrencyControl`]: schedules jobs, calls and timers onto an actor
//! - [`ActorClock`]: pluggable time source, with [`ControlledClock`] for
//!   deterministic tests
//! - [`TimerHandle`]: cancelable handle of a scheduled timer
//! - [`SyncConcurrencyControl`]: synchronous test double of
//!   [`ConcurrencyControl`]
//!
//! ## Usage Example
//!
//! ```rust
//! use finch_api::{ActorFuture, ConcurrencyControl, SyncConcurrencyControl};
//!
//! let control = SyncConcurrencyControl::new(0_u64);
//! let doubled: ActorFuture<u64> = control.call(|counter| {
//!     *counter += 21;
//!     Ok(*counter * 2)
//! });
//! assert_eq!(doubled.join().unwrap(), 42);
//! ```
//!
//! ## Module Organization
//!
//! - [`future`]: the future/promise type
//! - [`control`]: concurrency control and executors
//! - [`clock`]: time sources
//! - [`timer`]: timer handles
//! - [`context`]: actor thread marker
//! - [`sync_control`]: synchronous test double
//! - [`errors`]: error types

pub mod clock;
pub mod context;
pub mod control;
pub mod errors;
pub mod future;
pub mod sync_control;
pub mod timer;

pub use clock::{deadline_after, ActorClock, ControlledClock, SystemClock};
pub use context::{
    current_actor, enter_actor, enter_actor_thread, is_actor_thread, ActorExecutor, ActorThreadGuard, CurrentActorGuard,
};
pub use control::{ConcurrencyControl, Executor, InlineExecutor, Job};
pub use errors::{ActorError, ActorResult};
pub use future::ActorFuture;
pub use sync_control::SyncConcurrencyControl;
pub use timer::TimerHandle;
