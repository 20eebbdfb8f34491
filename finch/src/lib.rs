// Finch actor scheduler
//
// Runs many lightweight actors on a few OS threads. Each actor is bound to
// one actor thread of either the CPU-bound or the I/O-bound thread group and
// executes its jobs there, one at a time, in a cooperative loop. Contracts
// shared with actor collaborators (futures, concurrency control, clocks) live
// in `finch-api` and are re-exported here.

pub mod actor;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod testing;

// Re-export commonly used types
pub use actor::{Actor, SchedulingHint};
pub use config::{ActorConfig, AssignmentPolicy, IdleStrategyConfig, SchedulerConfig};
pub use control::ActorControl;
pub use error::{ActorFailure, FailurePhase, SchedulerError};
pub use scheduler::{ActorHandle, ActorScheduler, ActorState, SchedulerState, TimerQueue};

pub use finch_api::{
    ActorClock, ActorError, ActorFuture, ActorResult, ConcurrencyControl, ControlledClock, Executor,
    SyncConcurrencyControl, SystemClock, TimerHandle,
};
