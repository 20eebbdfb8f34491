use std::fmt;
use std::time::Duration;

use finch_api::ActorError;
use thiserror::Error;
use uuid::Uuid;

use crate::actor::SchedulingHint;

/// Errors related to the scheduler itself.
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    #[error("Actor scheduler is not running")]
    NotRunning,
    #[error("Actor scheduler is already started")]
    AlreadyStarted,
    #[error("Actor scheduler is shutting down")]
    ShuttingDown,
    #[error("All {threads} {hint} threads are at capacity ({max_tasks_per_thread} actors each)")]
    CapacityExceeded {
        hint: SchedulingHint,
        threads: usize,
        max_tasks_per_thread: usize,
    },
    #[error("Thread setup error: {0}")]
    ThreadSetup(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Unclean shutdown: {remaining} actors not closed, {threads} threads not joined within {timeout:?}")]
    UncleanShutdown {
        remaining: usize,
        threads: usize,
        timeout: Duration,
    },
}

impl From<SchedulerError> for ActorError {
    fn from(error: SchedulerError) -> Self {
        ActorError::other(error)
    }
}

/// Where an actor failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    /// `on_actor_started` failed; fatal to the actor.
    Started,
    /// A job failed; only that job was dropped.
    Job,
    /// A job could not be delivered, e.g. a timer fired into a full queue.
    Delivery,
    /// `on_actor_closing` failed; the actor still closed.
    Closing,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            FailurePhase::Started => "started",
            FailurePhase::Job => "job",
            FailurePhase::Delivery => "delivery",
            FailurePhase::Closing => "closing",
        };
        f.write_str(phase)
    }
}

/// A failure reported on the scheduler's failure channel.
#[derive(Debug, Clone)]
pub struct ActorFailure {
    pub actor_id: Uuid,
    pub actor_name: String,
    pub phase: FailurePhase,
    pub error: ActorError,
}

impl fmt::Display for ActorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "actor {} ({}) failed in {} phase: {}",
            self.actor_name, self.actor_id, self.phase, self.error
        )
    }
}
