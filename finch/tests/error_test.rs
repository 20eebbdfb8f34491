// Integration tests for error types in finch::error

use finch::error::*;
use finch::{ActorError, SchedulingHint};
use std::time::Duration;
use uuid::Uuid;

#[test]
fn test_scheduler_error_display() {
    assert_eq!(SchedulerError::NotRunning.to_string(), "Actor scheduler is not running");
    assert_eq!(SchedulerError::AlreadyStarted.to_string(), "Actor scheduler is already started");
    assert_eq!(SchedulerError::ShuttingDown.to_string(), "Actor scheduler is shutting down");
    assert_eq!(
        SchedulerError::CapacityExceeded {
            hint: SchedulingHint::IoBound,
            threads: 2,
            max_tasks_per_thread: 10,
        }
        .to_string(),
        "All 2 io-bound threads are at capacity (10 actors each)"
    );
    assert_eq!(SchedulerError::ThreadSetup("no memory".to_string()).to_string(), "Thread setup error: no memory");
    assert_eq!(SchedulerError::InvalidConfig("bad".to_string()).to_string(), "Invalid configuration: bad");
    assert_eq!(
        SchedulerError::UncleanShutdown {
            remaining: 1,
            threads: 2,
            timeout: Duration::from_secs(3),
        }
        .to_string(),
        "Unclean shutdown: 1 actors not closed, 2 threads not joined within 3s"
    );
}

#[test]
fn test_scheduler_error_into_actor_error() {
    let error: ActorError = SchedulerError::ShuttingDown.into();
    assert!(matches!(error, ActorError::Other(_)));
    assert_eq!(error.to_string(), "Actor scheduler is shutting down");
}

#[test]
fn test_actor_failure_display() {
    let id = Uuid::new_v4();
    let failure = ActorFailure {
        actor_id: id,
        actor_name: "exporter".to_string(),
        phase: FailurePhase::Closing,
        error: ActorError::failure("flush failed"),
    };
    assert_eq!(
        failure.to_string(),
        format!("actor exporter ({id}) failed in closing phase: flush failed")
    );
    assert_eq!(FailurePhase::Started.to_string(), "started");
    assert_eq!(FailurePhase::Delivery.to_string(), "delivery");
}
