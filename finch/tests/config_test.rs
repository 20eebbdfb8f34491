// Integration tests for finch::config

use finch::config::*;
use finch::{SchedulerError, SchedulingHint};
use std::time::Duration;

#[test]
fn test_scheduler_config_defaults() {
    let config = SchedulerConfig::default();

    assert_eq!(config.cpu_threads, num_cpus::get());
    assert_eq!(config.io_threads, DEFAULT_IO_THREADS);
    assert_eq!(config.jobs_per_quantum, DEFAULT_JOBS_PER_QUANTUM);
    assert_eq!(config.job_queue_capacity, DEFAULT_JOB_QUEUE_CAPACITY);
    assert_eq!(config.max_tasks_per_thread, DEFAULT_MAX_TASKS_PER_THREAD);
    assert_eq!(config.assignment_policy, AssignmentPolicy::LeastLoaded);
    assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    assert_eq!(config.thread_name_prefix, "finch");
    assert!(config.validate().is_ok());
}

#[test]
fn test_threads_for_hint() {
    let config = SchedulerConfig {
        cpu_threads: 6,
        io_threads: 3,
        ..SchedulerConfig::default()
    };
    assert_eq!(config.threads_for(SchedulingHint::CpuBound), 6);
    assert_eq!(config.threads_for(SchedulingHint::IoBound), 3);
}

#[test]
fn test_validate_rejects_zero_values() {
    let config = SchedulerConfig {
        jobs_per_quantum: 0,
        ..SchedulerConfig::default()
    };
    match config.validate() {
        Err(SchedulerError::InvalidConfig(message)) => assert!(message.contains("jobs_per_quantum")),
        other => panic!("unexpected validation result: {other:?}"),
    }

    let config = SchedulerConfig {
        io_threads: 0,
        ..SchedulerConfig::default()
    };
    assert!(matches!(config.validate(), Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_validate_rejects_zero_failure_channel_capacity() {
    let config = SchedulerConfig {
        failure_channel_capacity: 0,
        ..SchedulerConfig::default()
    };
    match config.validate() {
        Err(SchedulerError::InvalidConfig(message)) => assert!(message.contains("failure_channel_capacity")),
        other => panic!("unexpected validation result: {other:?}"),
    }
}

#[test]
fn test_validate_rejects_inverted_park_bounds() {
    let config = SchedulerConfig {
        idle_strategy: IdleStrategyConfig {
            min_park: Duration::from_millis(20),
            max_park: Duration::from_millis(10),
            ..IdleStrategyConfig::default()
        },
        ..SchedulerConfig::default()
    };
    assert!(matches!(config.validate(), Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_actor_config_merge() {
    let scheduler = SchedulerConfig {
        job_queue_capacity: 64,
        ..SchedulerConfig::default()
    };

    let resolved = scheduler.merge_with_actor_config(&ActorConfig::default());
    assert!(resolved.name.is_none());
    assert!(resolved.scheduling_hint.is_none());
    assert_eq!(resolved.job_queue_capacity, 64);

    let actor = ActorConfig::named("exporter")
        .with_hint(SchedulingHint::IoBound)
        .with_job_queue_capacity(8);
    let resolved = scheduler.merge_with_actor_config(&actor);
    assert_eq!(resolved.name.as_deref(), Some("exporter"));
    assert_eq!(resolved.scheduling_hint, Some(SchedulingHint::IoBound));
    assert_eq!(resolved.job_queue_capacity, 8);
}

#[test]
fn test_config_debug_format() {
    let config = SchedulerConfig::default();
    assert!(format!("{:?}", config).contains("jobs_per_quantum"));
    assert!(format!("{:?}", ActorConfig::default()).contains("scheduling_hint"));
}

#[test]
fn test_invalid_config_is_rejected_by_scheduler() {
    let config = SchedulerConfig {
        cpu_threads: 0,
        ..SchedulerConfig::default()
    };
    assert!(matches!(
        finch::ActorScheduler::new(config),
        Err(SchedulerError::InvalidConfig(_))
    ));
}
