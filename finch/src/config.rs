use std::time::Duration;

use crate::actor::SchedulingHint;
use crate::error::SchedulerError;

pub const DEFAULT_JOB_QUEUE_CAPACITY: usize = 4096;
pub const DEFAULT_JOBS_PER_QUANTUM: usize = 16;
pub const DEFAULT_MAX_TASKS_PER_THREAD: usize = 1024;
pub const DEFAULT_IO_THREADS: usize = 2;

// --- Configuration Enums ---

/// How a thread group picks the actor thread for a new actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AssignmentPolicy {
    /// The thread with the fewest assigned actors.
    #[default]
    LeastLoaded,
    /// Threads in turn.
    RoundRobin,
}

/// Backoff applied by an actor thread that has nothing to run.
#[derive(Clone, Debug)]
pub struct IdleStrategyConfig {
    /// Busy-spin iterations before yielding.
    pub max_spins: u32,

    /// `yield_now` iterations before parking.
    pub max_yields: u32,

    /// First park duration; doubles on every idle round.
    pub min_park: Duration,

    /// Upper bound of a single park.
    pub max_park: Duration,
}

impl Default for IdleStrategyConfig {
    fn default() -> Self {
        Self {
            max_spins: 64,
            max_yields: 16,
            min_park: Duration::from_micros(50),
            max_park: Duration::from_millis(10),
        }
    }
}

// --- Scheduler Configuration ---

/// Configuration for the `ActorScheduler`.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of actor threads of the CPU-bound group.
    pub cpu_threads: usize,

    /// Number of actor threads of the I/O-bound group.
    pub io_threads: usize,

    /// Maximum jobs one actor runs per visit of its thread.
    pub jobs_per_quantum: usize,

    /// Default capacity of an actor's job queue.
    pub job_queue_capacity: usize,

    /// Maximum actors assigned to one actor thread.
    pub max_tasks_per_thread: usize,

    /// How new actors are spread over the threads of a group.
    pub assignment_policy: AssignmentPolicy,

    /// Idle behaviour of actor threads.
    pub idle_strategy: IdleStrategyConfig,

    /// Timeout used by `ActorScheduler::shutdown`. Dropping the scheduler
    /// only stops the threads and waits for nothing.
    pub shutdown_timeout: Duration,

    /// Capacity of the failure channel; further failures are logged only.
    pub failure_channel_capacity: usize,

    /// Prefix of actor thread names.
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cpu_threads: num_cpus::get(),
            io_threads: DEFAULT_IO_THREADS,
            jobs_per_quantum: DEFAULT_JOBS_PER_QUANTUM,
            job_queue_capacity: DEFAULT_JOB_QUEUE_CAPACITY,
            max_tasks_per_thread: DEFAULT_MAX_TASKS_PER_THREAD,
            assignment_policy: AssignmentPolicy::LeastLoaded,
            idle_strategy: IdleStrategyConfig::default(),
            shutdown_timeout: Duration::from_secs(10),
            failure_channel_capacity: 1024,
            thread_name_prefix: "finch".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Checks the configuration for values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let positive = [
            ("cpu_threads", self.cpu_threads),
            ("io_threads", self.io_threads),
            ("jobs_per_quantum", self.jobs_per_quantum),
            ("job_queue_capacity", self.job_queue_capacity),
            ("max_tasks_per_thread", self.max_tasks_per_thread),
            ("failure_channel_capacity", self.failure_channel_capacity),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(SchedulerError::InvalidConfig(format!("{name} must be greater than zero")));
        }
        if self.idle_strategy.min_park > self.idle_strategy.max_park {
            return Err(SchedulerError::InvalidConfig(
                "idle_strategy.min_park must not exceed idle_strategy.max_park".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of threads of the group serving `hint`.
    pub fn threads_for(&self, hint: SchedulingHint) -> usize {
        match hint {
            SchedulingHint::CpuBound => self.cpu_threads,
            SchedulingHint::IoBound => self.io_threads,
        }
    }

    /// Merge scheduler configuration with actor-specific configuration.
    /// Values the actor leaves unset fall back to the scheduler's.
    pub fn merge_with_actor_config(&self, actor_config: &ActorConfig) -> ResolvedActorConfig {
        ResolvedActorConfig {
            name: actor_config.name.clone(),
            scheduling_hint: actor_config.scheduling_hint,
            job_queue_capacity: actor_config
                .job_queue_capacity
                .unwrap_or(self.job_queue_capacity),
        }
    }
}

// --- Actor Configuration ---

/// Per-actor overrides of scheduler defaults.
#[derive(Clone, Debug, Default)]
pub struct ActorConfig {
    /// Name used in logs and failure reports instead of `Actor::name`.
    pub name: Option<String>,

    /// Thread group, instead of `Actor::scheduling_hint`.
    pub scheduling_hint: Option<SchedulingHint>,

    /// Capacity of this actor's job queue.
    pub job_queue_capacity: Option<usize>,
}

impl ActorConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_hint(mut self, hint: SchedulingHint) -> Self {
        self.scheduling_hint = Some(hint);
        self
    }

    pub fn with_job_queue_capacity(mut self, capacity: usize) -> Self {
        self.job_queue_capacity = Some(capacity);
        self
    }
}

/// Actor configuration after merging with scheduler defaults.
#[derive(Clone, Debug)]
pub struct ResolvedActorConfig {
    pub name: Option<String>,
    pub scheduling_hint: Option<SchedulingHint>,
    pub job_queue_capacity: usize,
}
