use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use finch_api::ActorClock;
use tracing::{debug, warn};

use crate::actor::SchedulingHint;
use crate::config::{AssignmentPolicy, SchedulerConfig};
use crate::error::SchedulerError;
use crate::log_scheduler;
use crate::scheduler::task::TaskRunner;
use crate::scheduler::worker::{ActorThreadCore, ThreadHandle};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// # Thread Group
///
/// A fixed set of actor threads serving one scheduling hint.
///
/// ## Key Responsibilities
/// - Creating the threads' shared handles and loops
/// - Assigning each new actor to exactly one thread, for its whole life
/// - Stopping and joining the threads on shutdown
///
/// ## Assignment
/// Under [`AssignmentPolicy::LeastLoaded`] the thread with the fewest live
/// actors wins, lowest index on ties. Threads at `max_tasks_per_thread` are
/// never chosen; if every thread is full the submission fails.
pub(crate) struct ThreadGroup {
    hint: SchedulingHint,
    threads: Vec<Arc<ThreadHandle>>,
    /// Thread loops not yet moved onto OS threads.
    cores: Mutex<Vec<ActorThreadCore>>,
    joins: Mutex<Vec<(String, JoinHandle<()>)>>,
    policy: AssignmentPolicy,
    max_tasks_per_thread: usize,
    next: AtomicUsize,
    assign_lock: Mutex<()>,
}

impl fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("hint", &self.hint)
            .field("threads", &self.threads)
            .field("policy", &self.policy)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ThreadGroup {
    pub(crate) fn new(hint: SchedulingHint, config: &SchedulerConfig, clock: Arc<dyn ActorClock>) -> Self {
        let count = config.threads_for(hint);
        let mut threads = Vec::with_capacity(count);
        let mut cores = Vec::with_capacity(count);
        for index in 0..count {
            let name = format!("{}-{}-{}", config.thread_name_prefix, hint, index);
            let (handle, core) = ActorThreadCore::create(
                name,
                Arc::clone(&clock),
                config.max_tasks_per_thread,
                config.jobs_per_quantum,
                config.idle_strategy.clone(),
            );
            threads.push(handle);
            cores.push(core);
        }

        Self {
            hint,
            threads,
            cores: Mutex::new(cores),
            joins: Mutex::new(Vec::new()),
            policy: config.assignment_policy,
            max_tasks_per_thread: config.max_tasks_per_thread,
            next: AtomicUsize::new(0),
            assign_lock: Mutex::new(()),
        }
    }

    /// Moves every thread loop onto its own OS thread.
    pub(crate) fn start(&self, dispatch: &tracing::Dispatch) -> Result<(), SchedulerError> {
        let cores = std::mem::take(&mut *lock(&self.cores));
        let mut joins = lock(&self.joins);
        for core in cores {
            let name = core.name().to_string();
            let dispatch = dispatch.clone();
            let join = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let _dispatch = tracing::dispatcher::set_default(&dispatch);
                    core.run_loop();
                })
                .map_err(|e| SchedulerError::ThreadSetup(format!("Failed to spawn actor thread {name}: {e}")))?;
            joins.push((name, join));
        }
        log_scheduler!("thread-group", "started", hint = %self.hint, threads = joins.len());
        Ok(())
    }

    /// Takes the thread loops for driving them on the caller's thread.
    pub(crate) fn take_cores(&self) -> Vec<ActorThreadCore> {
        std::mem::take(&mut *lock(&self.cores))
    }

    /// Picks a thread, builds the task for it and registers it there.
    pub(crate) fn place<T, F>(&self, build: F) -> Result<Arc<T>, SchedulerError>
    where
        T: TaskRunner + 'static,
        F: FnOnce(Arc<ThreadHandle>) -> Arc<T>,
    {
        let _guard = lock(&self.assign_lock);
        let thread = self.choose()?;
        let task = build(Arc::clone(&thread));
        thread.register(Arc::clone(&task) as Arc<dyn TaskRunner>);
        debug!(hint = %self.hint, thread = %thread.name(), actor = %task.name(), "Actor assigned");
        Ok(task)
    }

    fn choose(&self) -> Result<Arc<ThreadHandle>, SchedulerError> {
        let max = self.max_tasks_per_thread;
        let chosen = match self.policy {
            AssignmentPolicy::LeastLoaded => self
                .threads
                .iter()
                .map(|thread| (thread.load(), thread))
                .filter(|(load, _)| *load < max)
                .min_by_key(|(load, _)| *load)
                .map(|(_, thread)| thread),
            AssignmentPolicy::RoundRobin => {
                let count = self.threads.len();
                let start = self.next.fetch_add(1, Ordering::Relaxed);
                (0..count)
                    .filter_map(|offset| self.threads.get((start + offset) % count))
                    .find(|thread| thread.load() < max)
            }
        };

        chosen.cloned().ok_or(SchedulerError::CapacityExceeded {
            hint: self.hint,
            threads: self.threads.len(),
            max_tasks_per_thread: max,
        })
    }

    /// Live tasks of all threads.
    pub(crate) fn tasks(&self) -> Vec<Arc<dyn TaskRunner>> {
        self.threads.iter().flat_map(|thread| thread.tasks()).collect()
    }

    pub(crate) fn actor_count(&self) -> usize {
        self.threads.iter().map(|thread| thread.load()).sum()
    }

    /// Per thread load, in thread order.
    pub(crate) fn loads(&self) -> Vec<usize> {
        self.threads.iter().map(|thread| thread.load()).collect()
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Asks every thread to leave its loop after the current pass.
    pub(crate) fn stop(&self) {
        for thread in &self.threads {
            thread.shutdown();
        }
    }

    /// Joins stopped threads until `deadline`. Returns the number of threads
    /// that did not finish in time; those are detached.
    pub(crate) fn join(&self, deadline: Instant) -> usize {
        let joins = std::mem::take(&mut *lock(&self.joins));
        let mut unjoined = 0;
        for (name, join) in joins {
            while !join.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL_INTERVAL);
            }
            if !join.is_finished() {
                warn!(thread = %name, "Actor thread did not stop in time, detaching it");
                unjoined += 1;
                continue;
            }
            if join.join().is_err() {
                warn!(thread = %name, "Actor thread panicked");
            }
        }
        unjoined
    }
}
