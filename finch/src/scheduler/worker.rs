use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use finch_api::{deadline_after, enter_actor_thread, ActorClock, TimerHandle};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::config::IdleStrategyConfig;
use crate::scheduler::idle::IdleStrategy;
use crate::scheduler::task::{RunOutcome, TaskRunner};
use crate::scheduler::timer::TimerQueue;

/// Job fired by an actor thread's timer queue.
pub(crate) type TimerJob = Box<dyn FnOnce() + Send + 'static>;

/// Messages accepted by an actor thread.
pub(crate) enum ThreadMessage {
    /// A task became runnable.
    Runnable(Arc<dyn TaskRunner>),
    /// A timer was added that may be due before the current park ends.
    Wake,
    /// Leave the loop after the current pass.
    Shutdown,
}

impl fmt::Debug for ThreadMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadMessage::Runnable(task) => write!(f, "Runnable({})", task.name()),
            ThreadMessage::Wake => f.write_str("Wake"),
            ThreadMessage::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Status codes of an actor thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Created, loop not entered yet
    Created = 0,
    /// Running tasks or timers
    Working = 1,
    /// Backing off without work
    Idle = 2,
    /// Loop left
    Stopped = 3,
}

impl ThreadStatus {
    fn from_usize(value: usize) -> Self {
        match value {
            0 => ThreadStatus::Created,
            1 => ThreadStatus::Working,
            2 => ThreadStatus::Idle,
            _ => ThreadStatus::Stopped,
        }
    }
}

/// # Actor Thread Handle
///
/// The shared side of one actor thread, reachable from any thread.
///
/// ## Key Responsibilities
/// - Accepting runnable tasks through the hand-off channel
/// - Owning the thread's timer queue
/// - Keeping the registry of tasks assigned to the thread
pub(crate) struct ThreadHandle {
    name: String,
    sender: flume::Sender<ThreadMessage>,
    timers: Mutex<TimerQueue<TimerJob>>,
    tasks: Mutex<HashMap<Uuid, Arc<dyn TaskRunner>>>,
    status: AtomicUsize,
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("load", &self.load())
            .finish()
    }
}

impl ThreadHandle {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn status(&self) -> ThreadStatus {
        ThreadStatus::from_usize(self.status.load(Ordering::Relaxed))
    }

    fn set_status(&self, status: ThreadStatus) {
        self.status.store(status as usize, Ordering::Relaxed);
    }

    fn lock_timers(&self) -> MutexGuard<'_, TimerQueue<TimerJob>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<dyn TaskRunner>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands a task whose scheduled flag the caller just set to the thread.
    pub(crate) fn make_runnable(&self, task: Arc<dyn TaskRunner>) {
        if self.sender.send(ThreadMessage::Runnable(task)).is_err() {
            debug!(thread = %self.name, "Actor thread gone, task not handed over");
        }
    }

    pub(crate) fn now(&self) -> Instant {
        self.lock_timers().now()
    }

    pub(crate) fn schedule_timer(&self, delay: Duration, job: TimerJob) -> TimerHandle {
        let handle = TimerHandle::new();
        let due = deadline_after(self.now(), delay);
        self.schedule_timer_with_handle(due, handle.clone(), job);
        handle
    }

    pub(crate) fn schedule_timer_with_handle(&self, due: Instant, handle: TimerHandle, job: TimerJob) {
        let is_next = {
            let mut timers = self.lock_timers();
            timers.schedule_with_handle(due, handle, job);
            timers.next_due() == Some(due)
        };
        if is_next && self.status() == ThreadStatus::Idle {
            let _ = self.sender.send(ThreadMessage::Wake);
        }
    }

    pub(crate) fn register(&self, task: Arc<dyn TaskRunner>) {
        self.lock_tasks().insert(task.id(), task);
    }

    pub(crate) fn deregister(&self, id: &Uuid) {
        self.lock_tasks().remove(id);
    }

    /// Number of tasks assigned to this thread and not yet closed.
    pub(crate) fn load(&self) -> usize {
        self.lock_tasks().len()
    }

    pub(crate) fn tasks(&self) -> Vec<Arc<dyn TaskRunner>> {
        self.lock_tasks().values().cloned().collect()
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.sender.send(ThreadMessage::Shutdown);
    }
}

/// # Actor Thread
///
/// The exclusive side of an actor thread: its local run queue and loop.
/// Either moved onto a dedicated OS thread by the thread group, or driven
/// step by step by the controlled scheduler.
///
/// ## Core Algorithm
/// 1. Move tasks from the hand-off channel into the local run queue
/// 2. Fire due timers, which hand their jobs to the owning tasks
/// 3. Pop one task and let it run up to its quantum
/// 4. Requeue it if jobs remain, park it otherwise
/// 5. Back off through the idle strategy when nothing was done
pub(crate) struct ActorThreadCore {
    handle: Arc<ThreadHandle>,
    receiver: flume::Receiver<ThreadMessage>,
    producer: HeapProd<Arc<dyn TaskRunner>>,
    consumer: HeapCons<Arc<dyn TaskRunner>>,
    quantum: usize,
    idle: IdleStrategy,
    stopping: bool,
}

impl fmt::Debug for ActorThreadCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorThreadCore")
            .field("name", &self.handle.name)
            .field("runnable", &self.consumer.occupied_len())
            .field("quantum", &self.quantum)
            .finish()
    }
}

impl ActorThreadCore {
    /// Creates both sides of an actor thread.
    pub(crate) fn create(
        name: String,
        clock: Arc<dyn ActorClock>,
        max_tasks: usize,
        quantum: usize,
        idle: IdleStrategyConfig,
    ) -> (Arc<ThreadHandle>, ActorThreadCore) {
        let (sender, receiver) = flume::unbounded();
        let handle = Arc::new(ThreadHandle {
            name,
            sender,
            timers: Mutex::new(TimerQueue::new(clock)),
            tasks: Mutex::new(HashMap::new()),
            status: AtomicUsize::new(ThreadStatus::Created as usize),
        });
        // a task is in the run queue at most once, so the thread's task limit bounds it
        let (producer, consumer) = HeapRb::<Arc<dyn TaskRunner>>::new(max_tasks).split();
        let core = ActorThreadCore {
            handle: Arc::clone(&handle),
            receiver,
            producer,
            consumer,
            quantum,
            idle: IdleStrategy::new(idle),
            stopping: false,
        };
        (handle, core)
    }

    pub(crate) fn name(&self) -> &str {
        &self.handle.name
    }

    /// One pass over channel, timers and run queue. Returns `true` if
    /// anything was done.
    pub(crate) fn work_once(&mut self) -> bool {
        let mut worked = self.drain_handoff();
        if self.fire_timers() {
            worked = true;
            self.drain_handoff();
        }
        if let Some(task) = self.consumer.try_pop() {
            self.run_task(task);
            worked = true;
        }
        worked
    }

    /// Runs the thread loop until a shutdown message arrives.
    pub(crate) fn run_loop(mut self) {
        let _actor_thread = enter_actor_thread();
        debug!(thread = %self.handle.name, "Actor thread started");

        while !self.stopping {
            self.handle.set_status(ThreadStatus::Working);
            if self.work_once() {
                self.idle.reset();
                continue;
            }

            self.handle.set_status(ThreadStatus::Idle);
            let until_next_timer = {
                let mut timers = self.handle.lock_timers();
                let now = timers.now();
                timers.next_due().map(|due| due.saturating_duration_since(now))
            };
            if let Some(message) = self.idle.idle(&self.receiver, until_next_timer) {
                self.accept(message);
                self.idle.reset();
            }
        }

        self.handle.set_status(ThreadStatus::Stopped);
        debug!(thread = %self.handle.name, "Actor thread stopped");
    }

    fn drain_handoff(&mut self) -> bool {
        let mut received = false;
        while let Ok(message) = self.receiver.try_recv() {
            self.accept(message);
            received = true;
        }
        received
    }

    fn accept(&mut self, message: ThreadMessage) {
        match message {
            ThreadMessage::Runnable(task) => self.enqueue(task),
            ThreadMessage::Wake => {}
            ThreadMessage::Shutdown => self.stopping = true,
        }
    }

    fn enqueue(&mut self, task: Arc<dyn TaskRunner>) {
        if let Err(task) = self.producer.try_push(task) {
            error!(thread = %self.handle.name, actor = %task.name(), "Run queue full, re-sending task");
            self.handle.make_runnable(task);
        }
    }

    fn fire_timers(&mut self) -> bool {
        let expired = {
            let mut timers = self.handle.lock_timers();
            let now = timers.now();
            timers.poll_expired(now)
        };
        if expired.is_empty() {
            return false;
        }
        trace!(thread = %self.handle.name, count = expired.len(), "Firing timers");
        for (_, job) in expired {
            job();
        }
        true
    }

    fn run_task(&mut self, task: Arc<dyn TaskRunner>) {
        match task.run(self.quantum) {
            RunOutcome::MoreWork => self.enqueue(task),
            RunOutcome::Idle => {
                task.park();
                // a submission racing with park() may have found the flag still set
                if task.has_pending_work() && task.try_claim() {
                    self.enqueue(task);
                }
            }
            RunOutcome::Closed => {
                trace!(thread = %self.handle.name, actor = %task.name(), "Task closed");
                self.handle.deregister(&task.id());
            }
        }
    }
}
