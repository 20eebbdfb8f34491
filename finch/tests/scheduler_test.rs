// Tests running the scheduler on real actor threads

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use finch::{
    logging, Actor, ActorConfig, ActorControl, ActorError, ActorFuture, ActorResult, ActorScheduler, ActorState,
    ConcurrencyControl, FailurePhase, SchedulerConfig, SchedulerError, SchedulerState, SchedulingHint,
};

const WAIT: Duration = Duration::from_secs(5);

fn small_config() -> SchedulerConfig {
    SchedulerConfig {
        cpu_threads: 2,
        io_threads: 1,
        thread_name_prefix: "finch-test".to_string(),
        ..SchedulerConfig::default()
    }
}

fn started_scheduler() -> ActorScheduler {
    logging::init_test();
    let scheduler = ActorScheduler::new(small_config()).unwrap();
    scheduler.start().unwrap();
    scheduler
}

/// Counts its jobs and records whether two of them ever overlapped.
struct Exclusive {
    value: u64,
    in_job: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

impl Exclusive {
    fn new() -> Self {
        Self {
            value: 0,
            in_job: Arc::new(AtomicBool::new(false)),
            overlaps: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn increment(&mut self) {
        if self.in_job.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.value += 1;
        self.in_job.store(false, Ordering::SeqCst);
    }
}

impl Actor for Exclusive {}

#[test]
fn test_jobs_from_many_threads_never_overlap() {
    let scheduler = started_scheduler();
    let actor = Exclusive::new();
    let overlaps = Arc::clone(&actor.overlaps);
    let handle = scheduler
        .submit_actor_with_config(actor, ActorConfig::named("exclusive").with_job_queue_capacity(10_000))
        .unwrap();
    handle.startup().join_timeout(WAIT).unwrap();

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let control = handle.control();
            thread::spawn(move || {
                for _ in 0..1_000 {
                    control.run(|actor: &mut Exclusive| actor.increment()).unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    let value = handle.control().call(|actor: &mut Exclusive| Ok(actor.value));
    assert_eq!(value.join_timeout(WAIT).unwrap(), 4_000);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);

    scheduler.close(WAIT).join().unwrap();
}

#[test]
fn test_lifecycle_of_scheduler() {
    logging::init_test();
    let scheduler = ActorScheduler::new(small_config()).unwrap();
    assert_eq!(scheduler.state(), SchedulerState::New);
    assert!(matches!(scheduler.submit_actor(Exclusive::new()), Err(SchedulerError::NotRunning)));

    scheduler.start().unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Running);
    assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStarted)));

    let handle = scheduler.submit_actor(Exclusive::new()).unwrap();
    handle.startup().join_timeout(WAIT).unwrap();
    assert_eq!(scheduler.actor_count(), 1);

    let first = scheduler.close(WAIT);
    let second = scheduler.close(Duration::from_millis(1));
    first.join_timeout(WAIT).unwrap();
    assert!(second.is_done());
    assert!(!second.is_completed_exceptionally());

    assert_eq!(scheduler.state(), SchedulerState::Closed);
    assert_eq!(handle.state(), ActorState::Closed);
    assert_eq!(scheduler.actor_count(), 0);
    assert!(matches!(scheduler.submit_actor(Exclusive::new()), Err(SchedulerError::ShuttingDown)));
    assert!(matches!(
        handle.control().run(|actor: &mut Exclusive| actor.increment()),
        Err(ActorError::Closed)
    ));
}

#[test]
fn test_close_without_start() {
    let scheduler = ActorScheduler::new(small_config()).unwrap();
    scheduler.close(WAIT).join().unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Closed);
    assert!(matches!(scheduler.start(), Err(SchedulerError::ShuttingDown)));
}

#[test]
fn test_close_with_unbounded_timeout() {
    let scheduler = started_scheduler();
    let handle = scheduler.submit_actor(Exclusive::new()).unwrap();
    handle.startup().join_timeout(Duration::MAX).unwrap();

    scheduler.close(Duration::MAX).join_timeout(WAIT).unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Closed);
    assert!(handle.is_closed());
}

#[test]
fn test_timer_fires_on_actor_thread() {
    struct Sleeper;
    impl Actor for Sleeper {}

    let scheduler = started_scheduler();
    let handle = scheduler.submit_actor(Sleeper).unwrap();
    let woke: ActorFuture<String> = ActorFuture::new();

    let target = woke.clone();
    handle
        .control()
        .schedule(Duration::from_millis(20), move |_: &mut Sleeper| {
            let name = thread::current().name().unwrap_or_default().to_string();
            target.complete(name).unwrap();
        })
        .unwrap();

    let thread_name = woke.join_timeout(WAIT).unwrap();
    assert_eq!(thread_name, handle.thread_name());
    assert!(thread_name.starts_with("finch-test-cpu-bound-"));

    scheduler.close(WAIT).join().unwrap();
}

#[test]
fn test_io_bound_actor_runs_on_io_thread() {
    struct Reader;
    impl Actor for Reader {
        fn scheduling_hint(&self) -> SchedulingHint {
            SchedulingHint::IoBound
        }
    }

    let scheduler = started_scheduler();
    let handle = scheduler.submit_actor(Reader).unwrap();
    let name = handle
        .control()
        .call(|_: &mut Reader| Ok(thread::current().name().unwrap_or_default().to_string()));

    assert_eq!(name.join_timeout(WAIT).unwrap(), "finch-test-io-bound-0");
    scheduler.close(WAIT).join().unwrap();
}

#[test]
fn test_failures_are_published() {
    struct Fragile;
    impl Actor for Fragile {}

    let scheduler = started_scheduler();
    let failures = scheduler.failures();
    let handle = scheduler.submit_actor(Fragile).unwrap();

    handle.control().run(|_: &mut Fragile| panic!("fragile job")).unwrap();

    let failure = failures.recv_timeout(WAIT).unwrap();
    assert_eq!(failure.phase, FailurePhase::Job);
    assert_eq!(failure.actor_name, "Fragile");
    assert!(failure.to_string().contains("fragile job"));

    // the actor survives its failed job
    let alive = handle.control().call(|_: &mut Fragile| Ok(true));
    assert!(alive.join_timeout(WAIT).unwrap());

    scheduler.close(WAIT).join().unwrap();
}

#[test]
fn test_actors_talk_through_futures() {
    struct Doubler;
    impl Actor for Doubler {}

    struct Client {
        doubler: ActorControl<Doubler>,
        answers: Vec<u64>,
    }
    impl Actor for Client {}

    let scheduler = started_scheduler();
    let doubler = scheduler.submit_actor(Doubler).unwrap();
    let client = scheduler
        .submit_actor(Client {
            doubler: doubler.control(),
            answers: Vec::new(),
        })
        .unwrap();

    let done: ActorFuture<Vec<u64>> = ActorFuture::new();
    let result = done.clone();
    let me = client.control();
    client
        .control()
        .run(move |client: &mut Client| {
            let requests: Vec<ActorFuture<u64>> = (1..=3)
                .map(|n| client.doubler.call(move |_: &mut Doubler| Ok(n * 2)))
                .collect();
            me.run_on_completion_all(requests, move |client: &mut Client, answers| {
                client.answers = answers.unwrap_or_default();
                let _ = result.complete(client.answers.clone());
            });
        })
        .unwrap();

    assert_eq!(done.join_timeout(WAIT).unwrap(), vec![2, 4, 6]);
    scheduler.close(WAIT).join().unwrap();
}

#[test]
fn test_unclean_shutdown_is_reported() {
    struct Stuck;
    impl Actor for Stuck {}

    logging::init_test();
    let scheduler = ActorScheduler::new(SchedulerConfig {
        cpu_threads: 1,
        io_threads: 1,
        ..SchedulerConfig::default()
    })
    .unwrap();
    scheduler.start().unwrap();
    let handle = scheduler.submit_actor(Stuck).unwrap();
    handle.startup().join_timeout(WAIT).unwrap();

    let entered: ActorFuture<()> = ActorFuture::new();
    let signal = entered.clone();
    handle
        .control()
        .run(move |_: &mut Stuck| {
            let _ = signal.complete(());
            thread::sleep(Duration::from_millis(500));
        })
        .unwrap();
    entered.join_timeout(WAIT).unwrap();

    let error = scheduler.close(Duration::from_millis(50)).join_timeout(WAIT).unwrap_err();
    assert!(error.to_string().contains("Unclean shutdown"), "unexpected error: {error}");
    assert_eq!(scheduler.state(), SchedulerState::Closed);
}

#[tokio::test]
async fn test_await_call_from_async_code() -> ActorResult<()> {
    struct Greeter {
        greeting: String,
    }
    impl Actor for Greeter {}

    let scheduler = started_scheduler();
    let greeter = scheduler
        .submit_actor(Greeter {
            greeting: "hello".to_string(),
        })
        .unwrap();
    greeter.startup().await?;

    let control = greeter.control();
    let calls: Vec<ActorFuture<String>> = ["ada", "grace"]
        .iter()
        .map(|name| {
            let name = name.to_string();
            control.call(move |g: &mut Greeter| Ok(format!("{} {}", g.greeting, name)))
        })
        .collect();
    let answers = futures::future::join_all(calls).await;
    let answers: Vec<String> = answers.into_iter().collect::<ActorResult<_>>()?;
    assert_eq!(answers, vec!["hello ada", "hello grace"]);

    scheduler.close(WAIT).await
}
