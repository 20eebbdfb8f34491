// Logging for the finch scheduler
//
// Built on the `tracing` ecosystem. The scheduler itself only emits events;
// applications (and tests) pick a subscriber with one of the `init_*`
// functions below.
//
// ```rust
// use finch::logging;
//
// // INFO level, human readable console output
// logging::init_default();
//
// // or DEBUG for the scheduler, TRACE for the actor threads
// logging::init_development();
// ```
//
// Actor threads are plain OS threads spawned by the scheduler. They inherit
// the dispatcher that was current when the scheduler was started, see
// `current_subscriber`.

use std::sync::Once;
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the finch logging system
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id, useful to tell actor threads apart
    pub show_thread_info: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

/// Initialize the logging system with the given configuration
///
/// Safe to call multiple times; only the first call takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let mut env_filter = EnvFilter::from_default_env().add_directive(config.level.into());

        if let Some(filters) = config.target_filters {
            for filter in filters.split(',') {
                if let Ok(directive) = filter.parse() {
                    env_filter = env_filter.add_directive(directive);
                }
            }
        }

        let registry = tracing_subscriber::registry().with(env_filter);

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(
                registry.with(
                    fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_thread_names(config.show_thread_info),
                ),
            )
        } else {
            Box::new(
                registry.with(
                    fmt::layer()
                        .with_ansi(atty::is(atty::Stream::Stdout))
                        .with_file(config.show_file_line)
                        .with_line_number(config.show_file_line)
                        .with_thread_names(config.show_thread_info)
                        .with_thread_ids(config.show_thread_info),
                ),
            )
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// INFO level, human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG for finch, TRACE for the actor thread loop.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        target_filters: Some("finch=debug,finch::scheduler::worker=trace".to_string()),
        ..Default::default()
    });
}

/// INFO level JSON lines without source locations.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        target_filters: None,
    });
}

/// Warnings and errors only, to keep test output readable.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        show_thread_info: false,
        ..Default::default()
    });
}

/// Span covering the jobs of one actor while its thread runs it.
///
/// ```rust,ignore
/// let span = finch::actor_span!("exporter", "7f0c...");
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! actor_span {
    ($actor_name:expr, $actor_id:expr) => {
        tracing::debug_span!("actor", name = %$actor_name, id = %$actor_id)
    };
    ($actor_name:expr, $actor_id:expr, $($fields:tt)*) => {
        tracing::debug_span!("actor", name = %$actor_name, id = %$actor_id, $($fields)*)
    };
}

/// Log actor lifecycle transitions (started, closing, closed, failed).
#[macro_export]
macro_rules! log_lifecycle {
    ($actor_name:expr, $actor_id:expr, $event:expr) => {
        tracing::debug!(actor = %$actor_name, actor_id = %$actor_id, event = $event)
    };
    ($actor_name:expr, $actor_id:expr, $event:expr, $($fields:tt)*) => {
        tracing::debug!(actor = %$actor_name, actor_id = %$actor_id, event = $event, $($fields)*)
    };
}

/// Log scheduler and thread group events.
#[macro_export]
macro_rules! log_scheduler {
    ($component:expr, $event:expr) => {
        tracing::info!(component = %$component, event = $event)
    };
    ($component:expr, $event:expr, $($fields:tt)*) => {
        tracing::info!(component = %$component, event = $event, $($fields)*)
    };
}

/// Get the current tracing dispatcher
///
/// The scheduler captures it when starting and installs it on every actor
/// thread, so thread-local subscribers set by tests are honoured as well.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}
