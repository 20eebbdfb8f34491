//! The [`Actor`] trait implemented by user code.

use std::fmt;

use finch_api::{ActorError, ActorResult};

use crate::control::ActorControl;

/// Which thread group an actor runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SchedulingHint {
    /// Compute-heavy work; runs on the group sized to the available cores.
    #[default]
    CpuBound,
    /// Work adjacent to blocking I/O; isolated on a small separate group so
    /// it cannot stall CPU-bound actors.
    IoBound,
}

impl fmt::Display for SchedulingHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingHint::CpuBound => f.write_str("cpu-bound"),
            SchedulingHint::IoBound => f.write_str("io-bound"),
        }
    }
}

/// A unit of sequential logic that never runs concurrently with itself.
///
/// An actor owns no thread. The scheduler calls its hooks, and every job
/// submitted through its [`ActorControl`], on the single actor thread it was
/// assigned to; jobs receive `&mut Self`, so actor state needs no locking.
///
/// Returning an error (or panicking) from [`on_actor_started`](Actor::on_actor_started)
/// or [`on_actor_closing`](Actor::on_actor_closing) is fatal to the actor.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use finch::{Actor, ActorControl, ConcurrencyControl};
/// use finch_api::ActorResult;
///
/// struct Heartbeat {
///     beats: u64,
/// }
///
/// impl Actor for Heartbeat {
///     fn on_actor_started(&mut self, control: &ActorControl<Self>) -> ActorResult<()> {
///         control.schedule_at_fixed_rate(Duration::from_secs(1), |actor: &mut Heartbeat| {
///             actor.beats += 1;
///         })?;
///         Ok(())
///     }
/// }
/// ```
pub trait Actor: Send + Sized + 'static {
    /// Name used in logs and failure reports.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }

    /// Thread group the actor prefers.
    fn scheduling_hint(&self) -> SchedulingHint {
        SchedulingHint::CpuBound
    }

    /// First job executed for the actor.
    fn on_actor_started(&mut self, _control: &ActorControl<Self>) -> ActorResult<()> {
        Ok(())
    }

    /// Runs once closing was requested and all previously queued jobs ran.
    fn on_actor_closing(&mut self, _control: &ActorControl<Self>) -> ActorResult<()> {
        Ok(())
    }

    /// Runs after the actor reached its final state.
    fn on_actor_closed(&mut self) {}

    /// Runs when a lifecycle hook failed, before the actor is closed.
    fn on_actor_failed(&mut self, _error: &ActorError) {}
}
