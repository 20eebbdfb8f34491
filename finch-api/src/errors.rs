//! # Actor Error Types
//!
//! Errors observed by callers of the actor runtime. Every failure that travels
//! through an [`ActorFuture`](crate::future::ActorFuture) is an [`ActorError`],
//! so the type is cheap to clone: a resolved future hands the same error to
//! every registered continuation.
//!
//! ## Usage Example
//!
//! ```rust
//! use finch_api::errors::ActorError;
//!
//! fn describe(error: &ActorError) -> &'static str {
//!     match error {
//!         ActorError::Closed => "actor no longer accepts work",
//!         ActorError::QueueFull { .. } => "actor is overloaded, retry later",
//!         ActorError::Timeout(_) => "gave up waiting",
//!         _ => "failed",
//!     }
//! }
//! ```

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error type carried by actor futures and returned by concurrency control.
#[derive(Error, Debug, Clone)]
pub enum ActorError {
    /// A future was resolved a second time.
    ///
    /// Single assignment is what allows continuations to run without locking
    /// the value, so a second resolution is a programming error.
    #[error("Future was already completed")]
    AlreadyCompleted,

    /// A blocking `join` was attempted from inside an actor thread.
    #[error("Blocking join is not allowed on an actor thread")]
    JoinOnActorThread,

    /// Waiting for a future exceeded the given duration.
    #[error("Timed out after {0:?} waiting for future")]
    Timeout(Duration),

    /// The actor is closing or closed and accepts no more jobs.
    #[error("Actor is closed")]
    Closed,

    /// The actor's bounded job queue rejected a submission.
    #[error("Job queue is full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    /// An argument was outside the range an operation accepts.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A job or continuation panicked.
    #[error("Job panicked: {0}")]
    Panicked(String),

    /// A failure described by a message.
    #[error("{0}")]
    Failed(String),

    /// Any other error, shared so the value stays cloneable.
    #[error("{0}")]
    Other(Arc<dyn StdError + Send + Sync + 'static>),
}

impl ActorError {
    /// Creates a [`ActorError::Failed`] from anything printable.
    pub fn failure(message: impl std::fmt::Display) -> Self {
        ActorError::Failed(message.to_string())
    }

    /// Wraps an arbitrary error.
    pub fn other<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ActorError::Other(Arc::new(error))
    }

    /// Builds an error from a panic payload caught with `catch_unwind`.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "non-string panic payload".to_string(),
            },
        };
        ActorError::Panicked(message)
    }
}

impl From<anyhow::Error> for ActorError {
    fn from(error: anyhow::Error) -> Self {
        let boxed: Box<dyn StdError + Send + Sync + 'static> = error.into();
        ActorError::Other(Arc::from(boxed))
    }
}

/// Result alias used across the runtime.
pub type ActorResult<T> = Result<T, ActorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_display() {
        assert_eq!(ActorError::AlreadyCompleted.to_string(), "Future was already completed");
        assert_eq!(ActorError::Closed.to_string(), "Actor is closed");
        assert_eq!(
            ActorError::QueueFull { capacity: 8 }.to_string(),
            "Job queue is full (capacity: 8)"
        );
        assert_eq!(
            ActorError::Timeout(Duration::from_millis(250)).to_string(),
            "Timed out after 250ms waiting for future"
        );
        assert_eq!(ActorError::failure("boom").to_string(), "boom");
        assert_eq!(
            ActorError::InvalidArgument("interval is zero".to_string()).to_string(),
            "Invalid argument: interval is zero"
        );
    }

    #[test]
    fn test_from_anyhow_keeps_message() {
        let error: ActorError = anyhow!("disk unavailable").into();
        assert!(matches!(error, ActorError::Other(_)));
        assert_eq!(error.to_string(), "disk unavailable");
    }

    #[test]
    fn test_from_panic_payloads() {
        let owned = ActorError::from_panic(Box::new(String::from("owned")));
        assert_eq!(owned.to_string(), "Job panicked: owned");

        let borrowed = ActorError::from_panic(Box::new("static"));
        assert_eq!(borrowed.to_string(), "Job panicked: static");

        let opaque = ActorError::from_panic(Box::new(42_u32));
        assert_eq!(opaque.to_string(), "Job panicked: non-string panic payload");
    }

    #[test]
    fn test_clone_shares_other() {
        let error = ActorError::other(std::io::Error::new(std::io::ErrorKind::Other, "io"));
        let cloned = error.clone();
        assert_eq!(error.to_string(), cloned.to_string());
    }
}
