//! Error and cancellation types shared by every materializer.

use std::{error::Error as StdError, fmt, sync::Arc};

/// The cause recorded when a materializer graph is cancelled.
///
/// Cheap to clone, so the same cause can be reported to every waiter of every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    reason: Arc<str>,
}

impl Cancellation {
    pub fn new(reason: impl Into<Arc<str>>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The cause used when a scheduled task is interrupted before it could run.
    pub fn interrupted() -> Self {
        Self::new("task interrupted")
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Errors reported through result channels and blocking adapters.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A negative index was requested. Never forwarded upstream.
    #[error("index {0} is negative")]
    NegativeIndex(isize),

    /// The graph was cancelled. Takes precedence over any failure observed afterwards.
    #[error("materialization cancelled: {0}")]
    Cancelled(Cancellation),

    /// A blocking wait was attempted on the worker that would have to produce the result.
    #[error("blocking wait on the current execution context would deadlock")]
    Deadlock,

    /// An upstream source failed.
    #[error("materialization failed: {0}")]
    Failed(Arc<dyn StdError + Send + Sync>),

    /// A user-supplied operator function panicked.
    #[error("operator function panicked: {0}")]
    Panicked(String),

    /// The operation is not supported in the node's current state.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The producer side of a blocking wait went away without resolving it.
    #[error("result channel dropped without a result")]
    Disconnected,

    /// A blocking wait ran out of time.
    #[error("timed out waiting for the result")]
    Timeout,
}

impl Error {
    /// Wraps an arbitrary error as an upstream failure.
    pub fn failure<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Error::Failed(Arc::from(error.into()))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}
