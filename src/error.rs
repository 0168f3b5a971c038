use std::time::Duration;

/// Work was refused by admission control.
///
/// Rejections are expected and non-fatal. Boolean APIs report them as `false`;
/// only the `Result`-returning variants surface this type.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RejectionError {
    /// The rate limit for the current window is exhausted.
    #[error("rate limit exceeded, next admission in {retry_after:?}")]
    RateLimited {
        /// Time until the next call would be admitted.
        retry_after: Duration,
    },
    /// The queue already holds `max_size` pending items.
    #[error("queue is full ({max_size} pending items)")]
    QueueFull {
        /// Configured pending capacity.
        max_size: usize,
    },
    /// The component is disabled.
    #[error("disabled")]
    Disabled,
}

/// A timeout raised by the retry engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    /// A single attempt ran longer than `max_execution_time`.
    #[error("attempt {attempt} timed out after {limit:?}")]
    Attempt {
        /// 1-indexed attempt number.
        attempt: u32,
        /// Per-attempt limit.
        limit: Duration,
    },
    /// The cumulative execution time exceeded `max_total_execution_time`.
    #[error("total execution time {elapsed:?} exceeded {limit:?}")]
    Total {
        /// Time spent since the first attempt started.
        elapsed: Duration,
        /// Total limit.
        limit: Duration,
    },
}

/// The wrapped operation did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError<E> {
    /// The operation returned an error.
    #[error("execution failed: {0}")]
    Failed(E),
    /// The operation was cut short by a timeout guard.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    /// The operation panicked. Only produced by the queuer, which isolates
    /// panics per item.
    #[error("execution panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl<E> ExecutionError<E> {
    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout(_))
    }

    /// The operation's own error, if that is what failed.
    pub fn as_failed(&self) -> Option<&E> {
        match self {
            ExecutionError::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Consume into the operation's own error, if that is what failed.
    pub fn into_failed(self) -> Option<E> {
        match self {
            ExecutionError::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Error returned by [`AsyncRateLimiter::maybe_execute`](crate::AsyncRateLimiter::maybe_execute).
#[derive(Debug, thiserror::Error)]
pub enum PacingError<E> {
    /// The call was not admitted.
    #[error(transparent)]
    Rejected(#[from] RejectionError),
    /// The call was admitted and the wrapped function failed.
    #[error("execution failed: {0}")]
    Execution(E),
}

impl<E> PacingError<E> {
    /// Whether the call was rejected by admission control.
    pub fn is_rejected(&self) -> bool {
        matches!(self, PacingError::Rejected(_))
    }
}
