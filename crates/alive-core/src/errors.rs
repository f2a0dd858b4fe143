//! Error types for cancellable timers and retry loops.
//!
//! Cancellation is its own type so callers can tell "somebody aborted this"
//! apart from a real failure without string matching. Retry loops surface
//! cancellation as [`RetryError::Cancelled`] and never retry it.

use std::time::Duration;

use thiserror::Error;

/// The operation was aborted through its cancellation token.
#[derive(Clone, Copy, Debug, Default, Error, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Outcome of racing a future against a deadline and a cancellation token.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    /// The token fired before the future or the deadline.
    #[error("operation cancelled")]
    Cancelled,
    /// The deadline elapsed first.
    #[error("timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

impl WaitError {
    /// Whether this is the cancellation kind.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<Cancelled> for WaitError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Failure of [`retry`](crate::retry::retry).
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The token fired; the loop unwound without another attempt.
    #[error("retry cancelled")]
    Cancelled,
    /// Every attempt failed. Carries the last underlying error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error returned by the final attempt.
        #[source]
        last: E,
    },
}

impl<E> RetryError<E> {
    /// Whether this is the cancellation kind.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The last underlying error, if the loop ran out of attempts.
    pub fn into_last(self) -> Option<E> {
        match self {
            Self::Cancelled => None,
            Self::Exhausted { last, .. } => Some(last),
        }
    }
}

impl<E> From<Cancelled> for RetryError<E> {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
