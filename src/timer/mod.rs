/// Virtual-time scheduler for tests and headless replay
pub mod manual;
/// Tokio-backed scheduler for production use
pub mod runtime;

pub use manual::VirtualTimer;
pub use runtime::TokioTimer;

use std::fmt;
use std::time::Instant;
use thiserror::Error;

/// Callback run by a [`Timer`] once its deadline has passed
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Which decoder deadline an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Silence long enough to commit the buffered signals as one letter
    LetterCommit,
    /// Silence long enough to separate words
    WordBreak,
}

/// Timer entry identifier, unique per decoder instance and deadline kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId {
    /// Decoder instance that owns the entry
    pub owner: u64,
    /// Deadline kind
    pub kind: TimerKind,
}

impl TimerId {
    /// Create an id for `owner`'s deadline of the given kind
    #[must_use]
    pub const fn new(owner: u64, kind: TimerKind) -> Self {
        Self { owner, kind }
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.owner)
    }
}

/// Errors raised by timer backends
#[derive(Debug, Error)]
pub enum TimerError {
    /// No tokio runtime is available to drive deadlines
    #[error("no tokio runtime available to drive timers")]
    NoRuntime,

    /// The backend refused the entry
    #[error("timer unavailable: {reason}")]
    Unavailable {
        /// Backend-specific explanation
        reason: String,
    },
}

/// Source of monotonically non-decreasing timestamps in milliseconds
pub trait Clock: Send + Sync {
    /// Current reading in milliseconds
    fn now_ms(&self) -> u64;
}

/// Scheduler of one-shot callbacks at absolute deadlines
///
/// Implementations must run callbacks at or after their deadline, never run two
/// callbacks with distinct deadlines out of order, and must not hold internal
/// locks while a callback runs (callbacks may schedule or cancel entries).
#[cfg_attr(test, mockall::automock)]
pub trait Timer: Send + Sync {
    /// Schedule `callback` at `deadline_ms`, replacing any pending entry with the same id
    ///
    /// # Errors
    /// Returns error if the backend cannot accept the entry
    fn schedule(
        &self,
        id: TimerId,
        deadline_ms: u64,
        callback: TimerCallback,
    ) -> Result<(), TimerError>;

    /// Cancel the pending entry for `id`; no-op if none is pending
    fn cancel(&self, id: TimerId);

    /// Current reading of the timer's clock in milliseconds
    fn now(&self) -> u64;
}

/// Wall-clock-independent clock counting milliseconds since construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start counting from now
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
