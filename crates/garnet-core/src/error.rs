//! Ruby-level error signals raised by the runtime core
//!
//! Every usage error surfaces as a `RubyError` carrying the Ruby exception
//! class it maps to and a descriptive message. Conditions that indicate a
//! bug in the runtime itself never become a `RubyError`; they go through
//! [`fatal`] instead.

use std::fmt;

/// An exception raised by user code or delivered from another thread
/// (`Thread#raise`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaisedException {
    /// Ruby class name of the exception (e.g. `RuntimeError`)
    pub class_name: String,
    /// Exception message
    pub message: String,
}

impl RaisedException {
    /// Create a new raised exception
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RaisedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.class_name)
    }
}

/// Errors surfaced to Ruby code by the runtime core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RubyError {
    /// Thread-state violation (recursive locking, foreign unlock, empty/full queue)
    #[error("{0} (ThreadError)")]
    ThreadError(String),

    /// Push onto a closed queue
    #[error("{0} (ClosedQueueError)")]
    ClosedQueueError(String),

    /// Invalid argument (non-positive capacity, non-collectable key)
    #[error("{0} (ArgumentError)")]
    ArgumentError(String),

    /// Block required but not given
    #[error("{0} (LocalJumpError)")]
    LocalJumpError(String),

    /// Value out of range (unknown object id)
    #[error("{0} (RangeError)")]
    RangeError(String),

    /// Operation not supported for this type
    #[error("{0} (TypeError)")]
    TypeError(String),

    /// Exception raised by a user block or delivered by `Thread#raise`
    #[error("{0}")]
    Raised(RaisedException),

    /// The thread was killed (`Thread#kill`)
    #[error("thread killed")]
    Killed,
}

impl RubyError {
    /// Construct a `ThreadError`
    pub fn thread_error(message: impl Into<String>) -> Self {
        RubyError::ThreadError(message.into())
    }

    /// Construct an `ArgumentError`
    pub fn argument_error(message: impl Into<String>) -> Self {
        RubyError::ArgumentError(message.into())
    }

    /// Construct a user-level exception of an arbitrary class
    pub fn raised(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        RubyError::Raised(RaisedException::new(class_name, message))
    }

    /// Ruby class name this error is raised as
    pub fn class_name(&self) -> &str {
        match self {
            RubyError::ThreadError(_) => "ThreadError",
            RubyError::ClosedQueueError(_) => "ClosedQueueError",
            RubyError::ArgumentError(_) => "ArgumentError",
            RubyError::LocalJumpError(_) => "LocalJumpError",
            RubyError::RangeError(_) => "RangeError",
            RubyError::TypeError(_) => "TypeError",
            RubyError::Raised(exception) => &exception.class_name,
            RubyError::Killed => "ThreadKill",
        }
    }

    /// Message carried by this error
    pub fn message(&self) -> &str {
        match self {
            RubyError::ThreadError(message)
            | RubyError::ClosedQueueError(message)
            | RubyError::ArgumentError(message)
            | RubyError::LocalJumpError(message)
            | RubyError::RangeError(message)
            | RubyError::TypeError(message) => message,
            RubyError::Raised(exception) => &exception.message,
            RubyError::Killed => "",
        }
    }

    /// View this error as the exception object Ruby code would rescue
    pub fn to_exception(&self) -> RaisedException {
        RaisedException::new(self.class_name(), self.message())
    }
}

/// Result type for operations that may raise a Ruby exception
pub type RubyResult<T> = Result<T, RubyError>;

/// Marker returned by an interruptible blocking primitive when the waiting
/// thread was interrupted. Only the blocking runner observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("blocking call interrupted")]
pub struct Interrupted;

/// Abort on a runtime invariant violation.
///
/// Used for conditions no caller can recover from, such as object-id
/// exhaustion or a lock that is not held after a successful acquisition.
#[cold]
#[track_caller]
pub fn fatal(message: &str) -> ! {
    tracing::error!(%message, "fatal runtime error");
    panic!("garnet fatal error: {}", message)
}
