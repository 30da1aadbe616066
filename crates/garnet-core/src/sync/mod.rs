//! Synchronization primitives for Ruby threads
//!
//! `Mutex` and `ConditionVariable` block the calling Ruby thread through the
//! blocking runner, so a thread parked in one of them still answers
//! safepoint requests (`Thread#raise`, `Thread#kill`, global pauses).

mod condvar;
mod guard;
mod lock;
mod mutex;

pub use condvar::{ConditionVariable, WaitOutcome};
pub use guard::MutexGuard;
pub use lock::{LockError, MutexId, ReentrantLock};
pub use mutex::{Mutex, MutexOperations};
