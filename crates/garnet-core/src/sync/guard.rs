//! RAII guard for automatic mutex unlock

use crate::error::RubyResult;
use crate::sync::{Mutex, MutexOperations};
use crate::thread::RubyThread;

/// RAII guard for a Ruby `Mutex` (auto-unlocks on drop)
///
/// `Mutex#synchronize` is built on this guard so the mutex is released on
/// every exit path, including a panic unwinding through the block.
pub struct MutexGuard<'a> {
    /// Reference to the mutex
    mutex: &'a Mutex,
    /// Thread that owns the lock
    thread: &'a RubyThread,
    /// Whether the guard has been manually unlocked
    unlocked: bool,
}

impl<'a> MutexGuard<'a> {
    /// Wrap a mutex that `thread` has just locked
    pub(crate) fn new(mutex: &'a Mutex, thread: &'a RubyThread) -> Self {
        Self {
            mutex,
            thread,
            unlocked: false,
        }
    }

    /// Manually unlock the mutex early (before drop).
    ///
    /// Raises if the mutex is no longer held by the guard's thread.
    pub fn unlock(mut self) -> RubyResult<()> {
        self.unlocked = true;
        self.mutex.unlock(self.thread)
    }

    /// The guarded mutex
    pub fn mutex(&self) -> &Mutex {
        self.mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if !self.unlocked && self.mutex.is_owned(self.thread) {
            MutexOperations::unlock_internal(self.thread, self.mutex.raw());
        }
    }
}
