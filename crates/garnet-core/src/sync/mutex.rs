//! Ruby `Thread::Mutex`
//!
//! A Ruby mutex is not reentrant: locking it twice from the same thread
//! raises instead of deadlocking. Every acquisition is recorded in the
//! owning thread's owned-locks list so the locks can be released if the
//! thread dies while holding them.

use crate::error::{fatal, RubyError, RubyResult};
use crate::sync::{MutexGuard, MutexId, ReentrantLock};
use crate::thread::{RubyThread, ThreadId};
use std::sync::Arc;
use std::time::Duration;

/// Lock operations shared by `Mutex`, `ConditionVariable` and the thread
/// teardown path
pub struct MutexOperations;

impl MutexOperations {
    /// Acquire `lock`, blocking through the blocking runner. Raises if the
    /// current thread already holds it.
    pub fn lock(thread: &RubyThread, lock: &Arc<ReentrantLock>) -> RubyResult<()> {
        if lock.is_held_by(thread.id()) {
            return Err(RubyError::thread_error("deadlock; recursive locking"));
        }
        Self::lock_internal(thread, lock)
    }

    /// Acquire `lock` without the recursion check
    pub fn lock_internal(thread: &RubyThread, lock: &Arc<ReentrantLock>) -> RubyResult<()> {
        if !lock.try_lock(thread.id()) {
            tracing::trace!(thread = thread.id().as_u64(), lock = lock.id().as_u64(), "lock contended");
            thread.run_until_result(|current| lock.lock_interruptibly(current))?;
        }
        Self::record_acquired(thread, lock);
        Ok(())
    }

    /// Try to acquire `lock` without blocking
    pub fn try_lock(thread: &RubyThread, lock: &Arc<ReentrantLock>) -> bool {
        if lock.is_held_by(thread.id()) {
            return false;
        }
        if lock.try_lock(thread.id()) {
            Self::record_acquired(thread, lock);
            true
        } else {
            false
        }
    }

    /// Raise unless the current thread holds `lock`
    pub fn check_owned_mutex(thread: &RubyThread, lock: &ReentrantLock) -> RubyResult<()> {
        if lock.is_held_by(thread.id()) {
            return Ok(());
        }
        if lock.is_locked() {
            Err(RubyError::thread_error(
                "Attempt to unlock a mutex which is locked by another thread/fiber",
            ))
        } else {
            Err(RubyError::thread_error(
                "Attempt to unlock a mutex which is not locked",
            ))
        }
    }

    /// Release `lock`, raising if the current thread does not hold it
    pub fn unlock(thread: &RubyThread, lock: &Arc<ReentrantLock>) -> RubyResult<()> {
        Self::check_owned_mutex(thread, lock)?;
        Self::unlock_internal(thread, lock);
        Ok(())
    }

    /// Release one hold on a lock the caller is known to hold
    pub fn unlock_internal(thread: &RubyThread, lock: &Arc<ReentrantLock>) {
        match lock.unlock(thread.id()) {
            Ok(0) => thread.remove_owned_lock(lock),
            Ok(_) => {}
            Err(err) => fatal(&err.to_string()),
        }
    }

    /// Re-acquire `lock` no matter what. Errors raised by safepoint actions
    /// while waiting do not abandon the acquisition: the first one is kept
    /// and re-raised once the lock is held again.
    pub fn lock_even_with_exceptions(thread: &RubyThread, lock: &Arc<ReentrantLock>) -> RubyResult<()> {
        Self::internal_lock_even_with_exception(thread, lock, 1)
    }

    /// [`lock_even_with_exceptions`](Self::lock_even_with_exceptions), then
    /// restore `hold_count` holds
    pub fn internal_lock_even_with_exception(
        thread: &RubyThread,
        lock: &Arc<ReentrantLock>,
        hold_count: u32,
    ) -> RubyResult<()> {
        let mut pending: Option<RubyError> = None;
        if !lock.try_lock(thread.id()) {
            loop {
                match thread.run_until_result(|current| lock.lock_interruptibly(current)) {
                    Ok(()) => break,
                    Err(err) => {
                        tracing::debug!(thread = thread.id().as_u64(), error = %err, "exception while re-acquiring lock");
                        pending.get_or_insert(err);
                    }
                }
            }
        }
        lock.set_hold_count(thread.id(), hold_count);
        Self::record_acquired(thread, lock);

        match pending {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record_acquired(thread: &RubyThread, lock: &Arc<ReentrantLock>) {
        if !lock.is_held_by(thread.id()) {
            fatal("lock is not held after a successful acquisition");
        }
        thread.add_owned_lock(lock.clone());
    }
}

/// Ruby `Thread::Mutex`
#[derive(Debug, Default)]
pub struct Mutex {
    lock: Arc<ReentrantLock>,
}

impl Mutex {
    /// Create a new, unlocked mutex
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutex id
    pub fn id(&self) -> MutexId {
        self.lock.id()
    }

    /// The underlying lock
    pub fn raw(&self) -> &Arc<ReentrantLock> {
        &self.lock
    }

    /// `Mutex#lock`
    pub fn lock(&self, thread: &RubyThread) -> RubyResult<()> {
        MutexOperations::lock(thread, &self.lock)
    }

    /// `Mutex#try_lock`
    pub fn try_lock(&self, thread: &RubyThread) -> bool {
        MutexOperations::try_lock(thread, &self.lock)
    }

    /// `Mutex#unlock`
    pub fn unlock(&self, thread: &RubyThread) -> RubyResult<()> {
        MutexOperations::unlock(thread, &self.lock)
    }

    /// `Mutex#locked?`
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// `Mutex#owned?`
    pub fn is_owned(&self, thread: &RubyThread) -> bool {
        self.lock.is_held_by(thread.id())
    }

    /// Thread currently holding the mutex
    pub fn owner(&self) -> Option<ThreadId> {
        self.lock.owner()
    }

    /// Lock and return a guard that unlocks on drop
    pub fn lock_guard<'a>(&'a self, thread: &'a RubyThread) -> RubyResult<MutexGuard<'a>> {
        self.lock(thread)?;
        Ok(MutexGuard::new(self, thread))
    }

    /// `Mutex#synchronize`: run `block` while holding the mutex.
    ///
    /// The mutex is released on every exit path. An exception from the
    /// block is re-raised after the release; if the block succeeded but the
    /// release fails (the block unlocked the mutex itself), the release
    /// error is raised.
    pub fn synchronize<R>(
        &self,
        thread: &RubyThread,
        block: impl FnOnce() -> RubyResult<R>,
    ) -> RubyResult<R> {
        let guard = self.lock_guard(thread)?;
        let result = block();
        let released = guard.unlock();

        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), released) => {
                if let Err(release_err) = released {
                    tracing::debug!(error = %release_err, "mutex release failed after block raised");
                }
                Err(err)
            }
        }
    }

    /// `Mutex#sleep`: release the mutex, sleep, and re-acquire it.
    ///
    /// Re-acquisition always completes before any exception raised during
    /// the sleep or the re-acquisition is propagated. Returns the time slept.
    pub fn sleep(&self, thread: &RubyThread, duration: Option<Duration>) -> RubyResult<Duration> {
        MutexOperations::check_owned_mutex(thread, &self.lock)?;

        // A wakeup delivered before this call must not end the sleep
        thread.clear_wake_up();
        MutexOperations::unlock_internal(thread, &self.lock);

        let slept = thread.sleep(duration);
        let relocked = MutexOperations::lock_even_with_exceptions(thread, &self.lock);

        match slept {
            Err(err) => Err(err),
            Ok(elapsed) => relocked.map(|()| elapsed),
        }
    }

    /// `Mutex#marshal_dump`
    pub fn marshal_dump(&self) -> RubyResult<Vec<u8>> {
        Err(RubyError::TypeError("no _dump_data is defined for class Thread::Mutex".to_string()))
    }
}
