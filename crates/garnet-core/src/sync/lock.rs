//! Thread-owned reentrant lock
//!
//! The building block under `Mutex`, `Monitor` and the condition-variable
//! protocol. Ownership is tracked by Ruby `ThreadId` so that the runtime can
//! tell "held by me" from "held by another thread" without asking the OS.

use crate::error::Interrupted;
use crate::thread::{RubyThread, ThreadId};
use crossbeam::atomic::AtomicCell;
use parking_lot::{Condvar, Mutex as ParkingLotMutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Unique identifier for a lock
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MutexId(u64);

static NEXT_MUTEX_ID: AtomicU64 = AtomicU64::new(1);

impl MutexId {
    /// Generate a new unique MutexId
    pub fn new() -> Self {
        MutexId(NEXT_MUTEX_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for MutexId {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors reported by the low-level lock
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// Unlock attempted while nobody holds the lock
    #[error("lock {0:?} is not locked")]
    NotLocked(MutexId),

    /// Unlock attempted by a thread that does not hold the lock
    #[error("lock {0:?} is not held by thread {1:?}")]
    NotOwner(MutexId, ThreadId),
}

/// Reentrant lock owned by a Ruby thread
pub struct ReentrantLock {
    id: MutexId,

    /// Current owner (None if unlocked). Only written with `holds` locked.
    owner: AtomicCell<Option<ThreadId>>,

    /// Number of times the owner has acquired the lock
    holds: ParkingLotMutex<u32>,

    /// Signalled whenever the lock becomes free
    available: Condvar,

    /// Threads currently parked waiting for the lock
    waiting: AtomicUsize,
}

impl ReentrantLock {
    /// Create a new, unlocked lock
    pub fn new() -> Self {
        Self {
            id: MutexId::new(),
            owner: AtomicCell::new(None),
            holds: ParkingLotMutex::new(0),
            available: Condvar::new(),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Lock id
    pub fn id(&self) -> MutexId {
        self.id
    }

    /// Current owner
    pub fn owner(&self) -> Option<ThreadId> {
        self.owner.load()
    }

    /// Whether any thread holds the lock
    pub fn is_locked(&self) -> bool {
        self.owner.load().is_some()
    }

    /// Whether `thread` holds the lock
    pub fn is_held_by(&self, thread: ThreadId) -> bool {
        self.owner.load() == Some(thread)
    }

    /// Number of holds `thread` has on the lock (0 if it does not own it)
    pub fn hold_count(&self, thread: ThreadId) -> u32 {
        let holds = self.holds.lock();
        if self.owner.load() == Some(thread) {
            *holds
        } else {
            0
        }
    }

    /// Number of threads parked waiting for the lock
    pub fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Acquire without blocking. Re-acquiring a held lock adds a hold.
    pub fn try_lock(&self, thread: ThreadId) -> bool {
        let mut holds = self.holds.lock();
        Self::acquire(&self.owner, &mut holds, thread)
    }

    fn acquire(owner: &AtomicCell<Option<ThreadId>>, holds: &mut u32, thread: ThreadId) -> bool {
        match owner.load() {
            None => {
                owner.store(Some(thread));
                *holds = 1;
                true
            }
            Some(current) if current == thread => {
                *holds += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Block until the lock is acquired or `thread` is interrupted.
    ///
    /// Waits in slices of the thread's poll interval so interrupts are
    /// noticed promptly.
    pub fn lock_interruptibly(&self, thread: &RubyThread) -> Result<(), Interrupted> {
        let id = thread.id();
        let mut holds = self.holds.lock();
        loop {
            if Self::acquire(&self.owner, &mut holds, id) {
                return Ok(());
            }
            thread.check_interrupted()?;

            self.waiting.fetch_add(1, Ordering::Relaxed);
            self.available.wait_for(&mut holds, thread.poll_interval());
            self.waiting.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Drop one hold. Returns the number of holds left.
    pub fn unlock(&self, thread: ThreadId) -> Result<u32, LockError> {
        let mut holds = self.holds.lock();
        match self.owner.load() {
            Some(owner) if owner == thread => {
                *holds -= 1;
                if *holds == 0 {
                    self.owner.store(None);
                    self.available.notify_one();
                }
                Ok(*holds)
            }
            Some(_) => Err(LockError::NotOwner(self.id, thread)),
            None => Err(LockError::NotLocked(self.id)),
        }
    }

    /// Drop every hold `thread` has. Returns how many there were so they can
    /// be restored with [`set_hold_count`](Self::set_hold_count).
    pub fn release_fully(&self, thread: ThreadId) -> u32 {
        let mut holds = self.holds.lock();
        if self.owner.load() != Some(thread) {
            return 0;
        }
        let released = *holds;
        *holds = 0;
        self.owner.store(None);
        self.available.notify_one();
        released
    }

    /// Restore the hold count after re-acquiring a fully released lock
    pub fn set_hold_count(&self, thread: ThreadId, count: u32) {
        let mut holds = self.holds.lock();
        if self.owner.load() == Some(thread) && count > 0 {
            *holds = count;
        }
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("id", &self.id)
            .field("owner", &self.owner.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::SafepointManager;
    use std::sync::Arc;
    use std::time::Duration;

    fn thread() -> Arc<RubyThread> {
        RubyThread::new(None, Arc::new(SafepointManager::new()), Duration::from_millis(5))
    }

    #[test]
    fn test_mutex_id_uniqueness() {
        let id1 = MutexId::new();
        let id2 = MutexId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_uncontended_lock_unlock() {
        let lock = ReentrantLock::new();
        let t = ThreadId::new();

        assert!(lock.try_lock(t));
        assert!(lock.is_locked());
        assert!(lock.is_held_by(t));
        assert_eq!(lock.owner(), Some(t));

        assert_eq!(lock.unlock(t), Ok(0));
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_reentrant_holds() {
        let lock = ReentrantLock::new();
        let t = ThreadId::new();

        assert!(lock.try_lock(t));
        assert!(lock.try_lock(t));
        assert_eq!(lock.hold_count(t), 2);
        assert_eq!(lock.unlock(t), Ok(1));
        assert!(lock.is_locked());
        assert_eq!(lock.unlock(t), Ok(0));
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_try_lock_contended() {
        let lock = ReentrantLock::new();
        let t1 = ThreadId::new();
        let t2 = ThreadId::new();

        assert!(lock.try_lock(t1));
        assert!(!lock.try_lock(t2));
        assert_eq!(lock.hold_count(t2), 0);
    }

    #[test]
    fn test_unlock_errors() {
        let lock = ReentrantLock::new();
        let t1 = ThreadId::new();
        let t2 = ThreadId::new();

        assert_eq!(lock.unlock(t1), Err(LockError::NotLocked(lock.id())));
        lock.try_lock(t1);
        assert_eq!(lock.unlock(t2), Err(LockError::NotOwner(lock.id(), t2)));
    }

    #[test]
    fn test_release_fully_and_restore() {
        let lock = ReentrantLock::new();
        let t = ThreadId::new();
        lock.try_lock(t);
        lock.try_lock(t);
        lock.try_lock(t);

        assert_eq!(lock.release_fully(t), 3);
        assert!(!lock.is_locked());

        assert!(lock.try_lock(t));
        lock.set_hold_count(t, 3);
        assert_eq!(lock.hold_count(t), 3);
    }

    #[test]
    fn test_release_fully_by_non_owner() {
        let lock = ReentrantLock::new();
        let t1 = ThreadId::new();
        lock.try_lock(t1);
        assert_eq!(lock.release_fully(ThreadId::new()), 0);
        assert!(lock.is_held_by(t1));
    }

    #[test]
    fn test_lock_interruptibly_waits_for_release() {
        let lock = Arc::new(ReentrantLock::new());
        let owner = ThreadId::new();
        lock.try_lock(owner);

        let waiter = thread();
        let lock_clone = lock.clone();
        let waiter_clone = waiter.clone();
        let handle = std::thread::spawn(move || lock_clone.lock_interruptibly(&waiter_clone));

        std::thread::sleep(Duration::from_millis(20));
        lock.unlock(owner).unwrap();

        assert_eq!(handle.join().unwrap(), Ok(()));
        assert!(lock.is_held_by(waiter.id()));
    }

    #[test]
    fn test_lock_interruptibly_reports_interrupt() {
        let lock = ReentrantLock::new();
        lock.try_lock(ThreadId::new());

        let waiter = thread();
        waiter.interrupt();
        assert_eq!(lock.lock_interruptibly(&waiter), Err(Interrupted));
        assert!(!lock.is_held_by(waiter.id()));
    }
}
