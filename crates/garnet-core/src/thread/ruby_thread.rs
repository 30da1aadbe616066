//! Per-thread runtime state

use crate::backtrace::CallStack;
use crate::error::Interrupted;
use crate::sync::ReentrantLock;
use crate::thread::{SafepointAction, SafepointManager};
use crossbeam::atomic::AtomicCell;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Unique identifier for a Ruby thread
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ThreadId(u64);

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

impl ThreadId {
    /// Generate a new unique ThreadId
    pub fn new() -> Self {
        ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduling status of a Ruby thread as reported by `Thread#status`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Running Ruby code
    Run,
    /// Parked in a blocking call
    Sleep,
    /// Terminated
    Dead,
}

/// A Ruby thread
pub struct RubyThread {
    id: ThreadId,
    name: Option<String>,
    pub(super) status: AtomicCell<ThreadStatus>,

    /// Set by `Thread#wakeup`, consumed by sleeps and condition waits
    wake_up: AtomicBool,

    /// Set whenever something wants this thread to leave a blocking call
    interrupted: AtomicBool,

    /// Parking spot for `sleep`
    parker: Mutex<()>,
    unpark: Condvar,

    /// Thread-local actions delivered through the safepoint manager
    actions: Mutex<VecDeque<SafepointAction>>,
    has_pending_actions: AtomicBool,

    /// Locks held by this thread. Only the thread itself mutates this list.
    owned_locks: Mutex<Vec<Arc<ReentrantLock>>>,

    call_stack: CallStack,

    pub(super) safepoints: Arc<SafepointManager>,
    poll_interval: Duration,
}

impl RubyThread {
    /// Create a new thread record
    pub fn new(
        name: Option<String>,
        safepoints: Arc<SafepointManager>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ThreadId::new(),
            name,
            status: AtomicCell::new(ThreadStatus::Run),
            wake_up: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            parker: Mutex::new(()),
            unpark: Condvar::new(),
            actions: Mutex::new(VecDeque::new()),
            has_pending_actions: AtomicBool::new(false),
            owned_locks: Mutex::new(Vec::new()),
            call_stack: CallStack::new(),
            safepoints,
            poll_interval,
        })
    }

    /// Thread id
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Thread name, if one was given
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current status
    pub fn status(&self) -> ThreadStatus {
        self.status.load()
    }

    /// Whether the thread has terminated
    pub fn is_alive(&self) -> bool {
        self.status.load() != ThreadStatus::Dead
    }

    pub(crate) fn mark_dead(&self) {
        self.status.store(ThreadStatus::Dead);
    }

    /// Slice length for interruptible waits
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// The safepoint manager this thread reports to
    pub fn safepoints(&self) -> &Arc<SafepointManager> {
        &self.safepoints
    }

    /// Recorded call stack
    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    // ===== Interruption =====

    /// Ask the thread to leave any blocking call and poll for safepoint actions
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        let _parked = self.parker.lock();
        self.unpark.notify_all();
    }

    /// Consume a pending interrupt
    pub fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::AcqRel)
    }

    /// Return `Err(Interrupted)` if an interrupt is pending, consuming it
    pub fn check_interrupted(&self) -> Result<(), Interrupted> {
        if self.take_interrupt() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// `Thread#wakeup`: end a sleep or condition wait early
    pub fn wakeup(&self) {
        self.wake_up.store(true, Ordering::Release);
        self.interrupt();
    }

    /// Consume a pending wake-up request
    pub fn take_wake_up(&self) -> bool {
        self.wake_up.swap(false, Ordering::AcqRel)
    }

    /// Drop any stale wake-up request
    pub fn clear_wake_up(&self) {
        self.wake_up.store(false, Ordering::Release);
    }

    // ===== Sleeping =====

    /// Park until the deadline passes, a wake-up arrives or the thread is
    /// interrupted
    pub(super) fn park_until(
        &self,
        deadline: Option<std::time::Instant>,
    ) -> Result<(), Interrupted> {
        let mut parked = self.parker.lock();
        loop {
            if self.take_wake_up() {
                return Ok(());
            }
            self.check_interrupted()?;
            match deadline {
                Some(deadline) => {
                    if std::time::Instant::now() >= deadline {
                        return Ok(());
                    }
                    self.unpark.wait_until(&mut parked, deadline);
                }
                None => self.unpark.wait(&mut parked),
            }
        }
    }

    // ===== Safepoint actions =====

    pub(super) fn enqueue_action(&self, action: SafepointAction) {
        self.actions.lock().push_back(action);
        self.has_pending_actions.store(true, Ordering::Release);
    }

    pub(super) fn pop_action(&self) -> Option<SafepointAction> {
        let mut actions = self.actions.lock();
        let action = actions.pop_front();
        if actions.is_empty() {
            self.has_pending_actions.store(false, Ordering::Release);
        }
        action
    }

    /// Fast check for queued safepoint actions
    #[inline(always)]
    pub fn has_pending_actions(&self) -> bool {
        self.has_pending_actions.load(Ordering::Acquire)
    }

    /// Run pending safepoint actions if any (guest code calls this at loop
    /// back-edges and calls)
    pub fn poll_safepoint(&self) -> crate::RubyResult<()> {
        self.safepoints.poll(self)
    }

    // ===== Owned locks =====

    pub(crate) fn add_owned_lock(&self, lock: Arc<ReentrantLock>) {
        let mut owned = self.owned_locks.lock();
        if !owned.iter().any(|held| Arc::ptr_eq(held, &lock)) {
            owned.push(lock);
        }
    }

    pub(crate) fn remove_owned_lock(&self, lock: &Arc<ReentrantLock>) {
        self.owned_locks.lock().retain(|held| !Arc::ptr_eq(held, lock));
    }

    /// Number of locks this thread currently holds
    pub fn owned_lock_count(&self) -> usize {
        self.owned_locks.lock().len()
    }

    /// Whether this thread's owned-locks list contains `lock`
    pub fn owns_lock(&self, lock: &Arc<ReentrantLock>) -> bool {
        self.owned_locks.lock().iter().any(|held| Arc::ptr_eq(held, lock))
    }

    /// Release every lock still held. Called by the thread itself as it dies.
    pub(crate) fn release_owned_locks(&self) {
        let owned: Vec<_> = self.owned_locks.lock().drain(..).collect();
        for lock in owned {
            tracing::debug!(thread = self.id.as_u64(), lock = lock.id().as_u64(), "releasing lock held by dying thread");
            lock.release_fully(self.id);
        }
    }
}

impl fmt::Debug for RubyThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RubyThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread() -> Arc<RubyThread> {
        RubyThread::new(None, Arc::new(SafepointManager::new()), Duration::from_millis(5))
    }

    #[test]
    fn test_thread_id_uniqueness() {
        let id1 = ThreadId::new();
        let id2 = ThreadId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_interrupt_is_consumed_once() {
        let t = thread();
        assert!(t.check_interrupted().is_ok());
        t.interrupt();
        assert_eq!(t.check_interrupted(), Err(Interrupted));
        assert!(t.check_interrupted().is_ok());
    }

    #[test]
    fn test_wakeup_sets_both_flags() {
        let t = thread();
        t.wakeup();
        assert!(t.take_wake_up());
        assert!(t.take_interrupt());
        assert!(!t.take_wake_up());
    }

    #[test]
    fn test_park_until_deadline() {
        let t = thread();
        let deadline = std::time::Instant::now() + Duration::from_millis(20);
        assert!(t.park_until(Some(deadline)).is_ok());
        assert!(std::time::Instant::now() >= deadline);
    }

    #[test]
    fn test_park_returns_on_wakeup() {
        let t = thread();
        t.wakeup();
        // The pending wake-up wins over the interrupt it also raised
        assert!(t.park_until(None).is_ok());
    }

    #[test]
    fn test_owned_locks_dedup() {
        let t = thread();
        let lock = Arc::new(ReentrantLock::new());
        t.add_owned_lock(lock.clone());
        t.add_owned_lock(lock.clone());
        assert_eq!(t.owned_lock_count(), 1);
        assert!(t.owns_lock(&lock));
        t.remove_owned_lock(&lock);
        assert_eq!(t.owned_lock_count(), 0);
    }
}
