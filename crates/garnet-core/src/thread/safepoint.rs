//! Safepoint delivery of thread-local actions
//!
//! Other threads (and the runtime itself) coordinate with a Ruby thread by
//! queueing an action on it and interrupting it. The target runs its queued
//! actions the next time it polls: at a guest-code safepoint, or when a
//! blocking call notices the interrupt and goes through the blocking runner.
//!
//! ## Poll cost
//!
//! `poll()` is a single atomic load when nothing is queued. The action
//! runner is out of line.

use crate::error::RubyResult;
use crate::thread::RubyThread;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// An action run once by the target thread at its next safepoint
pub type SafepointAction = Box<dyn FnOnce(&RubyThread) -> RubyResult<()> + Send>;

/// An action shared by several target threads
pub type SharedSafepointAction = Arc<dyn Fn(&RubyThread) -> RubyResult<()> + Send + Sync>;

/// Statistics tracking for safepoint operations
#[derive(Debug, Default)]
pub struct SafepointStats {
    /// Total number of actions submitted
    total_submitted: AtomicUsize,
    /// Total number of polls that ran at least one action
    total_safepoints: AtomicUsize,
    /// Total time spent running actions (microseconds)
    total_pause_time_us: AtomicUsize,
    /// Maximum time spent in one poll (microseconds)
    max_pause_time_us: AtomicUsize,
}

impl SafepointStats {
    /// Reset all counters
    pub fn reset(&self) {
        self.total_submitted.store(0, Ordering::Relaxed);
        self.total_safepoints.store(0, Ordering::Relaxed);
        self.total_pause_time_us.store(0, Ordering::Relaxed);
        self.max_pause_time_us.store(0, Ordering::Relaxed);
    }

    /// Total number of actions submitted
    pub fn total_submitted(&self) -> usize {
        self.total_submitted.load(Ordering::Relaxed)
    }

    /// Total number of polls that ran at least one action
    pub fn total_safepoints(&self) -> usize {
        self.total_safepoints.load(Ordering::Relaxed)
    }

    /// Total time spent running actions (microseconds)
    pub fn total_pause_time_us(&self) -> usize {
        self.total_pause_time_us.load(Ordering::Relaxed)
    }

    /// Maximum time spent in one poll (microseconds)
    pub fn max_pause_time_us(&self) -> usize {
        self.max_pause_time_us.load(Ordering::Relaxed)
    }

    fn record(&self, elapsed: usize) {
        self.total_pause_time_us.fetch_add(elapsed, Ordering::Relaxed);
        self.total_safepoints.fetch_add(1, Ordering::Relaxed);

        let mut max = self.max_pause_time_us.load(Ordering::Relaxed);
        while elapsed > max {
            match self.max_pause_time_us.compare_exchange_weak(
                max,
                elapsed,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => max = current,
            }
        }
    }
}

/// Delivers thread-local actions to Ruby threads
#[derive(Debug, Default)]
pub struct SafepointManager {
    /// Statistics
    pub stats: SafepointStats,
}

impl SafepointManager {
    /// Create a new SafepointManager
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `action` on `thread` and interrupt it
    pub fn submit(&self, thread: &RubyThread, action: SafepointAction) {
        self.stats.total_submitted.fetch_add(1, Ordering::Relaxed);
        thread.enqueue_action(action);
        tracing::trace!(thread = thread.id().as_u64(), "safepoint action submitted");
        thread.interrupt();
    }

    /// Queue the same action on every thread in `threads`
    pub fn pause_all_and_execute(&self, threads: &[Arc<RubyThread>], action: SharedSafepointAction) {
        for thread in threads.iter().filter(|thread| thread.is_alive()) {
            let action = action.clone();
            self.submit(thread, Box::new(move |target| action(target)));
        }
    }

    /// Fast inline check - called from guest code
    #[inline(always)]
    pub fn poll(&self, thread: &RubyThread) -> RubyResult<()> {
        if thread.has_pending_actions() {
            self.run_pending(thread)
        } else {
            Ok(())
        }
    }

    /// Poll from inside the blocking runner after an interruption
    pub fn poll_from_blocking_call(&self, thread: &RubyThread) -> RubyResult<()> {
        tracing::trace!(thread = thread.id().as_u64(), "safepoint poll from blocking call");
        self.poll(thread)
    }

    /// Slow path: run queued actions in order. The first failing action
    /// stops the run; later actions stay queued and the thread is
    /// re-interrupted so its next blocking call polls again.
    #[cold]
    #[inline(never)]
    fn run_pending(&self, thread: &RubyThread) -> RubyResult<()> {
        let start = Instant::now();
        let mut outcome = Ok(());
        while let Some(action) = thread.pop_action() {
            if let Err(err) = action(thread) {
                if thread.has_pending_actions() {
                    thread.interrupt();
                }
                outcome = Err(err);
                break;
            }
        }
        self.stats.record(start.elapsed().as_micros() as usize);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RubyError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn thread(manager: &Arc<SafepointManager>) -> Arc<RubyThread> {
        RubyThread::new(None, manager.clone(), Duration::from_millis(5))
    }

    #[test]
    fn test_poll_without_actions_is_noop() {
        let manager = Arc::new(SafepointManager::new());
        let t = thread(&manager);
        assert!(manager.poll(&t).is_ok());
        assert_eq!(manager.stats.total_safepoints(), 0);
    }

    #[test]
    fn test_actions_run_in_order() {
        let manager = Arc::new(SafepointManager::new());
        let t = thread(&manager);
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            manager.submit(
                &t,
                Box::new(move |_| {
                    log.lock().push(i);
                    Ok(())
                }),
            );
        }
        assert!(t.take_interrupt());

        manager.poll(&t).unwrap();
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert!(!t.has_pending_actions());
        assert_eq!(manager.stats.total_submitted(), 3);
        assert_eq!(manager.stats.total_safepoints(), 1);
    }

    #[test]
    fn test_failing_action_keeps_rest_queued() {
        let manager = Arc::new(SafepointManager::new());
        let t = thread(&manager);
        let ran = Arc::new(AtomicUsize::new(0));

        manager.submit(&t, Box::new(|_| Err(RubyError::Killed)));
        let ran_clone = ran.clone();
        manager.submit(
            &t,
            Box::new(move |_| {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        t.take_interrupt();

        assert_eq!(manager.poll(&t), Err(RubyError::Killed));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        // Re-interrupted so the remaining action is not forgotten
        assert!(t.take_interrupt());

        manager.poll(&t).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pause_all_and_execute() {
        let manager = Arc::new(SafepointManager::new());
        let threads: Vec<_> = (0..4).map(|_| thread(&manager)).collect();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        manager.pause_all_and_execute(
            &threads,
            Arc::new(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        for t in &threads {
            t.poll_safepoint().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_stats_reset() {
        let manager = Arc::new(SafepointManager::new());
        let t = thread(&manager);
        manager.submit(&t, Box::new(|_| Ok(())));
        manager.poll(&t).unwrap();
        assert_eq!(manager.stats.total_safepoints(), 1);

        manager.stats.reset();
        assert_eq!(manager.stats.total_safepoints(), 0);
        assert_eq!(manager.stats.max_pause_time_us(), 0);
    }
}
