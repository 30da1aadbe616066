//! Ruby `Thread::ConditionVariable`
//!
//! Waiters park on a private lock + condition pair. Wake-ups are handed out
//! as explicit credits in `signals`: a waiter only counts as signalled if it
//! can take a credit, so a thread woken by a safepoint interruption or a
//! spurious wake-up goes back to waiting instead of stealing a signal meant
//! for another waiter.

use crate::error::{RubyError, RubyResult};
use crate::sync::{Mutex, MutexOperations, ReentrantLock};
use crate::thread::{deadline_after, RubyThread};
use parking_lot::{Condvar, Mutex as ParkingLotMutex, MutexGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a `wait` ended
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Consumed a signal credit
    Signaled,
    /// The timeout elapsed first
    TimedOut,
    /// `Thread#wakeup` was called on the waiter
    Woken,
}

#[derive(Debug, Default)]
struct CondState {
    /// Threads currently registered in `wait`
    waiters: u32,
    /// Wake credits not consumed yet
    signals: u32,
}

/// Ruby `Thread::ConditionVariable`
#[derive(Debug, Default)]
pub struct ConditionVariable {
    state: ParkingLotMutex<CondState>,
    condition: Condvar,
}

impl ConditionVariable {
    /// Create a new condition variable
    pub fn new() -> Self {
        Self::default()
    }

    /// `ConditionVariable#wait(mutex, timeout)`
    pub fn wait(
        &self,
        thread: &RubyThread,
        mutex: &Mutex,
        timeout: Option<Duration>,
    ) -> RubyResult<WaitOutcome> {
        self.wait_on_lock(thread, mutex.raw(), timeout)
    }

    /// Wait with any lock held by `thread`. All of the caller's holds are
    /// released while waiting and restored before returning, even when the
    /// wait raises.
    pub fn wait_on_lock(
        &self,
        thread: &RubyThread,
        lock: &Arc<ReentrantLock>,
        timeout: Option<Duration>,
    ) -> RubyResult<WaitOutcome> {
        MutexOperations::check_owned_mutex(thread, lock)?;
        let deadline = timeout.and_then(deadline_after);
        thread.clear_wake_up();

        let mut state = self.state.lock();
        let hold_count = lock.release_fully(thread.id());
        thread.remove_owned_lock(lock);
        state.waiters += 1;

        let result = self.await_signal(thread, &mut state, deadline);
        if result.is_err() {
            // A signaller may have picked this waiter before the error; do
            // not leave its credit for somebody else.
            Self::consume_signal(&mut state);
        }
        state.waiters -= 1;
        drop(state);

        let relocked = MutexOperations::internal_lock_even_with_exception(thread, lock, hold_count);
        match result {
            Err(err) => Err(err),
            Ok(outcome) => relocked.map(|()| outcome),
        }
    }

    fn await_signal(
        &self,
        thread: &RubyThread,
        state: &mut MutexGuard<'_, CondState>,
        deadline: Option<Instant>,
    ) -> RubyResult<WaitOutcome> {
        loop {
            if Self::consume_signal(state) {
                return Ok(WaitOutcome::Signaled);
            }
            if thread.take_wake_up() {
                return Ok(WaitOutcome::Woken);
            }

            let slice = thread.poll_interval();
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::trace!(thread = thread.id().as_u64(), "condition variable wait timed out");
                        return Ok(WaitOutcome::TimedOut);
                    }
                    self.condition.wait_for(state, (deadline - now).min(slice));
                }
                None => {
                    self.condition.wait_for(state, slice);
                }
            }

            if Self::consume_signal(state) {
                return Ok(WaitOutcome::Signaled);
            }
            if thread.take_interrupt() {
                // Safepoint actions run without the private lock so
                // signallers are not blocked behind them
                MutexGuard::unlocked(state, || {
                    thread.safepoints().poll_from_blocking_call(thread)
                })?;
            }
        }
    }

    fn consume_signal(state: &mut CondState) -> bool {
        if state.signals > 0 {
            state.signals -= 1;
            true
        } else {
            false
        }
    }

    /// `ConditionVariable#signal`: wake one waiter. Dropped if nobody waits.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        if state.waiters > 0 {
            state.signals += 1;
            self.condition.notify_one();
        }
    }

    /// `ConditionVariable#broadcast`: wake every registered waiter
    pub fn broadcast(&self) {
        let mut state = self.state.lock();
        if state.waiters > 0 {
            state.signals += state.waiters;
            self.condition.notify_all();
        }
    }

    /// Threads currently registered as waiting
    pub fn waiters(&self) -> u32 {
        self.state.lock().waiters
    }

    /// Credits granted but not consumed yet
    pub fn pending_signals(&self) -> u32 {
        self.state.lock().signals
    }

    /// `ConditionVariable#marshal_dump`
    pub fn marshal_dump(&self) -> RubyResult<Vec<u8>> {
        Err(RubyError::TypeError(
            "can't dump Thread::ConditionVariable".to_string(),
        ))
    }
}
