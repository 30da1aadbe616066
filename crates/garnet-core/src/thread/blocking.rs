//! Safepoint-cooperative blocking
//!
//! Every blocking primitive in the runtime is written as an interruptible
//! action returning `Result<T, Interrupted>`. The runner parks the thread
//! in that action, and when the action reports an interruption it runs the
//! pending safepoint actions and re-enters the action. An interruption is
//! therefore never mistaken for the outcome of the blocking call.

use crate::error::{Interrupted, RubyResult};
use crate::thread::{RubyThread, ThreadStatus};
use std::time::{Duration, Instant};

/// Deadline `timeout` from now. A timeout too large to represent as an
/// `Instant` means no deadline.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

impl RubyThread {
    /// Run a blocking action until it produces a result.
    ///
    /// The thread reports `Sleep` while the action runs. Errors raised by
    /// safepoint actions (e.g. `Thread#raise`) propagate to the caller.
    pub fn run_until_result<T>(
        &self,
        action: impl FnMut(&RubyThread) -> Result<T, Interrupted>,
    ) -> RubyResult<T> {
        self.run_until_result_with_resume(action, || {})
    }

    /// Like [`run_until_result`](Self::run_until_result), but calls `resume`
    /// after every interruption, once the safepoint poll has finished and
    /// before retrying or propagating the poll's error.
    pub fn run_until_result_with_resume<T>(
        &self,
        mut action: impl FnMut(&RubyThread) -> Result<T, Interrupted>,
        mut resume: impl FnMut(),
    ) -> RubyResult<T> {
        loop {
            let previous = self.status.swap(ThreadStatus::Sleep);
            let result = action(self);
            self.status.store(previous);

            match result {
                Ok(value) => return Ok(value),
                Err(Interrupted) => {
                    let polled = self.safepoints.poll_from_blocking_call(self);
                    resume();
                    polled?;
                }
            }
        }
    }

    /// `Kernel#sleep`: sleep for `duration` (forever when `None`) or until
    /// `Thread#wakeup`. Returns the time actually slept.
    pub fn sleep(&self, duration: Option<Duration>) -> RubyResult<Duration> {
        let start = Instant::now();
        let deadline = duration.and_then(|duration| start.checked_add(duration));
        self.run_until_result(|thread| thread.park_until(deadline))?;
        Ok(start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{Interrupted, RubyError};
    use crate::thread::{RubyThread, SafepointManager, ThreadStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn thread() -> Arc<RubyThread> {
        RubyThread::new(None, Arc::new(SafepointManager::new()), Duration::from_millis(5))
    }

    #[test]
    fn test_run_until_result_retries_after_interrupt() {
        let t = thread();
        let mut attempts = 0;
        let result = t.run_until_result(|_| {
            attempts += 1;
            if attempts < 3 {
                Err(Interrupted)
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(result, Ok(3));
        assert_eq!(t.status(), ThreadStatus::Run);
    }

    #[test]
    fn test_status_is_sleep_inside_action() {
        let t = thread();
        let seen = t.run_until_result(|thread| Ok(thread.status())).unwrap();
        assert_eq!(seen, ThreadStatus::Sleep);
        assert_eq!(t.status(), ThreadStatus::Run);
    }

    #[test]
    fn test_safepoint_action_runs_between_attempts() {
        let t = thread();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        t.safepoints().submit(
            &t,
            Box::new(move |_| {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let result = t.run_until_result(|thread| {
            thread.check_interrupted()?;
            Ok("done")
        });
        assert_eq!(result, Ok("done"));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_safepoint_error_propagates_after_resume() {
        let t = thread();
        t.safepoints().submit(
            &t,
            Box::new(|_| Err(RubyError::raised("RuntimeError", "from another thread"))),
        );

        let mut resumed = 0;
        let result: Result<(), _> = t.run_until_result_with_resume(
            |thread| {
                thread.check_interrupted()?;
                Ok(())
            },
            || resumed += 1,
        );
        assert_eq!(result, Err(RubyError::raised("RuntimeError", "from another thread")));
        assert_eq!(resumed, 1);
    }

    #[test]
    fn test_sleep_duration() {
        let t = thread();
        let slept = t.sleep(Some(Duration::from_millis(20))).unwrap();
        assert!(slept >= Duration::from_millis(20));
    }

    #[test]
    fn test_sleep_woken_early() {
        let t = thread();
        let waker = t.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.wakeup();
        });
        let slept = t.sleep(None).unwrap();
        handle.join().unwrap();
        assert!(slept < Duration::from_secs(5));
    }

    #[test]
    fn test_sleep_with_unrepresentable_duration() {
        let t = thread();
        t.wakeup();
        let slept = t.sleep(Some(Duration::MAX)).unwrap();
        assert!(slept < Duration::from_secs(5));
    }

    #[test]
    fn test_deadline_after_saturates_to_none() {
        assert!(super::deadline_after(Duration::from_millis(1)).is_some());
        assert_eq!(super::deadline_after(Duration::MAX), None);
    }
}
