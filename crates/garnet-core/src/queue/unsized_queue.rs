//! Unbounded blocking queue

use crate::error::{Interrupted, RubyError, RubyResult};
use crate::queue::{Offer, Polled, Taken, CLOSED_QUEUE_MESSAGE, EMPTY_QUEUE_MESSAGE};
use crate::thread::{deadline_after, RubyThread};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    /// Consumers parked in `take`
    waiting: usize,
}

/// Ruby `Thread::Queue`
pub struct UnsizedQueue<T> {
    inner: Mutex<Inner<T>>,
    can_take: Condvar,
}

impl<T> UnsizedQueue<T> {
    /// Create an empty, open queue
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
                waiting: 0,
            }),
            can_take: Condvar::new(),
        }
    }

    /// Append an item. Returns false if the queue is closed.
    pub fn add(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.items.push_back(item);
        self.can_take.notify_one();
        true
    }

    /// Append every item. Returns false (adding nothing) if the queue is closed.
    pub fn add_all(&self, items: impl IntoIterator<Item = T>) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.items.extend(items);
        self.can_take.notify_all();
        true
    }

    /// Non-blocking add. An unbounded queue is never full.
    pub fn offer(&self, item: T) -> Offer<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Offer::Closed(item);
        }
        inner.items.push_back(item);
        self.can_take.notify_one();
        Offer::Success
    }

    /// Non-blocking take
    pub fn poll(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Blocking take. Returns [`Taken::Closed`] once the queue is closed
    /// and drained.
    pub fn take(&self, thread: &RubyThread) -> RubyResult<Taken<T>> {
        let taken = thread.run_until_result(|current| self.take_until(current, None))?;
        Ok(taken.unwrap_or(Taken::Closed))
    }

    /// Take with a timeout. The deadline is fixed on entry.
    pub fn poll_timeout(&self, thread: &RubyThread, timeout: Duration) -> RubyResult<Polled<T>> {
        let deadline = deadline_after(timeout);
        let taken = thread.run_until_result(|current| self.take_until(current, deadline))?;
        Ok(taken.into())
    }

    /// Wait for an item until `deadline`. `None` means the deadline passed.
    fn take_until(
        &self,
        thread: &RubyThread,
        deadline: Option<Instant>,
    ) -> Result<Option<Taken<T>>, Interrupted> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Ok(Some(Taken::Item(item)));
            }
            if inner.closed {
                return Ok(Some(Taken::Closed));
            }

            let slice = thread.poll_interval();
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    (deadline - now).min(slice)
                }
                None => slice,
            };

            inner.waiting += 1;
            self.can_take.wait_for(&mut inner, wait);
            inner.waiting -= 1;
            thread.check_interrupted()?;
        }
    }

    /// Number of queued items
    pub fn size(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether no items are queued
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Drop every queued item
    pub fn clear(&self) {
        self.inner.lock().items.clear();
    }

    /// Close the queue and wake every blocked consumer. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.closed = true;
            tracing::debug!(remaining = inner.items.len(), waiting = inner.waiting, "queue closed");
        }
        self.can_take.notify_all();
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Consumers currently blocked in `take`
    pub fn num_waiting(&self) -> usize {
        self.inner.lock().waiting
    }

    /// Snapshot of the queued items, oldest first
    pub fn contents(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.lock().items.iter().cloned().collect()
    }

    // ===== Ruby surface =====

    /// `Queue#push`
    pub fn push(&self, item: T) -> RubyResult<()> {
        if self.add(item) {
            Ok(())
        } else {
            Err(RubyError::ClosedQueueError(CLOSED_QUEUE_MESSAGE.to_string()))
        }
    }

    /// `Queue#pop(non_block)`. Blocking pops return `None` once the queue is
    /// closed and drained; a non-blocking pop on an empty queue raises.
    pub fn pop(&self, thread: &RubyThread, non_block: bool) -> RubyResult<Option<T>> {
        if non_block {
            return match self.poll() {
                Some(item) => Ok(Some(item)),
                None => Err(RubyError::thread_error(EMPTY_QUEUE_MESSAGE)),
            };
        }
        Ok(self.take(thread)?.into_option())
    }

    /// `Queue#pop(timeout:)`: `None` on timeout or when closed and drained
    pub fn pop_with_timeout(&self, thread: &RubyThread, timeout: Duration) -> RubyResult<Option<T>> {
        Ok(self.poll_timeout(thread, timeout)?.into_option())
    }

    /// `Queue#marshal_dump`
    pub fn marshal_dump(&self) -> RubyResult<Vec<u8>> {
        Err(RubyError::TypeError("can't dump Thread::Queue".to_string()))
    }
}

impl<T> Default for UnsizedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::SafepointManager;
    use std::sync::Arc;

    fn thread() -> Arc<RubyThread> {
        RubyThread::new(None, Arc::new(SafepointManager::new()), Duration::from_millis(5))
    }

    #[test]
    fn test_fifo_order() {
        let queue = UnsizedQueue::new();
        let t = thread();
        assert!(queue.add(1));
        assert!(queue.add_all(vec![2, 3]));
        assert_eq!(queue.size(), 3);
        assert_eq!(queue.contents(), vec![1, 2, 3]);

        assert_eq!(queue.take(&t), Ok(Taken::Item(1)));
        assert_eq!(queue.poll(), Some(2));
        assert_eq!(queue.pop(&t, false), Ok(Some(3)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_close_drains_then_sentinel() {
        let queue = UnsizedQueue::new();
        let t = thread();
        queue.add("a");
        queue.add("b");
        queue.close();

        assert!(!queue.add("c"));
        assert!(matches!(queue.offer("c"), Offer::Closed("c")));
        assert_eq!(queue.take(&t), Ok(Taken::Item("a")));
        assert_eq!(queue.take(&t), Ok(Taken::Item("b")));
        assert_eq!(queue.take(&t), Ok(Taken::Closed));
        assert_eq!(queue.take(&t), Ok(Taken::Closed));
    }

    #[test]
    fn test_close_is_idempotent() {
        let queue: UnsizedQueue<i32> = UnsizedQueue::new();
        queue.close();
        queue.close();
        assert!(queue.is_closed());
    }

    #[test]
    fn test_push_closed_raises() {
        let queue = UnsizedQueue::new();
        queue.close();
        assert_eq!(
            queue.push(1),
            Err(RubyError::ClosedQueueError("queue closed".to_string()))
        );
    }

    #[test]
    fn test_non_blocking_pop_empty_raises() {
        let queue: UnsizedQueue<i32> = UnsizedQueue::new();
        let t = thread();
        assert_eq!(queue.pop(&t, true), Err(RubyError::thread_error("queue empty")));
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn test_poll_timeout() {
        let queue: UnsizedQueue<i32> = UnsizedQueue::new();
        let t = thread();
        let start = Instant::now();
        assert_eq!(queue.poll_timeout(&t, Duration::from_millis(25)), Ok(Polled::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert_eq!(queue.pop_with_timeout(&t, Duration::from_millis(1)), Ok(None));

        queue.add(9);
        assert_eq!(queue.poll_timeout(&t, Duration::from_millis(25)), Ok(Polled::Item(9)));
    }

    #[test]
    fn test_poll_timeout_with_unrepresentable_timeout() {
        let queue = UnsizedQueue::new();
        let t = thread();
        queue.add(3);
        assert_eq!(queue.poll_timeout(&t, Duration::MAX), Ok(Polled::Item(3)));

        queue.close();
        assert_eq!(queue.poll_timeout(&t, Duration::MAX), Ok(Polled::Closed));
    }

    #[test]
    fn test_blocked_take_sees_close() {
        let queue: Arc<UnsizedQueue<i32>> = Arc::new(UnsizedQueue::new());
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.take(&thread()))
        };

        while queue.num_waiting() == 0 {
            std::thread::yield_now();
        }
        queue.close();
        assert_eq!(consumer.join().unwrap(), Ok(Taken::Closed));
        assert_eq!(queue.num_waiting(), 0);
    }

    #[test]
    fn test_blocked_take_receives_item() {
        let queue = Arc::new(UnsizedQueue::new());
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop(&thread(), false))
        };

        std::thread::sleep(Duration::from_millis(15));
        queue.push("hello").unwrap();
        assert_eq!(consumer.join().unwrap(), Ok(Some("hello")));
    }

    #[test]
    fn test_raise_while_blocked_in_take() {
        let queue: UnsizedQueue<i32> = UnsizedQueue::new();
        let t = thread();
        t.safepoints().submit(&t, Box::new(|_| Err(RubyError::raised("Interrupt", ""))));
        assert_eq!(queue.take(&t), Err(RubyError::raised("Interrupt", "")));
    }

    #[test]
    fn test_clear() {
        let queue = UnsizedQueue::new();
        queue.add_all([1, 2, 3]);
        queue.clear();
        assert_eq!(queue.size(), 0);
        assert!(!queue.is_closed());
    }

    #[test]
    fn test_marshal_dump_rejected() {
        let queue: UnsizedQueue<i32> = UnsizedQueue::new();
        assert_eq!(queue.marshal_dump().unwrap_err().class_name(), "TypeError");
    }
}
