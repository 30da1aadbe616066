//! Bounded blocking queue backed by a ring buffer

use crate::error::{Interrupted, RubyError, RubyResult};
use crate::queue::{
    Offer, Polled, Taken, CLOSED_QUEUE_MESSAGE, EMPTY_QUEUE_MESSAGE, FULL_QUEUE_MESSAGE,
};
use crate::thread::{deadline_after, RubyThread};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Ring buffer state. `items.len()` is the backing store size, which is at
/// least `capacity` and never smaller than `size`.
struct Ring<T> {
    items: Vec<Option<T>>,
    add_end: usize,
    take_end: usize,
    capacity: usize,
    size: usize,
    closed: bool,
    waiting_producers: usize,
    waiting_consumers: usize,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            items: (0..capacity).map(|_| None).collect(),
            add_end: 0,
            take_end: 0,
            capacity,
            size: 0,
            closed: false,
            waiting_producers: 0,
            waiting_consumers: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.size >= self.capacity
    }

    fn push(&mut self, item: T) {
        self.items[self.add_end] = Some(item);
        self.add_end = (self.add_end + 1) % self.items.len();
        self.size += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        let item = self.items[self.take_end].take();
        self.take_end = (self.take_end + 1) % self.items.len();
        self.size -= 1;
        item
    }

    /// Rebuild the backing store in FIFO order starting at index 0
    fn relinearize(&mut self, len: usize) {
        let mut items: Vec<Option<T>> = Vec::with_capacity(len);
        let old_len = self.items.len();
        for i in 0..self.size {
            items.push(self.items[(self.take_end + i) % old_len].take());
        }
        items.resize_with(len, || None);
        self.items = items;
        self.take_end = 0;
        self.add_end = self.size % len;
    }

    fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let len = self.items.len();
        (0..self.size).filter_map(move |i| self.items[(self.take_end + i) % len].as_ref())
    }
}

/// Ruby `Thread::SizedQueue`
pub struct SizedQueue<T> {
    inner: Mutex<Ring<T>>,
    can_add: Condvar,
    can_take: Condvar,
}

fn validate_capacity(capacity: i64) -> RubyResult<usize> {
    if capacity <= 0 {
        return Err(RubyError::argument_error("queue size must be positive"));
    }
    usize::try_from(capacity).map_err(|_| RubyError::argument_error("queue size too big"))
}

impl<T> SizedQueue<T> {
    /// `SizedQueue.new(max)`
    pub fn new(capacity: i64) -> RubyResult<Self> {
        let capacity = validate_capacity(capacity)?;
        Ok(Self {
            inner: Mutex::new(Ring::with_capacity(capacity)),
            can_add: Condvar::new(),
            can_take: Condvar::new(),
        })
    }

    /// `SizedQueue#max`
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// `SizedQueue#max=`: change the capacity at runtime.
    ///
    /// Existing contents keep their order. Blocked producers are woken if
    /// there is room under the new capacity.
    pub fn change_capacity(&self, capacity: i64) -> RubyResult<()> {
        let capacity = validate_capacity(capacity)?;
        let mut ring = self.inner.lock();
        let len = capacity.max(ring.size);
        if len != ring.items.len() {
            ring.relinearize(len);
        }
        let old = ring.capacity;
        ring.capacity = capacity;
        tracing::debug!(old, new = capacity, size = ring.size, "sized queue capacity changed");

        if capacity > ring.size {
            self.can_add.notify_all();
        }
        Ok(())
    }

    /// Blocking add. Returns false if the queue is (or becomes) closed.
    pub fn put(&self, thread: &RubyThread, item: T) -> RubyResult<bool> {
        let mut slot = Some(item);
        thread.run_until_result(|current| self.put_until(current, &mut slot))
    }

    fn put_until(&self, thread: &RubyThread, slot: &mut Option<T>) -> Result<bool, Interrupted> {
        let mut ring = self.inner.lock();
        loop {
            if ring.closed {
                return Ok(false);
            }
            if !ring.is_full() {
                if let Some(item) = slot.take() {
                    ring.push(item);
                    self.can_take.notify_one();
                }
                return Ok(true);
            }

            ring.waiting_producers += 1;
            self.can_add.wait_for(&mut ring, thread.poll_interval());
            ring.waiting_producers -= 1;
            thread.check_interrupted()?;
        }
    }

    /// Non-blocking add
    pub fn offer(&self, item: T) -> Offer<T> {
        let mut ring = self.inner.lock();
        if ring.closed {
            return Offer::Closed(item);
        }
        if ring.is_full() {
            return Offer::Full(item);
        }
        ring.push(item);
        self.can_take.notify_one();
        Offer::Success
    }

    /// Non-blocking take
    pub fn poll(&self) -> Option<T> {
        let mut ring = self.inner.lock();
        let item = ring.pop();
        if item.is_some() {
            self.can_add.notify_one();
        }
        item
    }

    /// Blocking take. Returns [`Taken::Closed`] once closed and drained.
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

    fn take_until(
        &self,
        thread: &RubyThread,
        deadline: Option<Instant>,
    ) -> Result<Option<Taken<T>>, Interrupted> {
        let mut ring = self.inner.lock();
        loop {
            if let Some(item) = ring.pop() {
                self.can_add.notify_one();
                return Ok(Some(Taken::Item(item)));
            }
            if ring.closed {
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

            ring.waiting_consumers += 1;
            self.can_take.wait_for(&mut ring, wait);
            ring.waiting_consumers -= 1;
            thread.check_interrupted()?;
        }
    }

    /// Number of queued items
    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    /// Whether no items are queued
    pub fn is_empty(&self) -> bool {
        self.inner.lock().size == 0
    }

    /// Drop every queued item and wake blocked producers
    pub fn clear(&self) {
        let mut ring = self.inner.lock();
        while ring.pop().is_some() {}
        self.can_add.notify_all();
    }

    /// Close the queue and wake every blocked producer and consumer. Idempotent.
    pub fn close(&self) {
        let mut ring = self.inner.lock();
        if !ring.closed {
            ring.closed = true;
            tracing::debug!(
                remaining = ring.size,
                producers = ring.waiting_producers,
                consumers = ring.waiting_consumers,
                "sized queue closed"
            );
        }
        self.can_add.notify_all();
        self.can_take.notify_all();
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Producers and consumers currently blocked on the queue
    pub fn num_waiting(&self) -> usize {
        let ring = self.inner.lock();
        ring.waiting_producers + ring.waiting_consumers
    }

    /// Snapshot of the queued items, oldest first
    pub fn contents(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.lock().iter().cloned().collect()
    }

    // ===== Ruby surface =====

    /// `SizedQueue#push(item, non_block)`
    pub fn push(&self, thread: &RubyThread, item: T, non_block: bool) -> RubyResult<()> {
        if non_block {
            return match self.offer(item) {
                Offer::Success => Ok(()),
                Offer::Full(_) => Err(RubyError::thread_error(FULL_QUEUE_MESSAGE)),
                Offer::Closed(_) => {
                    Err(RubyError::ClosedQueueError(CLOSED_QUEUE_MESSAGE.to_string()))
                }
            };
        }
        if self.put(thread, item)? {
            Ok(())
        } else {
            Err(RubyError::ClosedQueueError(CLOSED_QUEUE_MESSAGE.to_string()))
        }
    }

    /// `SizedQueue#pop(non_block)`
    pub fn pop(&self, thread: &RubyThread, non_block: bool) -> RubyResult<Option<T>> {
        if non_block {
            return match self.poll() {
                Some(item) => Ok(Some(item)),
                None => Err(RubyError::thread_error(EMPTY_QUEUE_MESSAGE)),
            };
        }
        Ok(self.take(thread)?.into_option())
    }

    /// `SizedQueue#pop(timeout:)`
    pub fn pop_with_timeout(&self, thread: &RubyThread, timeout: Duration) -> RubyResult<Option<T>> {
        Ok(self.poll_timeout(thread, timeout)?.into_option())
    }

    /// `SizedQueue#marshal_dump`
    pub fn marshal_dump(&self) -> RubyResult<Vec<u8>> {
        Err(RubyError::TypeError("can't dump Thread::SizedQueue".to_string()))
    }
}
