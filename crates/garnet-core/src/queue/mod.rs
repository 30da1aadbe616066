//! Blocking FIFO queues (`Thread::Queue`, `Thread::SizedQueue`)
//!
//! Both queues are closable: once closed, adds fail and takes drain the
//! remaining items before reporting [`Taken::Closed`]. Blocking calls go
//! through the blocking runner and wait in poll-interval slices.

mod sized_queue;
mod unsized_queue;

pub use sized_queue::SizedQueue;
pub use unsized_queue::UnsizedQueue;

/// Result of a blocking take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Taken<T> {
    /// The next item
    Item(T),
    /// The queue is closed and drained
    Closed,
}

impl<T> Taken<T> {
    /// The item, or `None` for the closed sentinel
    pub fn into_option(self) -> Option<T> {
        match self {
            Taken::Item(item) => Some(item),
            Taken::Closed => None,
        }
    }
}

/// Result of a take with a timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled<T> {
    /// The next item
    Item(T),
    /// The queue is closed and drained
    Closed,
    /// Nothing arrived before the deadline
    TimedOut,
}

impl<T> Polled<T> {
    /// The item, if one was taken
    pub fn into_option(self) -> Option<T> {
        match self {
            Polled::Item(item) => Some(item),
            Polled::Closed | Polled::TimedOut => None,
        }
    }
}

impl<T> From<Option<Taken<T>>> for Polled<T> {
    fn from(taken: Option<Taken<T>>) -> Self {
        match taken {
            Some(Taken::Item(item)) => Polled::Item(item),
            Some(Taken::Closed) => Polled::Closed,
            None => Polled::TimedOut,
        }
    }
}

/// Result of a non-blocking add. A rejected item is handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer<T> {
    /// The item was enqueued
    Success,
    /// The queue is at capacity
    Full(T),
    /// The queue is closed
    Closed(T),
}

pub(crate) const CLOSED_QUEUE_MESSAGE: &str = "queue closed";
pub(crate) const EMPTY_QUEUE_MESSAGE: &str = "queue empty";
pub(crate) const FULL_QUEUE_MESSAGE: &str = "queue full";
