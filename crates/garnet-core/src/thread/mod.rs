//! Ruby threads and the host services they rely on
//!
//! Each Ruby thread is backed by one OS thread. Blocking primitives never
//! block the OS thread unconditionally: they run through
//! [`RubyThread::run_until_result`], which re-enters the blocking call after
//! running any safepoint actions delivered while the thread was parked.

mod blocking;
mod manager;
mod ruby_thread;
mod safepoint;

pub(crate) use blocking::deadline_after;
pub use manager::{RubyThreadHandle, ThreadManager};
pub use ruby_thread::{RubyThread, ThreadId, ThreadStatus};
pub use safepoint::{SafepointAction, SafepointManager, SafepointStats, SharedSafepointAction};
