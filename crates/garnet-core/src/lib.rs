//! Garnet Ruby runtime core
//!
//! This crate provides the concurrent core of the runtime:
//! - Ruby threads, safepoints and the interrupt-aware blocking runner
//! - `Mutex` and `ConditionVariable`
//! - `Thread::Queue` and `Thread::SizedQueue`
//! - Object ids, finalizers, allocation tracing and weak maps
//! - Backtrace capture and formatting

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backtrace;
pub mod defaults;
pub mod error;
pub mod objectspace;
pub mod options;
pub mod queue;
pub mod runtime;
pub mod sync;
pub mod thread;
pub mod value;

pub use backtrace::{Backtrace, BacktraceFormatter, BacktraceInterleaver, CallStack, Location};
pub use error::{fatal, Interrupted, RaisedException, RubyError, RubyResult};
pub use objectspace::{ObjectId, ObjectSpaceManager, WeakKeyMap, WeakMap};
pub use options::{OptionsError, RuntimeOptions};
pub use queue::{Offer, Polled, SizedQueue, Taken, UnsizedQueue};
pub use runtime::Runtime;
pub use sync::{ConditionVariable, Mutex, MutexGuard, MutexOperations, WaitOutcome};
pub use thread::{RubyThread, SafepointManager, ThreadId, ThreadManager, ThreadStatus};
pub use value::{ObjectRef, RObject, Symbol, Value};
