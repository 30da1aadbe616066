//! Backtraces: call-stack recording, lazy materialization and rendering
//!
//! Threads record frames on their [`CallStack`]. A [`Backtrace`] snapshots
//! those frames and filters them into [`Activation`]s on first use;
//! [`BacktraceFormatter`] renders the result as `path:line:in 'method'`
//! lines, optionally interleaved with native frames by
//! [`BacktraceInterleaver`].

mod activation;
#[allow(clippy::module_inception)]
mod backtrace;
mod call_stack;
mod formatter;
mod interleaver;

pub use activation::{Activation, Location};
pub use backtrace::Backtrace;
pub use call_stack::{CallStack, FrameGuard, FrameLanguage, RootInfo, SourceLocation, StackTraceElement};
pub use formatter::{BacktraceFormatter, FormattingFlags, PathResolver};
pub use interleaver::{BacktraceInterleaver, NativeFrame};
