//! Default constants for runtime configuration.
//!
//! Centralizes magic numbers shared by the blocking primitives, the object
//! space and the backtrace formatter.

/// Default slice length, in milliseconds, for interruptible blocking waits.
/// A blocked thread notices interrupts at least this often.
pub const DEFAULT_BLOCKING_POLL_INTERVAL_MS: u64 = 10;

/// Whether core library frames are hidden from rendered backtraces by default.
pub const DEFAULT_BACKTRACES_HIDE_CORE_FILES: bool = true;

/// Whether native host frames are interleaved into rendered backtraces by default.
pub const DEFAULT_BACKTRACES_INTERLEAVE_NATIVE: bool = false;

/// Whether a backtrace captured for an unused rescue renders as a single marker line.
pub const DEFAULT_BACKTRACES_OMIT_UNUSED: bool = true;

/// Object id of `false`.
pub const FALSE_OBJECT_ID: i64 = 0;

/// Object id of `nil`.
pub const NIL_OBJECT_ID: i64 = 8;

/// Object id of `true`.
pub const TRUE_OBJECT_ID: i64 = 20;

/// The object-id counter starts here; the first heap id handed out is
/// `OBJECT_ID_OFFSET + OBJECT_ID_STRIDE`.
pub const OBJECT_ID_OFFSET: u64 = 8;

/// Distance between consecutive heap object ids. Keeps heap ids even and
/// away from the small-integer encoding.
pub const OBJECT_ID_STRIDE: u64 = 16;

/// Smallest fixnum whose object id is `2n + 1`.
pub const SMALL_FIXNUM_MIN: i64 = -(1 << 62);

/// One past the largest fixnum whose object id is `2n + 1`.
pub const SMALL_FIXNUM_MAX: i64 = 1 << 62;

/// Path prefix identifying core library sources.
pub const CORE_FILE_PREFIX: &str = "<internal:";

/// Rendered in place of an unknown source location.
pub const UNKNOWN_SOURCE: &str = "???";

/// Rendered when there is no backtrace at all.
pub const EMPTY_BACKTRACE: &str = "<empty backtrace>";

/// Rendered in place of activations cut off by the backtrace limit.
pub const BACKTRACE_OMITTED_LIMIT: &str = "(omitted due to backtraces limit)";

/// Rendered in place of a backtrace captured for a rescue that never used it.
pub const BACKTRACE_OMITTED_UNUSED: &str = "(omitted as the rescue expression was pure)";

/// Prefix for every rendered backtrace line after the first.
pub const FROM_PREFIX: &str = "\tfrom ";

/// Prefix for native host frames when interleaving.
pub const NATIVE_FRAME_PREFIX: &str = "\t\t";
