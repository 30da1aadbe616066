//! Per-thread call-stack recording
//!
//! The interpreter pushes one [`StackTraceElement`] per active frame and
//! updates the top frame's call site as it executes. Backtraces are built
//! from snapshots of this stack.

use crate::defaults::CORE_FILE_PREFIX;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Language a frame's root belongs to
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameLanguage {
    /// Ruby code (user or core library)
    Ruby,
    /// Code from another guest language
    Foreign,
    /// Runtime-internal frames with no guest source
    Internal,
}

/// The method or block a frame executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInfo {
    /// Name reported in backtraces
    pub name: Arc<str>,
    /// Language of the root
    pub language: FrameLanguage,
    /// Frames the backtrace builder skips entirely
    pub ignored: bool,
}

impl RootInfo {
    /// A Ruby method or block
    pub fn ruby(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            language: FrameLanguage::Ruby,
            ignored: false,
        }
    }

    /// A foreign-language root
    pub fn foreign(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            language: FrameLanguage::Foreign,
            ignored: false,
        }
    }

    /// A runtime-internal root
    pub fn internal(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            language: FrameLanguage::Internal,
            ignored: false,
        }
    }

    /// Mark the root as never shown
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }
}

/// A file and line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    /// Source path as loaded
    pub path: Arc<str>,
    /// 1-based line
    pub line: u32,
}

impl SourceLocation {
    /// Create a location
    pub fn new(path: &str, line: u32) -> Self {
        Self {
            path: Arc::from(path),
            line,
        }
    }

    /// Whether this location is inside the core library
    pub fn is_core(&self) -> bool {
        self.path.starts_with(CORE_FILE_PREFIX)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.line)
    }
}

/// One recorded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTraceElement {
    /// What the frame executes
    pub root: RootInfo,
    /// Where the frame currently is, if known
    pub location: Option<SourceLocation>,
}

impl StackTraceElement {
    /// Create an element
    pub fn new(root: RootInfo, location: Option<SourceLocation>) -> Self {
        Self { root, location }
    }
}

/// Stack of active frames for one thread
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Mutex<Vec<StackTraceElement>>,
}

impl CallStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame; it is popped when the guard drops
    pub fn push_frame(&self, element: StackTraceElement) -> FrameGuard<'_> {
        let mut frames = self.frames.lock();
        frames.push(element);
        FrameGuard {
            stack: self,
            depth: frames.len(),
        }
    }

    /// Update the call site of the innermost frame
    pub fn set_location(&self, location: SourceLocation) {
        if let Some(top) = self.frames.lock().last_mut() {
            top.location = Some(location);
        }
    }

    /// Number of active frames
    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    /// Copy of the active frames, innermost first
    pub fn snapshot(&self) -> Vec<StackTraceElement> {
        self.frames.lock().iter().rev().cloned().collect()
    }

    fn truncate(&self, depth: usize) {
        self.frames.lock().truncate(depth);
    }
}

/// Pops a frame pushed by [`CallStack::push_frame`]
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard<'a> {
    stack: &'a CallStack,
    depth: usize,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        // Also drops any frames an unwinding callee left behind
        self.stack.truncate(self.depth - 1);
    }
}
