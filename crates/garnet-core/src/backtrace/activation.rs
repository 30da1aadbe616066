//! Backtrace activations and `Thread::Backtrace::Location`

use crate::backtrace::{FrameLanguage, SourceLocation};
use std::fmt;
use std::sync::Arc;

/// One entry of a materialized backtrace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// A real frame
    Frame {
        /// Where the frame was when the backtrace was captured
        call_site: Option<SourceLocation>,
        /// Method or block name
        method_name: Arc<str>,
        /// Language of the frame's root
        language: FrameLanguage,
    },
    /// Marks frames dropped by the backtraces limit
    OmittedLimit,
    /// Stands in for a backtrace nobody will read
    OmittedUnused,
}

impl Activation {
    /// The call site, for real frames
    pub fn call_site(&self) -> Option<&SourceLocation> {
        match self {
            Activation::Frame { call_site, .. } => call_site.as_ref(),
            _ => None,
        }
    }

    /// Whether this is a real frame
    pub fn is_frame(&self) -> bool {
        matches!(self, Activation::Frame { .. })
    }
}

/// `Thread::Backtrace::Location`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// `#path`
    pub path: String,
    /// `#lineno` (0 when unknown)
    pub lineno: u32,
    /// `#label`
    pub label: String,
}

impl fmt::Display for Location {
    /// `#to_s`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lineno == 0 {
            write!(f, "{}:in '{}'", self.path, self.label)
        } else {
            write!(f, "{}:{}:in '{}'", self.path, self.lineno, self.label)
        }
    }
}
