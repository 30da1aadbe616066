//! Merging Ruby backtrace lines with the native stack

use crate::defaults::NATIVE_FRAME_PREFIX;
use std::fmt;

/// One frame of the host's native stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFrame {
    /// Function symbol
    pub symbol: String,
    /// Source file, if known
    pub file: Option<String>,
    /// Source line, if known
    pub line: Option<u32>,
    /// Whether this frame is where the interpreter calls into a guest frame
    pub call_boundary: bool,
}

impl NativeFrame {
    /// A frame with no source information
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            file: None,
            line: None,
            call_boundary: false,
        }
    }

    /// Attach a source position
    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Mark as a guest call boundary
    pub fn boundary(mut self) -> Self {
        self.call_boundary = true;
        self
    }
}

impl fmt::Display for NativeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{} ({}:{})", self.symbol, file, line),
            (Some(file), None) => write!(f, "{} ({})", self.symbol, file),
            _ => write!(f, "{}", self.symbol),
        }
    }
}

/// Interleaves formatted Ruby lines with native frames
pub struct BacktraceInterleaver;

impl BacktraceInterleaver {
    /// Walk the native frames innermost first; each Ruby line is emitted
    /// before the native frames up to and including the next call boundary.
    /// Ruby lines left over once the native stack runs out are appended.
    pub fn interleave(ruby_lines: &[String], native: &[NativeFrame]) -> Vec<String> {
        let mut out = Vec::with_capacity(ruby_lines.len() + native.len());
        let mut ruby = ruby_lines.iter();

        if let Some(first) = ruby.next() {
            out.push(first.clone());
        }
        for frame in native {
            out.push(format!("{}{}", NATIVE_FRAME_PREFIX, frame));
            if frame.call_boundary {
                if let Some(line) = ruby.next() {
                    out.push(line.clone());
                }
            }
        }
        out.extend(ruby.cloned());
        out
    }
}
