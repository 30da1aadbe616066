//! Textual rendering of backtraces

use crate::backtrace::backtrace::reported_location;
use crate::backtrace::{Activation, Backtrace, BacktraceInterleaver, FrameLanguage, SourceLocation};
use crate::defaults::*;
use crate::error::{RaisedException, RubyResult};
use crate::options::RuntimeOptions;
use crate::thread::RubyThread;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Turns a source location into the path shown to the user
pub type PathResolver = Arc<dyn Fn(&SourceLocation) -> RubyResult<String> + Send + Sync>;

/// Formatting switches
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FormattingFlags {
    /// Don't append the exception to the first line
    pub omit_exception: bool,
    /// Don't prefix later lines with `\tfrom `
    pub omit_from_prefix: bool,
    /// Show core-library locations as-is
    pub include_core_files: bool,
    /// Interleave the native stack when one was captured
    pub interleave_native: bool,
}

/// Renders backtraces the way `Exception#full_message` does
#[derive(Clone)]
pub struct BacktraceFormatter {
    flags: FormattingFlags,
    resolve_path: Option<PathResolver>,
}

impl BacktraceFormatter {
    /// Formatter with explicit flags
    pub fn new(flags: FormattingFlags) -> Self {
        Self {
            flags,
            resolve_path: None,
        }
    }

    /// Default formatter for the runtime's options
    pub fn from_options(options: &RuntimeOptions) -> Self {
        Self::new(FormattingFlags {
            include_core_files: !options.backtraces_hide_core_files,
            interleave_native: options.backtraces_interleave_native,
            ..FormattingFlags::default()
        })
    }

    /// Use a custom path resolver (e.g. to relativize paths)
    pub fn with_path_resolver(mut self, resolver: PathResolver) -> Self {
        self.resolve_path = Some(resolver);
        self
    }

    /// Active flags
    pub fn flags(&self) -> FormattingFlags {
        self.flags
    }

    /// Format every line of `backtrace`. Never fails: a line that cannot be
    /// formatted is replaced by a placeholder.
    pub fn format_backtrace(&self, exception: Option<&RaisedException>, backtrace: &Backtrace) -> Vec<String> {
        let activations = backtrace.activations();

        if activations.is_empty() && !self.flags.omit_exception {
            if let Some(exception) = exception {
                return vec![Self::format_exception(exception)];
            }
        }

        let mut lines = Vec::with_capacity(activations.len());
        for n in 0..activations.len() {
            let formatted = panic::catch_unwind(AssertUnwindSafe(|| self.format_line(activations, n, exception)));
            let line = match formatted {
                Ok(Ok(line)) => line,
                Ok(Err(err)) => placeholder(err.class_name(), err.message()),
                Err(payload) => placeholder("fatal", &panic_message(payload.as_ref())),
            };
            lines.push(line);
        }

        match backtrace.native_trace() {
            Some(native) if self.flags.interleave_native => BacktraceInterleaver::interleave(&lines, native),
            _ => lines,
        }
    }

    /// Format the thread's current stack
    pub fn format_current(&self, exception: Option<&RaisedException>, thread: &RubyThread) -> Vec<String> {
        self.format_backtrace(exception, &Backtrace::from_call_stack(thread.call_stack(), 0))
    }

    /// Format the line for activation `n`
    pub fn format_line(
        &self,
        activations: &[Activation],
        n: usize,
        exception: Option<&RaisedException>,
    ) -> RubyResult<String> {
        let (call_site, method_name, language) = match &activations[n] {
            Activation::OmittedLimit => return Ok(BACKTRACE_OMITTED_LIMIT.to_string()),
            Activation::OmittedUnused => return Ok(BACKTRACE_OMITTED_UNUSED.to_string()),
            Activation::Frame {
                call_site,
                method_name,
                language,
            } => (call_site.as_ref(), method_name, *language),
        };

        let mut line = String::new();
        if !self.flags.omit_from_prefix && n > 0 {
            line.push_str(FROM_PREFIX);
        }

        if language == FrameLanguage::Ruby {
            match reported_location(activations, n, self.flags.include_core_files) {
                Some(location) => {
                    line.push_str(&self.path_of(location)?);
                    line.push(':');
                    line.push_str(&location.line.to_string());
                }
                None => line.push_str(UNKNOWN_SOURCE),
            }
            line.push_str(&format!(":in '{}'", method_name));
        } else {
            line.push_str(&self.format_foreign(call_site, method_name)?);
        }

        if !self.flags.omit_exception && n == 0 {
            if let Some(exception) = exception {
                line.push_str(": ");
                line.push_str(&Self::format_exception(exception));
            }
        }

        Ok(line)
    }

    fn format_foreign(&self, call_site: Option<&SourceLocation>, name: &str) -> RubyResult<String> {
        let Some(location) = call_site else {
            return Ok(if name.is_empty() { UNKNOWN_SOURCE.to_string() } else { name.to_string() });
        };
        let mut out = format!("{}:{}", self.path_of(location)?, location.line);
        if !name.is_empty() {
            out.push_str(&format!(":in '{}'", name));
        }
        Ok(out)
    }

    fn path_of(&self, location: &SourceLocation) -> RubyResult<String> {
        match &self.resolve_path {
            Some(resolve) => resolve(location),
            None => Ok(location.path.to_string()),
        }
    }

    /// `"message (Class)"`, with the class after the first line of a
    /// multi-line message
    pub fn format_exception(exception: &RaisedException) -> String {
        let message = &exception.message;
        if message.is_empty() {
            return exception.class_name.clone();
        }
        match message.find('\n') {
            Some(first_newline) => format!(
                "{} ({}){}",
                &message[..first_newline],
                exception.class_name,
                &message[first_newline..]
            ),
            None => format!("{} ({})", message, exception.class_name),
        }
    }

    /// Debug helper: the thread's current stack with core files shown, one
    /// frame per line
    pub fn printable_backtrace(thread: &RubyThread) -> String {
        let formatter = Self::new(FormattingFlags {
            include_core_files: true,
            ..FormattingFlags::default()
        });
        let lines = formatter.format_current(None, thread);
        if lines.is_empty() {
            EMPTY_BACKTRACE.to_string()
        } else {
            lines.join("\n")
        }
    }
}

impl Default for BacktraceFormatter {
    fn default() -> Self {
        Self::from_options(&RuntimeOptions::default())
    }
}

fn placeholder(class_name: &str, message: &str) -> String {
    tracing::debug!(error_class = class_name, error = message, "backtrace line failed to format");
    format!("(exception {} {} while formatting frame)", class_name, message)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
