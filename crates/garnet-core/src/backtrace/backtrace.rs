//! Lazily materialized backtraces

use crate::backtrace::{Activation, CallStack, FrameLanguage, Location, NativeFrame, SourceLocation, StackTraceElement};
use crate::defaults::UNKNOWN_SOURCE;
use crate::error::RaisedException;
use once_cell::sync::OnceCell;

#[derive(Debug)]
struct Materialized {
    activations: Vec<Activation>,
    /// Non-ignored elements seen, omitted ones included
    total_underlying_elements: usize,
}

/// A captured call stack.
///
/// Activations are built from the raw elements the first time they are
/// needed and cached from then on; `omitted` is applied during that single
/// pass. [`Backtrace::eager`] forces the pass up front for backtraces whose
/// source will not outlive the capture.
#[derive(Debug)]
pub struct Backtrace {
    elements: Vec<StackTraceElement>,
    omitted: usize,
    limit: Option<usize>,
    exception: Option<RaisedException>,
    native_trace: Option<Vec<NativeFrame>>,
    materialized: OnceCell<Materialized>,
}

impl Backtrace {
    /// Backtrace over raw elements (innermost first), skipping the
    /// innermost `omitted` shown frames
    pub fn lazy(elements: Vec<StackTraceElement>, omitted: usize) -> Self {
        Self {
            elements,
            omitted,
            limit: None,
            exception: None,
            native_trace: None,
            materialized: OnceCell::new(),
        }
    }

    /// Backtrace of a thread's current call stack
    pub fn from_call_stack(stack: &CallStack, omitted: usize) -> Self {
        Self::lazy(stack.snapshot(), omitted)
    }

    /// Placeholder for a backtrace that will never be read
    pub fn omitted_unused() -> Self {
        let backtrace = Self::lazy(Vec::new(), 0);
        let _ = backtrace.materialized.set(Materialized {
            activations: vec![Activation::OmittedUnused],
            total_underlying_elements: 0,
        });
        backtrace
    }

    /// Cap the number of frames; the rest collapse into one
    /// [`Activation::OmittedLimit`] marker
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Attach the exception this backtrace belongs to
    pub fn with_exception(mut self, exception: RaisedException) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Attach the native stack captured alongside
    pub fn with_native_trace(mut self, frames: Vec<NativeFrame>) -> Self {
        self.native_trace = Some(frames);
        self
    }

    /// Materialize now and drop the raw elements
    pub fn eager(mut self) -> Self {
        let _ = self.materialized();
        self.elements = Vec::new();
        self
    }

    fn materialized(&self) -> &Materialized {
        self.materialized
            .get_or_init(|| materialize(&self.elements, self.omitted, self.limit))
    }

    /// Whether activations have been built
    pub fn is_materialized(&self) -> bool {
        self.materialized.get().is_some()
    }

    /// Activations, innermost first
    pub fn activations(&self) -> &[Activation] {
        &self.materialized().activations
    }

    /// Frames skipped at the top
    pub fn omitted(&self) -> usize {
        self.omitted
    }

    /// Non-ignored frames that were available before omission
    pub fn total_underlying_elements(&self) -> usize {
        self.materialized().total_underlying_elements
    }

    /// Owning exception, if any
    pub fn exception(&self) -> Option<&RaisedException> {
        self.exception.as_ref()
    }

    /// Native frames, if captured
    pub fn native_trace(&self) -> Option<&[NativeFrame]> {
        self.native_trace.as_deref()
    }

    /// `caller_locations`-style access.
    ///
    /// `None` when more frames were omitted than existed. A negative
    /// `length` keeps all but the last `|length| - 1` frames.
    pub fn get_backtrace_locations(&self, length: Option<i64>) -> Option<Vec<Location>> {
        let materialized = self.materialized();
        if self.omitted > materialized.total_underlying_elements {
            return None;
        }

        let activations = &materialized.activations;
        let frames: Vec<usize> = (0..activations.len())
            .filter(|&n| activations[n].is_frame())
            .collect();
        let available = frames.len() as i64;
        let count = match length {
            None => available,
            Some(length) if length < 0 => (available + 1 + length).max(0),
            Some(length) => length.min(available),
        } as usize;

        Some(
            frames
                .into_iter()
                .take(count)
                .filter_map(|n| location_of(activations, n))
                .collect(),
        )
    }

    /// All locations (`Exception#backtrace_locations`)
    pub fn locations(&self) -> Vec<Location> {
        self.get_backtrace_locations(None).unwrap_or_default()
    }
}

fn materialize(elements: &[StackTraceElement], omitted: usize, limit: Option<usize>) -> Materialized {
    let mut activations = Vec::new();
    let mut seen = 0;

    for element in elements {
        if element.root.ignored {
            continue;
        }
        seen += 1;
        if seen <= omitted {
            continue;
        }
        if element.root.language == FrameLanguage::Ruby || element.location.is_some() {
            activations.push(Activation::Frame {
                call_site: element.location.clone(),
                method_name: element.root.name.clone(),
                language: element.root.language,
            });
        }
    }

    while activations.last().map_or(false, |last| last.call_site().is_none()) {
        activations.pop();
    }

    if let Some(limit) = limit {
        if activations.len() > limit {
            activations.truncate(limit);
            activations.push(Activation::OmittedLimit);
        }
    }

    Materialized {
        activations,
        total_underlying_elements: seen,
    }
}

/// First non-core call site at or after `n`
pub(crate) fn next_user_location(activations: &[Activation], n: usize) -> Option<&SourceLocation> {
    activations[n..]
        .iter()
        .filter_map(Activation::call_site)
        .find(|location| !location.is_core())
}

/// The location shown for the Ruby frame at `n`.
///
/// Frames without a call site, and core frames unless `include_core_files`,
/// report the next user location instead, falling back to their own.
pub(crate) fn reported_location(
    activations: &[Activation],
    n: usize,
    include_core_files: bool,
) -> Option<&SourceLocation> {
    let own = activations[n].call_site();
    let hidden = own.map_or(true, |location| location.is_core() && !include_core_files);
    if hidden {
        next_user_location(activations, n).or(own)
    } else {
        own
    }
}

fn location_of(activations: &[Activation], n: usize) -> Option<Location> {
    let Activation::Frame { method_name, language, call_site } = &activations[n] else {
        return None;
    };
    let reported = match language {
        FrameLanguage::Ruby => reported_location(activations, n, false),
        FrameLanguage::Foreign | FrameLanguage::Internal => call_site.as_ref(),
    };
    Some(Location {
        path: reported.map_or_else(|| UNKNOWN_SOURCE.to_string(), |l| l.path.to_string()),
        lineno: reported.map_or(0, |l| l.line),
        label: method_name.to_string(),
    })
}
