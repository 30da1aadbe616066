//! The runtime context tying the core services together

use crate::backtrace::{Backtrace, BacktraceFormatter};
use crate::objectspace::ObjectSpaceManager;
use crate::options::{OptionsError, RuntimeOptions};
use crate::thread::{RubyThread, SafepointManager, SharedSafepointAction, ThreadManager};
use std::sync::Arc;

/// One Ruby runtime: its options, threads, safepoints and object space
pub struct Runtime {
    options: RuntimeOptions,
    safepoints: Arc<SafepointManager>,
    threads: Arc<ThreadManager>,
    object_space: ObjectSpaceManager,
    formatter: BacktraceFormatter,
}

impl Runtime {
    /// Create a runtime with validated options
    pub fn new(options: RuntimeOptions) -> Result<Arc<Self>, OptionsError> {
        options.validate()?;
        Ok(Arc::new(Self::build(options)))
    }

    /// Runtime with default options
    pub fn with_defaults() -> Arc<Self> {
        Arc::new(Self::build(RuntimeOptions::default()))
    }

    fn build(options: RuntimeOptions) -> Self {
        let safepoints = Arc::new(SafepointManager::new());
        let threads = Arc::new(ThreadManager::new(
            safepoints.clone(),
            options.blocking_poll_interval(),
        ));
        tracing::debug!(
            poll_interval_ms = options.blocking_poll_interval_ms,
            backtraces_limit = ?options.backtraces_limit,
            "runtime created"
        );
        Self {
            formatter: BacktraceFormatter::from_options(&options),
            options,
            safepoints,
            threads,
            object_space: ObjectSpaceManager::new(),
        }
    }

    /// Options in effect
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Thread registry
    pub fn threads(&self) -> &Arc<ThreadManager> {
        &self.threads
    }

    /// Safepoint manager
    pub fn safepoints(&self) -> &Arc<SafepointManager> {
        &self.safepoints
    }

    /// Object ids, finalizers and allocation tracing
    pub fn object_space(&self) -> &ObjectSpaceManager {
        &self.object_space
    }

    /// Default backtrace formatter
    pub fn formatter(&self) -> &BacktraceFormatter {
        &self.formatter
    }

    /// Capture the thread's backtrace, honouring the backtraces limit
    pub fn backtrace(&self, thread: &RubyThread, omitted: usize) -> Backtrace {
        Backtrace::from_call_stack(thread.call_stack(), omitted).with_limit(self.options.backtraces_limit)
    }

    /// Backtrace for an exception about to be rescued. A rescue that never
    /// looks at the exception gets a placeholder when `backtraces_omit_unused`
    /// is on.
    pub fn rescue_backtrace(&self, thread: &RubyThread, omitted: usize, rescue_is_pure: bool) -> Backtrace {
        if rescue_is_pure && self.options.backtraces_omit_unused {
            Backtrace::omitted_unused()
        } else {
            self.backtrace(thread, omitted)
        }
    }

    /// Run `action` on every live thread at its next safepoint
    pub fn pause_all_and_execute(&self, action: SharedSafepointAction) {
        let threads = self.threads.list();
        self.safepoints.pause_all_and_execute(&threads, action);
    }

    /// Sweep collected objects and run their finalizers
    pub fn garbage_collect(&self) -> usize {
        self.object_space.garbage_collect()
    }

    /// Run every remaining finalizer (process exit)
    pub fn shutdown(&self) -> usize {
        let ran = self.object_space.run_all_finalizers();
        tracing::debug!(finalizers = ran, "runtime shut down");
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtrace::{Activation, RootInfo, SourceLocation, StackTraceElement};

    #[test]
    fn test_rejects_invalid_options() {
        let options = RuntimeOptions {
            blocking_poll_interval_ms: 0,
            ..RuntimeOptions::default()
        };
        assert!(Runtime::new(options).is_err());
    }

    #[test]
    fn test_backtrace_limit_from_options() {
        let runtime = Runtime::new(RuntimeOptions {
            backtraces_limit: Some(1),
            ..RuntimeOptions::default()
        })
        .unwrap();
        let thread = runtime.threads().create_thread(Some("main"));
        let _outer = thread.call_stack().push_frame(StackTraceElement::new(
            RootInfo::ruby("<main>"),
            Some(SourceLocation::new("app.rb", 1)),
        ));
        let _inner = thread.call_stack().push_frame(StackTraceElement::new(
            RootInfo::ruby("work"),
            Some(SourceLocation::new("app.rb", 4)),
        ));

        let backtrace = runtime.backtrace(&thread, 0);
        assert_eq!(backtrace.activations().len(), 2);
        assert_eq!(backtrace.activations()[1], Activation::OmittedLimit);
    }

    #[test]
    fn test_rescue_backtrace_omits_when_pure() {
        let runtime = Runtime::with_defaults();
        let thread = runtime.threads().create_thread(None);
        let backtrace = runtime.rescue_backtrace(&thread, 0, true);
        assert_eq!(backtrace.activations(), &[Activation::OmittedUnused]);

        let runtime = Runtime::new(RuntimeOptions {
            backtraces_omit_unused: false,
            ..RuntimeOptions::default()
        })
        .unwrap();
        let thread = runtime.threads().create_thread(None);
        assert!(runtime.rescue_backtrace(&thread, 0, true).activations().is_empty());
    }

    #[test]
    fn test_pause_all_reaches_threads() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let runtime = Runtime::with_defaults();
        let a = runtime.threads().create_thread(Some("a"));
        let b = runtime.threads().create_thread(Some("b"));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        runtime.pause_all_and_execute(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        a.poll_safepoint().unwrap();
        b.poll_safepoint().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
