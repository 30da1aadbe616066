//! Thread registry and current-thread accessor

use crate::error::{RaisedException, RubyError, RubyResult};
use crate::thread::{RubyThread, SafepointManager, ThreadId};
use dashmap::DashMap;
use std::cell::RefCell;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

thread_local! {
    static CURRENT_THREAD: RefCell<Option<Arc<RubyThread>>> = const { RefCell::new(None) };
}

/// Handle to a spawned Ruby thread
pub struct RubyThreadHandle<R> {
    thread: Arc<RubyThread>,
    join: JoinHandle<RubyResult<R>>,
}

impl<R> RubyThreadHandle<R> {
    /// The Ruby thread
    pub fn thread(&self) -> &Arc<RubyThread> {
        &self.thread
    }

    /// `Thread#value`: wait for the thread and return its result. A panic in
    /// the thread body is re-raised as a `fatal` exception.
    pub fn join(self) -> RubyResult<R> {
        match self.join.join() {
            Ok(result) => result,
            Err(_) => Err(RubyError::raised("fatal", "thread body panicked")),
        }
    }
}

/// Registry of live Ruby threads
pub struct ThreadManager {
    threads: DashMap<ThreadId, Arc<RubyThread>>,
    safepoints: Arc<SafepointManager>,
    poll_interval: Duration,
}

impl ThreadManager {
    /// Create a new ThreadManager
    pub fn new(safepoints: Arc<SafepointManager>, poll_interval: Duration) -> Self {
        Self {
            threads: DashMap::new(),
            safepoints,
            poll_interval,
        }
    }

    /// The safepoint manager shared by all threads
    pub fn safepoints(&self) -> &Arc<SafepointManager> {
        &self.safepoints
    }

    /// Create and register a thread record without binding it to an OS thread
    pub fn create_thread(&self, name: Option<&str>) -> Arc<RubyThread> {
        let thread = RubyThread::new(
            name.map(str::to_string),
            self.safepoints.clone(),
            self.poll_interval,
        );
        self.threads.insert(thread.id(), thread.clone());
        thread
    }

    /// Bind a new Ruby thread to the calling OS thread
    pub fn attach_current(&self, name: Option<&str>) -> Arc<RubyThread> {
        let thread = self.create_thread(name);
        CURRENT_THREAD.with(|current| *current.borrow_mut() = Some(thread.clone()));
        thread
    }

    /// The Ruby thread bound to the calling OS thread
    pub fn current() -> Option<Arc<RubyThread>> {
        CURRENT_THREAD.with(|current| current.borrow().clone())
    }

    /// Terminate the current OS thread's Ruby thread
    pub fn detach_current(&self) {
        if let Some(thread) = CURRENT_THREAD.with(|current| current.borrow_mut().take()) {
            self.finish_thread(&thread);
        }
    }

    /// `Thread.new`: run `body` on a new OS thread bound to a new Ruby thread
    pub fn spawn<R, F>(self: &Arc<Self>, name: Option<&str>, body: F) -> std::io::Result<RubyThreadHandle<R>>
    where
        R: Send + 'static,
        F: FnOnce(&Arc<RubyThread>) -> RubyResult<R> + Send + 'static,
    {
        let thread = self.create_thread(name);
        let manager = self.clone();
        let worker = thread.clone();

        let mut builder = std::thread::Builder::new();
        if let Some(name) = name {
            builder = builder.name(name.to_string());
        }
        let spawned = builder.spawn(move || {
            CURRENT_THREAD.with(|current| *current.borrow_mut() = Some(worker.clone()));
            let exit = ThreadExit { manager, thread: worker };
            let result = body(&exit.thread);
            if let Err(err) = &result {
                tracing::debug!(thread = exit.thread.id().as_u64(), error = %err, "thread terminated with exception");
            }
            drop(exit);
            result
        });

        match spawned {
            Ok(join) => Ok(RubyThreadHandle { thread, join }),
            Err(err) => {
                self.finish_thread(&thread);
                Err(err)
            }
        }
    }

    /// Mark a thread dead, release the locks it still holds and deregister it
    fn finish_thread(&self, thread: &RubyThread) {
        thread.mark_dead();
        thread.release_owned_locks();
        self.threads.remove(&thread.id());
    }

    /// Look up a live thread
    pub fn get(&self, id: ThreadId) -> Option<Arc<RubyThread>> {
        self.threads.get(&id).map(|entry| entry.value().clone())
    }

    /// `Thread.list`
    pub fn list(&self) -> Vec<Arc<RubyThread>> {
        self.threads.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of live threads
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether no threads are registered
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// `Thread#wakeup`
    pub fn wakeup(&self, thread: &RubyThread) -> RubyResult<()> {
        if !thread.is_alive() {
            return Err(RubyError::thread_error("killed thread"));
        }
        thread.wakeup();
        Ok(())
    }

    /// `Thread#raise`: deliver `exception` at the target's next safepoint
    pub fn raise_in(&self, thread: &RubyThread, exception: RaisedException) {
        if !thread.is_alive() {
            return;
        }
        self.safepoints
            .submit(thread, Box::new(move |_| Err(RubyError::Raised(exception))));
    }

    /// `Thread#kill`
    pub fn kill(&self, thread: &RubyThread) {
        if !thread.is_alive() {
            return;
        }
        self.safepoints.submit(thread, Box::new(|_| Err(RubyError::Killed)));
    }
}

/// Finishes a spawned thread when its body returns or unwinds
struct ThreadExit {
    manager: Arc<ThreadManager>,
    thread: Arc<RubyThread>,
}

impl Drop for ThreadExit {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::debug!(thread = self.thread.id().as_u64(), "thread body panicked");
        }
        let _ = CURRENT_THREAD.try_with(|current| current.borrow_mut().take());
        self.manager.finish_thread(&self.thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadStatus;

    fn manager() -> Arc<ThreadManager> {
        Arc::new(ThreadManager::new(
            Arc::new(SafepointManager::new()),
            Duration::from_millis(5),
        ))
    }

    #[test]
    fn test_attach_and_detach_current() {
        let manager = manager();
        let thread = manager.attach_current(Some("main"));

        let current = ThreadManager::current().unwrap();
        assert!(Arc::ptr_eq(&current, &thread));
        assert_eq!(current.name(), Some("main"));
        assert_eq!(manager.len(), 1);

        manager.detach_current();
        assert!(ThreadManager::current().is_none());
        assert_eq!(thread.status(), ThreadStatus::Dead);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_spawn_returns_value() {
        let manager = manager();
        let handle = manager
            .spawn(Some("worker"), |thread| {
                let current = ThreadManager::current().unwrap();
                assert_eq!(current.id(), thread.id());
                Ok(42)
            })
            .unwrap();
        let thread = handle.thread().clone();
        assert_eq!(handle.join(), Ok(42));
        assert!(!thread.is_alive());
        assert!(manager.get(thread.id()).is_none());
    }

    #[test]
    fn test_raise_in_sleeping_thread() {
        let manager = manager();
        let handle = manager.spawn(None, |thread| thread.sleep(None)).unwrap();

        while handle.thread().status() != ThreadStatus::Sleep {
            std::thread::yield_now();
        }
        manager.raise_in(handle.thread(), RaisedException::new("RuntimeError", "stop"));

        assert_eq!(handle.join(), Err(RubyError::raised("RuntimeError", "stop")));
    }

    #[test]
    fn test_kill_sleeping_thread() {
        let manager = manager();
        let handle = manager.spawn(None, |thread| thread.sleep(None)).unwrap();

        while handle.thread().status() != ThreadStatus::Sleep {
            std::thread::yield_now();
        }
        manager.kill(handle.thread());
        assert_eq!(handle.join(), Err(RubyError::Killed));
    }

    #[test]
    fn test_panicking_thread_releases_locks_and_deregisters() {
        let manager = manager();
        let mutex = Arc::new(crate::sync::Mutex::new());

        let worker_mutex = mutex.clone();
        let handle = manager
            .spawn(Some("panicking"), move |thread| -> RubyResult<()> {
                worker_mutex.lock(thread)?;
                panic!("body failed while holding the mutex");
            })
            .unwrap();
        let thread = handle.thread().clone();

        assert_eq!(handle.join(), Err(RubyError::raised("fatal", "thread body panicked")));
        assert!(!thread.is_alive());
        assert!(manager.get(thread.id()).is_none());
        assert!(!mutex.is_locked());

        let other = manager.create_thread(None);
        assert!(mutex.try_lock(&other));
    }

    #[test]
    fn test_wakeup_dead_thread() {
        let manager = manager();
        let handle = manager.spawn(None, |_| Ok(())).unwrap();
        let thread = handle.thread().clone();
        handle.join().unwrap();

        assert_eq!(
            manager.wakeup(&thread),
            Err(RubyError::thread_error("killed thread"))
        );
    }
}
