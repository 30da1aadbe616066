//! Integration tests for ConditionVariable signal credits
//!
//! # Running Tests
//! ```bash
//! cargo test --test condvar_integration
//! ```

use garnet_core::thread::{SafepointManager, ThreadManager};
use garnet_core::{ConditionVariable, Mutex, WaitOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn manager() -> Arc<ThreadManager> {
    Arc::new(ThreadManager::new(
        Arc::new(SafepointManager::new()),
        Duration::from_millis(5),
    ))
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

struct Shared {
    mutex: Mutex,
    cond: ConditionVariable,
    woken: AtomicUsize,
}

fn shared() -> Arc<Shared> {
    Arc::new(Shared {
        mutex: Mutex::new(),
        cond: ConditionVariable::new(),
        woken: AtomicUsize::new(0),
    })
}

#[test]
fn test_n_signals_wake_exactly_n_waiters() {
    const WAITERS: usize = 4;
    let threads = manager();
    let state = shared();

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let state = state.clone();
            threads
                .spawn(None, move |t| {
                    state.mutex.lock(t)?;
                    let outcome = state.cond.wait(t, &state.mutex, None)?;
                    state.woken.fetch_add(1, Ordering::SeqCst);
                    state.mutex.unlock(t)?;
                    Ok(outcome)
                })
                .unwrap()
        })
        .collect();

    wait_until(|| state.cond.waiters() == WAITERS as u32);

    for signaled in 1..=WAITERS {
        state.cond.signal();
        wait_until(|| state.woken.load(Ordering::SeqCst) == signaled);
        // No extra waiter slips through
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(state.woken.load(Ordering::SeqCst), signaled);
    }

    for handle in handles {
        assert_eq!(handle.join().unwrap(), WaitOutcome::Signaled);
    }
    assert_eq!(state.cond.pending_signals(), 0);
    assert_eq!(state.cond.waiters(), 0);
}

#[test]
fn test_broadcast_wakes_registered_waiters_only() {
    const WAITERS: usize = 3;
    let threads = manager();
    let state = shared();

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let state = state.clone();
            threads
                .spawn(None, move |t| {
                    state.mutex.synchronize(t, || state.cond.wait(t, &state.mutex, None))
                })
                .unwrap()
        })
        .collect();

    wait_until(|| state.cond.waiters() == WAITERS as u32);
    state.cond.broadcast();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), WaitOutcome::Signaled);
    }
    assert_eq!(state.cond.pending_signals(), 0);

    // A waiter arriving after the broadcast gets nothing
    let late = state.clone();
    let fresh = threads
        .spawn(None, move |t| {
            late.mutex
                .synchronize(t, || late.cond.wait(t, &late.mutex, Some(Duration::from_millis(50))))
        })
        .unwrap();
    assert_eq!(fresh.join().unwrap(), WaitOutcome::TimedOut);
}

#[test]
fn test_signal_without_waiters_is_dropped() {
    let threads = manager();
    let state = shared();
    state.cond.signal();
    state.cond.broadcast();
    assert_eq!(state.cond.pending_signals(), 0);

    let t = threads.create_thread(None);
    state.mutex.lock(&t).unwrap();
    let outcome = state
        .cond
        .wait(&t, &state.mutex, Some(Duration::from_millis(20)))
        .unwrap();
    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert!(state.mutex.is_owned(&t));
}

#[test]
fn test_wakeup_ends_wait() {
    let threads = manager();
    let state = shared();

    let s = state.clone();
    let waiter = threads
        .spawn(None, move |t| s.mutex.synchronize(t, || s.cond.wait(t, &s.mutex, None)))
        .unwrap();
    wait_until(|| state.cond.waiters() == 1);

    threads.wakeup(waiter.thread()).unwrap();
    assert_eq!(waiter.join().unwrap(), WaitOutcome::Woken);
    assert_eq!(state.cond.waiters(), 0);
}

#[test]
fn test_raise_during_wait_reacquires_mutex() {
    let threads = manager();
    let state = shared();

    let s = state.clone();
    let waiter = threads
        .spawn(None, move |t| {
            s.mutex.lock(t)?;
            let waited = s.cond.wait(t, &s.mutex, None);
            Ok((waited.map_err(|err| err.class_name().to_string()), s.mutex.is_owned(t)))
        })
        .unwrap();
    wait_until(|| state.cond.waiters() == 1);

    threads.raise_in(
        waiter.thread(),
        garnet_core::RaisedException::new("RuntimeError", "stop waiting"),
    );
    let (waited, owned) = waiter.join().unwrap();
    assert_eq!(waited, Err("RuntimeError".to_string()));
    assert!(owned);
    assert_eq!(state.cond.waiters(), 0);
}

#[test]
fn test_wait_requires_owned_mutex() {
    let threads = manager();
    let state = shared();
    let t = threads.create_thread(None);
    let err = state.cond.wait(&t, &state.mutex, None).unwrap_err();
    assert_eq!(err.class_name(), "ThreadError");
}

#[test]
fn test_producer_consumer_stress() {
    const CONSUMERS: usize = 4;
    const ITEMS_PER_CONSUMER: usize = 50;
    let threads = manager();
    let state = shared();
    let available = Arc::new(AtomicUsize::new(0));
    let consumed = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let state = state.clone();
            let available = available.clone();
            let consumed = consumed.clone();
            threads
                .spawn(None, move |t| {
                    for _ in 0..ITEMS_PER_CONSUMER {
                        state.mutex.synchronize(t, || {
                            while available.load(Ordering::SeqCst) == 0 {
                                state.cond.wait(t, &state.mutex, Some(Duration::from_millis(20)))?;
                            }
                            available.fetch_sub(1, Ordering::SeqCst);
                            consumed.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })?;
                    }
                    Ok(())
                })
                .unwrap()
        })
        .collect();

    let producer = threads.create_thread(Some("producer"));
    for _ in 0..CONSUMERS * ITEMS_PER_CONSUMER {
        state
            .mutex
            .synchronize(&producer, || {
                available.fetch_add(1, Ordering::SeqCst);
                state.cond.signal();
                Ok(())
            })
            .unwrap();
    }

    for consumer in consumers {
        consumer.join().unwrap();
    }
    assert_eq!(consumed.load(Ordering::SeqCst), CONSUMERS * ITEMS_PER_CONSUMER);
    assert_eq!(available.load(Ordering::SeqCst), 0);
    assert_eq!(state.cond.waiters(), 0);
}
