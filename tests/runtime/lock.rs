//! Tests for the execution lock shared between threads

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

use jscell::{DropAllLocks, ExecutionLock};

#[test]
fn test_lock_excludes_other_threads() {
    let lock = Arc::new(ExecutionLock::new());
    let counter = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..200 {
                    let _guard = lock.lock();
                    let _nested = lock.lock();
                    // Read-modify-write is only atomic because of the lock
                    let seen = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(seen + 1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::Relaxed), 800);
    assert_eq!(lock.lock_count(), 0);
}

#[test]
fn test_drop_all_lets_another_thread_run() {
    let lock = Arc::new(ExecutionLock::new());
    let _outer = lock.lock();
    let _inner = lock.lock();

    let (ran_tx, ran_rx) = mpsc::channel();
    let worker = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            let guard = lock.lock();
            assert!(lock.current_thread_holds_lock());
            ran_tx.send(lock.lock_count()).unwrap();
            drop(guard);
        })
    };

    {
        let dropper = DropAllLocks::new(&lock);
        assert_eq!(dropper.dropped_count(), 2);
        // The worker can only take the lock while it is dropped
        assert_eq!(ran_rx.recv().unwrap(), 1);
        worker.join().unwrap();
    }

    assert!(lock.current_thread_holds_lock());
    assert_eq!(lock.lock_count(), 2);
    assert_eq!(lock.drop_depth(), 0);
}

#[test]
fn test_reacquire_waits_for_other_owner() {
    let lock = Arc::new(ExecutionLock::new());
    let guard = lock.lock();
    let dropper = DropAllLocks::new(&lock);

    let (locked_tx, locked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let worker = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            let _held = lock.lock();
            locked_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
    };

    locked_rx.recv().unwrap();
    assert!(lock.try_lock().is_none());
    release_tx.send(()).unwrap();
    // Blocks until the worker lets go
    drop(dropper);
    assert!(lock.current_thread_holds_lock());
    assert_eq!(lock.lock_count(), 1);
    worker.join().unwrap();
    drop(guard);
    assert_eq!(lock.lock_count(), 0);
}

#[test]
fn test_nested_droppers_on_one_thread() {
    let lock = ExecutionLock::new();
    let _a = lock.lock();
    let first = DropAllLocks::new(&lock);
    assert_eq!(first.dropped_count(), 1);
    {
        let _b = lock.lock();
        let _c = lock.lock();
        let second = DropAllLocks::new(&lock);
        assert_eq!(second.dropped_count(), 2);
        assert_eq!(lock.drop_depth(), 2);
        drop(second);
        assert_eq!(lock.lock_count(), 2);
    }
    assert_eq!(lock.lock_count(), 0);
    drop(first);
    assert_eq!(lock.lock_count(), 1);
    assert_eq!(lock.drop_depth(), 0);
}

#[test]
fn test_dropper_without_lock_is_inert() {
    let lock = ExecutionLock::new();
    let dropper = DropAllLocks::new(&lock);
    assert_eq!(dropper.dropped_count(), 0);
    assert_eq!(lock.drop_depth(), 0);
    drop(dropper);
    assert!(!lock.current_thread_holds_lock());
}
