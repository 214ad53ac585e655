//! The global execution lock.
//!
//! One [`ExecutionLock`] guards a runtime that is shared between threads. It is
//! re-entrant: the owning thread may take it again and each [`JsLockGuard`]
//! releases one level. [`DropAllLocks`] gives the whole recursion count up
//! while the thread calls out to external code and restores it on drop.
//! Nested droppers compose through a drop depth: each reacquire waits until
//! the depth it recorded is the innermost one outstanding.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    count: usize,
    drop_depth: usize,
}

/// A re-entrant lock with an explicit drop-all / reacquire-all pair
#[derive(Debug, Default)]
pub struct ExecutionLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl ExecutionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire one level of the lock, blocking while another thread owns it
    pub fn lock(&self) -> JsLockGuard<'_> {
        self.acquire(1);
        JsLockGuard { lock: self }
    }

    /// Acquire one level without blocking
    pub fn try_lock(&self) -> Option<JsLockGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.owner {
            Some(owner) if owner != me => None,
            _ => {
                state.owner = Some(me);
                state.count += 1;
                Some(JsLockGuard { lock: self })
            }
        }
    }

    pub fn current_thread_holds_lock(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// Recursion count of the current owner (0 when unlocked)
    pub fn lock_count(&self) -> usize {
        self.state.lock().count
    }

    /// Number of outstanding [`DropAllLocks`]
    pub fn drop_depth(&self) -> usize {
        self.state.lock().drop_depth
    }

    fn acquire(&self, levels: usize) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while state.owner.is_some_and(|owner| owner != me) {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.count += levels;
    }

    fn release(&self, levels: usize) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_sub(levels);
        if state.count == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_all();
        }
    }

    fn drop_all(&self) -> (usize, usize) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return (0, 0);
        }
        state.drop_depth += 1;
        let depth = state.drop_depth;
        let dropped = state.count;
        state.count = 0;
        state.owner = None;
        drop(state);
        self.released.notify_all();
        tracing::trace!(target: "jscell::lock", dropped, depth, "dropped all locks");
        (dropped, depth)
    }

    fn grab_all(&self, dropped: usize, depth: usize) {
        if dropped == 0 {
            return;
        }
        let me = thread::current().id();
        let mut state = self.state.lock();
        // An inner dropper taken on another thread must reacquire first.
        while state.owner.is_some_and(|owner| owner != me) || state.drop_depth != depth {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.count += dropped;
        state.drop_depth -= 1;
        drop(state);
        self.released.notify_all();
        tracing::trace!(target: "jscell::lock", restored = dropped, depth, "reacquired all locks");
    }
}

/// One level of an [`ExecutionLock`], released on drop
#[derive(Debug)]
pub struct JsLockGuard<'a> {
    lock: &'a ExecutionLock,
}

impl Drop for JsLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(1);
    }
}

/// Releases every level the current thread holds; restores them on drop.
///
/// A no-op when the current thread does not hold the lock.
#[derive(Debug)]
pub struct DropAllLocks<'a> {
    lock: &'a ExecutionLock,
    dropped: usize,
    depth: usize,
}

impl<'a> DropAllLocks<'a> {
    pub fn new(lock: &'a ExecutionLock) -> Self {
        let (dropped, depth) = lock.drop_all();
        Self {
            lock,
            dropped,
            depth,
        }
    }

    /// Levels released by this dropper
    pub fn dropped_count(&self) -> usize {
        self.dropped
    }
}

impl Drop for DropAllLocks<'_> {
    fn drop(&mut self) {
        self.lock.grab_all(self.dropped, self.depth);
    }
}
