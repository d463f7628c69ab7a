//! Counting semaphores and the test-and-set lock

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::thread::{current_minithread, ThreadId};
use super::Kernel;
use crate::collections::Fifo;
use crate::error::{SchedulerError, SystemResult};

/// Test-and-set spinlock
///
/// The atomic swap maps onto the machine test-and-set primitive. Used by
/// applications together with [`System::unlock_and_stop`] to close the
/// window between releasing a lock and blocking.
///
/// [`System::unlock_and_stop`]: super::System::unlock_and_stop
pub struct TasLock(AtomicBool);

impl TasLock {
    /// Create an unlocked lock
    pub fn new() -> Self {
        TasLock(AtomicBool::new(false))
    }

    /// Atomically set the lock, returning the previous value
    pub fn test_and_set(&self) -> bool {
        self.0.swap(true, Ordering::AcqRel)
    }

    /// Spin until the lock is acquired
    pub fn acquire(&self) {
        while self.test_and_set() {
            std::thread::yield_now();
        }
    }

    /// Clear the lock
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// True while the lock is held
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for TasLock {
    fn default() -> Self {
        Self::new()
    }
}

struct SemInner {
    count: i64,
    waiters: Fifo<ThreadId>,
}

/// Counting semaphore whose wait queue holds blocked minithreads
///
/// `p` and `v` may be called with interrupts enabled; the semaphore state
/// carries its own lock. That lock is never held while waiting for the
/// kernel lock's holder to block, and kernel-locked delivery paths defer
/// their `v` calls until after unlock (see [`WakeSet`]), which keeps the
/// two lock orders from crossing.
pub struct Semaphore {
    kernel: Weak<Kernel>,
    inner: Mutex<SemInner>,
}

impl Semaphore {
    pub(crate) fn new(kernel: Weak<Kernel>, count: i64) -> Arc<Self> {
        Arc::new(Semaphore { kernel, inner: Mutex::new(SemInner { count, waiters: Fifo::new() }) })
    }

    /// Reset the counter; only sensible before the semaphore is shared
    pub fn initialize(&self, count: i64) {
        self.inner.lock().count = count;
    }

    /// Decrement, blocking the calling minithread while the count is zero
    pub fn p(&self) -> SystemResult<()> {
        let kernel = self.kernel.upgrade().ok_or(SchedulerError::ShutDown)?;
        let me = current_minithread().ok_or(SchedulerError::NotAThread)?;
        kernel.poll_preempt();
        let mut inner = self.inner.lock();
        while inner.count == 0 {
            inner.waiters.append(me);
            // the wait-queue entry and the stopped-set entry are both made
            // before the semaphore lock is released, so a concurrent v
            // cannot observe one without the other
            let mut st = kernel.state.lock();
            kernel.mark_stopped(&mut st, me);
            drop(inner);
            kernel.reschedule(st);
            inner = self.inner.lock();
        }
        inner.count -= 1;
        Ok(())
    }

    /// Increment and wake the head waiter, if any
    pub fn v(&self) {
        let waiter = {
            let mut inner = self.inner.lock();
            inner.count += 1;
            inner.waiters.pop_front()
        };
        if let Some(thread) = waiter {
            if let Some(kernel) = self.kernel.upgrade() {
                let mut st = kernel.state.lock();
                kernel.start_thread(&mut st, thread);
            }
        }
    }

    /// Current count, for diagnostics
    pub fn count(&self) -> i64 {
        self.inner.lock().count
    }
}

/// Semaphores to `v` once the kernel lock has been released
///
/// Delivery paths run under the kernel lock but must not take a semaphore
/// lock there; they push the semaphores to signal into a wake set and run
/// it after unlocking.
pub(crate) struct WakeSet {
    sems: Vec<Arc<Semaphore>>,
}

impl WakeSet {
    pub(crate) fn new() -> Self {
        WakeSet { sems: Vec::new() }
    }

    pub(crate) fn push(&mut self, sem: Arc<Semaphore>) {
        self.sems.push(sem);
    }

    pub(crate) fn run(self) {
        for sem in self.sems {
            sem.v();
        }
    }
}
