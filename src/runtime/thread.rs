//! Thread records, the ready queue and the schedule algorithm
//!
//! Each minithread is backed by a dedicated host thread plus a switchboard
//! (a mutex-protected run flag with a condvar). A context switch wakes the
//! target's switchboard and parks the caller's, so exactly one minithread
//! executes at any instant. Preemption is polled: the clock-handler check
//! (quantum expiry, demotion to the long level) runs at every suspension
//! point and kernel entry point.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use super::{Kernel, KernelState};
use crate::collections::{Directory, Fifo, MultilevelQueue};

/// Thread identifier, unique within one runtime instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The two priority classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    Short = 0,
    Long = 1,
}

pub(crate) const NUM_LEVELS: usize = 2;

impl Level {
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

thread_local! {
    static CURRENT: Cell<Option<ThreadId>> = Cell::new(None);
}

/// The minithread backed by the calling host thread, if any
pub(crate) fn current_minithread() -> Option<ThreadId> {
    CURRENT.with(|c| c.get())
}

pub(crate) fn set_current_minithread(id: Option<ThreadId>) {
    CURRENT.with(|c| c.set(id));
}

/// Park/unpark rendezvous for one minithread's host thread
pub(crate) struct Switchboard {
    run: Mutex<bool>,
    cv: Condvar,
}

impl Switchboard {
    pub(crate) fn new() -> Self {
        Switchboard { run: Mutex::new(false), cv: Condvar::new() }
    }

    /// Mark the thread runnable and wake its host
    pub(crate) fn wake(&self) {
        let mut run = self.run.lock();
        *run = true;
        self.cv.notify_one();
    }

    /// Park the calling host until the next wake; a wake that arrives first
    /// is not lost
    pub(crate) fn sleep(&self) {
        let mut run = self.run.lock();
        while !*run {
            self.cv.wait(&mut run);
        }
        *run = false;
    }
}

/// Per-thread scheduling state
pub(crate) struct ThreadRecord {
    pub(crate) id: ThreadId,
    pub(crate) priority: Level,
    /// Tick at which the thread was last queued or aging-reset
    pub(crate) age: u64,
    pub(crate) switchboard: Arc<Switchboard>,
    /// Host thread backing this minithread; None for the idle thread, whose
    /// host is the context that initialized the system
    pub(crate) host: Option<thread::JoinHandle<()>>,
}

/// Scheduler state, guarded by the kernel lock
pub(crate) struct SchedState {
    pub(crate) current: ThreadId,
    pub(crate) idle: ThreadId,
    pub(crate) ready: MultilevelQueue<ThreadId>,
    pub(crate) stopped: Fifo<ThreadId>,
    pub(crate) dead: Fifo<ThreadId>,
    pub(crate) threads: Directory<ThreadRecord>,
    pub(crate) last_id: u64,
    /// Tick at which the current thread's quantum expires
    pub(crate) quantum_end: u64,
}

impl SchedState {
    pub(crate) fn new() -> Self {
        SchedState {
            current: ThreadId(0),
            idle: ThreadId(0),
            ready: MultilevelQueue::new(NUM_LEVELS),
            stopped: Fifo::new(),
            dead: Fifo::new(),
            threads: Directory::new(),
            last_id: 0,
            quantum_end: 0,
        }
    }
}

impl Kernel {
    /// Pick the next thread and switch to it, releasing the kernel lock
    /// before the handoff (the resumed side runs with interrupts enabled)
    pub(crate) fn reschedule(&self, mut st: MutexGuard<'_, KernelState>) {
        let old = st.sched.current;
        let next = self.pick_next(&mut st);
        st.sched.current = next;
        self.arm_quantum(&mut st, next);
        if next == old {
            return;
        }
        let next_sb = st.sched.threads.get(next.0).unwrap().switchboard.clone();
        let old_sb = st.sched.threads.get(old.0).unwrap().switchboard.clone();
        drop(st);
        next_sb.wake();
        old_sb.sleep();
    }

    /// Retire the calling thread: queue it on the dead set and hand off to
    /// the next thread without parking (the host is about to exit)
    pub(crate) fn exit_current(&self) {
        let mut st = self.state.lock();
        let me = st.sched.current;
        st.sched.dead.append(me);
        let next = self.pick_next(&mut st);
        st.sched.current = next;
        self.arm_quantum(&mut st, next);
        let next_sb = st.sched.threads.get(next.0).unwrap().switchboard.clone();
        drop(st);
        next_sb.wake();
    }

    /// Force the priority to short and place the thread on the stopped set
    pub(crate) fn mark_stopped(&self, st: &mut KernelState, thread: ThreadId) {
        if let Some(rec) = st.sched.threads.get_mut(thread.0) {
            rec.priority = Level::Short;
        }
        st.sched.stopped.append(thread);
    }

    pub(crate) fn stop_current(&self, mut st: MutexGuard<'_, KernelState>, me: ThreadId) {
        self.mark_stopped(&mut st, me);
        self.reschedule(st);
    }

    /// Make a stopped thread runnable, queued at the running thread's level
    pub(crate) fn start_thread(&self, st: &mut KernelState, thread: ThreadId) {
        if st.sched.stopped.delete(&thread) {
            let now = self.ticks();
            if let Some(rec) = st.sched.threads.get_mut(thread.0) {
                rec.age = now;
            }
            let level = st
                .sched
                .threads
                .get(st.sched.current.0)
                .map(|r| r.priority)
                .unwrap_or(Level::Short);
            st.sched.ready.enqueue(level.index(), thread);
        }
    }

    /// Clock-handler check: demote and requeue the current thread when its
    /// quantum has expired, then reschedule. Runs at suspension points and
    /// kernel entry points; a no-op off minithreads and on the idle thread.
    pub(crate) fn poll_preempt(&self) {
        let Some(me) = current_minithread() else { return };
        let mut st = self.state.lock();
        if me != st.sched.current || me == st.sched.idle {
            return;
        }
        let now = self.ticks();
        if now >= st.sched.quantum_end {
            if let Some(rec) = st.sched.threads.get_mut(me.0) {
                rec.priority = Level::Long;
                rec.age = now;
            }
            st.sched.ready.enqueue(Level::Long.index(), me);
            self.reschedule(st);
        }
    }

    fn pick_next(&self, st: &mut KernelState) -> ThreadId {
        if self.alarm_has_ready_locked(st) && st.sched.current != st.sched.idle {
            st.sched.idle
        } else if !st.sched.ready.is_empty() {
            self.age_ready(st);
            match st.sched.ready.dequeue(Level::Short.index()) {
                Some((_, thread)) => thread,
                None => st.sched.idle,
            }
        } else {
            st.sched.idle
        }
    }

    fn arm_quantum(&self, st: &mut KernelState, next: ThreadId) {
        let prio = st.sched.threads.get(next.0).map(|r| r.priority).unwrap_or(Level::Short);
        let quanta = match prio {
            Level::Short => self.config.short_quanta,
            Level::Long => self.config.long_quanta,
        };
        st.sched.quantum_end = self.ticks() + quanta;
    }

    /// Promote long-level threads that have waited at least `promote_age`
    /// ticks back to the short level; age is preserved so a starving thread
    /// keeps its standing
    fn age_ready(&self, st: &mut KernelState) {
        let now = self.ticks();
        let promote_age = self.config.promote_age;
        let sched = &mut st.sched;
        loop {
            let promote = match sched.ready.peek(Level::Long.index()) {
                Some((_, thread)) => sched
                    .threads
                    .get(thread.0)
                    .map_or(false, |r| now.saturating_sub(r.age) >= promote_age),
                None => false,
            };
            if !promote {
                break;
            }
            let (_, thread) = sched.ready.dequeue(Level::Long.index()).unwrap();
            if let Some(rec) = sched.threads.get_mut(thread.0) {
                rec.priority = Level::Short;
            }
            sched.ready.enqueue(Level::Short.index(), thread);
        }
    }
}
