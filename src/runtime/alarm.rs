//! Alarm subsystem
//!
//! Alarms live in a priority queue ordered by absolute fire tick. Ready
//! alarms are fired by the idle thread: the entry is popped under the
//! kernel lock, the lock is released, and only then is the callback
//! invoked. Callbacks therefore run with interrupts enabled and must not
//! block; the typical callback just marks a thread runnable.

use log::trace;

use super::{Kernel, KernelState, System};
use crate::collections::PriorityQueue;
use crate::error::{SchedulerError, SystemResult};

/// Identity of one registered alarm, usable for deregistration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId(pub u64);

pub(crate) type AlarmCallback = Box<dyn FnOnce(&System) + Send>;

pub(crate) struct AlarmEntry {
    pub(crate) id: AlarmId,
    pub(crate) fire_tick: u64,
    pub(crate) callback: AlarmCallback,
}

pub(crate) struct AlarmState {
    pub(crate) registered: PriorityQueue<AlarmEntry>,
    next_id: u64,
}

impl AlarmState {
    pub(crate) fn new() -> Self {
        AlarmState { registered: PriorityQueue::new(), next_id: 0 }
    }
}

impl Kernel {
    /// Register an alarm `delay_ms` from now; same-tick alarms fire in
    /// registration order
    pub(crate) fn alarm_register_locked(
        &self,
        st: &mut KernelState,
        delay_ms: u64,
        callback: AlarmCallback,
    ) -> AlarmId {
        let fire_tick = self.ticks() + self.config.ms_to_ticks(delay_ms);
        st.alarms.next_id += 1;
        let id = AlarmId(st.alarms.next_id);
        st.alarms.registered.enqueue(fire_tick, AlarmEntry { id, fire_tick, callback });
        trace!("alarm: registered {:?} for tick {} ({} live)", id, fire_tick, st.alarms.registered.len());
        id
    }

    /// Delete a registered alarm by identity; false when it already fired
    /// or was never registered
    pub(crate) fn alarm_deregister_locked(&self, st: &mut KernelState, id: AlarmId) -> bool {
        let found = st.alarms.registered.delete_by(|e| e.id == id).is_some();
        if found {
            trace!("alarm: deregistered {:?} ({} live)", id, st.alarms.registered.len());
        }
        found
    }

    pub(crate) fn alarm_has_remaining_locked(&self, st: &KernelState) -> bool {
        !st.alarms.registered.is_empty()
    }

    /// True when the head alarm's fire tick has been reached
    pub(crate) fn alarm_has_ready_locked(&self, st: &KernelState) -> bool {
        st.alarms.registered.peek().map_or(false, |(_, entry)| entry.fire_tick <= self.ticks())
    }
}

impl System {
    /// Register an alarm to run `callback` after at least `delay_ms`
    /// milliseconds. Alarms fire in non-decreasing fire-tick order, from
    /// the idle thread, and may fire arbitrarily later than requested.
    pub fn alarm_register<F>(&self, delay_ms: u64, callback: F) -> AlarmId
    where
        F: FnOnce(&System) + Send + 'static,
    {
        let mut st = self.kernel.state.lock();
        self.kernel.alarm_register_locked(&mut st, delay_ms, Box::new(callback))
    }

    /// Deregister an alarm; fails when it already fired or is unknown
    pub fn alarm_deregister(&self, id: AlarmId) -> SystemResult<()> {
        let mut st = self.kernel.state.lock();
        if self.kernel.alarm_deregister_locked(&mut st, id) {
            Ok(())
        } else {
            Err(SchedulerError::AlarmNotRegistered(id.0).into())
        }
    }

    /// True when any alarm is registered
    pub fn alarm_has_remaining(&self) -> bool {
        self.kernel.alarm_has_remaining_locked(&self.kernel.state.lock())
    }

    /// True when the next alarm is ready to fire
    pub fn alarm_has_ready(&self) -> bool {
        self.kernel.alarm_has_ready_locked(&self.kernel.state.lock())
    }

    /// Fire the next ready alarm, if any; the callback runs with the
    /// kernel lock released
    pub fn alarm_fire_next(&self) -> bool {
        let entry = {
            let mut st = self.kernel.state.lock();
            if self.kernel.alarm_has_ready_locked(&st) {
                st.alarms.registered.dequeue().map(|(_, e)| e)
            } else {
                None
            }
        };
        match entry {
            Some(entry) => {
                trace!("alarm: firing {:?} (tick {})", entry.id, entry.fire_tick);
                (entry.callback)(self);
                true
            }
            None => false,
        }
    }
}
