//! Minithread runtime: scheduler, semaphores, alarms and the system handle
//!
//! The runtime is a process-wide kernel built at [`System::run`] and torn
//! down when the idle loop drains. All shared state lives behind a single
//! kernel lock whose scoped guard is the interrupt-masked critical region;
//! internal operations take `&mut KernelState` instead of re-locking, so
//! nesting saves and restores rather than unconditionally enabling.

pub mod alarm;
pub mod clock;
pub mod semaphore;
pub mod thread;

use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;

use crate::config::SystemConfig;
use crate::error::{SchedulerError, SystemResult};
use crate::msg::{self, MsgState};
use crate::net::Transport;

pub use alarm::AlarmId;
pub use semaphore::{Semaphore, TasLock};
pub use thread::ThreadId;

use alarm::AlarmState;
use clock::{Clock, ClockDriver};
use thread::{current_minithread, set_current_minithread, Level, SchedState, Switchboard, ThreadRecord};

/// Everything guarded by the kernel lock
pub(crate) struct KernelState {
    pub(crate) sched: SchedState,
    pub(crate) alarms: AlarmState,
    pub(crate) msg: MsgState,
}

impl KernelState {
    fn new() -> Self {
        KernelState { sched: SchedState::new(), alarms: AlarmState::new(), msg: MsgState::new() }
    }
}

/// Process-wide runtime singleton
pub(crate) struct Kernel {
    pub(crate) self_ref: Weak<Kernel>,
    pub(crate) state: Mutex<KernelState>,
    pub(crate) clock: Clock,
    pub(crate) config: SystemConfig,
    pub(crate) transport: Arc<dyn Transport>,
}

impl Kernel {
    pub(crate) fn ticks(&self) -> u64 {
        self.clock.ticks()
    }

    pub(crate) fn weak(&self) -> Weak<Kernel> {
        self.self_ref.clone()
    }

    /// Idle thread body: drain ready alarms, reap dead threads, schedule
    /// ready work, otherwise wait briefly for interrupts
    fn idle_loop(&self, sys: &System) {
        loop {
            let (ready, stopped, dead, alarms) = {
                let st = self.state.lock();
                (
                    st.sched.ready.len(),
                    st.sched.stopped.len(),
                    st.sched.dead.len(),
                    st.alarms.registered.len(),
                )
            };
            if ready == 0 && stopped == 0 && dead == 0 && alarms == 0 {
                break;
            }
            while sys.alarm_fire_next() {}
            loop {
                let record = {
                    let mut st = self.state.lock();
                    match st.sched.dead.pop_front() {
                        Some(id) => st.sched.threads.remove(id.0),
                        None => None,
                    }
                };
                match record {
                    Some(mut record) => {
                        debug!("reaping thread {}", record.id);
                        if let Some(host) = record.host.take() {
                            let _ = host.join();
                        }
                    }
                    None => break,
                }
            }
            let has_ready = !self.state.lock().sched.ready.is_empty();
            if has_ready {
                let st = self.state.lock();
                self.reschedule(st);
            } else {
                std::thread::sleep(Duration::from_micros(100));
            }
        }
    }
}

/// Handle to a running minisys instance
///
/// Cloneable and shareable; thread bodies receive a reference and use it
/// for every runtime call.
#[derive(Clone)]
pub struct System {
    pub(crate) kernel: Arc<Kernel>,
}

impl System {
    /// Initialize the runtime and run `main` as its first thread
    ///
    /// The calling host context becomes the idle thread: it fires ready
    /// alarms, reaps dead threads and dispatches ready work until no
    /// threads and no alarms remain, then tears the system down and
    /// returns.
    pub fn run<F>(config: SystemConfig, transport: Arc<dyn Transport>, main: F) -> SystemResult<()>
    where
        F: FnOnce(&System) + Send + 'static,
    {
        info!("minisys: initializing (tick period {} ms)", config.tick_period_ms);
        let tick_period = config.tick_period();
        let manual_clock = config.manual_clock;
        let kernel = Arc::new_cyclic(|weak| Kernel {
            self_ref: weak.clone(),
            state: Mutex::new(KernelState::new()),
            clock: Clock::new(),
            config,
            transport: transport.clone(),
        });
        let sys = System { kernel: Arc::clone(&kernel) };

        // the initializing context becomes the idle thread
        {
            let mut st = kernel.state.lock();
            st.sched.last_id += 1;
            let id = ThreadId(st.sched.last_id);
            st.sched.threads.insert(
                id.0,
                ThreadRecord {
                    id,
                    priority: Level::Short,
                    age: 0,
                    switchboard: Arc::new(Switchboard::new()),
                    host: None,
                },
            );
            st.sched.idle = id;
            st.sched.current = id;
            set_current_minithread(Some(id));
        }

        sys.fork(main);

        msg::init_msg_system(&kernel);

        let weak = Arc::downgrade(&kernel);
        transport.install_handler(Box::new(move |arrival| {
            if let Some(kernel) = weak.upgrade() {
                msg::handle_packet(&System { kernel }, arrival);
            }
        }));

        let driver =
            if manual_clock { None } else { Some(ClockDriver::start(kernel.clock.clone(), tick_period)) };

        // hand off to the first runnable thread
        {
            let st = kernel.state.lock();
            kernel.reschedule(st);
        }

        kernel.idle_loop(&sys);

        info!("minisys: shutting down");
        transport.remove_handler();
        if let Some(driver) = driver {
            driver.stop();
        }
        transport.shutdown();
        set_current_minithread(None);
        Ok(())
    }

    /// Create a thread and schedule it immediately
    pub fn fork<F>(&self, body: F) -> ThreadId
    where
        F: FnOnce(&System) + Send + 'static,
    {
        let id = self.create(body);
        self.start(id);
        id
    }

    /// Create a thread suspended on the stopped set; it runs only after
    /// [`System::start`]
    pub fn create<F>(&self, body: F) -> ThreadId
    where
        F: FnOnce(&System) + Send + 'static,
    {
        let switchboard = Arc::new(Switchboard::new());
        let kernel = Arc::clone(&self.kernel);
        let mut st = self.kernel.state.lock();
        st.sched.last_id += 1;
        let id = ThreadId(st.sched.last_id);
        let host_sb = Arc::clone(&switchboard);
        let host = std::thread::Builder::new()
            .name(format!("minithread-{}", id.0))
            .spawn(move || {
                host_sb.sleep();
                set_current_minithread(Some(id));
                let system = System { kernel };
                body(&system);
                system.kernel.exit_current();
            })
            .expect("minithread stack allocation failed");
        st.sched.threads.insert(
            id.0,
            ThreadRecord { id, priority: Level::Short, age: 0, switchboard, host: Some(host) },
        );
        st.sched.stopped.append(id);
        id
    }

    /// Make a stopped thread runnable
    pub fn start(&self, thread: ThreadId) {
        let mut st = self.kernel.state.lock();
        self.kernel.start_thread(&mut st, thread);
    }

    /// Block the calling thread without requeueing it; it runs again only
    /// after another thread calls [`System::start`] on it
    pub fn stop(&self) -> SystemResult<()> {
        let me = current_minithread().ok_or(SchedulerError::NotAThread)?;
        let st = self.kernel.state.lock();
        self.kernel.stop_current(st, me);
        Ok(())
    }

    /// Relinquish the processor and requeue at the short level
    pub fn yield_now(&self) -> SystemResult<()> {
        let me = current_minithread().ok_or(SchedulerError::NotAThread)?;
        let mut st = self.kernel.state.lock();
        let now = self.kernel.ticks();
        if let Some(rec) = st.sched.threads.get_mut(me.0) {
            rec.priority = Level::Short;
            rec.age = now;
        }
        st.sched.ready.enqueue(Level::Short.index(), me);
        self.kernel.reschedule(st);
        Ok(())
    }

    /// Register a wakeup alarm and block; the thread becomes runnable
    /// again after at least `delay_ms` milliseconds
    pub fn sleep_with_timeout(&self, delay_ms: u64) -> SystemResult<()> {
        let me = current_minithread().ok_or(SchedulerError::NotAThread)?;
        let mut st = self.kernel.state.lock();
        self.kernel.alarm_register_locked(
            &mut st,
            delay_ms,
            Box::new(move |sys| {
                sys.start(me);
            }),
        );
        self.kernel.stop_current(st, me);
        Ok(())
    }

    /// Atomically clear a test-and-set lock and block the calling thread;
    /// no interrupt handler can observe the thread runnable in between
    pub fn unlock_and_stop(&self, lock: &TasLock) -> SystemResult<()> {
        let me = current_minithread().ok_or(SchedulerError::NotAThread)?;
        let st = self.kernel.state.lock();
        lock.clear();
        self.kernel.stop_current(st, me);
        Ok(())
    }

    /// Handle of the calling thread
    pub fn current_thread(&self) -> SystemResult<ThreadId> {
        current_minithread().ok_or_else(|| SchedulerError::NotAThread.into())
    }

    /// Numeric identifier of the calling thread
    pub fn thread_id(&self) -> SystemResult<u64> {
        self.current_thread().map(|t| t.0)
    }

    /// Create a counting semaphore with the given initial count
    pub fn semaphore(&self, count: i64) -> Arc<Semaphore> {
        Semaphore::new(self.kernel.weak(), count)
    }

    /// Current clock tick
    pub fn ticks(&self) -> u64 {
        self.kernel.ticks()
    }

    /// Advance the clock by hand; only meaningful with
    /// [`SystemConfig::manual_clock`]
    pub fn advance_clock(&self, n: u64) {
        self.kernel.clock.advance(n);
    }
}
