//! Tick counter and clock driver

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::debug;

/// Monotonic tick counter
///
/// One tick elapses per clock period. The counter is only ever advanced by
/// the [`ClockDriver`] ticker thread, or explicitly by tests running with a
/// manual clock.
#[derive(Clone)]
pub(crate) struct Clock {
    ticks: Arc<AtomicU64>,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Clock { ticks: Arc::new(AtomicU64::new(0)) }
    }

    /// Current tick count
    pub(crate) fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Advance the counter by `n` ticks
    pub(crate) fn advance(&self, n: u64) {
        self.ticks.fetch_add(n, Ordering::SeqCst);
    }
}

/// Background ticker advancing a [`Clock`] once per period
pub(crate) struct ClockDriver {
    shutdown_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ClockDriver {
    /// Start the ticker thread
    pub(crate) fn start(clock: Clock, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("minisys-clock".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => clock.advance(1),
                    _ => break,
                }
            })
            .expect("failed to start clock driver");
        ClockDriver { shutdown_tx, handle: Some(handle) }
    }

    /// Stop the ticker and wait for it to exit
    pub(crate) fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        debug!("clock driver stopped");
    }
}
