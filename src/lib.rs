//! # minisys: a user-space minithread runtime
//!
//! minisys provides cooperative threads with preemptive quanta on top of a
//! two-level ready queue with aging, a tick-driven alarm subsystem, and a
//! reliable port-based message layer (local fast-path delivery plus an
//! ack/retry protocol over an unreliable datagram transport).
//!
//! The three subsystems are deliberately coupled: alarms fire from the idle
//! thread, message retransmission timeouts are alarms, and blocking receive
//! operations park and wake threads through the scheduler's stop/start
//! primitives.

#![warn(clippy::all)]

pub mod collections;
pub mod config;
pub mod error;
pub mod msg;
pub mod net;
pub mod runtime;

// Re-export main types
pub use config::SystemConfig;
pub use error::{MsgError, NetError, SchedulerError, SystemError, SystemResult};
pub use msg::{MsgId, Port, BROADCAST_PORT, MAX_MSG_SIZE};
pub use net::{LoopbackHub, NetworkAddress, Transport, UdpTransport};
pub use runtime::{AlarmId, Semaphore, System, TasLock, ThreadId};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
