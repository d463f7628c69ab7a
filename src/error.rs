//! Error types for minisys

use thiserror::Error;

use crate::msg::Port;
use crate::runtime::ThreadId;

/// Convenience alias used throughout the crate
pub type SystemResult<T> = Result<T, SystemError>;

/// Main error type for minisys operations
#[derive(Error, Debug)]
pub enum SystemError {
    /// Scheduler errors
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Message-passing errors
    #[error("message error: {0}")]
    Msg(#[from] MsgError),

    /// Network/framing errors
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scheduler-specific errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The calling host thread is not a minithread
    #[error("not called from a minithread")]
    NotAThread,

    /// Thread not found
    #[error("thread {0} not found")]
    ThreadNotFound(ThreadId),

    /// Alarm not found (already fired or never registered)
    #[error("alarm {0} not registered")]
    AlarmNotRegistered(u64),

    /// The runtime has shut down
    #[error("runtime is shut down")]
    ShutDown,
}

/// Message-passing errors
#[derive(Error, Debug)]
pub enum MsgError {
    /// No mailbox with this port id
    #[error("port {0} not found")]
    UnknownPort(Port),

    /// Message length outside (0, MAX_MSG_SIZE]
    #[error("invalid message length {0}")]
    InvalidLength(usize),

    /// Zero-length receive buffer
    #[error("receive buffer is empty")]
    InvalidBuffer,

    /// The system port cannot be destroyed
    #[error("port {0} is reserved")]
    ReservedPort(Port),
}

/// Network and wire-format errors
#[derive(Error, Debug)]
pub enum NetError {
    /// Frame too short or internally inconsistent
    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    /// Packet from a different group
    #[error("foreign system id {0:#06x}")]
    ForeignSystem(u16),

    /// Hostname could not be resolved
    #[error("cannot resolve address for {0}")]
    AddressResolution(String),

    /// No UDP port available in the configured range
    #[error("no free port in range {0}..{1}")]
    NoFreePort(u16, u16),
}
