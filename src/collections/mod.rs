//! Container types backing the runtime
//!
//! These are the ordered and keyed sequences every other subsystem is built
//! on: the post office and correspondent tables are [`Directory`]s, the
//! alarm queue is a [`PriorityQueue`], mailbox and wait queues are
//! [`Fifo`]s, and the scheduler's ready queue is a [`MultilevelQueue`].

pub mod directory;
pub mod fifo;
pub mod multilevel;
pub mod priority_queue;

pub use directory::Directory;
pub use fifo::Fifo;
pub use multilevel::MultilevelQueue;
pub use priority_queue::PriorityQueue;
