//! Reliable port-based message passing
//!
//! Each port is a mailbox in the process-wide post office. A mailbox keeps
//! per-peer protocol state in correspondents: message id counters for
//! ordering and duplicate suppression, the in-flight outbound message with
//! its retransmission alarm, messages queued behind it, and the RPC
//! response queue. Delivery between two local ports bypasses the network
//! entirely; remote delivery is at-least-once (ack/retry) with dedup at
//! the receiver, which together give in-order exactly-once delivery to the
//! application for each sender/destination pair.

pub mod wire;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::collections::{Directory, Fifo};
use crate::error::{MsgError, SystemResult};
use crate::net::{NetworkAddress, PacketArrival};
use crate::runtime::semaphore::WakeSet;
use crate::runtime::{AlarmId, Kernel, KernelState, Semaphore, System};

pub use wire::{AckHeader, Frame, Msg, Packet};

/// Maximum message body size in bytes
pub const MAX_MSG_SIZE: usize = 5196;

/// Wire-level broadcast destination; frames addressed here reach every
/// peer's system mailbox
pub const BROADCAST_PORT: Port = Port(1);

/// Port identifier, globally unique among address spaces sharing a
/// broadcast segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Port(pub u32);

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-correspondent message id; ids increase by one per send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MsgId(pub u32);

/// Per-peer protocol state owned by a mailbox
pub(crate) struct Correspondent {
    /// Port of the owning mailbox; sibling lookups go through the post
    /// office, never through an owning reference
    pub(crate) owner: Port,
    /// The remote port this state tracks
    pub(crate) contact: Port,
    /// Remote network address, zero until learned from an arrival
    pub(crate) remote: NetworkAddress,
    pub(crate) last_rcvd: MsgId,
    pub(crate) last_sent: MsgId,
    /// In-flight outbound message awaiting its ack
    pub(crate) pending: Option<Msg>,
    /// Retransmission alarm; registered iff `pending` is set
    pub(crate) pending_timeout: Option<AlarmId>,
    /// Transmissions of `pending` so far
    pub(crate) tries: u32,
    /// Outbound messages queued behind `pending`
    pub(crate) waiting: Fifo<Msg>,
    pub(crate) rsp_arrived: Fifo<Msg>,
    pub(crate) rsp_available: Arc<Semaphore>,
}

impl Correspondent {
    fn new(kernel: &Kernel, owner: Port, contact: Port) -> Self {
        Correspondent {
            owner,
            contact,
            remote: NetworkAddress::ZERO,
            last_rcvd: MsgId(0),
            last_sent: MsgId(0),
            pending: None,
            pending_timeout: None,
            tries: 0,
            waiting: Fifo::new(),
            rsp_arrived: Fifo::new(),
            rsp_available: Semaphore::new(kernel.weak(), 0),
        }
    }
}

/// A port's local endpoint state
pub(crate) struct Mailbox {
    pub(crate) port: Port,
    pub(crate) msg_arrived: Fifo<Msg>,
    pub(crate) msg_available: Arc<Semaphore>,
    pub(crate) correspondents: Directory<Correspondent>,
}

impl Mailbox {
    fn new(kernel: &Kernel, port: Port) -> Self {
        Mailbox {
            port,
            msg_arrived: Fifo::new(),
            msg_available: Semaphore::new(kernel.weak(), 0),
            correspondents: Directory::new(),
        }
    }
}

/// Message-passing state, guarded by the kernel lock
pub(crate) struct MsgState {
    pub(crate) post_office: Directory<Mailbox>,
    pub(crate) system_port: Port,
}

impl MsgState {
    pub(crate) fn new() -> Self {
        MsgState { post_office: Directory::new(), system_port: Port(0) }
    }
}

/// Create the system mailbox; called once at system initialization
pub(crate) fn init_msg_system(kernel: &Arc<Kernel>) {
    let port = Port(kernel.transport.reserve_next_token());
    let mbox = Mailbox::new(kernel, port);
    let mut st = kernel.state.lock();
    st.msg.post_office.insert(port.0 as u64, mbox);
    st.msg.system_port = port;
    info!("minimsg: system port {}", port);
}

impl System {
    /// Allocate a mailbox with a fresh globally unique port id
    pub fn port_create(&self) -> SystemResult<Port> {
        let port = Port(self.kernel.transport.reserve_next_token());
        let mbox = Mailbox::new(&self.kernel, port);
        let mut st = self.kernel.state.lock();
        st.msg.post_office.insert(port.0 as u64, mbox);
        debug!("minimsg: created port {}", port);
        Ok(port)
    }

    /// Tear down a port, releasing queued messages, correspondents and any
    /// pending retransmission alarms
    pub fn port_destroy(&self, port: Port) -> SystemResult<()> {
        let mbox = {
            let mut st = self.kernel.state.lock();
            if port == st.msg.system_port {
                return Err(MsgError::ReservedPort(port).into());
            }
            let mbox = st
                .msg
                .post_office
                .remove(port.0 as u64)
                .ok_or(MsgError::UnknownPort(port))?;
            for corresp in mbox.correspondents.values() {
                trace!("minimsg: dropping correspondent {} -> {}", corresp.owner, corresp.contact);
                if let Some(timeout) = corresp.pending_timeout {
                    self.kernel.alarm_deregister_locked(&mut st, timeout);
                }
            }
            mbox
        };
        debug!("minimsg: destroyed port {}", mbox.port);
        drop(mbox);
        Ok(())
    }

    /// Port of the automatically created system mailbox; it lives for the
    /// whole system lifetime and cannot be destroyed
    pub fn system_port(&self) -> Port {
        self.kernel.state.lock().msg.system_port
    }

    /// Send a message; returns immediately. Delivery is best-effort, but
    /// sends from one port to one destination arrive in send order.
    pub fn send(&self, from: Port, to: Port, payload: &[u8]) -> SystemResult<()> {
        self.send_reply(from, to, payload, MsgId(0))
    }

    /// Send a message as the RPC response to the query `in_reply_to`
    pub fn send_reply(&self, from: Port, to: Port, payload: &[u8], in_reply_to: MsgId) -> SystemResult<()> {
        if payload.is_empty() || payload.len() > self.kernel.config.max_msg_size {
            return Err(MsgError::InvalidLength(payload.len()).into());
        }
        self.kernel.poll_preempt();
        let mut wakes = WakeSet::new();
        {
            let kernel = &self.kernel;
            let mut st = kernel.state.lock();
            let this_id = {
                let corresp = corresp_entry(kernel, &mut st, from, to).ok_or(MsgError::UnknownPort(from))?;
                corresp.last_sent = MsgId(corresp.last_sent.0 + 1);
                corresp.last_sent
            };
            let msg = Msg { to, from, this_id, reply_to: in_reply_to, body: Bytes::copy_from_slice(payload) };
            dispatch(kernel, &mut st, from, to, msg, &mut wakes);
        }
        wakes.run();
        Ok(())
    }

    /// Receive one message, blocking until one is queued
    ///
    /// The body is truncated to the caller's buffer; returns the byte
    /// count, the sender port and the message id. For broadcast messages
    /// the returned sender is the logical originator.
    pub fn receive(&self, me: Port, buf: &mut [u8]) -> SystemResult<(usize, Port, MsgId)> {
        if buf.is_empty() {
            return Err(MsgError::InvalidBuffer.into());
        }
        self.kernel.poll_preempt();
        let sem = {
            let st = self.kernel.state.lock();
            st.msg
                .post_office
                .get(me.0 as u64)
                .ok_or(MsgError::UnknownPort(me))?
                .msg_available
                .clone()
        };
        sem.p()?;
        let msg = {
            let mut st = self.kernel.state.lock();
            let mbox = st.msg.post_office.get_mut(me.0 as u64).ok_or(MsgError::UnknownPort(me))?;
            mbox.msg_arrived.pop_front().expect("mailbox semaphore out of sync")
        };
        let len = buf.len().min(msg.body.len());
        buf[..len].copy_from_slice(&msg.body[..len]);
        // broadcast frames carry the logical sender in reply_to
        let from = if msg.from == BROADCAST_PORT { Port(msg.reply_to.0) } else { msg.from };
        Ok((len, from, msg.this_id))
    }

    /// Send a query and block until the matching response arrives
    ///
    /// Responses are matched on `reply_to == query id`, so several RPCs may
    /// be outstanding on one correspondent and resolve in any arrival
    /// order. Returns the response length after truncation into `buf`.
    pub fn rpc(&self, me: Port, to: Port, payload: &[u8], buf: &mut [u8]) -> SystemResult<usize> {
        if payload.is_empty() || payload.len() > self.kernel.config.max_msg_size {
            return Err(MsgError::InvalidLength(payload.len()).into());
        }
        if buf.is_empty() {
            return Err(MsgError::InvalidBuffer.into());
        }
        self.kernel.poll_preempt();
        let mut wakes = WakeSet::new();
        let (query_id, rsp_sem) = {
            let kernel = &self.kernel;
            let mut st = kernel.state.lock();
            let (query_id, rsp_sem) = {
                let corresp = corresp_entry(kernel, &mut st, me, to).ok_or(MsgError::UnknownPort(me))?;
                corresp.last_sent = MsgId(corresp.last_sent.0 + 1);
                (corresp.last_sent, corresp.rsp_available.clone())
            };
            let msg = Msg { to, from: me, this_id: query_id, reply_to: MsgId(0), body: Bytes::copy_from_slice(payload) };
            dispatch(kernel, &mut st, me, to, msg, &mut wakes);
            (query_id, rsp_sem)
        };
        wakes.run();
        loop {
            rsp_sem.p()?;
            let msg = {
                let mut st = self.kernel.state.lock();
                let corresp = corresp_entry(&self.kernel, &mut st, me, to).ok_or(MsgError::UnknownPort(me))?;
                corresp.rsp_arrived.pop_front()
            };
            let Some(msg) = msg else { continue };
            if msg.reply_to != query_id {
                // someone else's response; put it back and keep waiting
                {
                    let mut st = self.kernel.state.lock();
                    if let Some(corresp) = corresp_entry(&self.kernel, &mut st, me, to) {
                        corresp.rsp_arrived.append(msg);
                    }
                }
                rsp_sem.v();
                continue;
            }
            let len = buf.len().min(msg.body.len());
            buf[..len].copy_from_slice(&msg.body[..len]);
            return Ok(len);
        }
    }
}

/// Look up the correspondent for (local, contact), creating it on first
/// contact; None when no mailbox owns `local`
fn corresp_entry<'a>(
    kernel: &Kernel,
    st: &'a mut KernelState,
    local: Port,
    contact: Port,
) -> Option<&'a mut Correspondent> {
    let mbox = st.msg.post_office.get_mut(local.0 as u64)?;
    if !mbox.correspondents.contains(contact.0 as u64) {
        let corresp = Correspondent::new(kernel, local, contact);
        mbox.correspondents.insert(contact.0 as u64, corresp);
    }
    mbox.correspondents.get_mut(contact.0 as u64)
}

/// Route an id-stamped message: local fast-path when the destination
/// mailbox lives in this process, ack/retry protocol otherwise
fn dispatch(kernel: &Kernel, st: &mut KernelState, from: Port, to: Port, msg: Msg, wakes: &mut WakeSet) {
    if st.msg.post_office.contains(to.0 as u64) {
        deliver_to_mailbox(kernel, st, to, from, msg, wakes);
    } else if let Some(corresp) = corresp_entry(kernel, st, from, to) {
        if corresp.pending.is_some() {
            corresp.waiting.append(msg);
        } else {
            corresp.pending = Some(msg);
            corresp.tries = 0;
            transmit(kernel, st, from, to);
        }
    }
}

/// Record receipt on the correspondent and hand the message to the owning
/// mailbox (normal messages) or the RPC response queue
fn deliver_to_mailbox(
    kernel: &Kernel,
    st: &mut KernelState,
    local: Port,
    sender_key: Port,
    msg: Msg,
    wakes: &mut WakeSet,
) {
    let Some(mbox) = st.msg.post_office.get_mut(local.0 as u64) else { return };
    if !mbox.correspondents.contains(sender_key.0 as u64) {
        let corresp = Correspondent::new(kernel, local, sender_key);
        mbox.correspondents.insert(sender_key.0 as u64, corresp);
    }
    let Mailbox { msg_arrived, msg_available, correspondents, .. } = mbox;
    let corresp = correspondents.get_mut(sender_key.0 as u64).unwrap();
    corresp.last_rcvd = msg.this_id;
    if msg.reply_to == MsgId(0) || msg.from == BROADCAST_PORT {
        msg_arrived.append(msg);
        wakes.push(msg_available.clone());
    } else {
        corresp.rsp_arrived.append(msg);
        wakes.push(corresp.rsp_available.clone());
    }
}

/// Put the correspondent's pending message on the wire and arm the
/// retransmission alarm
fn transmit(kernel: &Kernel, st: &mut KernelState, local: Port, contact: Port) {
    let (frame, dest, this_id, tries) = {
        let Some(corresp) = corresp_entry(kernel, st, local, contact) else { return };
        let Some(pending) = corresp.pending.as_ref() else { return };
        let frame = wire::encode_data(kernel.config.group_id, pending);
        let this_id = pending.this_id;
        corresp.tries += 1;
        (frame, corresp.remote, this_id, corresp.tries)
    };
    debug!("minimsg: send {} -> {} id {} (try {})", local, contact, this_id.0, tries);
    let sent = if dest.is_zero() || contact == BROADCAST_PORT {
        kernel.transport.broadcast(&frame)
    } else {
        kernel.transport.send(dest, &frame)
    };
    if let Err(e) = sent {
        debug!("minimsg: transport send failed: {}", e);
    }
    let timeout = kernel.alarm_register_locked(
        st,
        kernel.config.ack_timeout_ms,
        Box::new(move |sys| retransmit_timeout(sys, local, contact)),
    );
    if let Some(corresp) = corresp_entry(kernel, st, local, contact) {
        corresp.pending_timeout = Some(timeout);
    }
}

/// Retransmission alarm callback: resend the pending message, or give it
/// up after the retry budget and promote the next waiting message
fn retransmit_timeout(sys: &System, local: Port, contact: Port) {
    let kernel = &sys.kernel;
    let mut st = kernel.state.lock();
    let max_tries = kernel.config.max_tries;
    enum Action {
        Retransmit,
        Promote,
        Nothing,
    }
    let action = {
        let Some(corresp) = corresp_entry(kernel, &mut st, local, contact) else { return };
        if corresp.pending.is_none() {
            corresp.pending_timeout = None;
            Action::Nothing
        } else if corresp.tries >= max_tries {
            debug!(
                "minimsg: giving up on {} -> {} after {} tries",
                local, contact, corresp.tries
            );
            corresp.pending = None;
            corresp.pending_timeout = None;
            corresp.tries = 0;
            match corresp.waiting.pop_front() {
                Some(next) => {
                    corresp.pending = Some(next);
                    Action::Promote
                }
                None => Action::Nothing,
            }
        } else {
            Action::Retransmit
        }
    };
    match action {
        Action::Retransmit | Action::Promote => transmit(kernel, &mut st, local, contact),
        Action::Nothing => {}
    }
}

/// Transport arrival callback; runs on the transport's receiver context
/// with the kernel lock taken inside (interrupts masked)
pub(crate) fn handle_packet(sys: &System, arrival: PacketArrival) {
    let frame = match wire::decode(&arrival.payload) {
        Ok(frame) => frame,
        Err(e) => {
            trace!("minimsg: dropping packet: {}", e);
            return;
        }
    };
    if frame.system_id != sys.kernel.config.group_id {
        return;
    }
    match frame.packet {
        Packet::Ack(ack) => handle_ack(sys, ack, arrival.sender),
        Packet::Data(msg) => handle_data(sys, msg, arrival.sender),
    }
}

fn handle_ack(sys: &System, ack: AckHeader, addr: NetworkAddress) {
    let kernel = &sys.kernel;
    let mut st = kernel.state.lock();
    let cleared = {
        let Some(corresp) = corresp_entry(kernel, &mut st, ack.to, ack.from) else { return };
        corresp.remote = addr;
        if corresp.pending.as_ref().map(|p| p.this_id) == Some(ack.reply_to) {
            trace!("minimsg: ack for {} -> {} id {}", ack.to, ack.from, ack.reply_to.0);
            let timeout = corresp.pending_timeout.take();
            corresp.pending = None;
            corresp.tries = 0;
            match corresp.waiting.pop_front() {
                Some(next) => {
                    corresp.pending = Some(next);
                    Some((timeout, true))
                }
                None => Some((timeout, false)),
            }
        } else {
            None
        }
    };
    if let Some((timeout, has_next)) = cleared {
        if let Some(timeout) = timeout {
            kernel.alarm_deregister_locked(&mut st, timeout);
        }
        if has_next {
            transmit(kernel, &mut st, ack.to, ack.from);
        }
    }
}

fn handle_data(sys: &System, msg: Msg, addr: NetworkAddress) {
    let kernel = &sys.kernel;
    let mut wakes = WakeSet::new();
    {
        let mut st = kernel.state.lock();
        let bcast = msg.to == BROADCAST_PORT;
        let local = if bcast { st.msg.system_port } else { msg.to };
        let contact_key = if bcast { BROADCAST_PORT } else { msg.from };
        if !st.msg.post_office.contains(local.0 as u64) {
            // no live mailbox for this port
            return;
        }
        debug!("minimsg: recv {} -> {} id {}", msg.from, msg.to, msg.this_id.0);
        // always acknowledge, even duplicates: the sender may have missed
        // the first ack
        let ack = AckHeader { to: msg.from, from: msg.to, reply_to: msg.this_id };
        let frame = wire::encode_ack(kernel.config.group_id, &ack);
        if let Err(e) = kernel.transport.send(addr, &frame) {
            debug!("minimsg: ack send failed: {}", e);
        }
        let mut msg = msg;
        if bcast {
            // rewrite a private copy so the receiver sees the logical
            // sender; the arrival buffer itself is never aliased
            msg.reply_to = MsgId(msg.from.0);
            msg.from = BROADCAST_PORT;
            msg.to = local;
        }
        let fresh = {
            let Some(corresp) = corresp_entry(kernel, &mut st, local, contact_key) else { return };
            if msg.this_id > corresp.last_rcvd {
                corresp.remote = addr;
                true
            } else {
                trace!("minimsg: duplicate id {} from {}", msg.this_id.0, msg.from);
                false
            }
        };
        if fresh {
            deliver_to_mailbox(kernel, &mut st, local, contact_key, msg, &mut wakes);
        }
    }
    wakes.run();
}
