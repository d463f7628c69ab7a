//! In-memory transport hub
//!
//! Endpoints created from one hub deliver to each other through per-endpoint
//! channels and a delivery thread, so a send never runs the destination's
//! arrival handler on the sender's stack. The hub can drop a configurable
//! fraction of packets to exercise the ack/retry protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::trace;
use parking_lot::Mutex;
use rand::Rng;

use super::{NetworkAddress, PacketArrival, PacketHandler, Transport};

struct EndpointSlot {
    addr: NetworkAddress,
    tx: Sender<PacketArrival>,
}

struct HubInner {
    endpoints: Mutex<Vec<EndpointSlot>>,
    loss_rate: f64,
}

impl HubInner {
    fn lossy_drop(&self) -> bool {
        self.loss_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.loss_rate
    }
}

/// Shared in-memory broadcast segment
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    /// Create a lossless hub
    pub fn new() -> Self {
        Self::with_loss(0.0)
    }

    /// Create a hub that drops roughly `loss_rate` of all packets
    pub fn with_loss(loss_rate: f64) -> Self {
        LoopbackHub { inner: Arc::new(HubInner { endpoints: Mutex::new(Vec::new()), loss_rate }) }
    }

    /// Attach a new endpoint to the hub
    pub fn endpoint(&self) -> Arc<LoopbackTransport> {
        let (tx, rx) = unbounded::<PacketArrival>();
        let index = {
            let mut endpoints = self.inner.endpoints.lock();
            let index = endpoints.len();
            endpoints.push(EndpointSlot { addr: NetworkAddress::from_index(index), tx });
            index
        };
        let handler: Arc<Mutex<Option<PacketHandler>>> = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let delivery = {
            let handler = Arc::clone(&handler);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(format!("loopback-rx-{}", index))
                .spawn(move || loop {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    match rx.recv_timeout(Duration::from_millis(20)) {
                        Ok(arrival) => {
                            if let Some(handler) = handler.lock().as_ref() {
                                handler(arrival);
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                })
                .expect("failed to start loopback receiver")
        };
        Arc::new(LoopbackTransport {
            hub: Arc::clone(&self.inner),
            addr: NetworkAddress::from_index(index),
            index,
            handler,
            next_token: Mutex::new(0),
            running,
            delivery: Mutex::new(Some(delivery)),
        })
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint on a [`LoopbackHub`]
pub struct LoopbackTransport {
    hub: Arc<HubInner>,
    addr: NetworkAddress,
    index: usize,
    handler: Arc<Mutex<Option<PacketHandler>>>,
    next_token: Mutex<u32>,
    running: Arc<AtomicBool>,
    delivery: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Transport for LoopbackTransport {
    fn install_handler(&self, handler: PacketHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn remove_handler(&self) {
        *self.handler.lock() = None;
    }

    fn send(&self, dest: NetworkAddress, payload: &[u8]) -> std::io::Result<usize> {
        if self.hub.lossy_drop() {
            trace!("loopback: dropped packet to {}", dest);
            return Ok(payload.len());
        }
        let endpoints = self.hub.endpoints.lock();
        if let Some(slot) = endpoints.iter().find(|s| s.addr == dest) {
            let _ = slot.tx.send(PacketArrival { sender: self.addr, payload: payload.to_vec() });
        }
        Ok(payload.len())
    }

    fn broadcast(&self, payload: &[u8]) -> std::io::Result<usize> {
        let endpoints = self.hub.endpoints.lock();
        for slot in endpoints.iter().filter(|s| s.addr != self.addr) {
            if self.hub.lossy_drop() {
                trace!("loopback: dropped broadcast packet to {}", slot.addr);
                continue;
            }
            let _ = slot.tx.send(PacketArrival { sender: self.addr, payload: payload.to_vec() });
        }
        Ok(payload.len())
    }

    fn reserve_next_token(&self) -> u32 {
        let mut token = self.next_token.lock();
        if *token == 0 {
            *token = (self.index as u32 + 1) * 2000 + 2;
        } else {
            *token += 1;
        }
        *token
    }

    fn local_address(&self) -> NetworkAddress {
        self.addr
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.delivery.lock().take() {
            let _ = handle.join();
        }
    }
}
