//! UDP transport
//!
//! Binds the first free port in a small range and treats the other port in
//! the range as the peer, which is how two runtimes on one host find each
//! other. A receiver thread dispatches arrivals to the installed handler.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, trace};
use parking_lot::Mutex;

use super::{NetworkAddress, PacketArrival, PacketHandler, Transport, MAX_PKT_SIZE};
use crate::error::{NetError, SystemResult};

/// First UDP port tried by [`UdpTransport::bind_default`]
pub const DEFAULT_PORT_START: u16 = 8053;
const DEFAULT_PORT_COUNT: u16 = 2;

/// Datagram transport over a UDP socket
pub struct UdpTransport {
    socket: UdpSocket,
    local: NetworkAddress,
    my_port: u16,
    peer_port: u16,
    handler: Arc<Mutex<Option<PacketHandler>>>,
    next_token: Mutex<u32>,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<thread::JoinHandle<()>>>,
}

impl UdpTransport {
    /// Bind within the default two-port range
    pub fn bind_default() -> SystemResult<Arc<UdpTransport>> {
        Self::bind(DEFAULT_PORT_START, DEFAULT_PORT_COUNT)
    }

    /// Bind the first free port in `[port_start, port_start + count)`
    pub fn bind(port_start: u16, count: u16) -> SystemResult<Arc<UdpTransport>> {
        let mut bound = None;
        for port in port_start..port_start + count {
            if let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)) {
                bound = Some((socket, port));
                break;
            }
        }
        let (socket, my_port) =
            bound.ok_or(NetError::NoFreePort(port_start, port_start + count))?;
        socket.set_read_timeout(Some(Duration::from_millis(20)))?;
        let peer_port = if my_port == port_start { port_start + 1 } else { port_start };
        let local = NetworkAddress::from_udp(Ipv4Addr::LOCALHOST, my_port);
        debug!("udp: bound {} (peer port {})", my_port, peer_port);

        let handler: Arc<Mutex<Option<PacketHandler>>> = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let receiver = {
            let socket = socket.try_clone()?;
            let handler = Arc::clone(&handler);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("minisys-udp-rx".to_string())
                .spawn(move || {
                    let mut buf = [0u8; MAX_PKT_SIZE];
                    loop {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        match socket.recv_from(&mut buf) {
                            Ok((len, SocketAddr::V4(src))) => {
                                let arrival = PacketArrival {
                                    sender: NetworkAddress::from_udp(*src.ip(), src.port()),
                                    payload: buf[..len].to_vec(),
                                };
                                if let Some(handler) = handler.lock().as_ref() {
                                    handler(arrival);
                                }
                            }
                            Ok(_) => trace!("udp: ignoring non-IPv4 arrival"),
                            Err(e)
                                if e.kind() == io::ErrorKind::WouldBlock
                                    || e.kind() == io::ErrorKind::TimedOut =>
                            {
                                continue;
                            }
                            Err(e) => {
                                trace!("udp: recv error: {}", e);
                            }
                        }
                    }
                })
                .expect("failed to start udp receiver")
        };

        Ok(Arc::new(UdpTransport {
            socket,
            local,
            my_port,
            peer_port,
            handler,
            next_token: Mutex::new(0),
            running,
            receiver: Mutex::new(Some(receiver)),
        }))
    }

    /// The UDP port this transport is bound to
    pub fn port(&self) -> u16 {
        self.my_port
    }
}

impl Transport for UdpTransport {
    fn install_handler(&self, handler: PacketHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn remove_handler(&self) {
        *self.handler.lock() = None;
    }

    fn send(&self, dest: NetworkAddress, payload: &[u8]) -> io::Result<usize> {
        match dest.to_udp() {
            Some(sock) => self.socket.send_to(payload, sock),
            None => Err(io::Error::new(io::ErrorKind::InvalidInput, "zero address")),
        }
    }

    fn broadcast(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, (Ipv4Addr::LOCALHOST, self.peer_port))
    }

    fn reserve_next_token(&self) -> u32 {
        let mut token = self.next_token.lock();
        if *token == 0 {
            let last_octet = Ipv4Addr::LOCALHOST.octets()[3] as i64;
            let diff = self.my_port as i64 - self.peer_port as i64;
            *token = (last_octet * 2000 + diff * 200 + 2).max(2) as u32;
        } else {
            *token += 1;
        }
        *token
    }

    fn local_address(&self) -> NetworkAddress {
        self.local
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receiver.lock().take() {
            let _ = handle.join();
        }
    }
}
