//! Simulation network for unit testing DoIP servers and testers
//!
//! The simulated sockets honor the same contracts as the real ones:
//! reads with nothing pending return [NetError::WouldBlock], an orderly peer
//! close is reported as a 0-byte read, and writes can be forced short to
//! exercise partial-write handling.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use super::{NetError, NetResult, NetworkOps, SocketHandle};

#[derive(Debug)]
enum SimSocket {
    Udp {
        rx: VecDeque<(SocketAddr, Vec<u8>)>,
        tx: Vec<(SocketAddr, Vec<u8>)>,
    },
    Listener,
    Stream {
        rx: VecDeque<Vec<u8>>,
        tx: Vec<u8>,
        peer_closed: bool,
        max_write: Option<usize>,
        fail_sends: bool,
    },
}

impl SimSocket {
    fn stream() -> Self {
        SimSocket::Stream {
            rx: VecDeque::new(),
            tx: Vec::new(),
            peer_closed: false,
            max_write: None,
            fail_sends: false,
        }
    }
}

#[derive(Debug, Default)]
struct SimInner {
    sockets: Vec<Option<SimSocket>>,
    pending_accepts: VecDeque<usize>,
    last_outgoing: Option<usize>,
}

impl SimInner {
    fn alloc(&mut self, socket: SimSocket) -> usize {
        self.sockets.push(Some(socket));
        self.sockets.len() - 1
    }
}

/// In-memory [NetworkOps] implementation.
///
/// Cloning yields another handle to the same simulated network, so a test
/// can keep one clone for itself while the server under test owns the other
#[derive(Debug, Clone, Default)]
pub struct SimulationNetwork {
    inner: Arc<Mutex<SimInner>>,
}

impl SimulationNetwork {
    /// Creates an empty simulated network
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a datagram for delivery to the first bound UDP socket
    pub fn push_udp_datagram(&self, src: SocketAddr, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        for socket in inner.sockets.iter_mut().flatten() {
            if let SimSocket::Udp { rx, .. } = socket {
                rx.push_back((src, data.to_vec()));
                return;
            }
        }
        panic!("no UDP socket bound in simulation");
    }

    /// Drains every datagram sent so far, with its destination address
    pub fn take_udp_sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for socket in inner.sockets.iter_mut().flatten() {
            if let SimSocket::Udp { tx, .. } = socket {
                out.append(tx);
            }
        }
        out
    }

    /// Opens a simulated inbound TCP connection. The connection becomes
    /// visible to the server on its next `tcp_accept` poll
    pub fn connect_peer(&self) -> SimPeer {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.alloc(SimSocket::stream());
        inner.pending_accepts.push_back(id);
        SimPeer {
            net: self.clone(),
            id,
        }
    }

    /// Peer-side view of an arbitrary stream socket
    pub fn peer_for(&self, sock: SocketHandle) -> SimPeer {
        SimPeer {
            net: self.clone(),
            id: sock.0,
        }
    }

    /// Peer-side view of the most recent outgoing `tcp_connect` socket
    pub fn last_outgoing_peer(&self) -> Option<SimPeer> {
        let id = self.inner.lock().unwrap().last_outgoing?;
        Some(SimPeer {
            net: self.clone(),
            id,
        })
    }
}

impl NetworkOps for SimulationNetwork {
    fn udp_bind(&mut self, _port: u16) -> NetResult<SocketHandle> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.alloc(SimSocket::Udp {
            rx: VecDeque::new(),
            tx: Vec::new(),
        });
        Ok(SocketHandle(id))
    }

    fn udp_send_to(
        &mut self,
        sock: SocketHandle,
        data: &[u8],
        dest: SocketAddr,
    ) -> NetResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sockets.get_mut(sock.0).and_then(Option::as_mut) {
            Some(SimSocket::Udp { tx, .. }) => {
                tx.push((dest, data.to_vec()));
                Ok(data.len())
            }
            _ => Err(NetError::InvalidSocket),
        }
    }

    fn udp_recv_from(
        &mut self,
        sock: SocketHandle,
        buf: &mut [u8],
    ) -> NetResult<(usize, SocketAddr)> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sockets.get_mut(sock.0).and_then(Option::as_mut) {
            Some(SimSocket::Udp { rx, .. }) => match rx.pop_front() {
                Some((src, data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok((n, src))
                }
                None => Err(NetError::WouldBlock),
            },
            _ => Err(NetError::InvalidSocket),
        }
    }

    fn tcp_listen(&mut self, _port: u16) -> NetResult<SocketHandle> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.alloc(SimSocket::Listener);
        Ok(SocketHandle(id))
    }

    fn tcp_accept(&mut self, listen: SocketHandle) -> NetResult<SocketHandle> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sockets.get(listen.0).and_then(Option::as_ref) {
            Some(SimSocket::Listener) => {}
            _ => return Err(NetError::InvalidSocket),
        }
        match inner.pending_accepts.pop_front() {
            Some(id) => Ok(SocketHandle(id)),
            None => Err(NetError::WouldBlock),
        }
    }

    fn tcp_connect(&mut self, _dest: SocketAddr) -> NetResult<SocketHandle> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.alloc(SimSocket::stream());
        inner.last_outgoing = Some(id);
        Ok(SocketHandle(id))
    }

    fn tcp_send(&mut self, sock: SocketHandle, data: &[u8]) -> NetResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sockets.get_mut(sock.0).and_then(Option::as_mut) {
            Some(SimSocket::Stream {
                tx,
                max_write,
                fail_sends,
                ..
            }) => {
                if *fail_sends {
                    return Err(NetError::Io(std::io::Error::from(
                        std::io::ErrorKind::BrokenPipe,
                    )));
                }
                let n = max_write.map_or(data.len(), |m| m.min(data.len()));
                tx.extend_from_slice(&data[..n]);
                Ok(n)
            }
            _ => Err(NetError::InvalidSocket),
        }
    }

    fn tcp_recv(&mut self, sock: SocketHandle, buf: &mut [u8]) -> NetResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sockets.get_mut(sock.0).and_then(Option::as_mut) {
            Some(SimSocket::Stream {
                rx, peer_closed, ..
            }) => match rx.pop_front() {
                Some(mut chunk) => {
                    if chunk.len() > buf.len() {
                        let rest = chunk.split_off(buf.len());
                        rx.push_front(rest);
                    }
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None if *peer_closed => Ok(0),
                None => Err(NetError::WouldBlock),
            },
            _ => Err(NetError::InvalidSocket),
        }
    }

    fn close(&mut self, sock: SocketHandle) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.sockets.get_mut(sock.0) {
            *slot = None;
        }
    }
}

/// Test-side handle to one simulated TCP stream
#[derive(Debug, Clone)]
pub struct SimPeer {
    net: SimulationNetwork,
    id: usize,
}

impl SimPeer {
    fn with_stream<R>(&self, f: impl FnOnce(&mut VecDeque<Vec<u8>>, &mut Vec<u8>, &mut bool, &mut Option<usize>, &mut bool) -> R) -> Option<R> {
        let mut inner = self.net.inner.lock().unwrap();
        match inner.sockets.get_mut(self.id).and_then(Option::as_mut) {
            Some(SimSocket::Stream {
                rx,
                tx,
                peer_closed,
                max_write,
                fail_sends,
            }) => Some(f(rx, tx, peer_closed, max_write, fail_sends)),
            _ => None,
        }
    }

    /// Queues bytes for the server to read as one chunk
    pub fn send(&self, data: &[u8]) {
        self.with_stream(|rx, _, _, _, _| rx.push_back(data.to_vec()));
    }

    /// Queues bytes split into chunks of at most `chunk_size` bytes, so each
    /// poll of the server observes one fragment
    pub fn send_chunked(&self, data: &[u8], chunk_size: usize) {
        self.with_stream(|rx, _, _, _, _| {
            for chunk in data.chunks(chunk_size) {
                rx.push_back(chunk.to_vec());
            }
        });
    }

    /// Drains everything the server has written to this connection
    pub fn received(&self) -> Vec<u8> {
        self.with_stream(|_, tx, _, _, _| std::mem::take(tx))
            .unwrap_or_default()
    }

    /// Signals an orderly close; the server's next read returns 0 bytes
    pub fn close(&self) {
        self.with_stream(|_, _, peer_closed, _, _| *peer_closed = true);
    }

    /// Caps how many bytes each server-side `tcp_send` call accepts
    pub fn set_max_write(&self, limit: Option<usize>) {
        self.with_stream(|_, _, _, max_write, _| *max_write = limit);
    }

    /// Makes every server-side `tcp_send` on this stream fail
    pub fn set_send_error(&self, fail: bool) {
        self.with_stream(|_, _, _, _, fail_sends| *fail_sends = fail);
    }

    /// True while the server side still holds the socket open
    pub fn is_open(&self) -> bool {
        let inner = self.net.inner.lock().unwrap();
        matches!(
            inner.sockets.get(self.id).and_then(Option::as_ref),
            Some(SimSocket::Stream { .. })
        )
    }
}
