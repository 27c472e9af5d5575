//! Socket ownership and per-connection frame reassembly for a DoIP node
//!
//! [DoipInterface] owns one UDP socket, one TCP listen socket and a fixed
//! pool of tester connections. One [DoipInterface::process] call performs a
//! single polling iteration: one UDP receive, one accept, then one receive
//! per open connection with DoIP frame reassembly. Complete frames are
//! handed to an [InterfaceEvents] implementation as borrows into the
//! connection's own receive buffer.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use log::{debug, warn};

use crate::netops::{NetError, NetworkOps, SocketHandle};
use crate::protocol::{HEADER_SIZE, MAX_PAYLOAD_SIZE, decode_header};
use crate::{DoipError, DoipResult};

/// UDP port for vehicle discovery and announcements
pub const DOIP_UDP_DISCOVERY_PORT: u16 = 13400;
/// TCP port for diagnostic data
pub const DOIP_TCP_DATA_PORT: u16 = 13400;
/// Size of the tester connection pool
pub const DOIP_MAX_CONNECTIONS: usize = 8;
/// Per-connection receive buffer size; holds one maximum-size DoIP message
pub const DOIP_RX_BUFFER_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// Callbacks invoked by [DoipInterface::process].
///
/// `on_tcp_frame` is invoked exactly once per complete DoIP message, in
/// arrival order, with a contiguous `[header || payload]` view. The borrow
/// must not be retained past the callback; the buffer is compacted once the
/// callback returns
pub trait InterfaceEvents<N: NetworkOps> {
    /// One UDP datagram arrived from `src`
    fn on_udp_datagram(&mut self, udp: &mut UdpSender<'_, N>, src: SocketAddr, data: &[u8]);
    /// One complete DoIP message arrived on connection `conn_id`
    fn on_tcp_frame(&mut self, tcp: &mut TcpSender<'_, N>, conn_id: usize, frame: &[u8]);
    /// A tester connection was accepted into slot `conn_id`
    fn on_tcp_connected(&mut self, conn_id: usize);
    /// Connection `conn_id` is gone (peer close, transport fault or local
    /// close during a callback)
    fn on_tcp_disconnected(&mut self, conn_id: usize);
}

/// Send capability for the UDP socket, valid for the duration of one
/// callback
#[derive(Debug)]
pub struct UdpSender<'a, N: NetworkOps> {
    ops: &'a mut N,
    socket: SocketHandle,
}

impl<N: NetworkOps> UdpSender<'_, N> {
    /// Sends one datagram to `dest`
    pub fn send_to(&mut self, dest: SocketAddr, data: &[u8]) -> DoipResult<()> {
        self.ops.udp_send_to(self.socket, data, dest)?;
        Ok(())
    }
}

/// Send capability for one TCP connection, valid for the duration of one
/// callback.
///
/// A hard transport failure is remembered; the interface closes the
/// connection and fires the disconnect callback once the RX callback returns
#[derive(Debug)]
pub struct TcpSender<'a, N: NetworkOps> {
    ops: &'a mut N,
    socket: SocketHandle,
    failed: bool,
}

impl<N: NetworkOps> TcpSender<'_, N> {
    /// Sends a complete buffer over the connection, looping over short
    /// writes
    pub fn send(&mut self, data: &[u8]) -> DoipResult<()> {
        if self.failed {
            return Err(DoipError::NotReady);
        }
        match send_all(self.ops, self.socket, data) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }
}

/// Writes the whole buffer, continuing over short writes. A send that cannot
/// make progress is a transport fault: the frame boundary would be lost, so
/// the caller must close the connection.
fn send_all<N: NetworkOps>(ops: &mut N, socket: SocketHandle, data: &[u8]) -> DoipResult<()> {
    let mut offset = 0;
    while offset < data.len() {
        match ops.tcp_send(socket, &data[offset..]) {
            Ok(0) => {
                return Err(DoipError::Network(NetError::Io(std::io::Error::from(
                    std::io::ErrorKind::WriteZero,
                ))));
            }
            Ok(n) => offset += n,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[derive(Debug)]
struct TcpSlot {
    socket: Option<SocketHandle>,
    rx_buffer: Vec<u8>,
    rx_used: usize,
}

impl TcpSlot {
    fn new() -> Self {
        Self {
            socket: None,
            rx_buffer: vec![0; DOIP_RX_BUFFER_SIZE],
            rx_used: 0,
        }
    }
}

/// Network interface of a DoIP node: sockets, connection pool and frame
/// reassembly
#[derive(Debug)]
pub struct DoipInterface<N: NetworkOps> {
    ops: N,
    udp_socket: Option<SocketHandle>,
    tcp_listen_socket: Option<SocketHandle>,
    connections: Vec<TcpSlot>,
    connection_limit: usize,
    udp_rx_buffer: Vec<u8>,
}

impl<N: NetworkOps> DoipInterface<N> {
    /// Creates an interface over the given network operations with an empty
    /// connection pool
    pub fn new(ops: N) -> Self {
        Self {
            ops,
            udp_socket: None,
            tcp_listen_socket: None,
            connections: (0..DOIP_MAX_CONNECTIONS).map(|_| TcpSlot::new()).collect(),
            connection_limit: DOIP_MAX_CONNECTIONS,
            udp_rx_buffer: vec![0; DOIP_RX_BUFFER_SIZE],
        }
    }

    /// Caps the number of simultaneously open tester connections. Clamped to
    /// the pool size
    pub fn set_connection_limit(&mut self, limit: usize) {
        self.connection_limit = limit.clamp(1, DOIP_MAX_CONNECTIONS);
    }

    /// Binds the UDP discovery socket
    pub fn start_udp(&mut self, port: u16) -> DoipResult<()> {
        self.udp_socket = Some(self.ops.udp_bind(port)?);
        Ok(())
    }

    /// Opens the TCP listen socket for incoming tester connections
    pub fn start_tcp_server(&mut self, port: u16) -> DoipResult<()> {
        self.tcp_listen_socket = Some(self.ops.tcp_listen(port)?);
        Ok(())
    }

    /// Broadcasts one datagram to 255.255.255.255 on `port`
    pub fn udp_broadcast(&mut self, data: &[u8], port: u16) -> DoipResult<()> {
        let dest = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));
        self.udp_send(dest, data)
    }

    /// Sends one datagram to `dest`
    pub fn udp_send(&mut self, dest: SocketAddr, data: &[u8]) -> DoipResult<()> {
        let socket = self.udp_socket.ok_or(DoipError::NotReady)?;
        self.ops.udp_send_to(socket, data, dest)?;
        Ok(())
    }

    /// Opens an outgoing connection to `dest` and places it in a free pool
    /// slot (tester role).
    ///
    /// ## Returns
    /// The connection id of the new connection
    pub fn connect(&mut self, dest: SocketAddr) -> DoipResult<usize> {
        let conn_id = self
            .free_slot()
            .ok_or(DoipError::NotReady)?;
        let socket = self.ops.tcp_connect(dest)?;
        self.connections[conn_id].socket = Some(socket);
        self.connections[conn_id].rx_used = 0;
        Ok(conn_id)
    }

    /// Sends a complete buffer over connection `conn_id`, looping over short
    /// writes. A transport fault closes the connection before the error is
    /// returned
    pub fn tcp_send(&mut self, conn_id: usize, data: &[u8]) -> DoipResult<()> {
        if conn_id >= self.connections.len() {
            return Err(DoipError::InvalidParam);
        }
        let socket = self.connections[conn_id].socket.ok_or(DoipError::NotReady)?;
        match send_all(&mut self.ops, socket, data) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("TCP send fault on connection {}, closing: {}", conn_id, e);
                self.close_connection(conn_id);
                Err(e)
            }
        }
    }

    /// Closes connection `conn_id` and frees its slot. Closing a free slot
    /// is a no-op
    pub fn close_connection(&mut self, conn_id: usize) {
        if let Some(slot) = self.connections.get_mut(conn_id) {
            if let Some(socket) = slot.socket.take() {
                self.ops.close(socket);
                slot.rx_used = 0;
            }
        }
    }

    /// True while connection `conn_id` holds an open socket
    pub fn is_open(&self, conn_id: usize) -> bool {
        self.connections
            .get(conn_id)
            .is_some_and(|c| c.socket.is_some())
    }

    fn free_slot(&self) -> Option<usize> {
        let open = self.connections.iter().filter(|c| c.socket.is_some()).count();
        if open >= self.connection_limit {
            return None;
        }
        self.connections.iter().position(|c| c.socket.is_none())
    }

    /// Drives one polling iteration, delivering everything that arrived
    /// since the last call to `events`
    pub fn process<E: InterfaceEvents<N>>(&mut self, events: &mut E) -> DoipResult<()> {
        let accept_slot = if self.tcp_listen_socket.is_some() {
            self.free_slot()
        } else {
            None
        };

        let Self {
            ops,
            udp_socket,
            tcp_listen_socket,
            connections,
            udp_rx_buffer,
            ..
        } = self;

        // UDP ingest, one datagram per iteration
        if let Some(udp) = *udp_socket {
            match ops.udp_recv_from(udp, udp_rx_buffer) {
                Ok((n, src)) if n > 0 => {
                    let data = &udp_rx_buffer[..n];
                    let mut sender = UdpSender {
                        ops: &mut *ops,
                        socket: udp,
                    };
                    events.on_udp_datagram(&mut sender, src, data);
                }
                Ok(_) => {}
                Err(NetError::WouldBlock) => {}
                Err(e) => warn!("UDP receive error: {}", e),
            }
        }

        // Accept one pending tester connection
        if let Some(listen) = *tcp_listen_socket {
            match ops.tcp_accept(listen) {
                Ok(socket) => match accept_slot {
                    Some(conn_id) => {
                        connections[conn_id].socket = Some(socket);
                        connections[conn_id].rx_used = 0;
                        debug!("tester connection accepted on slot {}", conn_id);
                        events.on_tcp_connected(conn_id);
                    }
                    None => {
                        warn!("connection pool exhausted, rejecting tester");
                        ops.close(socket);
                    }
                },
                Err(NetError::WouldBlock) => {}
                Err(e) => warn!("TCP accept error: {}", e),
            }
        }

        // Per-connection ingest and reassembly
        for conn_id in 0..connections.len() {
            let conn = &mut connections[conn_id];
            let Some(socket) = conn.socket else { continue };

            let used = conn.rx_used;
            match ops.tcp_recv(socket, &mut conn.rx_buffer[used..]) {
                Ok(0) => {
                    debug!("connection {} closed by peer", conn_id);
                    events.on_tcp_disconnected(conn_id);
                    ops.close(socket);
                    conn.socket = None;
                    conn.rx_used = 0;
                }
                Ok(n) => {
                    conn.rx_used += n;
                    while conn.rx_used >= HEADER_SIZE {
                        // Cannot fail with a full header present
                        let header = decode_header(&conn.rx_buffer[..HEADER_SIZE])?;
                        if header.payload_length as usize > MAX_PAYLOAD_SIZE {
                            warn!(
                                "connection {} claimed payload of {} bytes, closing",
                                conn_id, header.payload_length
                            );
                            events.on_tcp_disconnected(conn_id);
                            ops.close(socket);
                            conn.socket = None;
                            conn.rx_used = 0;
                            break;
                        }
                        let total = HEADER_SIZE + header.payload_length as usize;
                        if conn.rx_used < total {
                            // Incomplete message, wait for more data
                            break;
                        }

                        let frame = &conn.rx_buffer[..total];
                        let mut sender = TcpSender {
                            ops: &mut *ops,
                            socket,
                            failed: false,
                        };
                        events.on_tcp_frame(&mut sender, conn_id, frame);
                        if sender.failed {
                            warn!("send fault during RX callback, closing connection {}", conn_id);
                            events.on_tcp_disconnected(conn_id);
                            ops.close(socket);
                            conn.socket = None;
                            conn.rx_used = 0;
                            break;
                        }

                        conn.rx_buffer.copy_within(total..conn.rx_used, 0);
                        conn.rx_used -= total;
                    }
                }
                Err(NetError::WouldBlock) => {
                    // No data; the inactivity timers decide when to give up
                }
                Err(e) => {
                    warn!("TCP receive error on connection {}: {}", conn_id, e);
                    events.on_tcp_disconnected(conn_id);
                    ops.close(socket);
                    conn.socket = None;
                    conn.rx_used = 0;
                }
            }
        }

        Ok(())
    }
}
