//! Network operations capability for the DoIP stack
//!
//! The protocol core never touches sockets directly; it talks to whatever
//! implements [NetworkOps]. Two implementations are provided:
//! * [StdNetworkOps] - non-blocking BSD sockets via `std::net`
//! * [SimulationNetwork] - in-memory network for unit testing servers

use std::net::SocketAddr;

mod simulation;
mod std_net;

pub use simulation::{SimPeer, SimulationNetwork};
pub use std_net::StdNetworkOps;

/// Network operation result
pub type NetResult<T> = Result<T, NetError>;

/// Error produced by a [NetworkOps] implementation
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The operation would block; retry on the next polling cycle
    #[error("operation would block")]
    WouldBlock,
    /// The socket handle does not refer to an open socket
    #[error("invalid socket handle")]
    InvalidSocket,
    /// Underlying IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque handle to a socket owned by a [NetworkOps] implementation
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SocketHandle(pub(crate) usize);

impl SocketHandle {
    /// Raw slot value of the handle. Only meaningful to the implementation
    /// that issued it
    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Non-blocking datagram and stream socket primitives.
///
/// Every operation must return immediately: reads with nothing pending and
/// accepts with no queued connection report [NetError::WouldBlock] instead of
/// blocking. A `tcp_recv` returning `Ok(0)` signals an orderly close by the
/// peer. `tcp_send` may write fewer bytes than requested; callers are
/// expected to continue with the remainder.
pub trait NetworkOps {
    /// Binds a UDP socket to the wildcard address on `port` with broadcast
    /// enabled. A port of 0 asks for an ephemeral port
    fn udp_bind(&mut self, port: u16) -> NetResult<SocketHandle>;

    /// Sends a single datagram to `dest`
    fn udp_send_to(
        &mut self,
        sock: SocketHandle,
        data: &[u8],
        dest: SocketAddr,
    ) -> NetResult<usize>;

    /// Receives a single datagram, returning the byte count and the sender
    fn udp_recv_from(
        &mut self,
        sock: SocketHandle,
        buf: &mut [u8],
    ) -> NetResult<(usize, SocketAddr)>;

    /// Opens a listening TCP socket on `port` (backlog of at least 5)
    fn tcp_listen(&mut self, port: u16) -> NetResult<SocketHandle>;

    /// Accepts one pending connection. The returned socket is non-blocking
    fn tcp_accept(&mut self, listen: SocketHandle) -> NetResult<SocketHandle>;

    /// Opens an outgoing TCP connection to `dest` (tester role)
    fn tcp_connect(&mut self, dest: SocketAddr) -> NetResult<SocketHandle>;

    /// Writes up to `data.len()` bytes, returning how many were accepted
    fn tcp_send(&mut self, sock: SocketHandle, data: &[u8]) -> NetResult<usize>;

    /// Reads pending bytes. `Ok(0)` means the peer closed the connection
    fn tcp_recv(&mut self, sock: SocketHandle, buf: &mut [u8]) -> NetResult<usize>;

    /// Closes a socket. Closing an already closed handle is a no-op
    fn close(&mut self, sock: SocketHandle);
}
