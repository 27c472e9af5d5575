//! [NetworkOps] over non-blocking `std::net` sockets

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};

use log::debug;

use super::{NetError, NetResult, NetworkOps, SocketHandle};

#[derive(Debug)]
enum Socket {
    Udp(UdpSocket),
    Listener(TcpListener),
    Stream(TcpStream),
}

/// [NetworkOps] implementation over the host's BSD socket API.
///
/// All sockets are switched to non-blocking mode on creation;
/// `io::ErrorKind::WouldBlock` maps to [NetError::WouldBlock]
#[derive(Debug, Default)]
pub struct StdNetworkOps {
    sockets: HashMap<usize, Socket>,
    next_handle: usize,
}

impl StdNetworkOps {
    /// Creates an empty socket table
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, socket: Socket) -> SocketHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.sockets.insert(handle, socket);
        SocketHandle(handle)
    }

    fn udp(&mut self, sock: SocketHandle) -> NetResult<&mut UdpSocket> {
        match self.sockets.get_mut(&sock.0) {
            Some(Socket::Udp(s)) => Ok(s),
            _ => Err(NetError::InvalidSocket),
        }
    }

    fn stream(&mut self, sock: SocketHandle) -> NetResult<&mut TcpStream> {
        match self.sockets.get_mut(&sock.0) {
            Some(Socket::Stream(s)) => Ok(s),
            _ => Err(NetError::InvalidSocket),
        }
    }
}

fn map_io(e: io::Error) -> NetError {
    if e.kind() == io::ErrorKind::WouldBlock {
        NetError::WouldBlock
    } else {
        NetError::Io(e)
    }
}

impl NetworkOps for StdNetworkOps {
    fn udp_bind(&mut self, port: u16) -> NetResult<SocketHandle> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;
        debug!("UDP socket bound on port {}", port);
        Ok(self.insert(Socket::Udp(socket)))
    }

    fn udp_send_to(
        &mut self,
        sock: SocketHandle,
        data: &[u8],
        dest: SocketAddr,
    ) -> NetResult<usize> {
        self.udp(sock)?.send_to(data, dest).map_err(map_io)
    }

    fn udp_recv_from(
        &mut self,
        sock: SocketHandle,
        buf: &mut [u8],
    ) -> NetResult<(usize, SocketAddr)> {
        self.udp(sock)?.recv_from(buf).map_err(map_io)
    }

    fn tcp_listen(&mut self, port: u16) -> NetResult<SocketHandle> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
        listener.set_nonblocking(true)?;
        debug!("TCP listen socket open on port {}", port);
        Ok(self.insert(Socket::Listener(listener)))
    }

    fn tcp_accept(&mut self, listen: SocketHandle) -> NetResult<SocketHandle> {
        let listener = match self.sockets.get_mut(&listen.0) {
            Some(Socket::Listener(l)) => l,
            _ => return Err(NetError::InvalidSocket),
        };
        let (stream, peer) = listener.accept().map_err(map_io)?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        debug!("accepted TCP connection from {}", peer);
        Ok(self.insert(Socket::Stream(stream)))
    }

    fn tcp_connect(&mut self, dest: SocketAddr) -> NetResult<SocketHandle> {
        let stream = TcpStream::connect(dest)?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(self.insert(Socket::Stream(stream)))
    }

    fn tcp_send(&mut self, sock: SocketHandle, data: &[u8]) -> NetResult<usize> {
        use std::io::Write;
        self.stream(sock)?.write(data).map_err(map_io)
    }

    fn tcp_recv(&mut self, sock: SocketHandle, buf: &mut [u8]) -> NetResult<usize> {
        use std::io::Read;
        self.stream(sock)?.read(buf).map_err(map_io)
    }

    fn close(&mut self, sock: SocketHandle) {
        if self.sockets.remove(&sock.0).is_some() {
            debug!("closed socket {}", sock.raw());
        }
    }
}
