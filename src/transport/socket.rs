//! Async UDP socket for the streaming session.
//!
//! The socket is an owned resource: dropping the last handle closes it, so
//! every exit path of the network loop releases the port.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::core::constants::MAX_DATAGRAM_SIZE;

use super::packet::Packet;

/// Session UDP socket with broadcast enabled.
#[derive(Debug, Clone)]
pub struct SessionSocket {
    socket: Arc<UdpSocket>,
}

impl SessionSocket {
    /// Bind to `addr` and enable broadcast.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Self::from_socket(socket)
    }

    /// Wrap an existing UDP socket, enabling broadcast on it.
    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        socket.set_broadcast(true)?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Get the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send raw bytes to `addr`.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr).await
    }

    /// Encode and send a packet to `addr`.
    pub async fn send_packet(&self, packet: &Packet<'_>, addr: SocketAddr) -> io::Result<usize> {
        self.send_to(&packet.encode(), addr).await
    }

    /// Receive one datagram into `buf`.
    ///
    /// Returns the received bytes and the sender's address.
    pub async fn recv_from<'b>(&self, buf: &'b mut [u8]) -> io::Result<(&'b [u8], SocketAddr)> {
        let (len, addr) = self.socket.recv_from(buf).await?;
        Ok((&buf[..len], addr))
    }

    /// Get a reference to the underlying socket.
    pub fn inner(&self) -> &UdpSocket {
        &self.socket
    }
}

/// Receive buffer sized for the largest accepted datagram.
pub fn datagram_buffer(size: usize) -> Vec<u8> {
    vec![0u8; size.clamp(1, MAX_DATAGRAM_SIZE)]
}
