//! Unreliable datagram channel
//!
//! The request handler only needs to receive a datagram from a peer and send
//! one back. Delivery and ordering are not guaranteed by any implementation.

use std::fmt::Debug;
use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// A message-oriented, best-effort transport
pub trait DatagramTransport: Send + Sync {
    /// Address identifying a peer
    type Peer: Clone + Debug + PartialEq + Send + Sync;

    /// Receive one datagram into `buf`, returning its length and sender
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, Self::Peer)>> + Send;

    /// Send one datagram to `peer`
    fn send_to(
        &self,
        buf: &[u8],
        peer: &Self::Peer,
    ) -> impl Future<Output = io::Result<usize>> + Send;
}

impl DatagramTransport for UdpSocket {
    type Peer = SocketAddr;

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    async fn send_to(&self, buf: &[u8], peer: &SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, *peer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn echo_once<T: DatagramTransport>(transport: &T) -> io::Result<usize> {
        let mut buf = [0u8; 64];
        let (n, peer) = transport.recv_from(&mut buf).await?;
        transport.send_to(&buf[..n], &peer).await
    }

    #[tokio::test]
    async fn test_udp_socket_transport() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        client.send_to(b"ping", server_addr).await.unwrap();
        assert_eq!(echo_once(&server).await.unwrap(), 4);

        let mut buf = [0u8; 16];
        let (n, from) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, server_addr);
    }
}
