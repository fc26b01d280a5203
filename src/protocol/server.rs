//! Datagram Server - answers List-latest and Get-range requests
//!
//! Reads one datagram at a time from the transport, consults the
//! [`FileStore`] and sends at most one response back to the sender.
//! Anything that cannot be answered is dropped without a reply.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::protocol::errors::ProtocolError;
use crate::protocol::wire::{encode_latest, encode_range, parse_request, Request, MAX_DATAGRAM_SIZE};
use crate::store::FileStore;
use crate::transport::DatagramTransport;

/// Snapshot of the server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub received: u64,
    pub answered: u64,
    pub dropped: u64,
    pub send_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    answered: AtomicU64,
    dropped: AtomicU64,
    send_failures: AtomicU64,
}

/// Build the response for one request datagram
///
/// `Ok(None)` means the request was well-formed but there is nothing to
/// answer: no eligible latest file, an unknown name or an invalid range.
fn respond(store: &FileStore, data: &[u8], now: Instant) -> Result<Option<Vec<u8>>, ProtocolError> {
    match parse_request(data)? {
        Request::ListLatest => match store.most_recent_eligible_at(now) {
            Some((name, size)) => encode_latest(&name, size).map(Some),
            None => Ok(None),
        },
        Request::GetRange { name, start, end } => {
            let record = match store.lookup(&name) {
                Some(record) => record,
                None => return Ok(None),
            };
            trace!(name = record.name(), start = start, end = end, "Range request");
            // The record is immutable, so the copy happens outside the store lock
            match record.range(start, end) {
                Some(slice) => encode_range(start, end, slice).map(Some),
                None => Ok(None),
            }
        }
    }
}

/// Handle one inbound datagram, returning the response to send if any
pub fn handle_datagram(store: &FileStore, data: &[u8], now: Instant) -> Option<Vec<u8>> {
    match respond(store, data, now) {
        Ok(response) => response,
        Err(e) if e.is_malformed_input() => {
            trace!(error = %e, len = data.len(), "Dropping malformed request");
            None
        }
        Err(e) => {
            debug!(error = %e, "Dropping request, response not sendable");
            None
        }
    }
}

/// Server answering file requests over a datagram transport
pub struct DatagramServer<T: DatagramTransport> {
    /// Store shared with the directory scanner
    store: Arc<FileStore>,
    transport: T,
    counters: Counters,
}

impl DatagramServer<UdpSocket> {
    /// Bind a UDP socket and create a server on it
    pub async fn bind(store: Arc<FileStore>, addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind UDP socket on {}", addr))?;

        info!(addr = %socket.local_addr()?, "Datagram server listening");
        Ok(Self::new(store, socket))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport
            .local_addr()
            .context("Failed to read local address")
    }
}

impl<T: DatagramTransport> DatagramServer<T> {
    pub fn new(store: Arc<FileStore>, transport: T) -> Self {
        Self {
            store,
            transport,
            counters: Counters::default(),
        }
    }

    /// Run the receive loop
    ///
    /// Datagrams are handled one at a time in receipt order. Receive and send
    /// errors are logged and the loop moves on to the next datagram.
    pub async fn run(&self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            match self.transport.recv_from(&mut buf).await {
                Ok((n, peer)) => self.serve(&buf[..n], &peer).await,
                Err(e) => {
                    warn!(error = %e, "Failed to receive datagram");
                }
            }
        }
    }

    /// Answer a single datagram received from `peer`
    pub async fn serve(&self, data: &[u8], peer: &T::Peer) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let response = match handle_datagram(&self.store, data, Instant::now()) {
            Some(response) => response,
            None => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.transport.send_to(&response, peer).await {
            Ok(_) => {
                self.counters.answered.fetch_add(1, Ordering::Relaxed);
                debug!(peer = ?peer, tag = %char::from(response[0]), len = response.len(), "Sent response");
            }
            Err(e) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!(peer = ?peer, error = %e, "Failed to send response");
            }
        }
    }

    /// Get server counters
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            received: self.counters.received.load(Ordering::Relaxed),
            answered: self.counters.answered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
        }
    }
}
