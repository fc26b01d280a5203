//! Client for the datagram protocol
//!
//! The transport may lose requests or responses, so every exchange is
//! retried on timeout. Responses that do not match the outstanding request
//! (late answers to an earlier attempt) are discarded.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::protocol::{
    encode_request, parse_response, ProtocolError, Request, Response, MAX_DATAGRAM_SIZE,
    MAX_RANGE_PAYLOAD,
};
use crate::transport::DatagramTransport;

/// Default time to wait for a single response
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of attempts per request
const DEFAULT_ATTEMPTS: u32 = 5;

/// Client error types
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("No response after {attempts} attempts of {timeout:?}")]
    Timeout { attempts: u32, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Short range: expected {expected} bytes, got {got}")]
    ShortRange { expected: usize, got: usize },

    #[error("Unexpected {0} response")]
    UnexpectedResponse(&'static str),
}

/// Client asking one server for cached files
pub struct ImageClient<T: DatagramTransport> {
    transport: T,
    server: T::Peer,
    timeout: Duration,
    attempts: u32,
}

impl ImageClient<UdpSocket> {
    /// Bind an ephemeral UDP socket for talking to `server`
    pub async fn connect(server: SocketAddr) -> Result<Self, ClientError> {
        let local: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(Self::new(socket, server))
    }
}

impl<T: DatagramTransport> ImageClient<T> {
    pub fn new(transport: T, server: T::Peer) -> Self {
        Self {
            transport,
            server,
            timeout: DEFAULT_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    /// Set the time to wait for each response
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many times a request is sent before giving up
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Ask for the most recent file, returning its name and size
    pub async fn latest(&self) -> Result<(String, u32), ClientError> {
        latest_from(self.exchange(&Request::ListLatest).await?)
    }

    /// Fetch bytes `[start, end)` of `name`
    pub async fn get_range(&self, name: &str, start: u32, end: u32) -> Result<Vec<u8>, ClientError> {
        let request = Request::GetRange {
            name: name.to_string(),
            start,
            end,
        };
        let data = range_from(self.exchange(&request).await?)?;

        let expected = end.saturating_sub(start) as usize;
        if data.len() != expected {
            return Err(ClientError::ShortRange {
                expected,
                got: data.len(),
            });
        }
        Ok(data)
    }

    /// Fetch a whole file of `size` bytes in datagram-sized chunks
    pub async fn fetch(&self, name: &str, size: u32) -> Result<Vec<u8>, ClientError> {
        let mut content = Vec::with_capacity(size as usize);
        let mut start = 0u32;
        while start < size {
            let end = start.saturating_add(MAX_RANGE_PAYLOAD as u32).min(size);
            let chunk = self.get_range(name, start, end).await?;
            content.extend_from_slice(&chunk);
            start = end;
        }
        debug!(name = name, size = size, "Fetched file");
        Ok(content)
    }

    /// Send `request` and wait for the matching response, retrying on timeout
    async fn exchange(&self, request: &Request) -> Result<Response, ClientError> {
        let datagram = encode_request(request)?;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        for attempt in 1..=self.attempts {
            self.transport.send_to(&datagram, &self.server).await?;
            let deadline = tokio::time::Instant::now() + self.timeout;

            loop {
                let received =
                    tokio::time::timeout_at(deadline, self.transport.recv_from(&mut buf)).await;
                let (n, peer) = match received {
                    Ok(result) => result?,
                    Err(_) => break,
                };
                if peer != self.server {
                    continue;
                }
                match parse_response(&buf[..n]) {
                    Ok(response) if answers(request, &response) => return Ok(response),
                    Ok(_) => debug!("Discarding stale response"),
                    Err(e) => debug!(error = %e, "Discarding malformed response"),
                }
            }

            debug!(attempt = attempt, attempts = self.attempts, "Request timed out");
        }

        Err(ClientError::Timeout {
            attempts: self.attempts,
            timeout: self.timeout,
        })
    }
}

/// Whether `response` is an answer to `request`
fn answers(request: &Request, response: &Response) -> bool {
    match (request, response) {
        (Request::ListLatest, Response::Latest { .. }) => true,
        (
            Request::GetRange { start, end, .. },
            Response::Range {
                start: got_start,
                end: got_end,
                ..
            },
        ) => start == got_start && end == got_end,
        _ => false,
    }
}

fn latest_from(response: Response) -> Result<(String, u32), ClientError> {
    match response {
        Response::Latest { name, size } => Ok((name, size)),
        Response::Range { .. } => Err(ClientError::UnexpectedResponse("range")),
    }
}

fn range_from(response: Response) -> Result<Vec<u8>, ClientError> {
    match response {
        Response::Range { data, .. } => Ok(data),
        Response::Latest { .. } => Err(ClientError::UnexpectedResponse("latest")),
    }
}

/// Write `data` to `path` atomically via a temp file in the same directory
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    use anyhow::Context;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .context("Failed to create temp file for download")?;
    tmp.write_all(data).context("Failed to write downloaded file")?;
    tmp.persist(path)
        .with_context(|| format!("Failed to persist downloaded file: {:?}", path))?;

    info!(path = %path.display(), size = data.len(), "Saved file");
    Ok(())
}
