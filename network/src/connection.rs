//! One outbound peer connection.
//!
//! The receiver task owns the read half; senders share the write half
//! behind an async lock. A send failure marks the connection unhealthy
//! and the receiver's reconnect loop repairs it with backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{NetError, NetResult};

/// Dial timeout for outbound connections.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default peer port when an endpoint omits one.
pub const DEFAULT_PEER_PORT: u16 = 21842;

/// Trust level of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    /// Operator-configured peer that may carry a credential for
    /// privileged requests.
    Trusted,
    /// Discovered or configured peer without credential.
    P2p,
}

/// A parsed peer endpoint: `host[:port[:a-b-c-d]]`, where the trailing
/// quad is the privileged-request credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub credential: Option<[u32; 4]>,
}

impl Endpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn parse_endpoint(raw: &str) -> NetResult<Endpoint> {
    let mut parts = raw.split(':');
    let host = parts
        .next()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| NetError::InvalidEndpoint(raw.to_string()))?
        .to_string();
    let port = match parts.next() {
        Some(p) => p
            .parse()
            .map_err(|_| NetError::InvalidEndpoint(raw.to_string()))?,
        None => DEFAULT_PEER_PORT,
    };
    let credential = match parts.next() {
        Some(cred) => {
            let quads: Vec<u32> = cred
                .split('-')
                .map(|q| q.parse())
                .collect::<Result<_, _>>()
                .map_err(|_| NetError::InvalidEndpoint(raw.to_string()))?;
            let quad: [u32; 4] = quads
                .try_into()
                .map_err(|_| NetError::InvalidEndpoint(raw.to_string()))?;
            Some(quad)
        }
        None => None,
    };
    if parts.next().is_some() {
        return Err(NetError::InvalidEndpoint(raw.to_string()));
    }
    Ok(Endpoint {
        host,
        port,
        credential,
    })
}

pub struct PeerConnection {
    pub endpoint: Endpoint,
    pub trust: Trust,
    connected: AtomicBool,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<OwnedReadHalf>>,
    /// Send currently in flight; used to weight peer selection away from
    /// busy connections.
    busy: AtomicBool,
}

impl PeerConnection {
    pub fn new(endpoint: Endpoint, trust: Trust) -> Self {
        Self {
            endpoint,
            trust,
            connected: AtomicBool::new(false),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            busy: AtomicBool::new(false),
        }
    }

    pub fn has_credential(&self) -> bool {
        self.endpoint.credential.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }

    /// Dial the peer and install both halves. Any previous halves are
    /// discarded.
    pub async fn connect(&self) -> NetResult<()> {
        let address = self.endpoint.address();
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| NetError::Timeout(format!("connect to {address}")))??;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.connected.store(true, Ordering::Release);
        debug!(peer = %address, "connected");
        Ok(())
    }

    /// Install the halves of an already-accepted socket (inbound peers).
    pub async fn install(&self, read_half: OwnedReadHalf, write_half: OwnedWriteHalf) {
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.connected.store(true, Ordering::Release);
    }

    /// Hand the read half to the receiver task.
    pub async fn take_reader(&self) -> Option<OwnedReadHalf> {
        self.reader.lock().await.take()
    }

    /// Borrow the read half temporarily (bootstrap runs request/response
    /// on the connection before the receiver task starts).
    pub async fn with_reader<T, F, Fut>(&self, f: F) -> NetResult<T>
    where
        F: FnOnce(OwnedReadHalf) -> Fut,
        Fut: std::future::Future<Output = (OwnedReadHalf, NetResult<T>)>,
    {
        let reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| NetError::NotConnected(self.endpoint.address()))?;
        let (reader, result) = f(reader).await;
        *self.reader.lock().await = Some(reader);
        result
    }

    /// Write one framed packet under the send lock.
    pub async fn send(&self, packet: &[u8]) -> NetResult<()> {
        self.busy.store(true, Ordering::Relaxed);
        let result = self.send_inner(packet).await;
        self.busy.store(false, Ordering::Relaxed);
        if result.is_err() {
            self.mark_disconnected().await;
        }
        result
    }

    async fn send_inner(&self, packet: &[u8]) -> NetResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| NetError::NotConnected(self.endpoint.address()))?;
        writer.write_all(packet).await?;
        Ok(())
    }

    pub async fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        *self.writer.lock().await = None;
        *self.reader.lock().await = None;
    }

    /// Disconnect to break any blocked read; used at shutdown.
    pub async fn disconnect(&self) {
        self.mark_disconnected().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_with_port() {
        let ep = parse_endpoint("10.0.0.1:31841").unwrap();
        assert_eq!(ep.host, "10.0.0.1");
        assert_eq!(ep.port, 31841);
        assert!(ep.credential.is_none());
    }

    #[test]
    fn endpoint_default_port() {
        let ep = parse_endpoint("node.example.org").unwrap();
        assert_eq!(ep.port, DEFAULT_PEER_PORT);
    }

    #[test]
    fn endpoint_with_credential() {
        let ep = parse_endpoint("10.0.0.1:21842:1-2-3-4").unwrap();
        assert_eq!(ep.credential, Some([1, 2, 3, 4]));
        assert_eq!(ep.address(), "10.0.0.1:21842");
    }

    #[test]
    fn malformed_endpoints_rejected() {
        assert!(parse_endpoint("").is_err());
        assert!(parse_endpoint("host:notaport").is_err());
        assert!(parse_endpoint("host:1:1-2-3").is_err());
        assert!(parse_endpoint("host:1:1-2-3-4:extra").is_err());
    }
}
