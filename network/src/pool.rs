//! Connection pool.
//!
//! Owns every outbound peer connection, split by trust level. Senders
//! pick a random connected, non-busy peer; trusted variants restrict the
//! choice to credentialed peers. Per-connection failures stay local: the
//! failed peer is marked unhealthy and the next send falls over to
//! another peer.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::seq::SliceRandom;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, warn};

use tickwatch_types::wire::{frame, TickInfo};
use tickwatch_types::{PacketHeader, PacketType, HEADER_SIZE, MAX_PACKET_SIZE};

use crate::connection::{PeerConnection, Trust};
use crate::error::{NetError, NetResult};

/// Wait on a bootstrap response before giving up on a peer.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Chain head reported by a peer during bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapInfo {
    pub initial_tick: u32,
    pub epoch: u16,
}

#[derive(Default)]
pub struct ConnectionPool {
    connections: Vec<Arc<PeerConnection>>,
}

impl ConnectionPool {
    pub fn new(connections: Vec<Arc<PeerConnection>>) -> Self {
        Self { connections }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn connections(&self) -> &[Arc<PeerConnection>] {
        &self.connections
    }

    pub fn trusted(&self) -> impl Iterator<Item = &Arc<PeerConnection>> {
        self.connections
            .iter()
            .filter(|c| c.trust == Trust::Trusted)
    }

    /// Send to one randomly chosen connected peer, preferring idle ones.
    /// Falls over to other peers when a send fails.
    pub async fn send_to_random(&self, packet: &Bytes) -> NetResult<()> {
        self.send_to_random_filtered(packet, |_| true).await
    }

    /// Send to a random credentialed peer; any peer when none exists.
    pub async fn send_to_random_trusted(&self, packet: &Bytes) -> NetResult<()> {
        let has_trusted = self
            .connections
            .iter()
            .any(|c| c.trust == Trust::Trusted && c.is_connected());
        if has_trusted {
            self.send_to_random_filtered(packet, |c| c.trust == Trust::Trusted)
                .await
        } else {
            self.send_to_random(packet).await
        }
    }

    async fn send_to_random_filtered<F>(&self, packet: &Bytes, accept: F) -> NetResult<()>
    where
        F: Fn(&PeerConnection) -> bool,
    {
        let mut candidates: Vec<&Arc<PeerConnection>> = self
            .connections
            .iter()
            .filter(|c| c.is_connected() && accept(c))
            .collect();
        if candidates.is_empty() {
            return Err(NetError::NoPeer);
        }
        // Idle peers first, then shuffle within each class.
        candidates.shuffle(&mut rand::thread_rng());
        candidates.sort_by_key(|c| c.is_busy());

        let mut last = None;
        for conn in candidates {
            match conn.send(packet).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!(peer = %conn.endpoint.address(), error = %err, "send failed, trying next peer");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or(NetError::NoPeer))
    }

    /// Write the packet to every connected peer; failures are logged and
    /// skipped.
    pub async fn broadcast(&self, packet: &Bytes) -> usize {
        let mut sent = 0;
        for conn in &self.connections {
            if !conn.is_connected() {
                continue;
            }
            match conn.send(packet).await {
                Ok(()) => sent += 1,
                Err(err) => {
                    warn!(peer = %conn.endpoint.address(), error = %err, "broadcast send failed");
                }
            }
        }
        sent
    }

    /// Handshake every peer that is not yet connected and query each for
    /// its chain head. Returns the highest head seen, if any peer
    /// answered.
    pub async fn handshake_and_bootstrap(&self) -> Option<BootstrapInfo> {
        let mut best: Option<BootstrapInfo> = None;
        for conn in &self.connections {
            match bootstrap_peer(conn).await {
                Ok(info) => {
                    if best.map_or(true, |b| info.initial_tick > b.initial_tick) {
                        best = Some(info);
                    }
                }
                Err(err) => {
                    debug!(peer = %conn.endpoint.address(), error = %err, "bootstrap attempt failed");
                    conn.mark_disconnected().await;
                }
            }
        }
        best
    }

    /// Disconnect every peer; used at shutdown to break blocked reads.
    pub async fn disconnect_all(&self) {
        for conn in &self.connections {
            conn.disconnect().await;
        }
    }
}

async fn bootstrap_peer(conn: &Arc<PeerConnection>) -> NetResult<BootstrapInfo> {
    if !conn.is_connected() {
        conn.connect().await?;
    }

    // Protocol handshake, then the bootstrap query.
    let hello = frame(PacketType::ExchangePeers, rand::random(), &[]);
    conn.send(&hello).await?;
    let query = frame(PacketType::RequestTickInfo, rand::random(), &[]);
    conn.send(&query).await?;

    conn.with_reader(|reader| async move {
        let mut reader = reader;
        let result = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            // Skim frames until the bootstrap response shows up.
            loop {
                let (header, payload) = read_packet(&mut reader).await?;
                if header.classify() == Some(PacketType::TickInfo) {
                    let info = TickInfo::decode(&payload)?;
                    return Ok(BootstrapInfo {
                        initial_tick: info.initial_tick.max(info.tick),
                        epoch: info.epoch,
                    });
                }
            }
        })
        .await
        .unwrap_or_else(|_| Err(NetError::Timeout("bootstrap response".to_string())));
        (reader, result)
    })
    .await
}

/// Read one complete framed packet.
pub(crate) async fn read_packet(reader: &mut OwnedReadHalf) -> NetResult<(PacketHeader, Bytes)> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = PacketHeader::decode(&header_bytes)?;
    if header.size as usize > MAX_PACKET_SIZE {
        return Err(NetError::Decode(tickwatch_types::TickwatchError::Decode(
            format!("packet of {} bytes exceeds maximum", header.size),
        )));
    }
    let mut payload = vec![0u8; header.payload_len()];
    reader.read_exact(&mut payload).await?;
    Ok((header, Bytes::from(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::parse_endpoint;

    fn pool_of(addrs: &[(&str, Trust)]) -> ConnectionPool {
        ConnectionPool::new(
            addrs
                .iter()
                .map(|(addr, trust)| {
                    Arc::new(PeerConnection::new(parse_endpoint(addr).unwrap(), *trust))
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn send_with_no_connected_peer_fails() {
        let pool = pool_of(&[("10.0.0.1:21842", Trust::P2p)]);
        let packet = frame(PacketType::RequestTickData, 1, &[]);
        assert!(matches!(
            pool.send_to_random(&packet).await,
            Err(NetError::NoPeer)
        ));
    }

    #[tokio::test]
    async fn trusted_filter_counts_only_trusted() {
        let pool = pool_of(&[
            ("10.0.0.1:21842", Trust::P2p),
            ("10.0.0.2:21842:1-2-3-4", Trust::Trusted),
        ]);
        assert_eq!(pool.trusted().count(), 1);
    }
}
