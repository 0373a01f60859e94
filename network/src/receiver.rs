//! Per-connection receiver.
//!
//! One task per peer. Reads framed packets off the socket and routes
//! them into the stage buffers by packet type: tick artifacts go to the
//! data buffer, request/response traffic to the request buffer,
//! handshake frames are handled in place. Decode failures drop the
//! connection; the loop reconnects with backoff until cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use tickwatch_types::{PacketType, HEADER_SIZE};

use crate::buffer::PacketBuffer;
use crate::connection::PeerConnection;
use crate::error::NetResult;
use crate::pool::read_packet;

/// First reconnect delay; doubles up to [`RECONNECT_MAX`].
const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Stage buffers a receiver routes into.
#[derive(Clone)]
pub struct RouteBuffers {
    pub data: Arc<PacketBuffer>,
    pub request: Arc<PacketBuffer>,
}

/// Count of packets dropped for carrying an unknown type. Shared across
/// receivers for the /status surface.
#[derive(Default)]
pub struct ReceiverCounters {
    pub undecodable: AtomicU64,
}

/// Drive one peer connection until the token fires.
pub async fn run_receiver(
    conn: Arc<PeerConnection>,
    buffers: RouteBuffers,
    counters: Arc<ReceiverCounters>,
    shutdown: CancellationToken,
) {
    let mut backoff = RECONNECT_MIN;
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        if !conn.is_connected() {
            match conn.connect().await {
                Ok(()) => backoff = RECONNECT_MIN,
                Err(err) => {
                    debug!(peer = %conn.endpoint.address(), error = %err, "reconnect failed");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.cancelled() => break,
                    }
                    backoff = (backoff * 2).min(RECONNECT_MAX);
                    continue;
                }
            }
        }

        let Some(mut reader) = conn.take_reader().await else {
            // Another task holds the reader (bootstrap); brief pause.
            tokio::time::sleep(Duration::from_millis(100)).await;
            continue;
        };

        let disconnected = tokio::select! {
            result = receive_loop(&mut reader, &conn, &buffers, &counters) => result,
            _ = shutdown.cancelled() => break,
        };

        if let Err(err) = disconnected {
            debug!(peer = %conn.endpoint.address(), error = %err, "peer read loop ended");
        }
        conn.mark_disconnected().await;
    }
    trace!(peer = %conn.endpoint.address(), "receiver exited");
}

/// Serve one already-connected session without reconnecting; inbound
/// peers are dropped, not repaired, when they fail.
pub async fn run_receiver_once(
    conn: Arc<PeerConnection>,
    buffers: RouteBuffers,
    counters: Arc<ReceiverCounters>,
    shutdown: CancellationToken,
) {
    let Some(mut reader) = conn.take_reader().await else {
        return;
    };
    let result = tokio::select! {
        result = receive_loop(&mut reader, &conn, &buffers, &counters) => result,
        _ = shutdown.cancelled() => Ok(()),
    };
    if let Err(err) = result {
        debug!(peer = %conn.endpoint.address(), error = %err, "inbound session ended");
    }
    conn.mark_disconnected().await;
}

async fn receive_loop(
    reader: &mut OwnedReadHalf,
    conn: &PeerConnection,
    buffers: &RouteBuffers,
    counters: &ReceiverCounters,
) -> NetResult<()> {
    loop {
        let (header, payload) = read_packet(reader).await?;
        let packet = reframe(header.size, header.packet_type, header.dejavu, &payload);

        match header.classify() {
            Some(
                PacketType::TickData
                | PacketType::TickVote
                | PacketType::Transaction
                | PacketType::LogIdRanges
                | PacketType::LogEvents
                | PacketType::Computors
                | PacketType::EndEpoch,
            ) => {
                buffers.data.push(packet);
            }
            Some(
                PacketType::ContractFunction
                | PacketType::RequestContractFunction
                | PacketType::EndResponse,
            ) => {
                buffers.request.push(packet);
            }
            Some(PacketType::ExchangePeers) => {
                // Handshake refresh: answer with an empty peer list so the
                // remote keeps the session alive.
                let reply = tickwatch_types::wire::frame(
                    PacketType::ExchangePeers,
                    header.dejavu,
                    &[],
                );
                let _ = conn.send(&reply).await;
            }
            Some(PacketType::TickInfo) => {
                // Bootstrap responses arriving after startup carry nothing
                // the pipeline needs.
            }
            Some(_) => {
                trace!(packet_type = header.packet_type, "ignoring request-side packet");
            }
            None => {
                counters.undecodable.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Rebuild the full framed packet (header + payload) for the buffers;
/// downstream stages re-read the header to classify.
fn reframe(size: u32, packet_type: u8, dejavu: u32, payload: &[u8]) -> Bytes {
    use bytes::BufMut;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&size.to_le_bytes()[..3]);
    buf.put_u8(packet_type);
    buf.put_u32_le(dejavu);
    buf.put_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwatch_types::PacketHeader;

    #[test]
    fn reframe_reproduces_header() {
        let packet = reframe(HEADER_SIZE as u32 + 2, 3, 77, &[5, 6]);
        let header = PacketHeader::decode(&packet).unwrap();
        assert_eq!(header.packet_type, 3);
        assert_eq!(header.dejavu, 77);
        assert_eq!(&packet[HEADER_SIZE..], &[5, 6]);
    }
}
