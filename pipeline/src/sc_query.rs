//! Contract-query forwarding.
//!
//! The HTTP surface enqueues framed contract-function queries on the SC
//! buffer; this stage forwards them to a random peer. Responses come
//! back through the receivers into the request buffer and are cached by
//! their dejavu nonce with a TTL, so a repeated query with the same
//! nonce is answered from the cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tickwatch_types::{PacketHeader, PacketType, HEADER_SIZE};
use tracing::{debug, trace};

use crate::runtime::Runtime;

/// Cached responses older than this are swept.
const RESPONSE_TTL: Duration = Duration::from_secs(10);

/// Contract-function responses keyed by request nonce.
#[derive(Default)]
pub struct ScResponseCache {
    responses: DashMap<u32, (Instant, Vec<u8>)>,
}

impl ScResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, nonce: u32, payload: Vec<u8>) {
        self.responses.insert(nonce, (Instant::now(), payload));
    }

    pub fn get(&self, nonce: u32) -> Option<Vec<u8>> {
        self.responses.get(&nonce).map(|e| e.value().1.clone())
    }

    /// Drop entries past the TTL.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.responses
            .retain(|_, (stored, _)| now.duration_since(*stored) < RESPONSE_TTL);
    }
}

/// Forward enqueued contract queries to peers until the buffer closes.
pub async fn run_sc_forwarder(runtime: Arc<Runtime>) {
    while let Some(packet) = runtime.buffers.sc.pop().await {
        let Ok(header) = PacketHeader::decode(&packet) else {
            continue;
        };
        if header.size as usize != packet.len()
            || header.classify() != Some(PacketType::RequestContractFunction)
        {
            continue;
        }
        if let Err(err) = runtime.pool.send_to_random(&packet).await {
            debug!(error = %err, "contract query could not be forwarded");
        }
    }
    trace!("sc forwarder exited");
}

/// Drain the request buffer: cache contract responses, drop the rest.
pub async fn run_request_processor(runtime: Arc<Runtime>) {
    while let Some(packet) = runtime.buffers.request.pop().await {
        let Ok(header) = PacketHeader::decode(&packet) else {
            runtime
                .tallies
                .undecodable
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            continue;
        };
        match header.classify() {
            Some(PacketType::ContractFunction) => {
                runtime
                    .sc_responses
                    .put(header.dejavu, packet[HEADER_SIZE..].to_vec());
            }
            // Request echoes and NOPs carry nothing for us.
            _ => {}
        }
    }
    trace!("request processor exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_round_trip_and_sweep() {
        let cache = ScResponseCache::new();
        cache.put(7, vec![1, 2, 3]);
        assert_eq!(cache.get(7), Some(vec![1, 2, 3]));
        assert_eq!(cache.get(8), None);
        cache.sweep();
        assert_eq!(cache.get(7), Some(vec![1, 2, 3]));
    }
}
