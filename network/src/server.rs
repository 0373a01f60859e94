//! Inbound peer listener.
//!
//! Optional: when enabled, other observers may connect and be served the
//! same framed protocol. Accepted connections are tracked in an indexed
//! slot table; a sweeper compacts finished slots so the table cannot
//! grow without bound.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{Endpoint, PeerConnection, Trust};
use crate::error::NetResult;
use crate::receiver::{run_receiver_once, ReceiverCounters, RouteBuffers};

/// Inbound connections beyond this are rejected.
const MAX_INBOUND_CONNECTIONS: usize = 676;

/// Period of the finished-slot sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

pub struct PeerServer {
    port: u16,
    buffers: RouteBuffers,
    counters: Arc<ReceiverCounters>,
    shutdown: CancellationToken,
    slots: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
    next_slot: AtomicU64,
}

impl PeerServer {
    pub fn new(
        port: u16,
        buffers: RouteBuffers,
        counters: Arc<ReceiverCounters>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            port,
            buffers,
            counters,
            shutdown,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_slot: AtomicU64::new(0),
        }
    }

    /// Bind and serve until the token fires. Returns once the listener
    /// is down and every client task joined.
    pub async fn run(self: Arc<Self>) -> NetResult<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        info!(port = self.port, max = MAX_INBOUND_CONNECTIONS, "peer server listening");

        let sweeper = {
            let server = self.clone();
            tokio::spawn(async move { server.sweep_loop().await })
        };

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => self.adopt(stream, remote.to_string()).await,
                        Err(err) => {
                            debug!(error = %err, "accept failed");
                        }
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        sweeper.abort();
        let mut slots = self.slots.lock().await;
        for (_, handle) in slots.drain() {
            let _ = handle.await;
        }
        info!("peer server stopped");
        Ok(())
    }

    async fn adopt(&self, stream: tokio::net::TcpStream, remote: String) {
        let mut slots = self.slots.lock().await;
        if slots.len() >= MAX_INBOUND_CONNECTIONS {
            warn!(remote = %remote, "inbound connection limit reached, rejecting");
            return;
        }

        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        // Wrap the accepted socket as a non-reconnecting connection.
        let endpoint = Endpoint {
            host: remote.clone(),
            port: 0,
            credential: None,
        };
        let conn = Arc::new(PeerConnection::new(endpoint, Trust::P2p));
        conn.install(read_half, write_half).await;

        let slot_id = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let buffers = self.buffers.clone();
        let counters = self.counters.clone();
        let client_token = self.shutdown.child_token();
        let handle = tokio::spawn(async move {
            run_receiver_once(conn, buffers, counters, client_token).await;
        });
        slots.insert(slot_id, handle);
        debug!(remote = %remote, slot = slot_id, active = slots.len(), "inbound peer adopted");
    }

    async fn sweep_loop(&self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                _ = self.shutdown.cancelled() => return,
            }
            let mut slots = self.slots.lock().await;
            let before = slots.len();
            slots.retain(|_, handle| !handle.is_finished());
            let after = slots.len();
            if before != after {
                debug!(swept = before - after, active = after, "swept finished inbound slots");
            }
        }
    }
}

