//! WebSocket subscription manager.
//!
//! Subscriptions are keyed by (contract index, log type). Client state
//! and the reverse index live under one reader-writer lock; dispatch
//! collects the send list under the read lock and sends outside it.
//! Catch-up streams history through the same per-client queue as live
//! frames, so a subscriber sees either catch-up followed by live or the
//! live stream alone, never an interleaving.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use tickwatch_storage::TickStore;
use tickwatch_types::LogEvent;

/// Outgoing frame queue of one client; the socket task drains it.
pub type WsSink = mpsc::UnboundedSender<String>;

pub type ClientId = u64;

/// Ticks per catch-up batch.
const CATCH_UP_TICK_BATCH: u32 = 100;

/// Log ids per catch-up batch.
const CATCH_UP_LOG_BATCH: u64 = 1000;

#[derive(Debug)]
struct ClientState {
    subscriptions: HashSet<(u32, u32)>,
    last_tick: u32,
    last_log_id: i64,
    catch_up_in_progress: bool,
    transfer_min_amount: i64,
    sink: WsSink,
}

#[derive(Default)]
struct Inner {
    clients: HashMap<ClientId, ClientState>,
    index: HashMap<(u32, u32), HashSet<ClientId>>,
}

pub struct SubscriptionManager {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
    store: Arc<dyn TickStore>,
}

#[derive(Serialize)]
struct LogFrame<'a> {
    #[serde(rename = "type")]
    frame_type: &'static str,
    #[serde(rename = "scIndex")]
    sc_index: u32,
    #[serde(rename = "logType")]
    log_type: u32,
    #[serde(rename = "isCatchUp")]
    is_catch_up: bool,
    message: &'a serde_json::Value,
}

#[derive(Serialize)]
struct CatchUpCompleteByTick {
    #[serde(rename = "type")]
    frame_type: &'static str,
    #[serde(rename = "fromTick")]
    from_tick: u32,
    #[serde(rename = "toTick")]
    to_tick: u32,
    #[serde(rename = "logsDelivered")]
    logs_delivered: u64,
}

#[derive(Serialize)]
struct CatchUpCompleteByLogId {
    #[serde(rename = "type")]
    frame_type: &'static str,
    #[serde(rename = "fromLogId")]
    from_log_id: i64,
    #[serde(rename = "toLogId")]
    to_log_id: i64,
    #[serde(rename = "logsDelivered")]
    logs_delivered: u64,
}

fn log_frame(sc_index: u32, log_type: u32, is_catch_up: bool, log: &LogEvent) -> String {
    let message = log.to_json();
    serde_json::to_string(&LogFrame {
        frame_type: "log",
        sc_index,
        log_type,
        is_catch_up,
        message: &message,
    })
    .unwrap_or_default()
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn TickStore>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_id: AtomicU64::new(1),
            store,
        }
    }

    pub fn add_client(&self, sink: WsSink) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write();
        inner.clients.insert(
            id,
            ClientState {
                subscriptions: HashSet::new(),
                last_tick: 0,
                last_log_id: -1,
                catch_up_in_progress: false,
                transfer_min_amount: 0,
                sink,
            },
        );
        info!(client = id, total = inner.clients.len(), "websocket client connected");
        id
    }

    pub fn remove_client(&self, id: ClientId) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.clients.remove(&id) {
            for key in state.subscriptions {
                if let Some(set) = inner.index.get_mut(&key) {
                    set.remove(&id);
                    if set.is_empty() {
                        inner.index.remove(&key);
                    }
                }
            }
        }
        info!(client = id, total = inner.clients.len(), "websocket client disconnected");
    }

    pub fn subscribe(&self, id: ClientId, sc_index: u32, log_type: u32) -> bool {
        let mut inner = self.inner.write();
        let Some(state) = inner.clients.get_mut(&id) else {
            return false;
        };
        if !state.subscriptions.insert((sc_index, log_type)) {
            return true;
        }
        inner.index.entry((sc_index, log_type)).or_default().insert(id);
        debug!(client = id, sc_index, log_type, "subscribed");
        true
    }

    pub fn unsubscribe(&self, id: ClientId, sc_index: u32, log_type: u32) -> bool {
        let mut inner = self.inner.write();
        let Some(state) = inner.clients.get_mut(&id) else {
            return false;
        };
        if !state.subscriptions.remove(&(sc_index, log_type)) {
            return false;
        }
        if let Some(set) = inner.index.get_mut(&(sc_index, log_type)) {
            set.remove(&id);
            if set.is_empty() {
                inner.index.remove(&(sc_index, log_type));
            }
        }
        true
    }

    pub fn set_last_tick(&self, id: ClientId, tick: u32) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.clients.get_mut(&id) {
            state.last_tick = tick;
            state.last_log_id = -1;
        }
    }

    pub fn set_last_log_id(&self, id: ClientId, log_id: i64) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.clients.get_mut(&id) {
            state.last_log_id = log_id;
        }
    }

    pub fn set_transfer_min_amount(&self, id: ClientId, amount: i64) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.clients.get_mut(&id) {
            state.transfer_min_amount = amount;
        }
    }

    pub fn client_count(&self) -> usize {
        self.inner.read().clients.len()
    }

    /// Dispatch a reconciled tick's logs to subscribers. Gating is a
    /// read-only probe; client state is only mutated by the client's own
    /// commands and catch-up completion.
    pub fn push_verified(&self, tick: u32, logs: &[LogEvent]) {
        let mut pending: Vec<(WsSink, String)> = Vec::new();
        {
            let inner = self.inner.read();
            if inner.clients.is_empty() || inner.index.is_empty() {
                return;
            }

            for log in logs {
                let Some((sc_index, log_type)) = log.subscription_key() else {
                    continue;
                };
                let Some(subscribers) = inner.index.get(&(sc_index, log_type)) else {
                    continue;
                };
                if subscribers.is_empty() {
                    continue;
                }

                let frame = log_frame(sc_index, log_type, false, log);
                let transfer_amount = log.transfer_amount();

                for id in subscribers {
                    let Some(client) = inner.clients.get(id) else {
                        continue;
                    };
                    if client.catch_up_in_progress {
                        continue;
                    }
                    if client.last_tick >= tick {
                        continue;
                    }
                    if client.last_log_id >= 0 && client.last_log_id >= log.log_id as i64 {
                        continue;
                    }
                    if let Some(amount) = transfer_amount {
                        if client.transfer_min_amount > 0 && amount < client.transfer_min_amount {
                            continue;
                        }
                    }
                    pending.push((client.sink.clone(), frame.clone()));
                }
            }
        }

        // Send without holding the lock; a closed sink means the socket
        // task is already tearing the client down.
        for (sink, frame) in pending {
            let _ = sink.send(frame);
        }
    }

    /// Stream history from the client's last acknowledged tick up to
    /// `to_tick`, then mark it caught up.
    pub async fn catch_up(&self, id: ClientId, to_tick: u32, epoch: u16, initial_tick: u32) {
        let (from_tick, subscriptions, sink) = {
            let mut inner = self.inner.write();
            let Some(state) = inner.clients.get_mut(&id) else {
                return;
            };
            if state.subscriptions.is_empty() {
                let _ = state.sink.send(complete_by_tick(0, to_tick, 0));
                return;
            }
            state.catch_up_in_progress = true;
            (
                (state.last_tick + 1).max(initial_tick),
                state.subscriptions.clone(),
                state.sink.clone(),
            )
        };

        if from_tick > to_tick {
            self.finish_catch_up_by_tick(id, to_tick);
            let _ = sink.send(complete_by_tick(from_tick, to_tick, 0));
            return;
        }

        let mut delivered = 0u64;
        let mut tick = from_tick;
        while tick <= to_tick {
            let batch_end = to_tick.min(tick + CATCH_UP_TICK_BATCH - 1);
            for t in tick..=batch_end {
                let Ok(Some(aggregate)) = self.store.get_tick_log_range(t).await else {
                    continue;
                };
                if aggregate.is_empty() {
                    continue;
                }
                let Ok(batch) = self
                    .store
                    .get_logs(epoch, aggregate.from_log_id as u64, aggregate.to_log_id() as u64)
                    .await
                else {
                    continue;
                };
                for log in &batch {
                    let Some(key) = log.subscription_key() else {
                        continue;
                    };
                    if !subscriptions.contains(&key) {
                        continue;
                    }
                    if sink.send(log_frame(key.0, key.1, true, log)).is_err() {
                        // Socket closed mid-catch-up; abort silently.
                        return;
                    }
                    delivered += 1;
                }
            }
            tick = batch_end + 1;
        }

        self.finish_catch_up_by_tick(id, to_tick);
        let _ = sink.send(complete_by_tick(from_tick, to_tick, delivered));
        info!(client = id, from_tick, to_tick, delivered, "catch-up complete");
    }

    /// Stream history by log id up to `to_log_id`.
    pub async fn catch_up_by_log_id(&self, id: ClientId, to_log_id: i64, epoch: u16) {
        let (from_log_id, subscriptions, sink) = {
            let mut inner = self.inner.write();
            let Some(state) = inner.clients.get_mut(&id) else {
                return;
            };
            if state.subscriptions.is_empty() {
                let _ = state.sink.send(complete_by_log_id(0, to_log_id, 0));
                return;
            }
            state.catch_up_in_progress = true;
            (
                (state.last_log_id + 1).max(0),
                state.subscriptions.clone(),
                state.sink.clone(),
            )
        };

        if from_log_id > to_log_id {
            self.finish_catch_up_by_log_id(id, to_log_id);
            let _ = sink.send(complete_by_log_id(from_log_id, to_log_id, 0));
            return;
        }

        let mut delivered = 0u64;
        let mut log_id = from_log_id as u64;
        while log_id as i64 <= to_log_id {
            let batch_end = (to_log_id as u64).min(log_id + CATCH_UP_LOG_BATCH - 1);
            if let Ok(batch) = self.store.get_logs(epoch, log_id, batch_end).await {
                for log in &batch {
                    let Some(key) = log.subscription_key() else {
                        continue;
                    };
                    if !subscriptions.contains(&key) {
                        continue;
                    }
                    if sink.send(log_frame(key.0, key.1, true, log)).is_err() {
                        return;
                    }
                    delivered += 1;
                }
            }
            log_id = batch_end + 1;
        }

        self.finish_catch_up_by_log_id(id, to_log_id);
        let _ = sink.send(complete_by_log_id(from_log_id, to_log_id, delivered));
    }

    fn finish_catch_up_by_tick(&self, id: ClientId, to_tick: u32) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.clients.get_mut(&id) {
            state.catch_up_in_progress = false;
            state.last_tick = to_tick;
        }
    }

    fn finish_catch_up_by_log_id(&self, id: ClientId, to_log_id: i64) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.clients.get_mut(&id) {
            state.catch_up_in_progress = false;
            state.last_log_id = to_log_id;
        }
    }
}

fn complete_by_tick(from_tick: u32, to_tick: u32, logs_delivered: u64) -> String {
    serde_json::to_string(&CatchUpCompleteByTick {
        frame_type: "catchUpComplete",
        from_tick,
        to_tick,
        logs_delivered,
    })
    .unwrap_or_default()
}

fn complete_by_log_id(from_log_id: i64, to_log_id: i64, logs_delivered: u64) -> String {
    serde_json::to_string(&CatchUpCompleteByLogId {
        frame_type: "catchUpComplete",
        from_log_id,
        to_log_id,
        logs_delivered,
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwatch_storage::MemoryTickStore;
    use tickwatch_types::{LogIdRange, LogType, TickLogRanges};

    const EPOCH: u16 = 100;

    fn transfer_log(tick: u32, log_id: u64, amount: i64) -> LogEvent {
        let mut body = Vec::new();
        body.extend_from_slice(&[1u8; 32]);
        body.extend_from_slice(&[2u8; 32]);
        body.extend_from_slice(&amount.to_le_bytes());
        LogEvent {
            epoch: EPOCH,
            tick,
            log_type: LogType::QuTransfer as u8,
            log_id,
            log_digest: 0,
            body,
        }
    }

    async fn seed_tick(store: &MemoryTickStore, tick: u32, from_id: u64, count: i64) {
        let mut ranges = TickLogRanges::empty(tick);
        ranges.aggregate = LogIdRange {
            from_log_id: from_id as i64,
            length: count,
        };
        store.insert_log_ranges(&ranges).await.unwrap();
        for i in 0..count {
            let log = transfer_log(tick, from_id + i as u64, 50);
            store
                .insert_log(EPOCH, log.log_id, &log.encode())
                .await
                .unwrap();
        }
    }

    fn frame_json(raw: &str) -> serde_json::Value {
        serde_json::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn catch_up_then_live_preserves_order() {
        let store = Arc::new(MemoryTickStore::new());
        // History: ticks 901..=903, two logs each, ids 100..=105.
        seed_tick(&store, 901, 100, 2).await;
        seed_tick(&store, 902, 102, 2).await;
        seed_tick(&store, 903, 104, 2).await;

        let manager = SubscriptionManager::new(store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = manager.add_client(tx);
        assert!(manager.subscribe(id, 0, LogType::QuTransfer as u32));
        manager.set_last_tick(id, 900);

        manager.catch_up(id, 999, EPOCH, 900).await;

        // Live tick after catch-up completes.
        let live = vec![transfer_log(1000, 106, 50)];
        manager.push_verified(1000, &live);

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame_json(&frame));
        }

        // Six catch-up frames, one completion, one live frame.
        assert_eq!(frames.len(), 8);
        let mut previous = (0u64, 0u64);
        for frame in &frames[..6] {
            assert_eq!(frame["type"], "log");
            assert_eq!(frame["isCatchUp"], true);
            let key = (
                frame["message"]["tick"].as_u64().unwrap(),
                frame["message"]["logId"].as_u64().unwrap(),
            );
            assert!(key > previous, "frames must ascend by (tick, logId)");
            previous = key;
        }
        assert_eq!(frames[6]["type"], "catchUpComplete");
        assert_eq!(frames[6]["logsDelivered"], 6);
        assert_eq!(frames[6]["fromTick"], 901);
        assert_eq!(frames[6]["toTick"], 999);
        assert_eq!(frames[7]["type"], "log");
        assert_eq!(frames[7]["isCatchUp"], false);
        assert_eq!(frames[7]["message"]["tick"], 1000);
    }

    #[tokio::test]
    async fn live_push_skips_clients_in_catch_up_or_behind() {
        let store = Arc::new(MemoryTickStore::new());
        let manager = SubscriptionManager::new(store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = manager.add_client(tx);
        manager.subscribe(id, 0, LogType::QuTransfer as u32);
        manager.set_last_tick(id, 1000);

        // Client already acknowledged tick 1000: same-tick push skipped.
        manager.push_verified(1000, &[transfer_log(1000, 5, 10)]);
        assert!(rx.try_recv().is_err());

        manager.set_last_tick(id, 999);
        manager.push_verified(1000, &[transfer_log(1000, 5, 10)]);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn transfer_threshold_filters_small_amounts() {
        let store = Arc::new(MemoryTickStore::new());
        let manager = SubscriptionManager::new(store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = manager.add_client(tx);
        manager.subscribe(id, 0, LogType::QuTransfer as u32);
        manager.set_transfer_min_amount(id, 100);

        manager.push_verified(1000, &[transfer_log(1000, 1, 50)]);
        assert!(rx.try_recv().is_err());
        manager.push_verified(1001, &[transfer_log(1001, 2, 150)]);
        let frame = frame_json(&rx.try_recv().unwrap());
        assert_eq!(frame["message"]["body"]["amount"], 150);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let store = Arc::new(MemoryTickStore::new());
        let manager = SubscriptionManager::new(store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = manager.add_client(tx);
        manager.subscribe(id, 0, LogType::QuTransfer as u32);
        assert!(manager.unsubscribe(id, 0, LogType::QuTransfer as u32));
        manager.push_verified(1000, &[transfer_log(1000, 1, 10)]);
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.client_count(), 1);
        manager.remove_client(id);
        assert_eq!(manager.client_count(), 0);
    }
}
