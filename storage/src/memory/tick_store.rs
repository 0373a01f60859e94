//! DashMap-backed warm tier.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::backends::TickStore;
use crate::error::StoreResult;
use crate::types::{IndexedTx, StatusSnapshot, TopicIndexEntry};
use tickwatch_types::{LogEvent, LogIdRange, TickData, TickLogRanges, TickVote};

/// Warm-tier store held entirely in process memory.
#[derive(Default)]
pub struct MemoryTickStore {
    votes: DashMap<(u32, u16), TickVote>,
    proposals: DashMap<(u32, u16, [u8; 32]), TickData>,
    canonical: DashMap<u32, TickData>,
    verified: DashMap<u32, u32>,
    transactions: DashMap<String, Vec<u8>>,
    logs: DashMap<(u16, u64), Vec<u8>>,
    ranges: DashMap<u32, TickLogRanges>,
    indexed_txs: DashMap<String, IndexedTx>,
    topic_index: DashMap<(u32, u32, u32), Vec<TopicIndexEntry>>,
    transfer_index: DashMap<(String, String), Vec<u64>>,
    values: DashMap<String, u32>,
    status: Mutex<MemoryStatus>,
}

#[derive(Default)]
struct MemoryStatus {
    snapshot: StatusSnapshot,
    latest_verified_tick: Option<u32>,
    latest_log_id: BTreeMap<u16, u64>,
    last_indexed_tick: Option<u32>,
}

impl MemoryTickStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TickStore for MemoryTickStore {
    async fn insert_tick_vote(&self, vote: &TickVote) -> StoreResult<()> {
        self.votes
            .entry((vote.tick, vote.computor_index))
            .or_insert_with(|| vote.clone());
        Ok(())
    }

    async fn tick_vote_count(&self, tick: u32) -> StoreResult<usize> {
        Ok(self.votes.iter().filter(|e| e.key().0 == tick).count())
    }

    async fn get_tick_vote(&self, tick: u32, computor_index: u16) -> StoreResult<Option<TickVote>> {
        Ok(self.votes.get(&(tick, computor_index)).map(|v| v.clone()))
    }

    async fn get_tick_votes(&self, tick: u32) -> StoreResult<Vec<TickVote>> {
        let mut out: Vec<TickVote> = self
            .votes
            .iter()
            .filter(|e| e.key().0 == tick)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|v| v.computor_index);
        Ok(out)
    }

    async fn delete_tick_votes(&self, tick: u32) -> StoreResult<()> {
        self.votes.retain(|k, _| k.0 != tick);
        Ok(())
    }

    async fn insert_tick_data(&self, data: &TickData) -> StoreResult<()> {
        self.proposals
            .entry((data.tick, data.computor_index, data.content_hash()))
            .or_insert_with(|| data.clone());
        Ok(())
    }

    async fn get_tick_data_proposals(&self, tick: u32) -> StoreResult<Vec<TickData>> {
        Ok(self
            .proposals
            .iter()
            .filter(|e| e.key().0 == tick)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn set_canonical_tick_data(&self, data: &TickData) -> StoreResult<()> {
        self.canonical.insert(data.tick, data.clone());
        Ok(())
    }

    async fn get_canonical_tick_data(&self, tick: u32) -> StoreResult<Option<TickData>> {
        Ok(self.canonical.get(&tick).map(|d| d.clone()))
    }

    async fn has_tick_data(&self, tick: u32) -> StoreResult<bool> {
        Ok(self.canonical.contains_key(&tick)
            || self.proposals.iter().any(|e| e.key().0 == tick))
    }

    async fn delete_tick_data(&self, tick: u32) -> StoreResult<()> {
        self.canonical.remove(&tick);
        self.proposals.retain(|k, _| k.0 != tick);
        Ok(())
    }

    async fn mark_tick_verified(&self, tick: u32, vote_count: u32) -> StoreResult<()> {
        self.verified.insert(tick, vote_count);
        Ok(())
    }

    async fn is_tick_verified(&self, tick: u32) -> StoreResult<bool> {
        Ok(self.verified.contains_key(&tick))
    }

    async fn insert_transaction(&self, hash: &str, raw: &[u8]) -> StoreResult<()> {
        self.transactions
            .entry(hash.to_string())
            .or_insert_with(|| raw.to_vec());
        Ok(())
    }

    async fn get_transaction(&self, hash: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.transactions.get(hash).map(|v| v.clone()))
    }

    async fn has_transaction(&self, hash: &str) -> StoreResult<bool> {
        Ok(self.transactions.contains_key(hash))
    }

    async fn delete_transaction(&self, hash: &str) -> StoreResult<()> {
        self.transactions.remove(hash);
        Ok(())
    }

    async fn insert_log(&self, epoch: u16, log_id: u64, raw: &[u8]) -> StoreResult<()> {
        self.logs
            .entry((epoch, log_id))
            .or_insert_with(|| raw.to_vec());
        Ok(())
    }

    async fn get_log(&self, epoch: u16, log_id: u64) -> StoreResult<Option<LogEvent>> {
        match self.logs.get(&(epoch, log_id)) {
            Some(raw) => Ok(Some(LogEvent::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn log_exists(&self, epoch: u16, log_id: u64) -> StoreResult<bool> {
        Ok(self.logs.contains_key(&(epoch, log_id)))
    }

    async fn get_logs(&self, epoch: u16, from_id: u64, to_id: u64) -> StoreResult<Vec<LogEvent>> {
        let mut out = Vec::new();
        for id in from_id..=to_id {
            if let Some(raw) = self.logs.get(&(epoch, id)) {
                out.push(LogEvent::decode(&raw)?);
            }
        }
        Ok(out)
    }

    async fn delete_logs(&self, epoch: u16, from_id: u64, to_id: u64) -> StoreResult<()> {
        for id in from_id..=to_id {
            self.logs.remove(&(epoch, id));
        }
        Ok(())
    }

    async fn insert_log_ranges(&self, ranges: &TickLogRanges) -> StoreResult<()> {
        self.ranges.insert(ranges.tick, ranges.clone());
        Ok(())
    }

    async fn get_log_ranges(&self, tick: u32) -> StoreResult<Option<TickLogRanges>> {
        Ok(self.ranges.get(&tick).map(|r| r.clone()))
    }

    async fn get_tick_log_range(&self, tick: u32) -> StoreResult<Option<LogIdRange>> {
        Ok(self.ranges.get(&tick).map(|r| r.aggregate))
    }

    async fn delete_log_ranges(&self, tick: u32) -> StoreResult<()> {
        self.ranges.remove(&tick);
        Ok(())
    }

    async fn set_indexed_tx(&self, hash: &str, record: &IndexedTx) -> StoreResult<()> {
        self.indexed_txs.insert(hash.to_string(), *record);
        Ok(())
    }

    async fn get_indexed_tx(&self, hash: &str) -> StoreResult<Option<IndexedTx>> {
        Ok(self.indexed_txs.get(hash).map(|r| *r))
    }

    async fn add_topic_index(
        &self,
        sc_index: u32,
        sc_log_type: u32,
        tick: u32,
        entry: &TopicIndexEntry,
    ) -> StoreResult<()> {
        let mut rows = self
            .topic_index
            .entry((sc_index, sc_log_type, tick))
            .or_default();
        if !rows.iter().any(|r| r.log_id == entry.log_id) {
            rows.push(entry.clone());
        }
        Ok(())
    }

    async fn get_topic_index(
        &self,
        sc_index: u32,
        sc_log_type: u32,
        tick: u32,
    ) -> StoreResult<Vec<TopicIndexEntry>> {
        Ok(self
            .topic_index
            .get(&(sc_index, sc_log_type, tick))
            .map(|rows| rows.clone())
            .unwrap_or_default())
    }

    async fn add_transfer_index(
        &self,
        identity: &str,
        asset_name: &str,
        log_id: u64,
    ) -> StoreResult<()> {
        let mut rows = self
            .transfer_index
            .entry((identity.to_string(), asset_name.to_string()))
            .or_default();
        if !rows.contains(&log_id) {
            rows.push(log_id);
        }
        Ok(())
    }

    async fn get_transfer_index(
        &self,
        identity: &str,
        asset_name: &str,
    ) -> StoreResult<Vec<u64>> {
        Ok(self
            .transfer_index
            .get(&(identity.to_string(), asset_name.to_string()))
            .map(|rows| rows.clone())
            .unwrap_or_default())
    }

    async fn update_latest_tick_and_epoch(&self, tick: u32, epoch: u16) -> StoreResult<()> {
        let mut status = self.status.lock().unwrap();
        if tick > status.snapshot.latest_tick {
            status.snapshot.latest_tick = tick;
            status.snapshot.latest_epoch = epoch;
        }
        Ok(())
    }

    async fn update_latest_event_tick_and_epoch(&self, tick: u32, epoch: u16) -> StoreResult<()> {
        let mut status = self.status.lock().unwrap();
        if tick > status.snapshot.latest_event_tick {
            status.snapshot.latest_event_tick = tick;
            status.snapshot.latest_event_epoch = epoch;
        }
        Ok(())
    }

    async fn get_status(&self) -> StoreResult<StatusSnapshot> {
        Ok(self.status.lock().unwrap().snapshot)
    }

    async fn update_latest_verified_tick(&self, tick: u32) -> StoreResult<()> {
        let mut status = self.status.lock().unwrap();
        if status.latest_verified_tick.map_or(true, |t| tick > t) {
            status.latest_verified_tick = Some(tick);
        }
        Ok(())
    }

    async fn get_latest_verified_tick(&self) -> StoreResult<Option<u32>> {
        Ok(self.status.lock().unwrap().latest_verified_tick)
    }

    async fn update_latest_log_id(&self, epoch: u16, log_id: u64) -> StoreResult<()> {
        let mut status = self.status.lock().unwrap();
        let slot = status.latest_log_id.entry(epoch).or_insert(0);
        if log_id > *slot {
            *slot = log_id;
        }
        Ok(())
    }

    async fn get_latest_log_id(&self, epoch: u16) -> StoreResult<Option<u64>> {
        Ok(self.status.lock().unwrap().latest_log_id.get(&epoch).copied())
    }

    async fn update_last_indexed_tick(&self, tick: u32) -> StoreResult<()> {
        let mut status = self.status.lock().unwrap();
        if status.last_indexed_tick.map_or(true, |t| tick > t) {
            status.last_indexed_tick = Some(tick);
        }
        Ok(())
    }

    async fn get_last_indexed_tick(&self) -> StoreResult<Option<u32>> {
        Ok(self.status.lock().unwrap().last_indexed_tick)
    }

    async fn set_u32(&self, key: &str, value: u32) -> StoreResult<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_u32(&self, key: &str) -> StoreResult<Option<u32>> {
        Ok(self.values.get(key).map(|v| *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwatch_types::tick::WallClock;

    fn vote(tick: u32, index: u16) -> TickVote {
        TickVote {
            computor_index: index,
            epoch: 100,
            tick,
            clock: WallClock::default(),
            prev_resource_testing_digest: 0,
            salted_resource_testing_digest: 0,
            prev_transaction_body_digest: 0,
            salted_transaction_body_digest: 0,
            prev_spectrum_digest: [0u8; 32],
            prev_universe_digest: [0u8; 32],
            prev_computer_digest: [0u8; 32],
            salted_spectrum_digest: [0u8; 32],
            salted_universe_digest: [0u8; 32],
            salted_computer_digest: [0u8; 32],
            transaction_digest: [0u8; 32],
            expected_next_tick_transaction_digest: [0u8; 32],
            signature: [1u8; 64],
        }
    }

    #[tokio::test]
    async fn duplicate_vote_leaves_storage_unchanged() {
        let store = MemoryTickStore::new();
        let first = vote(1000, 5);
        store.insert_tick_vote(&first).await.unwrap();

        let mut second = vote(1000, 5);
        second.signature = [9u8; 64];
        store.insert_tick_vote(&second).await.unwrap();

        assert_eq!(store.tick_vote_count(1000).await.unwrap(), 1);
        let stored = store.get_tick_vote(1000, 5).await.unwrap().unwrap();
        assert_eq!(stored.signature, first.signature);
    }

    #[tokio::test]
    async fn latest_tick_is_monotone() {
        let store = MemoryTickStore::new();
        store.update_latest_tick_and_epoch(100, 10).await.unwrap();
        store.update_latest_tick_and_epoch(50, 11).await.unwrap();
        let status = store.get_status().await.unwrap();
        assert_eq!(status.latest_tick, 100);
        assert_eq!(status.latest_epoch, 10);
    }

    #[tokio::test]
    async fn topic_index_deduplicates_on_replay() {
        let store = MemoryTickStore::new();
        let entry = TopicIndexEntry {
            log_id: 7,
            topics: ["a".into(), "".into(), "".into()],
        };
        store.add_topic_index(5, 100_000, 42, &entry).await.unwrap();
        store.add_topic_index(5, 100_000, 42, &entry).await.unwrap();
        assert_eq!(store.get_topic_index(5, 100_000, 42).await.unwrap().len(), 1);
    }
}
