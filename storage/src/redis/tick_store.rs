//! KeyDB-backed warm tier.

use async_trait::async_trait;

use crate::backends::TickStore;
use crate::error::{StoreError, StoreResult};
use crate::keys;
use crate::redis::RedisHandle;
use crate::types::{IndexedTx, StatusSnapshot, TopicIndexEntry};
use tickwatch_types::{LogEvent, LogIdRange, TickData, TickLogRanges, TickVote};

/// How many log keys one MGET round-trip covers.
const LOG_FETCH_CHUNK: u64 = 512;

pub struct RedisTickStore {
    handle: RedisHandle,
}

impl RedisTickStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Ok(Self {
            handle: RedisHandle::connect(url, "warm").await?,
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.handle.is_degraded()
    }
}

#[async_trait]
impl TickStore for RedisTickStore {
    async fn insert_tick_vote(&self, vote: &TickVote) -> StoreResult<()> {
        let key = keys::tick_vote(vote.tick, vote.computor_index);
        self.handle.set_bytes_nx(&key, vote.encode()).await?;
        self.handle
            .sadd(&keys::tick_vote_set(vote.tick), vote.computor_index.to_string())
            .await
    }

    async fn tick_vote_count(&self, tick: u32) -> StoreResult<usize> {
        self.handle.scard(&keys::tick_vote_set(tick)).await
    }

    async fn get_tick_vote(&self, tick: u32, computor_index: u16) -> StoreResult<Option<TickVote>> {
        match self.handle.get_bytes(&keys::tick_vote(tick, computor_index)).await? {
            Some(raw) => Ok(Some(TickVote::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn get_tick_votes(&self, tick: u32) -> StoreResult<Vec<TickVote>> {
        let mut indexes: Vec<u16> = self
            .handle
            .smembers(&keys::tick_vote_set(tick))
            .await?
            .into_iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        indexes.sort_unstable();

        let vote_keys: Vec<String> = indexes.iter().map(|i| keys::tick_vote(tick, *i)).collect();
        let mut votes = Vec::with_capacity(vote_keys.len());
        for slot in self.handle.mget_bytes(vote_keys).await? {
            if let Some(raw) = slot {
                votes.push(TickVote::decode(&raw)?);
            }
        }
        Ok(votes)
    }

    async fn delete_tick_votes(&self, tick: u32) -> StoreResult<()> {
        let set_key = keys::tick_vote_set(tick);
        let mut to_delete: Vec<String> = self
            .handle
            .smembers(&set_key)
            .await?
            .into_iter()
            .filter_map(|m| m.parse::<u16>().ok())
            .map(|i| keys::tick_vote(tick, i))
            .collect();
        to_delete.push(set_key);
        self.handle.del(to_delete).await
    }

    async fn insert_tick_data(&self, data: &TickData) -> StoreResult<()> {
        let key = keys::tick_data_proposal(
            data.tick,
            data.computor_index,
            &hex::encode(data.content_hash()),
        );
        self.handle.set_bytes_nx(&key, data.encode()).await?;
        self.handle
            .sadd(&keys::tick_data_proposal_set(data.tick), key)
            .await
    }

    async fn get_tick_data_proposals(&self, tick: u32) -> StoreResult<Vec<TickData>> {
        let proposal_keys = self
            .handle
            .smembers(&keys::tick_data_proposal_set(tick))
            .await?;
        let mut proposals = Vec::with_capacity(proposal_keys.len());
        for slot in self.handle.mget_bytes(proposal_keys).await? {
            if let Some(raw) = slot {
                proposals.push(TickData::decode(&raw)?);
            }
        }
        Ok(proposals)
    }

    async fn set_canonical_tick_data(&self, data: &TickData) -> StoreResult<()> {
        self.handle
            .set_bytes(&keys::canonical_tick_data(data.tick), data.encode())
            .await
    }

    async fn get_canonical_tick_data(&self, tick: u32) -> StoreResult<Option<TickData>> {
        match self.handle.get_bytes(&keys::canonical_tick_data(tick)).await? {
            Some(raw) => Ok(Some(TickData::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn has_tick_data(&self, tick: u32) -> StoreResult<bool> {
        if self.handle.exists(&keys::canonical_tick_data(tick)).await? {
            return Ok(true);
        }
        Ok(self.handle.scard(&keys::tick_data_proposal_set(tick)).await? > 0)
    }

    async fn delete_tick_data(&self, tick: u32) -> StoreResult<()> {
        let set_key = keys::tick_data_proposal_set(tick);
        let mut to_delete = self.handle.smembers(&set_key).await?;
        to_delete.push(set_key);
        to_delete.push(keys::canonical_tick_data(tick));
        self.handle.del(to_delete).await
    }

    async fn mark_tick_verified(&self, tick: u32, vote_count: u32) -> StoreResult<()> {
        self.handle
            .set_bytes(&keys::verified(tick), vote_count.to_string().into_bytes())
            .await
    }

    async fn is_tick_verified(&self, tick: u32) -> StoreResult<bool> {
        self.handle.exists(&keys::verified(tick)).await
    }

    async fn insert_transaction(&self, hash: &str, raw: &[u8]) -> StoreResult<()> {
        self.handle
            .set_bytes_nx(&keys::transaction(hash), raw.to_vec())
            .await
    }

    async fn get_transaction(&self, hash: &str) -> StoreResult<Option<Vec<u8>>> {
        self.handle.get_bytes(&keys::transaction(hash)).await
    }

    async fn has_transaction(&self, hash: &str) -> StoreResult<bool> {
        self.handle.exists(&keys::transaction(hash)).await
    }

    async fn delete_transaction(&self, hash: &str) -> StoreResult<()> {
        self.handle.del(vec![keys::transaction(hash)]).await
    }

    async fn insert_log(&self, epoch: u16, log_id: u64, raw: &[u8]) -> StoreResult<()> {
        self.handle
            .set_bytes_nx(&keys::log(epoch, log_id), raw.to_vec())
            .await
    }

    async fn get_log(&self, epoch: u16, log_id: u64) -> StoreResult<Option<LogEvent>> {
        match self.handle.get_bytes(&keys::log(epoch, log_id)).await? {
            Some(raw) => Ok(Some(LogEvent::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn log_exists(&self, epoch: u16, log_id: u64) -> StoreResult<bool> {
        self.handle.exists(&keys::log(epoch, log_id)).await
    }

    async fn get_logs(&self, epoch: u16, from_id: u64, to_id: u64) -> StoreResult<Vec<LogEvent>> {
        let mut out = Vec::new();
        let mut start = from_id;
        while start <= to_id {
            let end = to_id.min(start + LOG_FETCH_CHUNK - 1);
            let chunk_keys: Vec<String> = (start..=end).map(|id| keys::log(epoch, id)).collect();
            for slot in self.handle.mget_bytes(chunk_keys).await? {
                if let Some(raw) = slot {
                    out.push(LogEvent::decode(&raw)?);
                }
            }
            start = end + 1;
        }
        Ok(out)
    }

    async fn delete_logs(&self, epoch: u16, from_id: u64, to_id: u64) -> StoreResult<()> {
        let mut start = from_id;
        while start <= to_id {
            let end = to_id.min(start + LOG_FETCH_CHUNK - 1);
            let chunk: Vec<String> = (start..=end).map(|id| keys::log(epoch, id)).collect();
            self.handle.del(chunk).await?;
            start = end + 1;
        }
        Ok(())
    }

    async fn insert_log_ranges(&self, ranges: &TickLogRanges) -> StoreResult<()> {
        self.handle
            .set_bytes(&keys::tick_log_range(ranges.tick), ranges.encode())
            .await
    }

    async fn get_log_ranges(&self, tick: u32) -> StoreResult<Option<TickLogRanges>> {
        match self.handle.get_bytes(&keys::tick_log_range(tick)).await? {
            Some(raw) => Ok(Some(TickLogRanges::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn get_tick_log_range(&self, tick: u32) -> StoreResult<Option<LogIdRange>> {
        Ok(self.get_log_ranges(tick).await?.map(|r| r.aggregate))
    }

    async fn delete_log_ranges(&self, tick: u32) -> StoreResult<()> {
        self.handle.del(vec![keys::tick_log_range(tick)]).await
    }

    async fn set_indexed_tx(&self, hash: &str, record: &IndexedTx) -> StoreResult<()> {
        self.handle
            .set_bytes(&keys::indexed_tx(hash), record.encode())
            .await
    }

    async fn get_indexed_tx(&self, hash: &str) -> StoreResult<Option<IndexedTx>> {
        match self.handle.get_bytes(&keys::indexed_tx(hash)).await? {
            Some(raw) => Ok(Some(IndexedTx::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn add_topic_index(
        &self,
        sc_index: u32,
        sc_log_type: u32,
        tick: u32,
        entry: &TopicIndexEntry,
    ) -> StoreResult<()> {
        // Set semantics make the replayed write a no-op.
        self.handle
            .sadd(&keys::log_index(sc_index, sc_log_type, tick), entry.encode())
            .await
    }

    async fn get_topic_index(
        &self,
        sc_index: u32,
        sc_log_type: u32,
        tick: u32,
    ) -> StoreResult<Vec<TopicIndexEntry>> {
        let members = self
            .handle
            .smembers(&keys::log_index(sc_index, sc_log_type, tick))
            .await?;
        let mut entries = members
            .iter()
            .map(|m| TopicIndexEntry::decode(m))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.log_id);
        Ok(entries)
    }

    async fn add_transfer_index(
        &self,
        identity: &str,
        asset_name: &str,
        log_id: u64,
    ) -> StoreResult<()> {
        self.handle
            .sadd(&keys::transfer_index(identity, asset_name), log_id.to_string())
            .await
    }

    async fn get_transfer_index(
        &self,
        identity: &str,
        asset_name: &str,
    ) -> StoreResult<Vec<u64>> {
        let mut ids: Vec<u64> = self
            .handle
            .smembers(&keys::transfer_index(identity, asset_name))
            .await?
            .into_iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn update_latest_tick_and_epoch(&self, tick: u32, epoch: u16) -> StoreResult<()> {
        self.handle
            .hset_monotone(
                keys::DB_STATUS,
                "latest_tick",
                tick as u64,
                Some(("latest_epoch", epoch as u64)),
            )
            .await
    }

    async fn update_latest_event_tick_and_epoch(&self, tick: u32, epoch: u16) -> StoreResult<()> {
        self.handle
            .hset_monotone(
                keys::DB_STATUS,
                "latest_event_tick",
                tick as u64,
                Some(("latest_event_epoch", epoch as u64)),
            )
            .await
    }

    async fn get_status(&self) -> StoreResult<StatusSnapshot> {
        let latest_tick = self.handle.hget_u64(keys::DB_STATUS, "latest_tick").await?;
        let latest_epoch = self.handle.hget_u64(keys::DB_STATUS, "latest_epoch").await?;
        let latest_event_tick = self
            .handle
            .hget_u64(keys::DB_STATUS, "latest_event_tick")
            .await?;
        let latest_event_epoch = self
            .handle
            .hget_u64(keys::DB_STATUS, "latest_event_epoch")
            .await?;
        Ok(StatusSnapshot {
            latest_tick: latest_tick.unwrap_or(0) as u32,
            latest_epoch: latest_epoch.unwrap_or(0) as u16,
            latest_event_tick: latest_event_tick.unwrap_or(0) as u32,
            latest_event_epoch: latest_event_epoch.unwrap_or(0) as u16,
        })
    }

    async fn update_latest_verified_tick(&self, tick: u32) -> StoreResult<()> {
        self.handle
            .hset_monotone(keys::DB_STATUS, "latest_verified_tick", tick as u64, None)
            .await
    }

    async fn get_latest_verified_tick(&self) -> StoreResult<Option<u32>> {
        Ok(self
            .handle
            .hget_u64(keys::DB_STATUS, "latest_verified_tick")
            .await?
            .map(|v| v as u32))
    }

    async fn update_latest_log_id(&self, epoch: u16, log_id: u64) -> StoreResult<()> {
        self.handle
            .hset_monotone(&keys::epoch_status(epoch), "latest_log_id", log_id, None)
            .await
    }

    async fn get_latest_log_id(&self, epoch: u16) -> StoreResult<Option<u64>> {
        self.handle
            .hget_u64(&keys::epoch_status(epoch), "latest_log_id")
            .await
    }

    async fn update_last_indexed_tick(&self, tick: u32) -> StoreResult<()> {
        self.handle
            .hset_monotone(keys::DB_STATUS, "last_indexed_tick", tick as u64, None)
            .await
    }

    async fn get_last_indexed_tick(&self) -> StoreResult<Option<u32>> {
        Ok(self
            .handle
            .hget_u64(keys::DB_STATUS, "last_indexed_tick")
            .await?
            .map(|v| v as u32))
    }

    async fn set_u32(&self, key: &str, value: u32) -> StoreResult<()> {
        self.handle
            .set_bytes(key, value.to_string().into_bytes())
            .await
    }

    async fn get_u32(&self, key: &str) -> StoreResult<Option<u32>> {
        match self.handle.get_bytes(key).await? {
            Some(raw) => {
                let text = String::from_utf8(raw)
                    .map_err(|_| StoreError::corrupt(key, "non-utf8 numeric value"))?;
                text.parse()
                    .map(Some)
                    .map_err(|_| StoreError::corrupt(key, "unparseable numeric value"))
            }
            None => Ok(None),
        }
    }
}
