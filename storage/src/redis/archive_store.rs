//! Kvrocks-backed cold tier.

use async_trait::async_trait;

use crate::backends::ArchiveStore;
use crate::error::StoreResult;
use crate::keys;
use crate::redis::RedisHandle;
use crate::types::FullTick;
use tickwatch_types::TickLogRanges;

pub struct RedisArchiveStore {
    handle: RedisHandle,
}

impl RedisArchiveStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Ok(Self {
            handle: RedisHandle::connect(url, "cold").await?,
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.handle.is_degraded()
    }
}

#[async_trait]
impl ArchiveStore for RedisArchiveStore {
    async fn insert_vtick(&self, tick: u32, full: &FullTick) -> StoreResult<()> {
        self.handle.set_bytes(&keys::vtick(tick), full.encode()).await
    }

    async fn get_vtick(&self, tick: u32) -> StoreResult<Option<FullTick>> {
        match self.handle.get_bytes(&keys::vtick(tick)).await? {
            Some(raw) => Ok(Some(FullTick::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn insert_archived_ranges(&self, ranges: &TickLogRanges) -> StoreResult<()> {
        self.handle
            .set_bytes(&keys::vtick_ranges(ranges.tick), ranges.encode())
            .await
    }

    async fn get_archived_ranges(&self, tick: u32) -> StoreResult<Option<TickLogRanges>> {
        match self.handle.get_bytes(&keys::vtick_ranges(tick)).await? {
            Some(raw) => Ok(Some(TickLogRanges::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn insert_log(&self, epoch: u16, log_id: u64, raw: &[u8]) -> StoreResult<()> {
        self.handle
            .set_bytes(&keys::log(epoch, log_id), raw.to_vec())
            .await
    }

    async fn insert_transaction(&self, hash: &str, raw: &[u8]) -> StoreResult<()> {
        self.handle
            .set_bytes(&keys::transaction(hash), raw.to_vec())
            .await
    }
}
