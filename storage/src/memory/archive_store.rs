//! DashMap-backed cold tier.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::backends::ArchiveStore;
use crate::error::StoreResult;
use crate::types::FullTick;
use tickwatch_types::TickLogRanges;

#[derive(Default)]
pub struct MemoryArchiveStore {
    vticks: DashMap<u32, Vec<u8>>,
    ranges: DashMap<u32, TickLogRanges>,
    logs: DashMap<(u16, u64), Vec<u8>>,
    transactions: DashMap<String, Vec<u8>>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn insert_vtick(&self, tick: u32, full: &FullTick) -> StoreResult<()> {
        self.vticks.insert(tick, full.encode());
        Ok(())
    }

    async fn get_vtick(&self, tick: u32) -> StoreResult<Option<FullTick>> {
        match self.vticks.get(&tick) {
            Some(raw) => Ok(Some(FullTick::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn insert_archived_ranges(&self, ranges: &TickLogRanges) -> StoreResult<()> {
        self.ranges.insert(ranges.tick, ranges.clone());
        Ok(())
    }

    async fn get_archived_ranges(&self, tick: u32) -> StoreResult<Option<TickLogRanges>> {
        Ok(self.ranges.get(&tick).map(|r| r.clone()))
    }

    async fn insert_log(&self, epoch: u16, log_id: u64, raw: &[u8]) -> StoreResult<()> {
        self.logs.insert((epoch, log_id), raw.to_vec());
        Ok(())
    }

    async fn insert_transaction(&self, hash: &str, raw: &[u8]) -> StoreResult<()> {
        self.transactions.insert(hash.to_string(), raw.to_vec());
        Ok(())
    }
}
