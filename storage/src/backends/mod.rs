//! Storage backend traits
//!
//! `TickStore` is the warm tier: every raw artifact the pipeline pulls
//! from peers lands here, along with the secondary indexes and the
//! persisted frontier counters. `ArchiveStore` is the cold tier that
//! aged ticks are compressed into. Implementations must be safe to call
//! from many tasks; the core does not add its own synchronization around
//! them.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{FullTick, IndexedTx, StatusSnapshot, TopicIndexEntry};
use tickwatch_types::{LogEvent, LogIdRange, TickData, TickLogRanges, TickVote};

#[async_trait]
pub trait TickStore: Send + Sync {
    // ---- tick votes ----

    /// Persist a validated vote keyed by (tick, computorIndex). Writing
    /// the same key twice must leave storage unchanged.
    async fn insert_tick_vote(&self, vote: &TickVote) -> StoreResult<()>;

    async fn tick_vote_count(&self, tick: u32) -> StoreResult<usize>;

    async fn get_tick_vote(&self, tick: u32, computor_index: u16) -> StoreResult<Option<TickVote>>;

    async fn get_tick_votes(&self, tick: u32) -> StoreResult<Vec<TickVote>>;

    async fn delete_tick_votes(&self, tick: u32) -> StoreResult<()>;

    // ---- tick data ----

    /// Persist a proposal keyed by (tick, computorIndex, contentHash).
    async fn insert_tick_data(&self, data: &TickData) -> StoreResult<()>;

    /// All proposals currently stored for a tick.
    async fn get_tick_data_proposals(&self, tick: u32) -> StoreResult<Vec<TickData>>;

    /// Promote one proposal to the canonical record for its tick.
    async fn set_canonical_tick_data(&self, data: &TickData) -> StoreResult<()>;

    async fn get_canonical_tick_data(&self, tick: u32) -> StoreResult<Option<TickData>>;

    async fn has_tick_data(&self, tick: u32) -> StoreResult<bool>;

    /// Remove the canonical record and every proposal for a tick.
    async fn delete_tick_data(&self, tick: u32) -> StoreResult<()>;

    // ---- verification markers ----

    async fn mark_tick_verified(&self, tick: u32, vote_count: u32) -> StoreResult<()>;

    async fn is_tick_verified(&self, tick: u32) -> StoreResult<bool>;

    // ---- transactions ----

    async fn insert_transaction(&self, hash: &str, raw: &[u8]) -> StoreResult<()>;

    async fn get_transaction(&self, hash: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn has_transaction(&self, hash: &str) -> StoreResult<bool>;

    async fn delete_transaction(&self, hash: &str) -> StoreResult<()>;

    // ---- log events ----

    async fn insert_log(&self, epoch: u16, log_id: u64, raw: &[u8]) -> StoreResult<()>;

    async fn get_log(&self, epoch: u16, log_id: u64) -> StoreResult<Option<LogEvent>>;

    async fn log_exists(&self, epoch: u16, log_id: u64) -> StoreResult<bool>;

    /// Logs present in `[from_id, to_id]`, ascending; absent ids are
    /// skipped.
    async fn get_logs(&self, epoch: u16, from_id: u64, to_id: u64) -> StoreResult<Vec<LogEvent>>;

    async fn delete_logs(&self, epoch: u16, from_id: u64, to_id: u64) -> StoreResult<()>;

    // ---- log ranges ----

    async fn insert_log_ranges(&self, ranges: &TickLogRanges) -> StoreResult<()>;

    async fn get_log_ranges(&self, tick: u32) -> StoreResult<Option<TickLogRanges>>;

    /// The aggregate range of a tick, when known.
    async fn get_tick_log_range(&self, tick: u32) -> StoreResult<Option<LogIdRange>>;

    async fn delete_log_ranges(&self, tick: u32) -> StoreResult<()>;

    // ---- secondary indexes ----

    async fn set_indexed_tx(&self, hash: &str, record: &IndexedTx) -> StoreResult<()>;

    async fn get_indexed_tx(&self, hash: &str) -> StoreResult<Option<IndexedTx>>;

    /// Append a topic-index row for one tick; replays must not duplicate
    /// rows.
    async fn add_topic_index(
        &self,
        sc_index: u32,
        sc_log_type: u32,
        tick: u32,
        entry: &TopicIndexEntry,
    ) -> StoreResult<()>;

    async fn get_topic_index(
        &self,
        sc_index: u32,
        sc_log_type: u32,
        tick: u32,
    ) -> StoreResult<Vec<TopicIndexEntry>>;

    /// Append a transfer-index row; replays must not duplicate rows.
    async fn add_transfer_index(
        &self,
        identity: &str,
        asset_name: &str,
        log_id: u64,
    ) -> StoreResult<()>;

    async fn get_transfer_index(&self, identity: &str, asset_name: &str)
        -> StoreResult<Vec<u64>>;

    // ---- status counters ----

    /// Monotone update: only advances when `tick` is strictly greater
    /// than the stored value.
    async fn update_latest_tick_and_epoch(&self, tick: u32, epoch: u16) -> StoreResult<()>;

    async fn update_latest_event_tick_and_epoch(&self, tick: u32, epoch: u16) -> StoreResult<()>;

    async fn get_status(&self) -> StoreResult<StatusSnapshot>;

    async fn update_latest_verified_tick(&self, tick: u32) -> StoreResult<()>;

    async fn get_latest_verified_tick(&self) -> StoreResult<Option<u32>>;

    async fn update_latest_log_id(&self, epoch: u16, log_id: u64) -> StoreResult<()>;

    async fn get_latest_log_id(&self, epoch: u16) -> StoreResult<Option<u64>>;

    async fn update_last_indexed_tick(&self, tick: u32) -> StoreResult<()>;

    async fn get_last_indexed_tick(&self) -> StoreResult<Option<u32>>;

    // ---- small named values ----

    async fn set_u32(&self, key: &str, value: u32) -> StoreResult<()>;

    async fn get_u32(&self, key: &str) -> StoreResult<Option<u32>>;
}

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn insert_vtick(&self, tick: u32, full: &FullTick) -> StoreResult<()>;

    async fn get_vtick(&self, tick: u32) -> StoreResult<Option<FullTick>>;

    async fn insert_archived_ranges(&self, ranges: &TickLogRanges) -> StoreResult<()>;

    async fn get_archived_ranges(&self, tick: u32) -> StoreResult<Option<TickLogRanges>>;

    async fn insert_log(&self, epoch: u16, log_id: u64, raw: &[u8]) -> StoreResult<()>;

    async fn insert_transaction(&self, hash: &str, raw: &[u8]) -> StoreResult<()>;
}
