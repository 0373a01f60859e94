//! The shared runtime value.
//!
//! One `Runtime` is constructed in main and passed by reference to every
//! stage. It owns the frontier counters, the committee snapshot, the
//! stage buffers, the store handles and the shutdown token. Frontier
//! counters are advanced only by their owning stage, through
//! compare-and-swap, and never move backwards.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use tickwatch_network::{ConnectionPool, PacketBuffer, ReceiverCounters, RouteBuffers};
use tickwatch_storage::{ArchiveStore, TickStore};
use tickwatch_types::{Committee, LogEvent, PublicKey};

use crate::ledger::EntityLedger;
use crate::sc_query::ScResponseCache;

/// Capacity of each stage buffer, in packets.
const STAGE_BUFFER_CAPACITY: usize = 4096;

/// Capacity of the verified-log fan-out channel.
const VERIFIED_LOG_CHANNEL: usize = 1024;

/// What the garbage collector does with aged ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStorageMode {
    /// Keep everything in the warm tier.
    None,
    /// Keep only the last N ticks of raw artifacts.
    LastN,
    /// Compress aged ticks and move them to the cold tier.
    ColdTier,
}

/// Static knobs the pipeline stages read.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub request_cycle_ms: u64,
    pub request_logging_cycle_ms: u64,
    pub future_offset: u32,
    pub storage_mode: TickStorageMode,
    pub last_n_ticks: u32,
    pub arbitrator: PublicKey,
    pub not_save_tick_vote: bool,
    pub trusted_entities: HashSet<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_cycle_ms: 1000,
            request_logging_cycle_ms: 100,
            future_offset: 1,
            storage_mode: TickStorageMode::None,
            last_n_ticks: 100_000,
            arbitrator: [0u8; 32],
            not_save_tick_vote: false,
            trusted_entities: HashSet::new(),
        }
    }
}

/// Monotone progress counters. Each is advanced only by its owner stage.
#[derive(Default)]
pub struct Frontiers {
    /// Highest tick for which fetch requests were emitted / data seen.
    pub fetch: AtomicU32,
    /// Highest tick for which log ranges/events were requested.
    pub log_fetch: AtomicU32,
    /// Highest tick whose data plus quorum votes are persisted.
    pub verify: AtomicU32,
    /// Highest tick whose logs are present and range-reconciled.
    pub log_verify: AtomicU32,
    /// Highest tick folded into the secondary indexes.
    pub index: AtomicU32,
}

/// Advance a frontier to `tick` unless it is already there or further.
pub fn advance_to(frontier: &AtomicU32, tick: u32) {
    let mut current = frontier.load(Ordering::Acquire);
    while tick > current {
        match frontier.compare_exchange_weak(current, tick, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

/// Cross-stage tallies surfaced on /status.
#[derive(Default)]
pub struct Tallies {
    /// Duplicate-index votes with differing signatures.
    pub byzantine_suspect: AtomicU64,
    /// Signatures that failed verification.
    pub invalid_signature: AtomicU64,
    /// Packets that failed to decode in the processor.
    pub undecodable: AtomicU64,
}

/// The buffers between the receivers and the processing stages.
pub struct StageBuffers {
    pub data: Arc<PacketBuffer>,
    pub request: Arc<PacketBuffer>,
    pub sc: Arc<PacketBuffer>,
}

impl StageBuffers {
    pub fn new() -> Self {
        Self {
            data: Arc::new(PacketBuffer::new(STAGE_BUFFER_CAPACITY)),
            request: Arc::new(PacketBuffer::new(STAGE_BUFFER_CAPACITY)),
            sc: Arc::new(PacketBuffer::new(STAGE_BUFFER_CAPACITY)),
        }
    }

    pub fn route_buffers(&self) -> RouteBuffers {
        RouteBuffers {
            data: self.data.clone(),
            request: self.request.clone(),
        }
    }

    /// Close every buffer so blocked consumers wake and exit.
    pub fn close_all(&self) {
        self.data.close();
        self.request.close();
        self.sc.close();
    }
}

impl Default for StageBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// A reconciled tick's logs, pushed to the subscription fan-out.
#[derive(Debug, Clone)]
pub struct VerifiedLogBatch {
    pub tick: u32,
    pub epoch: u16,
    pub logs: Arc<Vec<LogEvent>>,
}

pub struct Runtime {
    pub config: PipelineConfig,
    pub store: Arc<dyn TickStore>,
    pub archive: Option<Arc<dyn ArchiveStore>>,
    pub pool: Arc<ConnectionPool>,
    pub buffers: StageBuffers,
    pub frontiers: Frontiers,
    pub tallies: Tallies,
    pub receiver_counters: Arc<ReceiverCounters>,

    /// Committee snapshot, swapped whole on epoch change.
    committee: RwLock<Option<Arc<Committee>>>,
    /// Epoch the pipeline is currently processing.
    pub epoch: AtomicU32,
    /// First tick of the current epoch.
    pub initial_tick: AtomicU32,
    /// Set when an END_EPOCH marker was seen in verified data.
    pub end_epoch_seen: AtomicBool,

    /// Ticks whose logs could not be reconciled after the retry budget.
    pub log_stalled: DashMap<u32, u32>,
    /// Reconciliation attempts per tick, cleared on success.
    pub range_retries: DashMap<u32, u32>,

    pub sc_responses: ScResponseCache,
    pub ledger: EntityLedger,

    verified_logs: broadcast::Sender<VerifiedLogBatch>,
    pub shutdown: CancellationToken,
}

impl Runtime {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn TickStore>,
        archive: Option<Arc<dyn ArchiveStore>>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        let (verified_logs, _) = broadcast::channel(VERIFIED_LOG_CHANNEL);
        Self {
            config,
            store,
            archive,
            pool,
            buffers: StageBuffers::new(),
            frontiers: Frontiers::default(),
            tallies: Tallies::default(),
            receiver_counters: Arc::new(ReceiverCounters::default()),
            committee: RwLock::new(None),
            epoch: AtomicU32::new(0),
            initial_tick: AtomicU32::new(0),
            end_epoch_seen: AtomicBool::new(false),
            log_stalled: DashMap::new(),
            range_retries: DashMap::new(),
            sc_responses: ScResponseCache::new(),
            ledger: EntityLedger::new(),
            verified_logs,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn current_epoch(&self) -> u16 {
        self.epoch.load(Ordering::Acquire) as u16
    }

    pub fn set_epoch(&self, epoch: u16) {
        self.epoch.store(epoch as u32, Ordering::Release);
    }

    /// Readers observe a stable snapshot by cloning the Arc.
    pub fn committee(&self) -> Option<Arc<Committee>> {
        self.committee.read().clone()
    }

    pub fn install_committee(&self, committee: Committee) {
        *self.committee.write() = Some(Arc::new(committee));
    }

    pub fn publish_verified_logs(&self, batch: VerifiedLogBatch) {
        // No subscribers is fine; the channel drops the batch.
        let _ = self.verified_logs.send(batch);
    }

    pub fn subscribe_verified_logs(&self) -> broadcast::Receiver<VerifiedLogBatch> {
        self.verified_logs.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotone() {
        let frontier = AtomicU32::new(10);
        advance_to(&frontier, 5);
        assert_eq!(frontier.load(Ordering::Acquire), 10);
        advance_to(&frontier, 20);
        assert_eq!(frontier.load(Ordering::Acquire), 20);
    }
}
