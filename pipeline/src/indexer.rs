//! Indexer.
//!
//! Single writer, strictly sequential. For each tick just past the
//! log-verify frontier it writes the per-transaction records, the topic
//! index for indexed contract messages, and the transfer index, then
//! advances the index frontier. Every write is idempotent, so replaying
//! a tick after a restart leaves the indexes byte-identical.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use tickwatch_storage::{IndexedTx, TopicIndexEntry};
use tickwatch_types::identity::identity_from_public_key;
use tickwatch_types::tick::WallClock;
use tickwatch_types::{LogBody, LogIdRange, TickLogRanges};

use crate::error::PipelineResult;
use crate::runtime::{advance_to, Runtime};

/// Poll period of the indexing loop.
const INDEX_CYCLE: Duration = Duration::from_millis(100);

pub async fn run_indexer(runtime: Arc<Runtime>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(INDEX_CYCLE) => {}
            _ = runtime.shutdown.cancelled() => break,
        }
        loop {
            match index_next(&runtime).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => {
                    warn!(error = %err, "indexing failed, will retry");
                    break;
                }
            }
        }
    }
    trace!("indexer exited");
}

/// Index the tick just past the index frontier. Returns true when the
/// frontier advanced.
pub async fn index_next(runtime: &Runtime) -> PipelineResult<bool> {
    let tick = runtime.frontiers.index.load(Ordering::Acquire) + 1;
    if tick > runtime.frontiers.log_verify.load(Ordering::Acquire) {
        return Ok(false);
    }

    index_tick(runtime, tick).await?;
    runtime.store.update_last_indexed_tick(tick).await?;
    advance_to(&runtime.frontiers.index, tick);
    trace!(tick, "tick indexed");
    Ok(true)
}

/// Fold one tick's artifacts into the secondary indexes. Safe to replay.
pub async fn index_tick(runtime: &Runtime, tick: u32) -> PipelineResult<()> {
    let epoch = runtime.current_epoch();
    let ranges = runtime
        .store
        .get_log_ranges(tick)
        .await?
        .unwrap_or_else(|| TickLogRanges::empty(tick));

    if let Some(tick_data) = runtime.store.get_canonical_tick_data(tick).await? {
        let timestamp = unix_millis(&tick_data.clock);
        for (i, digest) in tick_data.present_transaction_digests() {
            let range = ranges.ranges.get(i).copied().unwrap_or(LogIdRange::EMPTY);
            let record = IndexedTx {
                tx_index: i as u32,
                from_log_id: if range.is_empty() { -1 } else { range.from_log_id },
                to_log_id: if range.is_empty() { -1 } else { range.to_log_id() },
                executed: !range.is_empty(),
                timestamp,
            };
            let hash = identity_from_public_key(digest, true);
            runtime.store.set_indexed_tx(&hash, &record).await?;
        }
    }

    if ranges.aggregate.is_empty() {
        return Ok(());
    }
    let logs = runtime
        .store
        .get_logs(
            epoch,
            ranges.aggregate.from_log_id as u64,
            ranges.aggregate.to_log_id() as u64,
        )
        .await?;

    for log in &logs {
        match log.parse_body() {
            LogBody::ContractMessage { .. } => {
                let Some((sc_index, sc_log_type)) = log.subscription_key() else {
                    continue;
                };
                let mut topics: [String; 3] = Default::default();
                for (slot, key) in topics.iter_mut().zip(log.topics()) {
                    *slot = identity_from_public_key(&key, true);
                }
                let entry = TopicIndexEntry {
                    log_id: log.log_id,
                    topics,
                };
                runtime
                    .store
                    .add_topic_index(sc_index, sc_log_type, tick, &entry)
                    .await?;
            }
            LogBody::QuTransfer(t) => {
                let from = identity_from_public_key(&t.source_public_key, false);
                let to = identity_from_public_key(&t.destination_public_key, false);
                runtime.store.add_transfer_index(&from, "", log.log_id).await?;
                runtime.store.add_transfer_index(&to, "", log.log_id).await?;
            }
            LogBody::AssetOwnershipChange {
                source_public_key,
                destination_public_key,
                name,
                ..
            }
            | LogBody::AssetPossessionChange {
                source_public_key,
                destination_public_key,
                name,
                ..
            } => {
                let asset: String = name
                    .iter()
                    .take_while(|c| **c != 0)
                    .map(|c| *c as char)
                    .collect();
                let from = identity_from_public_key(&source_public_key, false);
                let to = identity_from_public_key(&destination_public_key, false);
                runtime
                    .store
                    .add_transfer_index(&from, &asset, log.log_id)
                    .await?;
                runtime
                    .store
                    .add_transfer_index(&to, &asset, log.log_id)
                    .await?;
            }
            _ => {}
        }
    }

    Ok(())
}

/// Unix milliseconds from the packed wall clock (years are 2000-based).
pub fn unix_millis(clock: &WallClock) -> u64 {
    let year = 2000 + clock.year as i64;
    let month = clock.month.max(1) as i64;
    let day = clock.day.max(1) as i64;

    // Days-from-civil (Howard Hinnant's algorithm).
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let doy = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;

    let seconds = days * 86_400
        + clock.hour as i64 * 3_600
        + clock.minute as i64 * 60
        + clock.second as i64;
    (seconds * 1_000 + clock.millisecond as i64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_millis_epoch_2000() {
        let clock = WallClock {
            millisecond: 0,
            second: 0,
            minute: 0,
            hour: 0,
            day: 1,
            month: 1,
            year: 0,
        };
        // 2000-01-01T00:00:00Z
        assert_eq!(unix_millis(&clock), 946_684_800_000);
    }

    #[test]
    fn unix_millis_known_date() {
        let clock = WallClock {
            millisecond: 500,
            second: 30,
            minute: 15,
            hour: 12,
            day: 15,
            month: 6,
            year: 26,
        };
        // 2026-06-15T12:15:30.500Z
        assert_eq!(unix_millis(&clock), 1_781_525_730_500);
    }
}
