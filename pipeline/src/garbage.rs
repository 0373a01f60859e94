//! Garbage collector and tier mover.
//!
//! Runs on a short cycle once ticks age past the indexing frontier by a
//! safety margin. In last-n mode aged raw artifacts are simply deleted;
//! in cold-tier mode each tick is first compressed into a FullTick
//! record and its logs and transactions moved to the archive. The
//! persisted cursor only ever advances, so a restart never re-compresses
//! a tick.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, trace, warn};

use tickwatch_storage::{keys, ArchiveStore, FullTick};

use crate::error::PipelineResult;
use crate::runtime::{Runtime, TickStorageMode};

/// Cycle of the cleaning loop.
const CLEAN_CYCLE: Duration = Duration::from_millis(100);

/// Ticks kept behind the indexing frontier before cleaning.
const SAFETY_MARGIN: u32 = 5;

pub async fn run_garbage_cleaner(runtime: Arc<Runtime>) {
    if runtime.config.storage_mode == TickStorageMode::None {
        return;
    }
    info!("garbage cleaner started");

    let mut cursor = runtime
        .store
        .get_u32(keys::LAST_CLEAN_TICK_DATA)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| runtime.initial_tick.load(Ordering::Acquire).saturating_sub(1));

    loop {
        tokio::select! {
            _ = tokio::time::sleep(CLEAN_CYCLE) => {}
            _ = runtime.shutdown.cancelled() => break,
        }
        match clean_step(&runtime, cursor).await {
            Ok(new_cursor) => cursor = new_cursor,
            Err(err) => warn!(error = %err, "garbage cleaning step failed"),
        }
    }

    // On END_EPOCH flush everything up to the indexing frontier so the
    // epoch closes with an empty warm tier.
    if runtime.end_epoch_seen.load(Ordering::Acquire) {
        let index = runtime.frontiers.index.load(Ordering::Acquire);
        if cursor < index {
            match clean_range(&runtime, cursor + 1, index).await {
                Ok(cleaned_to) => {
                    let _ = persist_cursor(&runtime, cleaned_to).await;
                }
                Err(err) => warn!(error = %err, "end-of-epoch flush failed"),
            }
        }
    }
    info!("garbage cleaner exited");
}

/// One cleaning step. Returns the new cursor.
pub async fn clean_step(runtime: &Runtime, cursor: u32) -> PipelineResult<u32> {
    let index = runtime.frontiers.index.load(Ordering::Acquire);

    let clean_to = match runtime.config.storage_mode {
        TickStorageMode::None => return Ok(cursor),
        TickStorageMode::LastN => {
            let margin = index.saturating_sub(SAFETY_MARGIN);
            margin.min(index.saturating_sub(1 + runtime.config.last_n_ticks))
        }
        TickStorageMode::ColdTier => index.saturating_sub(SAFETY_MARGIN),
    };
    if cursor >= clean_to {
        return Ok(cursor);
    }

    let cleaned_to = clean_range(runtime, cursor + 1, clean_to).await?;
    if cleaned_to > cursor {
        persist_cursor(runtime, cleaned_to).await?;
        trace!(from = cursor + 1, to = cleaned_to, "cleaned raw ticks");
    }
    Ok(cleaned_to.max(cursor))
}

async fn persist_cursor(runtime: &Runtime, cursor: u32) -> PipelineResult<()> {
    // The cursor never moves backwards across restarts.
    let stored = runtime
        .store
        .get_u32(keys::LAST_CLEAN_TICK_DATA)
        .await?
        .unwrap_or(0);
    if cursor > stored {
        runtime
            .store
            .set_u32(keys::LAST_CLEAN_TICK_DATA, cursor)
            .await?;
    }
    Ok(())
}

/// Clean `[from, to]` in order. Stops early when a tick's move to the
/// cold tier was incomplete, so the cursor never skips over it; returns
/// the last fully cleaned tick.
async fn clean_range(runtime: &Runtime, from: u32, to: u32) -> PipelineResult<u32> {
    let mut cleaned_to = from.saturating_sub(1);
    for tick in from..=to {
        if runtime.config.storage_mode == TickStorageMode::ColdTier {
            if let Some(archive) = runtime.archive.as_ref() {
                if !compress_and_move(runtime, archive.as_ref(), tick).await? {
                    warn!(tick, "tick not fully moved to cold tier, holding cursor");
                    return Ok(cleaned_to);
                }
            }
        }
        runtime.store.delete_tick_data(tick).await?;
        runtime.store.delete_tick_votes(tick).await?;
        runtime.store.delete_log_ranges(tick).await?;
        cleaned_to = tick;
    }
    Ok(cleaned_to)
}

/// Build the archival record for one tick, move its transactions and
/// logs to the cold tier, then drop them from the warm tier. Returns
/// false if any per-transaction step failed.
pub async fn compress_and_move(
    runtime: &Runtime,
    archive: &dyn ArchiveStore,
    tick: u32,
) -> PipelineResult<bool> {
    let Some(tick_data) = runtime.store.get_canonical_tick_data(tick).await? else {
        // Nothing admitted for this tick; nothing to archive.
        return Ok(true);
    };
    let epoch = tick_data.epoch;
    let votes = runtime.store.get_tick_votes(tick).await?;
    let full = FullTick::new(tick_data.clone(), votes);
    archive.insert_vtick(tick, &full).await?;

    let ranges = runtime.store.get_log_ranges(tick).await?;
    if let Some(ranges) = ranges.as_ref() {
        archive.insert_archived_ranges(ranges).await?;
    }

    let mut all_ok = true;
    for (i, digest) in tick_data.present_transaction_digests() {
        let hash = tickwatch_types::identity::identity_from_public_key(digest, true);
        match runtime.store.get_transaction(&hash).await? {
            Some(raw) => {
                archive.insert_transaction(&hash, &raw).await?;
                runtime.store.delete_transaction(&hash).await?;
            }
            None => {
                all_ok = false;
            }
        }

        if let Some(ranges) = ranges.as_ref() {
            let range = ranges.ranges.get(i).copied().unwrap_or_default();
            if !range.is_empty() {
                let from = range.from_log_id as u64;
                let to = range.to_log_id() as u64;
                for log in runtime.store.get_logs(epoch, from, to).await? {
                    archive
                        .insert_log(epoch, log.log_id, &log.encode())
                        .await?;
                }
                runtime.store.delete_logs(epoch, from, to).await?;
            }
        }
    }
    trace!(tick, "tick compressed to cold tier");
    Ok(all_ok)
}
