//! Request scheduler.
//!
//! Drives a sliding window of fetch requests toward a moving target
//! tick. One loop covers tick data, votes and transactions on the slow
//! cycle; a second covers log ranges and log events on the fast cycle,
//! trusted peers first. Ticks that stay incomplete past the retry delay
//! are re-requested oldest first.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use tickwatch_types::wire::{frame, frame_tick_request};
use tickwatch_types::{PacketType, QUORUM};

use crate::error::PipelineResult;
use crate::runtime::{advance_to, Runtime};

/// Requested ticks beyond the verify frontier at any one time.
const MAX_IN_FLIGHT: u32 = 256;

/// A tick still missing artifacts is re-requested after this long.
const RETRY_AFTER: Duration = Duration::from_secs(2);

/// Re-requests per cycle, oldest ticks first.
const MAX_REREQUESTS_PER_CYCLE: usize = 64;

/// Log requests go to trusted peers this many times before any peer.
const TRUSTED_LOG_ATTEMPTS: u32 = 3;

/// Slow loop: tick data, votes and transactions.
pub async fn run_tick_scheduler(runtime: Arc<Runtime>) {
    let cycle = Duration::from_millis(runtime.config.request_cycle_ms.max(1));
    let mut requested_at: HashMap<u32, Instant> = HashMap::new();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(cycle) => {}
            _ = runtime.shutdown.cancelled() => break,
        }
        if let Err(err) = tick_cycle(&runtime, &mut requested_at).await {
            warn!(error = %err, "tick request cycle failed");
        }
    }
    trace!("tick scheduler exited");
}

async fn tick_cycle(
    runtime: &Runtime,
    requested_at: &mut HashMap<u32, Instant>,
) -> PipelineResult<()> {
    let verify = runtime.frontiers.verify.load(Ordering::Acquire);
    let target = verify + runtime.config.future_offset;

    // Emit first-time requests up to the target.
    loop {
        let fetch = runtime.frontiers.fetch.load(Ordering::Acquire);
        if fetch >= target || fetch.saturating_sub(verify) >= MAX_IN_FLIGHT {
            break;
        }
        let tick = fetch + 1;
        send_tick_requests(runtime, tick).await;
        requested_at.insert(tick, Instant::now());
        advance_to(&runtime.frontiers.fetch, tick);
    }

    // Re-request incomplete older ticks, oldest first.
    let fetch = runtime.frontiers.fetch.load(Ordering::Acquire);
    let mut rerequested = 0usize;
    for tick in (verify + 1)..=fetch {
        if rerequested >= MAX_REREQUESTS_PER_CYCLE {
            break;
        }
        let stale = requested_at
            .get(&tick)
            .map_or(true, |at| at.elapsed() >= RETRY_AFTER);
        if !stale {
            continue;
        }

        let has_data = runtime.store.has_tick_data(tick).await?;
        let vote_count = runtime.store.tick_vote_count(tick).await?;
        if has_data && vote_count >= QUORUM {
            requested_at.remove(&tick);
            continue;
        }

        if !has_data {
            let packet = frame_tick_request(PacketType::RequestTickData, rand::random(), tick);
            let _ = runtime.pool.send_to_random(&packet).await;
        }
        if vote_count < QUORUM {
            let packet = frame_tick_request(PacketType::RequestTickVotes, rand::random(), tick);
            let _ = runtime.pool.send_to_random(&packet).await;
        }
        if has_data {
            request_missing_transactions(runtime, tick).await?;
        }
        requested_at.insert(tick, Instant::now());
        rerequested += 1;
    }

    // Forget bookkeeping for admitted ticks.
    requested_at.retain(|tick, _| *tick > verify);
    Ok(())
}

async fn send_tick_requests(runtime: &Runtime, tick: u32) {
    let data = frame_tick_request(PacketType::RequestTickData, rand::random(), tick);
    let votes = frame_tick_request(PacketType::RequestTickVotes, rand::random(), tick);
    let _ = runtime.pool.send_to_random(&data).await;
    let _ = runtime.pool.send_to_random(&votes).await;
}

/// When tick data is present but referenced transactions are not, ask a
/// peer for the tick's transaction set.
async fn request_missing_transactions(runtime: &Runtime, tick: u32) -> PipelineResult<()> {
    let proposals = runtime.store.get_tick_data_proposals(tick).await?;
    let canonical = runtime.store.get_canonical_tick_data(tick).await?;
    let mut missing = false;
    'outer: for data in canonical.iter().chain(proposals.iter()) {
        for (_, digest) in data.present_transaction_digests() {
            let hash = tickwatch_types::identity::identity_from_public_key(digest, true);
            if !runtime.store.has_transaction(&hash).await? {
                missing = true;
                break 'outer;
            }
        }
    }
    if missing {
        let packet = frame_tick_request(PacketType::RequestTickTransactions, rand::random(), tick);
        let _ = runtime.pool.send_to_random(&packet).await;
    }
    Ok(())
}

/// Fast loop: log ranges and log events, trusted peers first.
pub async fn run_log_scheduler(runtime: Arc<Runtime>) {
    let cycle = Duration::from_millis(runtime.config.request_logging_cycle_ms.max(1));
    let mut attempts: HashMap<u32, u32> = HashMap::new();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(cycle) => {}
            _ = runtime.shutdown.cancelled() => break,
        }
        if let Err(err) = log_cycle(&runtime, &mut attempts).await {
            warn!(error = %err, "log request cycle failed");
        }
    }
    trace!("log scheduler exited");
}

async fn log_cycle(runtime: &Runtime, attempts: &mut HashMap<u32, u32>) -> PipelineResult<()> {
    let verify = runtime.frontiers.verify.load(Ordering::Acquire);
    let target = verify + runtime.config.future_offset;
    let log_verify = runtime.frontiers.log_verify.load(Ordering::Acquire);

    // Advance the log-fetch frontier toward the target.
    loop {
        let log_fetch = runtime.frontiers.log_fetch.load(Ordering::Acquire);
        if log_fetch >= target {
            break;
        }
        let tick = log_fetch + 1;
        request_tick_logs(runtime, tick, attempts).await?;
        advance_to(&runtime.frontiers.log_fetch, tick);
    }

    // Keep nudging ticks the reconciler is still waiting on.
    let mut rerequested = 0usize;
    for tick in (log_verify + 1)..=target {
        if rerequested >= MAX_REREQUESTS_PER_CYCLE {
            break;
        }
        if runtime.store.get_log_ranges(tick).await?.is_some() {
            attempts.remove(&tick);
            continue;
        }
        request_tick_logs(runtime, tick, attempts).await?;
        rerequested += 1;
    }

    attempts.retain(|tick, _| *tick > log_verify);
    Ok(())
}

async fn request_tick_logs(
    runtime: &Runtime,
    tick: u32,
    attempts: &mut HashMap<u32, u32>,
) -> PipelineResult<()> {
    let count = attempts.entry(tick).or_insert(0);
    *count += 1;
    let packet = frame(
        PacketType::RequestLogIdRanges,
        rand::random(),
        &tick.to_le_bytes(),
    );
    let result = if *count <= TRUSTED_LOG_ATTEMPTS {
        runtime.pool.send_to_random_trusted(&packet).await
    } else {
        runtime.pool.send_to_random(&packet).await
    };
    if let Err(err) = result {
        trace!(tick, error = %err, "log range request not sent");
    }
    Ok(())
}
