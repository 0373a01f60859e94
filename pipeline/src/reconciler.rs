//! Log range reconciliation.
//!
//! Strictly in tick order behind the verifier: pull the tick's reported
//! ranges, check contiguity and the aggregate, require every log body to
//! be present, and cross-check the declared byte total. Holes trigger
//! targeted re-requests; after the retry budget the tick is marked
//! log-stalled and skipped so one bad tick cannot dam the pipeline.
//! Successful ticks feed the entity ledger and the subscription fan-out.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use tickwatch_types::wire::frame;
use tickwatch_types::{LogEvent, PacketType};

use crate::error::{PipelineError, PipelineResult};
use crate::runtime::{advance_to, Runtime, VerifiedLogBatch};

/// Poll period of the reconciliation loop.
const RECONCILE_CYCLE: Duration = Duration::from_millis(100);

/// Re-request attempts before a tick is marked log-stalled.
const MAX_RANGE_RETRIES: u32 = 20;

pub async fn run_reconciler(runtime: Arc<Runtime>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(RECONCILE_CYCLE) => {}
            _ = runtime.shutdown.cancelled() => break,
        }
        loop {
            match reconcile_next(&runtime).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => {
                    warn!(error = %err, "log reconciliation failed, will retry");
                    break;
                }
            }
        }
    }
    trace!("reconciler exited");
}

/// Reconcile the tick just past the log-verify frontier. Returns true
/// when the frontier advanced.
pub async fn reconcile_next(runtime: &Runtime) -> PipelineResult<bool> {
    let tick = runtime.frontiers.log_verify.load(Ordering::Acquire) + 1;
    if tick > runtime.frontiers.verify.load(Ordering::Acquire) {
        return Ok(false);
    }

    let outcome = check_tick(runtime, tick).await;
    match outcome {
        Ok(logs) => {
            let epoch = runtime.current_epoch();
            for log in logs.iter() {
                runtime.ledger.apply(log);
            }
            if let Some(last) = logs.last() {
                runtime
                    .store
                    .update_latest_log_id(epoch, last.log_id)
                    .await?;
            }
            runtime
                .store
                .update_latest_event_tick_and_epoch(tick, epoch)
                .await?;
            runtime.range_retries.remove(&tick);
            advance_to(&runtime.frontiers.log_verify, tick);
            if !logs.is_empty() {
                runtime.publish_verified_logs(VerifiedLogBatch {
                    tick,
                    epoch,
                    logs: Arc::new(logs),
                });
            }
            trace!(tick, "tick logs reconciled");
            Ok(true)
        }
        Err(err) => {
            let mut retries = runtime.range_retries.entry(tick).or_insert(0);
            *retries += 1;
            let attempts = *retries;
            drop(retries);

            if attempts > MAX_RANGE_RETRIES {
                // Visible to operators; does not halt the pipeline.
                warn!(tick, attempts, error = %err, "tick marked log-stalled");
                runtime.log_stalled.insert(tick, attempts);
                runtime.range_retries.remove(&tick);
                advance_to(&runtime.frontiers.log_verify, tick);
                return Ok(true);
            }
            debug!(tick, attempts, error = %err, "log reconciliation incomplete, re-requesting");
            Ok(false)
        }
    }
}

/// Full per-tick check; on success returns the tick's logs in id order.
async fn check_tick(runtime: &Runtime, tick: u32) -> PipelineResult<Vec<LogEvent>> {
    let epoch = runtime.current_epoch();

    let Some(ranges) = runtime.store.get_log_ranges(tick).await? else {
        request_ranges(runtime, tick).await;
        return Err(PipelineError::RangeMismatch {
            tick,
            reason: "ranges not yet received".to_string(),
        });
    };

    ranges
        .reconcile()
        .map_err(|err| PipelineError::RangeMismatch {
            tick,
            reason: err.to_string(),
        })?;

    if ranges.aggregate.is_empty() {
        return Ok(Vec::new());
    }

    // Every id in the aggregate must have a persisted body.
    let mut missing: Option<(u64, u64)> = None;
    for id in ranges.aggregate.ids() {
        if !runtime.store.log_exists(epoch, id).await? {
            missing = Some(match missing {
                None => (id, id),
                Some((from, _)) => (from, id),
            });
        }
    }
    if let Some((from, to)) = missing {
        request_log_events(runtime, epoch, from, to).await;
        return Err(PipelineError::MissingLog { epoch, log_id: from });
    }

    let logs = runtime
        .store
        .get_logs(
            epoch,
            ranges.aggregate.from_log_id as u64,
            ranges.aggregate.to_log_id() as u64,
        )
        .await?;

    if logs.len() as i64 != ranges.aggregate.length {
        return Err(PipelineError::RangeMismatch {
            tick,
            reason: format!(
                "{} logs stored, aggregate declares {}",
                logs.len(),
                ranges.aggregate.length
            ),
        });
    }

    // Belt and suspenders against truncation.
    if ranges.aggregate_byte_size > 0 {
        let total: u64 = logs.iter().map(|l| l.byte_len() as u64).sum();
        if total != ranges.aggregate_byte_size {
            return Err(PipelineError::RangeMismatch {
                tick,
                reason: format!(
                    "{} bytes stored, peer declared {}",
                    total, ranges.aggregate_byte_size
                ),
            });
        }
    }

    Ok(logs)
}

async fn request_ranges(runtime: &Runtime, tick: u32) {
    let packet = frame(
        PacketType::RequestLogIdRanges,
        rand::random(),
        &tick.to_le_bytes(),
    );
    if let Err(err) = runtime.pool.send_to_random_trusted(&packet).await {
        trace!(tick, error = %err, "range request not sent");
    }
}

async fn request_log_events(runtime: &Runtime, epoch: u16, from: u64, to: u64) {
    let mut payload = Vec::with_capacity(18);
    payload.extend_from_slice(&epoch.to_le_bytes());
    payload.extend_from_slice(&from.to_le_bytes());
    payload.extend_from_slice(&to.to_le_bytes());
    let packet = frame(PacketType::RequestLogEvents, rand::random(), &payload);
    if let Err(err) = runtime.pool.send_to_random_trusted(&packet).await {
        trace!(from, to, error = %err, "log re-request not sent");
    }
}
