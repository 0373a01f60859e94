//! Frontier status and epoch info.

use std::sync::atomic::Ordering;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use tickwatch_storage::keys;

use crate::tx::internal;
use crate::types::{EpochInfoResponse, ErrorResponse, StatusResponse};
use crate::ApiState;

/// GET /status
pub async fn get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let runtime = &state.runtime;
    let mut stalled: Vec<u32> = runtime.log_stalled.iter().map(|e| *e.key()).collect();
    stalled.sort_unstable();

    Json(StatusResponse {
        current_processing_epoch: runtime.current_epoch(),
        initial_tick: runtime.initial_tick.load(Ordering::Acquire),
        fetch_frontier: runtime.frontiers.fetch.load(Ordering::Acquire),
        log_fetch_frontier: runtime.frontiers.log_fetch.load(Ordering::Acquire),
        verify_frontier: runtime.frontiers.verify.load(Ordering::Acquire),
        log_verify_frontier: runtime.frontiers.log_verify.load(Ordering::Acquire),
        index_frontier: runtime.frontiers.index.load(Ordering::Acquire),
        byzantine_suspect: runtime.tallies.byzantine_suspect.load(Ordering::Relaxed),
        invalid_signatures: runtime.tallies.invalid_signature.load(Ordering::Relaxed),
        dropped_packets: runtime.buffers.data.dropped() + runtime.buffers.request.dropped(),
        log_stalled_ticks: stalled,
        subscribed_clients: state.subscriptions.client_count(),
    })
}

/// GET /epochinfo/:epoch
pub async fn get_epoch_info(
    Path(epoch): Path<u16>,
    State(state): State<ApiState>,
) -> Result<Json<EpochInfoResponse>, (StatusCode, Json<ErrorResponse>)> {
    let store = &state.runtime.store;
    let initial_tick = store
        .get_u32(&keys::init_tick(epoch))
        .await
        .map_err(internal)?
        .unwrap_or(0);
    let end_tick = store
        .get_u32(&keys::end_epoch_tick(epoch))
        .await
        .map_err(internal)?
        .unwrap_or(0);

    // The end tick's aggregate bounds the epoch's log-id range; the tick
    // may already have been moved to the archive.
    let mut aggregate = None;
    if end_tick > 0 {
        aggregate = store.get_tick_log_range(end_tick).await.map_err(internal)?;
        if aggregate.is_none() {
            if let Some(archive) = state.runtime.archive.as_ref() {
                aggregate = archive
                    .get_archived_ranges(end_tick)
                    .await
                    .map_err(internal)?
                    .map(|r| r.aggregate);
            }
        }
    }
    let (start, end) = match aggregate.filter(|a| !a.is_empty()) {
        Some(range) => (range.from_log_id, range.to_log_id()),
        None => (-1, -1),
    };

    Ok(Json(EpochInfoResponse {
        epoch,
        initial_tick,
        end_tick,
        end_tick_start_log_id: start,
        end_tick_end_log_id: end,
    }))
}
