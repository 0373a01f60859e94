//! Tick lookup: canonical tick data plus votes, from the warm tier or
//! the archive.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use tickwatch_pipeline::indexer::unix_millis;
use tickwatch_types::{TickData, TickVote};

use crate::tx::internal;
use crate::types::{ErrorResponse, TickDataResponse, TickResponse, TickVoteResponse};
use crate::ApiState;

/// GET /tick/:tick
pub async fn get_tick(
    Path(tick): Path<u32>,
    State(state): State<ApiState>,
) -> Result<Json<TickResponse>, (StatusCode, Json<ErrorResponse>)> {
    // Warm tier first; aged ticks live in the archive as FullTick.
    let canonical = state
        .runtime
        .store
        .get_canonical_tick_data(tick)
        .await
        .map_err(internal)?;

    let (tick_data, votes) = if let Some(data) = canonical {
        let votes = state
            .runtime
            .store
            .get_tick_votes(tick)
            .await
            .map_err(internal)?;
        (Some(data), votes)
    } else if let Some(archive) = state.runtime.archive.as_ref() {
        match archive.get_vtick(tick).await.map_err(internal)? {
            Some(full) => {
                let votes = full.votes.into_iter().flatten().collect();
                (Some(full.tick_data), votes)
            }
            None => (None, Vec::new()),
        }
    } else {
        (None, Vec::new())
    };

    if tick_data.is_none() && votes.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Tick not found")),
        ));
    }

    Ok(Json(TickResponse {
        tick,
        tick_data: tick_data.map(render_tick_data),
        votes: votes.into_iter().map(render_vote).collect(),
    }))
}

fn render_tick_data(data: TickData) -> TickDataResponse {
    TickDataResponse {
        computor_index: data.computor_index,
        epoch: data.epoch,
        tick: data.tick,
        timestamp: unix_millis(&data.clock),
        timelock: hex::encode(data.timelock),
        transaction_digests: data
            .present_transaction_digests()
            .map(|(_, d)| hex::encode(d))
            .collect(),
        contract_fees: data.contract_fees,
        signature: hex::encode(data.signature),
    }
}

fn render_vote(vote: TickVote) -> TickVoteResponse {
    TickVoteResponse {
        computor_index: vote.computor_index,
        epoch: vote.epoch,
        tick: vote.tick,
        prev_spectrum_digest: hex::encode(vote.prev_spectrum_digest),
        prev_universe_digest: hex::encode(vote.prev_universe_digest),
        prev_computer_digest: hex::encode(vote.prev_computer_digest),
        transaction_digest: hex::encode(vote.transaction_digest),
        expected_next_tick_transaction_digest: hex::encode(
            vote.expected_next_tick_transaction_digest,
        ),
        signature: hex::encode(vote.signature),
    }
}
