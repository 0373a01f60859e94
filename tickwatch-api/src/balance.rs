//! Balance and asset snapshot endpoints.

use std::sync::atomic::Ordering;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use tickwatch_pipeline::AssetHolding;
use tickwatch_types::identity::is_wellformed_identity;

use crate::types::{BalanceResponse, ErrorResponse};
use crate::ApiState;

/// GET /balance/:identity
pub async fn get_balance(
    Path(identity): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<BalanceResponse>, (StatusCode, Json<ErrorResponse>)> {
    if !is_wellformed_identity(&identity) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Wrong identity format")),
        ));
    }

    let current_tick = state
        .runtime
        .frontiers
        .log_verify
        .load(Ordering::Acquire)
        .saturating_sub(1);
    let totals = state.runtime.ledger.balance(&identity).unwrap_or_default();

    // An entity touched at the observer's head may still be under
    // in-flight update; readers get a stale marker instead of a wrong
    // number presented as final.
    let stale = totals.latest_incoming_transfer_tick > current_tick
        || totals.latest_outgoing_transfer_tick > current_tick;

    Ok(Json(BalanceResponse {
        balance: totals.balance(),
        totals,
        current_tick,
        error: stale.then(|| {
            "This entity is being processed. Balance may lag the latest transfer".to_string()
        }),
    }))
}

/// GET /asset/:identity/:issuer/:name/:manage_sc_index
pub async fn get_asset(
    Path((identity, issuer, name, manage_sc_index)): Path<(String, String, String, u32)>,
    State(state): State<ApiState>,
) -> Result<Json<AssetHolding>, (StatusCode, Json<ErrorResponse>)> {
    if !is_wellformed_identity(&identity) || !is_wellformed_identity(&issuer) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Wrong identity format")),
        ));
    }

    let holding = state
        .runtime
        .ledger
        .holding(&identity, &name)
        .filter(|h| h.managing_contract_index == manage_sc_index || manage_sc_index == 0)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Asset holding not found")),
            )
        })?;
    Ok(Json(holding))
}
