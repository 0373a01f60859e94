//! Transaction lookup.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use tickwatch_types::identity::identity_from_public_key;
use tickwatch_types::Transaction;

use crate::types::{ErrorResponse, TxResponse};
use crate::ApiState;

/// GET /tx/:hash
pub async fn get_transaction(
    Path(hash): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<TxResponse>, (StatusCode, Json<ErrorResponse>)> {
    let raw = state
        .runtime
        .store
        .get_transaction(&hash)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Transaction not found")),
            )
        })?;

    let tx = Transaction::decode(&raw).map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Invalid transaction data")),
        )
    })?;

    let indexed = state
        .runtime
        .store
        .get_indexed_tx(&hash)
        .await
        .map_err(internal)?;

    Ok(Json(TxResponse {
        hash,
        from: identity_from_public_key(&tx.source_public_key, false),
        to: identity_from_public_key(&tx.destination_public_key, false),
        amount: tx.amount,
        tick: tx.tick,
        input_type: tx.input_type,
        input_size: tx.input.len(),
        input_data: hex::encode(&tx.input),
        transaction_index: indexed.map(|i| i.tx_index),
        log_id_from: indexed.map(|i| i.from_log_id),
        log_id_to: indexed.map(|i| i.to_log_id),
        executed: indexed.map(|i| i.executed),
        timestamp: indexed.map(|i| i.timestamp),
    }))
}

pub(crate) fn internal(
    err: tickwatch_storage::StoreError,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(err.to_string())),
    )
}
