//! Smart-contract query forwarding and transaction broadcast.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use tickwatch_types::wire::frame;
use tickwatch_types::{PacketType, Transaction};

use crate::types::{
    BroadcastTransactionRequest, BroadcastTransactionResponse, ErrorResponse, ScPendingResponse,
    ScQueryRequest, ScQueryResponse,
};
use crate::ApiState;

/// How long a query waits for its response before answering 202.
const SC_QUERY_WAIT: Duration = Duration::from_secs(2);

/// Cache poll interval while waiting.
const SC_POLL: Duration = Duration::from_millis(50);

/// POST /querySmartContract
pub async fn query_smart_contract(
    State(state): State<ApiState>,
    Json(request): Json<ScQueryRequest>,
) -> Response {
    // A repeated nonce is answered straight from the cache.
    if let Some(data) = state.runtime.sc_responses.get(request.nonce) {
        return Json(ScQueryResponse {
            nonce: request.nonce,
            data: hex::encode(data),
        })
        .into_response();
    }

    let input = match decode_hex_field(&request.data) {
        Ok(input) => input,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response();
        }
    };

    let payload = build_contract_query(request.sc_index, request.func_number, &input);
    let packet = frame(PacketType::RequestContractFunction, request.nonce, &payload);
    state.runtime.buffers.sc.push(packet);

    // Wait briefly for the answer; pending after that.
    let deadline = tokio::time::Instant::now() + SC_QUERY_WAIT;
    while tokio::time::Instant::now() < deadline {
        if let Some(data) = state.runtime.sc_responses.get(request.nonce) {
            return Json(ScQueryResponse {
                nonce: request.nonce,
                data: hex::encode(data),
            })
            .into_response();
        }
        tokio::time::sleep(SC_POLL).await;
    }

    (
        StatusCode::ACCEPTED,
        Json(ScPendingResponse {
            error: "pending",
            nonce: request.nonce,
        }),
    )
        .into_response()
}

/// POST /broadcastTransaction
pub async fn broadcast_transaction(
    State(state): State<ApiState>,
    Json(request): Json<BroadcastTransactionRequest>,
) -> Response {
    let raw = match decode_hex_field(&request.transaction) {
        Ok(raw) => raw,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response();
        }
    };

    let tx = match Transaction::decode(&raw) {
        Ok(tx) => tx,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Invalid size")),
            )
                .into_response();
        }
    };
    if !tx.verify_signature() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Invalid signature")),
        )
            .into_response();
    }

    let packet = frame(PacketType::Transaction, rand_nonce(), &raw);
    let peers = state.runtime.pool.broadcast(&packet).await;

    Json(BroadcastTransactionResponse {
        tx_hash: tx.hash(),
        peers,
    })
    .into_response()
}

fn decode_hex_field(raw: &str) -> Result<Vec<u8>, String> {
    let trimmed = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")).unwrap_or(raw);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    hex::decode(trimmed).map_err(|_| "data must be a hex string".to_string())
}

fn rand_nonce() -> u32 {
    // Nanosecond jitter is enough entropy for a request nonce.
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0)
}

/// Contract-function query payload: contract index, function number,
/// input size, then the input bytes.
fn build_contract_query(sc_index: u32, func_number: u16, input: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + input.len());
    payload.extend_from_slice(&sc_index.to_le_bytes());
    payload.extend_from_slice(&func_number.to_le_bytes());
    payload.extend_from_slice(&(input.len() as u16).to_le_bytes());
    payload.extend_from_slice(input);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_decoding_accepts_prefix_and_empty() {
        assert_eq!(decode_hex_field("0x0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(decode_hex_field("").unwrap(), Vec::<u8>::new());
        assert!(decode_hex_field("zz").is_err());
    }

    #[test]
    fn contract_query_layout() {
        let payload = build_contract_query(5, 7, &[1, 2, 3]);
        assert_eq!(&payload[0..4], &5u32.to_le_bytes());
        assert_eq!(&payload[4..6], &7u16.to_le_bytes());
        assert_eq!(&payload[6..8], &3u16.to_le_bytes());
        assert_eq!(&payload[8..], &[1, 2, 3]);
    }
}
