//! Log lookup and topic search.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::tx::internal;
use crate::types::{ErrorResponse, FindLogRequest, FindLogResponse};
use crate::ApiState;

/// Largest id range one /log call may cover.
const MAX_LOG_RANGE: i64 = 10_000;

/// Largest tick window one /findLog call may scan.
const MAX_SEARCH_TICKS: u64 = 100_000;

/// GET /log/:epoch/:from_id/:to_id
pub async fn get_log_range(
    Path((epoch, from_id, to_id)): Path<(u16, i64, i64)>,
    State(state): State<ApiState>,
) -> Result<Json<Vec<serde_json::Value>>, (StatusCode, Json<ErrorResponse>)> {
    if from_id < 0 || to_id < from_id {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Wrong range")),
        ));
    }
    if to_id - from_id >= MAX_LOG_RANGE {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Range too large")),
        ));
    }

    let mut out = Vec::with_capacity((to_id - from_id + 1) as usize);
    for id in from_id..=to_id {
        match state
            .runtime
            .store
            .get_log(epoch, id as u64)
            .await
            .map_err(internal)?
        {
            Some(log) => out.push(log.to_json()),
            None => out.push(serde_json::json!({
                "ok": false,
                "error": "not_found",
                "epoch": epoch,
                "logId": id,
            })),
        }
    }
    Ok(Json(out))
}

/// POST /findLog
pub async fn find_log(
    State(state): State<ApiState>,
    Json(request): Json<FindLogRequest>,
) -> Result<Json<FindLogResponse>, (StatusCode, Json<ErrorResponse>)> {
    if request.from_tick > request.to_tick {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("fromTick must be <= toTick")),
        ));
    }
    for (name, topic) in [
        ("topic1", &request.topic1),
        ("topic2", &request.topic2),
        ("topic3", &request.topic3),
    ] {
        if !topic.is_empty() && topic.len() != 60 {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(format!("Invalid length {name}"))),
            ));
        }
    }

    // Topic identities are indexed lowercase.
    let topics = [
        request.topic1.to_lowercase(),
        request.topic2.to_lowercase(),
        request.topic3.to_lowercase(),
    ];
    let wanted: [&str; 3] = [&topics[0], &topics[1], &topics[2]];

    let to_tick = request
        .to_tick
        .min(request.from_tick.saturating_add(MAX_SEARCH_TICKS as u32 - 1));

    let mut log_ids = Vec::new();
    for tick in request.from_tick..=to_tick {
        let entries = state
            .runtime
            .store
            .get_topic_index(request.sc_index, request.log_type, tick)
            .await
            .map_err(internal)?;
        for entry in entries {
            if entry.matches(&wanted) {
                log_ids.push(entry.log_id);
            }
        }
    }
    Ok(Json(FindLogResponse { log_ids }))
}
