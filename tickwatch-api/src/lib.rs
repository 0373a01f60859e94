//! Read-only HTTP and WebSocket surface
//!
//! Provides the query endpoints over the verified store:
//! - Balance and asset snapshots
//! - Transaction, log and tick lookups
//! - Epoch info and frontier status
//! - Topic search over indexed logs
//! - Smart-contract query forwarding and transaction broadcast
//! - WebSocket log subscriptions with catch-up

pub mod balance;
pub mod logs;
pub mod sc;
pub mod status;
pub mod subscription;
pub mod tick;
pub mod tx;
pub mod types;
pub mod ws;

pub use subscription::{SubscriptionManager, WsSink};
pub use types::*;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use tickwatch_pipeline::Runtime;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<Runtime>,
    pub subscriptions: Arc<SubscriptionManager>,
}

/// Create the API router.
pub fn create_api_router(runtime: Arc<Runtime>, subscriptions: Arc<SubscriptionManager>) -> Router {
    let state = ApiState {
        runtime,
        subscriptions,
    };

    Router::new()
        // Snapshots
        .route("/balance/:identity", get(balance::get_balance))
        .route(
            "/asset/:identity/:issuer/:name/:manage_sc_index",
            get(balance::get_asset),
        )
        // Artifacts
        .route("/tx/:hash", get(tx::get_transaction))
        .route("/log/:epoch/:from_id/:to_id", get(logs::get_log_range))
        .route("/tick/:tick", get(tick::get_tick))
        .route("/epochinfo/:epoch", get(status::get_epoch_info))
        // Status
        .route("/status", get(status::get_status))
        // Search
        .route("/findLog", post(logs::find_log))
        .route("/getlogcustom", post(logs::find_log))
        // Write-side forwarding
        .route("/querySmartContract", post(sc::query_smart_contract))
        .route("/broadcastTransaction", post(sc::broadcast_transaction))
        // Subscriptions
        .route("/subscribe", get(ws::subscribe_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
