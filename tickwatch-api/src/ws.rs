//! WebSocket endpoint and client protocol.
//!
//! Clients send JSON commands tagged by `type`; the server answers with
//! `log` and `catchUpComplete` frames. The verified-log fan-out runs as
//! one dispatch task per process, feeding the subscription manager.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use tickwatch_pipeline::Runtime;

use crate::subscription::SubscriptionManager;
use crate::ApiState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe { sc_index: u32, log_type: u32 },
    #[serde(rename_all = "camelCase")]
    Unsubscribe { sc_index: u32, log_type: u32 },
    #[serde(rename_all = "camelCase")]
    SetLastTick { tick: u32 },
    #[serde(rename_all = "camelCase")]
    SetLastLogId { log_id: i64 },
    #[serde(rename_all = "camelCase")]
    SetTransferMinAmount { amount: i64 },
    #[serde(rename_all = "camelCase")]
    CatchUp { to_tick: u32 },
    #[serde(rename_all = "camelCase")]
    CatchUpByLogId { to_log_id: i64 },
}

/// GET /subscribe
pub async fn subscribe_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client = state.subscriptions.add_client(tx);

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(frame) = outgoing else { break };
                if sender.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&state, client, &text);
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    state.subscriptions.remove_client(client);
}

fn handle_client_message(state: &ApiState, client: u64, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(client, error = %err, "unparseable websocket command");
            return;
        }
    };

    let manager = state.subscriptions.clone();
    let runtime = state.runtime.clone();
    match message {
        ClientMessage::Subscribe { sc_index, log_type } => {
            manager.subscribe(client, sc_index, log_type);
        }
        ClientMessage::Unsubscribe { sc_index, log_type } => {
            manager.unsubscribe(client, sc_index, log_type);
        }
        ClientMessage::SetLastTick { tick } => manager.set_last_tick(client, tick),
        ClientMessage::SetLastLogId { log_id } => manager.set_last_log_id(client, log_id),
        ClientMessage::SetTransferMinAmount { amount } => {
            manager.set_transfer_min_amount(client, amount)
        }
        ClientMessage::CatchUp { to_tick } => {
            // Catch-up streams through the client's frame queue; running
            // it as its own task keeps the socket loop responsive.
            tokio::spawn(async move {
                let epoch = runtime.current_epoch();
                let initial = runtime.initial_tick.load(Ordering::Acquire);
                manager.catch_up(client, to_tick, epoch, initial).await;
            });
        }
        ClientMessage::CatchUpByLogId { to_log_id } => {
            tokio::spawn(async move {
                let epoch = runtime.current_epoch();
                manager.catch_up_by_log_id(client, to_log_id, epoch).await;
            });
        }
    }
}

/// Forward reconciled log batches from the pipeline into the manager
/// until shutdown.
pub async fn run_dispatch(manager: Arc<SubscriptionManager>, runtime: Arc<Runtime>) {
    let mut rx = runtime.subscribe_verified_logs();
    loop {
        tokio::select! {
            batch = rx.recv() => match batch {
                Ok(batch) => manager.push_verified(batch.tick, &batch.logs),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "subscription dispatch lagged behind the reconciler");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = runtime.shutdown.cancelled() => break,
        }
    }
    trace!("subscription dispatch exited");
}
