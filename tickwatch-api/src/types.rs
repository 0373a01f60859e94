//! Typed API responses.
//!
//! Every endpoint renders one of these records through serde; handlers
//! never build JSON by hand.

use serde::{Deserialize, Serialize};

use tickwatch_pipeline::EntityBalance;

/// Uniform error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    #[serde(flatten)]
    pub totals: EntityBalance,
    pub balance: i64,
    #[serde(rename = "currentTick")]
    pub current_tick: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TxResponse {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub amount: i64,
    pub tick: u32,
    #[serde(rename = "inputType")]
    pub input_type: u16,
    #[serde(rename = "inputSize")]
    pub input_size: usize,
    #[serde(rename = "inputData")]
    pub input_data: String,
    #[serde(rename = "transactionIndex", skip_serializing_if = "Option::is_none")]
    pub transaction_index: Option<u32>,
    #[serde(rename = "logIdFrom", skip_serializing_if = "Option::is_none")]
    pub log_id_from: Option<i64>,
    #[serde(rename = "logIdTo", skip_serializing_if = "Option::is_none")]
    pub log_id_to: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TickDataResponse {
    #[serde(rename = "computorIndex")]
    pub computor_index: u16,
    pub epoch: u16,
    pub tick: u32,
    pub timestamp: u64,
    pub timelock: String,
    #[serde(rename = "transactionDigests")]
    pub transaction_digests: Vec<String>,
    #[serde(rename = "contractFees")]
    pub contract_fees: Vec<i64>,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct TickVoteResponse {
    #[serde(rename = "computorIndex")]
    pub computor_index: u16,
    pub epoch: u16,
    pub tick: u32,
    #[serde(rename = "prevSpectrumDigest")]
    pub prev_spectrum_digest: String,
    #[serde(rename = "prevUniverseDigest")]
    pub prev_universe_digest: String,
    #[serde(rename = "prevComputerDigest")]
    pub prev_computer_digest: String,
    #[serde(rename = "transactionDigest")]
    pub transaction_digest: String,
    #[serde(rename = "expectedNextTickTransactionDigest")]
    pub expected_next_tick_transaction_digest: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct TickResponse {
    pub tick: u32,
    #[serde(rename = "tickData", skip_serializing_if = "Option::is_none")]
    pub tick_data: Option<TickDataResponse>,
    pub votes: Vec<TickVoteResponse>,
}

#[derive(Debug, Serialize)]
pub struct EpochInfoResponse {
    pub epoch: u16,
    #[serde(rename = "initialTick")]
    pub initial_tick: u32,
    #[serde(rename = "endTick")]
    pub end_tick: u32,
    #[serde(rename = "endTickStartLogId")]
    pub end_tick_start_log_id: i64,
    #[serde(rename = "endTickEndLogId")]
    pub end_tick_end_log_id: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(rename = "currentProcessingEpoch")]
    pub current_processing_epoch: u16,
    #[serde(rename = "initialTick")]
    pub initial_tick: u32,
    #[serde(rename = "fetchFrontier")]
    pub fetch_frontier: u32,
    #[serde(rename = "logFetchFrontier")]
    pub log_fetch_frontier: u32,
    #[serde(rename = "verifyFrontier")]
    pub verify_frontier: u32,
    #[serde(rename = "logVerifyFrontier")]
    pub log_verify_frontier: u32,
    #[serde(rename = "indexFrontier")]
    pub index_frontier: u32,
    #[serde(rename = "byzantineSuspect")]
    pub byzantine_suspect: u64,
    #[serde(rename = "invalidSignatures")]
    pub invalid_signatures: u64,
    #[serde(rename = "droppedPackets")]
    pub dropped_packets: u64,
    #[serde(rename = "logStalledTicks")]
    pub log_stalled_ticks: Vec<u32>,
    #[serde(rename = "subscribedClients")]
    pub subscribed_clients: usize,
}

#[derive(Debug, Deserialize)]
pub struct FindLogRequest {
    #[serde(rename = "scIndex")]
    pub sc_index: u32,
    #[serde(rename = "logType")]
    pub log_type: u32,
    #[serde(default)]
    pub topic1: String,
    #[serde(default)]
    pub topic2: String,
    #[serde(default)]
    pub topic3: String,
    #[serde(rename = "fromTick")]
    pub from_tick: u32,
    #[serde(rename = "toTick")]
    pub to_tick: u32,
}

#[derive(Debug, Serialize)]
pub struct FindLogResponse {
    #[serde(rename = "logIds")]
    pub log_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ScQueryRequest {
    pub nonce: u32,
    #[serde(rename = "scIndex")]
    pub sc_index: u32,
    #[serde(rename = "funcNumber")]
    pub func_number: u16,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct ScQueryResponse {
    pub nonce: u32,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct ScPendingResponse {
    pub error: &'static str,
    pub nonce: u32,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastTransactionRequest {
    /// Hex encoding of the full signed transaction envelope.
    pub transaction: String,
}

#[derive(Debug, Serialize)]
pub struct BroadcastTransactionResponse {
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    pub peers: usize,
}
