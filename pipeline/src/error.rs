//! Pipeline error types

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] tickwatch_storage::StoreError),

    #[error("Network error: {0}")]
    Network(#[from] tickwatch_network::NetError),

    #[error("Decode error: {0}")]
    Decode(#[from] tickwatch_types::TickwatchError),

    #[error("Quorum not met for tick {tick}: best group has {votes} votes")]
    QuorumUnmet { tick: u32, votes: usize },

    #[error("Suspected fork at tick {tick}: two quorums observed")]
    SuspectedFork { tick: u32 },

    #[error("No canonical tick data for tick {tick}")]
    NoCanonicalData { tick: u32 },

    #[error("Log range mismatch at tick {tick}: {reason}")]
    RangeMismatch { tick: u32, reason: String },

    #[error("Missing log {log_id} in epoch {epoch}")]
    MissingLog { epoch: u16, log_id: u64 },
}
