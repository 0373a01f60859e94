//! Network error types

use thiserror::Error;

pub type NetResult<T> = Result<T, NetError>;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Peer not connected: {0}")]
    NotConnected(String),

    #[error("No connected peer available")]
    NoPeer,

    #[error("Decode error: {0}")]
    Decode(#[from] tickwatch_types::TickwatchError),

    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}
