// ========== Core Modules ==========
pub mod committee;
pub mod crypto;
pub mod identity;
pub mod log;
pub mod range;
pub mod tick;
pub mod transaction;
pub mod wire;

// Export from tick module
pub use tick::{TickData, TickVote, VoteGroupKey, WallClock};

// Export from transaction module
pub use transaction::Transaction;

// Export from log module
pub use log::{
    LogBody, LogEvent, LogHeader, LogType, QuTransfer, LOG_HEADER_SIZE,
    SUBSCRIBABLE_CONTRACT_LOG_TYPE_FLOOR,
};

// Export from range module
pub use range::{LogIdRange, TickLogRanges};

// Export from committee module
pub use committee::Committee;

// Export from identity module
pub use identity::{identity_from_public_key, public_key_from_identity, Identity};

// Export from wire module
pub use wire::{PacketHeader, PacketType, HEADER_SIZE, MAX_PACKET_SIZE};

/// Number of committee seats per epoch.
pub const NUMBER_OF_COMPUTORS: usize = 676;

/// Votes required to admit a tick: ceil(2 * 676 / 3).
pub const QUORUM: usize = (NUMBER_OF_COMPUTORS * 2 + 2) / 3;

/// Maximum transactions referenced by one tick.
pub const TRANSACTIONS_PER_TICK: usize = 1024;

/// Maximum contract slots carried in a tick's fee table.
pub const CONTRACT_SLOTS: usize = 1024;

/// Raw signature length on all signed records.
pub const SIGNATURE_SIZE: usize = 64;

/// Length of a public key and of every digest-of-record.
pub const DIGEST_SIZE: usize = 32;

pub type Digest = [u8; DIGEST_SIZE];
pub type PublicKey = [u8; DIGEST_SIZE];
pub type Signature = [u8; SIGNATURE_SIZE];

// Error types
pub type TickwatchResult<T> = Result<T, TickwatchError>;

#[derive(Debug, thiserror::Error)]
pub enum TickwatchError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Other error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_is_two_thirds_rounded_up() {
        assert_eq!(QUORUM, 451);
    }
}
