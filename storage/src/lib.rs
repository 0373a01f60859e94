//! Tickwatch Storage Layer
//!
//! This crate provides the storage abstraction and implementations for
//! the observer's two persistence tiers.
//!
//! ## Module Structure
//!
//! - `types`: storage-shaped records (FullTick, IndexedTx, ...)
//! - `backends`: backend traits (TickStore for the warm tier,
//!   ArchiveStore for the cold tier)
//! - `memory`: in-memory implementations using DashMap, used by tests
//! - `redis`: RESP-protocol implementations (KeyDB warm tier, Kvrocks
//!   cold tier)
//! - `keys`: keyspace builders shared by every implementation

pub mod backends;
pub mod error;
pub mod keys;
pub mod memory;
pub mod redis;
pub mod types;

// Storage types
pub use types::{FullTick, IndexedTx, StatusSnapshot, TopicIndexEntry};

// Backend traits
pub use backends::{ArchiveStore, TickStore};

// Memory implementations
pub use memory::{MemoryArchiveStore, MemoryTickStore};

// Redis implementations
pub use crate::redis::{RedisArchiveStore, RedisTickStore};

// Errors
pub use error::{StoreError, StoreResult};
