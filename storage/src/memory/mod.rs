//! In-memory storage implementations
//!
//! These implementations use DashMap for lock-free concurrent access.
//! They back the test suite and short-lived tooling; durability comes
//! from the redis implementations.

pub mod archive_store;
pub mod tick_store;

pub use archive_store::MemoryArchiveStore;
pub use tick_store::MemoryTickStore;
