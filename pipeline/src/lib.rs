//! The ingestion-verification-indexing pipeline.
//!
//! Stage layout, upstream to downstream:
//! - `scheduler` - emits fetch requests against a sliding target tick
//! - `processor` - drains the data buffer, validates and persists raw
//!   artifacts
//! - `verifier` - admits ticks on committee quorum
//! - `reconciler` - cross-checks log ranges against received logs
//! - `indexer` - folds verified ticks into the secondary indexes
//! - `garbage` - compresses aged ticks into the cold tier
//! - `sc_query` - forwards contract queries and caches responses
//!
//! Every stage borrows the one explicit [`Runtime`] value built in main;
//! there is no global state.

pub mod error;
pub mod garbage;
pub mod indexer;
pub mod ledger;
pub mod processor;
pub mod reconciler;
pub mod runtime;
pub mod sc_query;
pub mod scheduler;
pub mod verifier;

pub use error::{PipelineError, PipelineResult};
pub use ledger::{AssetHolding, EntityBalance, EntityLedger};
pub use runtime::{
    PipelineConfig, Runtime, StageBuffers, TickStorageMode, VerifiedLogBatch,
};
pub use sc_query::ScResponseCache;
