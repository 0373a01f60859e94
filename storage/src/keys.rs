//! Keyspace builders
//!
//! Every implementation addresses records through these builders so the
//! warm tier, the cold tier, and the admin tools agree on the layout:
//!
//! - `tick_vote:{tick}:{computorIndex}`
//! - `tick_data:{tick}` (canonical) / `tick_data:{tick}:{index}:{hash}` (proposal)
//! - `transaction:{hash}`
//! - `log:{epoch}:{logId}`
//! - `tick_log_range:{tick}`
//! - `vtick:{tick}` and `vtick_ranges:{tick}` (cold tier)
//! - `db_status`, `db_status:epoch:{epoch}`
//! - `itx:{hash}`
//! - `log_index:{scIndex}:{scLogType}:{tick}`
//! - `transfer_index:{identity}:{assetName}`
//! - `init_tick:{epoch}`, `end_epoch_tick:{epoch}`
//! - `verified:{tick}`
//! - `garbage_cleaner:last_clean_tick_data`, `garbage_cleaner:last_clean_tx_tick`

pub fn tick_vote(tick: u32, computor_index: u16) -> String {
    format!("tick_vote:{tick}:{computor_index}")
}

/// Membership set of computor indexes that voted for a tick.
pub fn tick_vote_set(tick: u32) -> String {
    format!("tick_votes:{tick}")
}

/// Membership set of proposal keys stored for a tick.
pub fn tick_data_proposal_set(tick: u32) -> String {
    format!("tick_data_proposals:{tick}")
}

pub fn canonical_tick_data(tick: u32) -> String {
    format!("tick_data:{tick}")
}

pub fn tick_data_proposal(tick: u32, computor_index: u16, content_hash_hex: &str) -> String {
    format!("tick_data:{tick}:{computor_index}:{content_hash_hex}")
}

pub fn transaction(hash: &str) -> String {
    format!("transaction:{hash}")
}

pub fn log(epoch: u16, log_id: u64) -> String {
    format!("log:{epoch}:{log_id}")
}

pub fn tick_log_range(tick: u32) -> String {
    format!("tick_log_range:{tick}")
}

pub fn vtick(tick: u32) -> String {
    format!("vtick:{tick}")
}

pub fn vtick_ranges(tick: u32) -> String {
    format!("vtick_ranges:{tick}")
}

pub const DB_STATUS: &str = "db_status";

pub fn epoch_status(epoch: u16) -> String {
    format!("db_status:epoch:{epoch}")
}

pub fn indexed_tx(hash: &str) -> String {
    format!("itx:{hash}")
}

pub fn log_index(sc_index: u32, sc_log_type: u32, tick: u32) -> String {
    format!("log_index:{sc_index}:{sc_log_type}:{tick}")
}

pub fn transfer_index(identity: &str, asset_name: &str) -> String {
    format!("transfer_index:{identity}:{asset_name}")
}

pub fn init_tick(epoch: u16) -> String {
    format!("init_tick:{epoch}")
}

pub fn end_epoch_tick(epoch: u16) -> String {
    format!("end_epoch_tick:{epoch}")
}

pub fn verified(tick: u32) -> String {
    format!("verified:{tick}")
}

pub const LAST_CLEAN_TICK_DATA: &str = "garbage_cleaner:last_clean_tick_data";
pub const LAST_CLEAN_TX_TICK: &str = "garbage_cleaner:last_clean_tx_tick";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        assert_eq!(tick_vote(1000, 42), "tick_vote:1000:42");
        assert_eq!(canonical_tick_data(7), "tick_data:7");
        assert_eq!(log(100, 12), "log:100:12");
        assert_eq!(epoch_status(100), "db_status:epoch:100");
    }
}
