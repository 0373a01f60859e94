//! Entity ledger.
//!
//! A lightweight balance and asset-holding table folded from verified
//! transfer logs, serving /balance and /asset reads. This is not a
//! re-derivation of ledger state: only artifacts that passed quorum
//! verification reach it, strictly in tick order.

use dashmap::DashMap;
use serde::Serialize;

use tickwatch_types::identity::identity_from_public_key;
use tickwatch_types::{LogBody, LogEvent};

/// Running totals for one identity.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EntityBalance {
    #[serde(rename = "incomingAmount")]
    pub incoming_amount: i64,
    #[serde(rename = "outgoingAmount")]
    pub outgoing_amount: i64,
    #[serde(rename = "numberOfIncomingTransfers")]
    pub number_of_incoming_transfers: u64,
    #[serde(rename = "numberOfOutgoingTransfers")]
    pub number_of_outgoing_transfers: u64,
    #[serde(rename = "latestIncomingTransferTick")]
    pub latest_incoming_transfer_tick: u32,
    #[serde(rename = "latestOutgoingTransferTick")]
    pub latest_outgoing_transfer_tick: u32,
}

impl EntityBalance {
    pub fn balance(&self) -> i64 {
        self.incoming_amount - self.outgoing_amount
    }
}

/// Shares of one asset held by one identity.
#[derive(Debug, Clone, Serialize)]
pub struct AssetHolding {
    pub issuer: String,
    #[serde(rename = "assetName")]
    pub asset_name: String,
    #[serde(rename = "numberOfShares")]
    pub number_of_shares: i64,
    #[serde(rename = "managingContractIndex")]
    pub managing_contract_index: u32,
}

#[derive(Default)]
pub struct EntityLedger {
    entities: DashMap<String, EntityBalance>,
    /// (holder identity, asset name) -> holding
    holdings: DashMap<(String, String), AssetHolding>,
}

impl EntityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one verified log into the tables. Non-transfer logs are
    /// ignored.
    pub fn apply(&self, log: &LogEvent) {
        match log.parse_body() {
            LogBody::QuTransfer(t) => {
                let from = identity_from_public_key(&t.source_public_key, false);
                let to = identity_from_public_key(&t.destination_public_key, false);
                {
                    let mut entry = self.entities.entry(from).or_default();
                    entry.outgoing_amount += t.amount;
                    entry.number_of_outgoing_transfers += 1;
                    entry.latest_outgoing_transfer_tick = log.tick;
                }
                {
                    let mut entry = self.entities.entry(to).or_default();
                    entry.incoming_amount += t.amount;
                    entry.number_of_incoming_transfers += 1;
                    entry.latest_incoming_transfer_tick = log.tick;
                }
            }
            LogBody::Burning {
                source_public_key,
                amount,
            } => {
                let from = identity_from_public_key(&source_public_key, false);
                let mut entry = self.entities.entry(from).or_default();
                entry.outgoing_amount += amount;
                entry.number_of_outgoing_transfers += 1;
                entry.latest_outgoing_transfer_tick = log.tick;
            }
            LogBody::AssetIssuance {
                issuer_public_key,
                number_of_shares,
                managing_contract_index,
                name,
                ..
            } => {
                let issuer = identity_from_public_key(&issuer_public_key, false);
                let asset = trimmed_name(&name);
                let mut entry = self
                    .holdings
                    .entry((issuer.clone(), asset.clone()))
                    .or_insert_with(|| AssetHolding {
                        issuer,
                        asset_name: asset,
                        number_of_shares: 0,
                        managing_contract_index,
                    });
                entry.number_of_shares += number_of_shares;
            }
            LogBody::AssetOwnershipChange {
                source_public_key,
                destination_public_key,
                name,
                number_of_shares,
            } => {
                let from = identity_from_public_key(&source_public_key, false);
                let to = identity_from_public_key(&destination_public_key, false);
                let asset = trimmed_name(&name);
                if let Some(mut holding) = self.holdings.get_mut(&(from, asset.clone())) {
                    holding.number_of_shares -= number_of_shares;
                }
                let mut entry = self
                    .holdings
                    .entry((to.clone(), asset.clone()))
                    .or_insert_with(|| AssetHolding {
                        issuer: to,
                        asset_name: asset,
                        number_of_shares: 0,
                        managing_contract_index: 0,
                    });
                entry.number_of_shares += number_of_shares;
            }
            _ => {}
        }
    }

    pub fn balance(&self, identity: &str) -> Option<EntityBalance> {
        self.entities.get(identity).map(|e| *e)
    }

    pub fn holding(&self, identity: &str, asset_name: &str) -> Option<AssetHolding> {
        self.holdings
            .get(&(identity.to_string(), asset_name.to_string()))
            .map(|h| h.clone())
    }

    pub fn holdings_of(&self, identity: &str) -> Vec<AssetHolding> {
        self.holdings
            .iter()
            .filter(|entry| entry.key().0 == identity)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn trimmed_name(raw: &[u8; 7]) -> String {
    raw.iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwatch_types::LogType;

    fn transfer_log(tick: u32, from: [u8; 32], to: [u8; 32], amount: i64) -> LogEvent {
        let mut body = Vec::new();
        body.extend_from_slice(&from);
        body.extend_from_slice(&to);
        body.extend_from_slice(&amount.to_le_bytes());
        LogEvent {
            epoch: 100,
            tick,
            log_type: LogType::QuTransfer as u8,
            log_id: 1,
            log_digest: 0,
            body,
        }
    }

    #[test]
    fn transfer_moves_both_sides() {
        let ledger = EntityLedger::new();
        let a = [1u8; 32];
        let b = [2u8; 32];
        ledger.apply(&transfer_log(1000, a, b, 250));

        let a_id = identity_from_public_key(&a, false);
        let b_id = identity_from_public_key(&b, false);
        let a_bal = ledger.balance(&a_id).unwrap();
        let b_bal = ledger.balance(&b_id).unwrap();
        assert_eq!(a_bal.balance(), -250);
        assert_eq!(b_bal.balance(), 250);
        assert_eq!(b_bal.latest_incoming_transfer_tick, 1000);
        assert_eq!(a_bal.number_of_outgoing_transfers, 1);
    }

    #[test]
    fn unknown_identity_has_no_balance() {
        let ledger = EntityLedger::new();
        assert!(ledger.balance("A".repeat(60).as_str()).is_none());
    }
}
