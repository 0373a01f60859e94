//! Storage-shaped records.

use bytes::{Buf, BufMut, BytesMut};
use tickwatch_types::tick::{TICK_DATA_SIZE, TICK_VOTE_SIZE};
use tickwatch_types::{TickData, TickVote, TickwatchError, TickwatchResult, NUMBER_OF_COMPUTORS};

/// Archival form of a fully verified tick: the canonical tick data plus
/// one vote slot per committee seat. Missing votes stay zeroed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullTick {
    pub tick_data: TickData,
    pub votes: Vec<Option<TickVote>>,
}

impl FullTick {
    pub fn new(tick_data: TickData, votes: impl IntoIterator<Item = TickVote>) -> Self {
        let mut slots = vec![None; NUMBER_OF_COMPUTORS];
        for vote in votes {
            let index = vote.computor_index as usize;
            if index < NUMBER_OF_COMPUTORS && vote.epoch != 0 {
                slots[index] = Some(vote);
            }
        }
        Self {
            tick_data,
            votes: slots,
        }
    }

    pub fn vote_count(&self) -> usize {
        self.votes.iter().filter(|v| v.is_some()).count()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(TICK_DATA_SIZE + NUMBER_OF_COMPUTORS * TICK_VOTE_SIZE);
        buf.put_slice(&self.tick_data.encode());
        for slot in self.votes.iter().take(NUMBER_OF_COMPUTORS) {
            match slot {
                Some(vote) => buf.put_slice(&vote.encode()),
                None => buf.put_slice(&[0u8; TICK_VOTE_SIZE]),
            }
        }
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> TickwatchResult<Self> {
        let expected = TICK_DATA_SIZE + NUMBER_OF_COMPUTORS * TICK_VOTE_SIZE;
        if bytes.len() < expected {
            return Err(TickwatchError::Decode(format!(
                "full tick is {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }
        let tick_data = TickData::decode(&bytes[..TICK_DATA_SIZE])?;
        let mut votes = Vec::with_capacity(NUMBER_OF_COMPUTORS);
        for i in 0..NUMBER_OF_COMPUTORS {
            let start = TICK_DATA_SIZE + i * TICK_VOTE_SIZE;
            let slot = &bytes[start..start + TICK_VOTE_SIZE];
            if slot.iter().all(|b| *b == 0) {
                votes.push(None);
            } else {
                votes.push(Some(TickVote::decode(slot)?));
            }
        }
        Ok(Self { tick_data, votes })
    }
}

/// Per-transaction index record stored at `itx:{hash}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedTx {
    pub tx_index: u32,
    pub from_log_id: i64,
    pub to_log_id: i64,
    pub executed: bool,
    /// Unix milliseconds derived from the canonical tick's wall clock.
    pub timestamp: u64,
}

impl IndexedTx {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(29);
        buf.put_u32_le(self.tx_index);
        buf.put_i64_le(self.from_log_id);
        buf.put_i64_le(self.to_log_id);
        buf.put_u8(self.executed as u8);
        buf.put_u64_le(self.timestamp);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> TickwatchResult<Self> {
        if bytes.len() < 29 {
            return Err(TickwatchError::Decode("short itx record".to_string()));
        }
        let mut buf = bytes;
        Ok(Self {
            tx_index: buf.get_u32_le(),
            from_log_id: buf.get_i64_le(),
            to_log_id: buf.get_i64_le(),
            executed: buf.get_u8() != 0,
            timestamp: buf.get_u64_le(),
        })
    }
}

/// One row of the topic index: an indexed contract log with up to three
/// topic identities. Empty strings stand for absent topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicIndexEntry {
    pub log_id: u64,
    pub topics: [String; 3],
}

impl TopicIndexEntry {
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.log_id, self.topics[0], self.topics[1], self.topics[2]
        )
    }

    pub fn decode(raw: &str) -> TickwatchResult<Self> {
        let mut parts = raw.splitn(4, '|');
        let log_id = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| TickwatchError::Decode("bad topic index entry".to_string()))?;
        let mut topics: [String; 3] = Default::default();
        for slot in topics.iter_mut() {
            *slot = parts.next().unwrap_or("").to_string();
        }
        Ok(Self { log_id, topics })
    }

    /// True when every requested (non-empty) topic matches positionally.
    pub fn matches(&self, wanted: &[&str; 3]) -> bool {
        wanted
            .iter()
            .zip(self.topics.iter())
            .all(|(want, have)| want.is_empty() || *want == have.as_str())
    }
}

/// Snapshot of the frontier counters persisted under `db_status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub latest_tick: u32,
    pub latest_epoch: u16,
    pub latest_event_tick: u32,
    pub latest_event_epoch: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwatch_types::tick::WallClock;

    fn sample_tick_data() -> TickData {
        TickData {
            computor_index: 4,
            epoch: 100,
            tick: 1000,
            clock: WallClock::default(),
            timelock: [1u8; 32],
            transaction_digests: vec![[2u8; 32]],
            contract_fees: vec![],
            signature: [3u8; 64],
        }
    }

    fn sample_vote(index: u16) -> TickVote {
        TickVote {
            computor_index: index,
            epoch: 100,
            tick: 1000,
            clock: WallClock::default(),
            prev_resource_testing_digest: 0,
            salted_resource_testing_digest: 0,
            prev_transaction_body_digest: 0,
            salted_transaction_body_digest: 0,
            prev_spectrum_digest: [1u8; 32],
            prev_universe_digest: [1u8; 32],
            prev_computer_digest: [1u8; 32],
            salted_spectrum_digest: [0u8; 32],
            salted_universe_digest: [0u8; 32],
            salted_computer_digest: [0u8; 32],
            transaction_digest: [2u8; 32],
            expected_next_tick_transaction_digest: [3u8; 32],
            signature: [4u8; 64],
        }
    }

    #[test]
    fn full_tick_round_trip() {
        let full = FullTick::new(sample_tick_data(), vec![sample_vote(0), sample_vote(675)]);
        assert_eq!(full.vote_count(), 2);
        let decoded = FullTick::decode(&full.encode()).unwrap();
        assert_eq!(decoded, full);
        assert!(decoded.votes[1].is_none());
    }

    #[test]
    fn out_of_range_vote_slot_is_dropped() {
        let mut vote = sample_vote(0);
        vote.computor_index = 676;
        let full = FullTick::new(sample_tick_data(), vec![vote]);
        assert_eq!(full.vote_count(), 0);
    }

    #[test]
    fn indexed_tx_round_trip() {
        let itx = IndexedTx {
            tx_index: 7,
            from_log_id: 100,
            to_log_id: 104,
            executed: true,
            timestamp: 1_700_000_000_000,
        };
        assert_eq!(IndexedTx::decode(&itx.encode()).unwrap(), itx);
    }

    #[test]
    fn topic_entry_round_trip_and_match() {
        let entry = TopicIndexEntry {
            log_id: 55,
            topics: ["aaa".into(), "".into(), "ccc".into()],
        };
        let decoded = TopicIndexEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded, entry);
        assert!(decoded.matches(&["aaa", "", ""]));
        assert!(decoded.matches(&["", "", "ccc"]));
        assert!(!decoded.matches(&["bbb", "", ""]));
    }
}
