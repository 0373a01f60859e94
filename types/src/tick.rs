//! Tick artifacts: per-tick proposals and committee votes.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::crypto::digest;
use crate::{
    Digest, Signature, TickwatchError, TickwatchResult, CONTRACT_SLOTS, DIGEST_SIZE,
    SIGNATURE_SIZE, TRANSACTIONS_PER_TICK,
};

/// Encoded TickVote length.
pub const TICK_VOTE_SIZE: usize = 352;

/// Encoded TickData length.
pub const TICK_DATA_SIZE: usize =
    8 + WallClock::SIZE + DIGEST_SIZE + TRANSACTIONS_PER_TICK * DIGEST_SIZE + CONTRACT_SLOTS * 8 + SIGNATURE_SIZE;

/// Packed wall-clock stamp carried by tick artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallClock {
    pub millisecond: u16,
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    pub day: u8,
    pub month: u8,
    pub year: u8,
}

impl WallClock {
    pub const SIZE: usize = 8;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.millisecond);
        buf.put_u8(self.second);
        buf.put_u8(self.minute);
        buf.put_u8(self.hour);
        buf.put_u8(self.day);
        buf.put_u8(self.month);
        buf.put_u8(self.year);
    }

    fn decode(buf: &mut &[u8]) -> Self {
        Self {
            millisecond: buf.get_u16_le(),
            second: buf.get_u8(),
            minute: buf.get_u8(),
            hour: buf.get_u8(),
            day: buf.get_u8(),
            month: buf.get_u8(),
            year: buf.get_u8(),
        }
    }
}

/// One committee member's vote for a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickVote {
    pub computor_index: u16,
    pub epoch: u16,
    pub tick: u32,
    pub clock: WallClock,

    pub prev_resource_testing_digest: u32,
    pub salted_resource_testing_digest: u32,
    pub prev_transaction_body_digest: u32,
    pub salted_transaction_body_digest: u32,

    pub prev_spectrum_digest: Digest,
    pub prev_universe_digest: Digest,
    pub prev_computer_digest: Digest,
    pub salted_spectrum_digest: Digest,
    pub salted_universe_digest: Digest,
    pub salted_computer_digest: Digest,

    pub transaction_digest: Digest,
    pub expected_next_tick_transaction_digest: Digest,

    pub signature: Signature,
}

/// The 6-tuple that must agree across a quorum of votes for a tick to be
/// admitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoteGroupKey {
    pub prev_spectrum_digest: Digest,
    pub prev_universe_digest: Digest,
    pub prev_computer_digest: Digest,
    pub transaction_digest: Digest,
    pub expected_next_tick_transaction_digest: Digest,
    pub epoch: u16,
}

impl TickVote {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(TICK_VOTE_SIZE);
        buf.put_u16_le(self.computor_index);
        buf.put_u16_le(self.epoch);
        buf.put_u32_le(self.tick);
        self.clock.encode(&mut buf);
        buf.put_u32_le(self.prev_resource_testing_digest);
        buf.put_u32_le(self.salted_resource_testing_digest);
        buf.put_u32_le(self.prev_transaction_body_digest);
        buf.put_u32_le(self.salted_transaction_body_digest);
        buf.put_slice(&self.prev_spectrum_digest);
        buf.put_slice(&self.prev_universe_digest);
        buf.put_slice(&self.prev_computer_digest);
        buf.put_slice(&self.salted_spectrum_digest);
        buf.put_slice(&self.salted_universe_digest);
        buf.put_slice(&self.salted_computer_digest);
        buf.put_slice(&self.transaction_digest);
        buf.put_slice(&self.expected_next_tick_transaction_digest);
        buf.put_slice(&self.signature);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> TickwatchResult<Self> {
        if bytes.len() < TICK_VOTE_SIZE {
            return Err(TickwatchError::Decode(format!(
                "tick vote is {} bytes, expected {}",
                bytes.len(),
                TICK_VOTE_SIZE
            )));
        }
        let mut buf = bytes;
        let computor_index = buf.get_u16_le();
        let epoch = buf.get_u16_le();
        let tick = buf.get_u32_le();
        let clock = WallClock::decode(&mut buf);
        let prev_resource_testing_digest = buf.get_u32_le();
        let salted_resource_testing_digest = buf.get_u32_le();
        let prev_transaction_body_digest = buf.get_u32_le();
        let salted_transaction_body_digest = buf.get_u32_le();
        let mut take_digest = |buf: &mut &[u8]| -> Digest {
            let mut d = [0u8; DIGEST_SIZE];
            buf.copy_to_slice(&mut d);
            d
        };
        let prev_spectrum_digest = take_digest(&mut buf);
        let prev_universe_digest = take_digest(&mut buf);
        let prev_computer_digest = take_digest(&mut buf);
        let salted_spectrum_digest = take_digest(&mut buf);
        let salted_universe_digest = take_digest(&mut buf);
        let salted_computer_digest = take_digest(&mut buf);
        let transaction_digest = take_digest(&mut buf);
        let expected_next_tick_transaction_digest = take_digest(&mut buf);
        let mut signature = [0u8; SIGNATURE_SIZE];
        buf.copy_to_slice(&mut signature);

        Ok(Self {
            computor_index,
            epoch,
            tick,
            clock,
            prev_resource_testing_digest,
            salted_resource_testing_digest,
            prev_transaction_body_digest,
            salted_transaction_body_digest,
            prev_spectrum_digest,
            prev_universe_digest,
            prev_computer_digest,
            salted_spectrum_digest,
            salted_universe_digest,
            salted_computer_digest,
            transaction_digest,
            expected_next_tick_transaction_digest,
            signature,
        })
    }

    /// Digest the signer committed to: everything except the signature.
    pub fn signing_digest(&self) -> Digest {
        let encoded = self.encode();
        digest(&encoded[..TICK_VOTE_SIZE - SIGNATURE_SIZE])
    }

    /// Key used to group agreeing votes during admission.
    pub fn group_key(&self) -> VoteGroupKey {
        VoteGroupKey {
            prev_spectrum_digest: self.prev_spectrum_digest,
            prev_universe_digest: self.prev_universe_digest,
            prev_computer_digest: self.prev_computer_digest,
            transaction_digest: self.transaction_digest,
            expected_next_tick_transaction_digest: self.expected_next_tick_transaction_digest,
            epoch: self.epoch,
        }
    }
}

/// One proposal for the contents of a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickData {
    pub computor_index: u16,
    pub epoch: u16,
    pub tick: u32,
    pub clock: WallClock,
    pub timelock: Digest,
    pub transaction_digests: Vec<Digest>,
    pub contract_fees: Vec<i64>,
    pub signature: Signature,
}

impl TickData {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(TICK_DATA_SIZE);
        buf.put_u16_le(self.computor_index);
        buf.put_u16_le(self.epoch);
        buf.put_u32_le(self.tick);
        self.clock.encode(&mut buf);
        buf.put_slice(&self.timelock);
        for i in 0..TRANSACTIONS_PER_TICK {
            match self.transaction_digests.get(i) {
                Some(d) => buf.put_slice(d),
                None => buf.put_slice(&[0u8; DIGEST_SIZE]),
            }
        }
        for i in 0..CONTRACT_SLOTS {
            buf.put_i64_le(self.contract_fees.get(i).copied().unwrap_or(0));
        }
        buf.put_slice(&self.signature);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> TickwatchResult<Self> {
        if bytes.len() < TICK_DATA_SIZE {
            return Err(TickwatchError::Decode(format!(
                "tick data is {} bytes, expected {}",
                bytes.len(),
                TICK_DATA_SIZE
            )));
        }
        let mut buf = bytes;
        let computor_index = buf.get_u16_le();
        let epoch = buf.get_u16_le();
        let tick = buf.get_u32_le();
        let clock = WallClock::decode(&mut buf);
        let mut timelock = [0u8; DIGEST_SIZE];
        buf.copy_to_slice(&mut timelock);
        let mut transaction_digests = Vec::with_capacity(TRANSACTIONS_PER_TICK);
        for _ in 0..TRANSACTIONS_PER_TICK {
            let mut d = [0u8; DIGEST_SIZE];
            buf.copy_to_slice(&mut d);
            transaction_digests.push(d);
        }
        let mut contract_fees = Vec::with_capacity(CONTRACT_SLOTS);
        for _ in 0..CONTRACT_SLOTS {
            contract_fees.push(buf.get_i64_le());
        }
        let mut signature = [0u8; SIGNATURE_SIZE];
        buf.copy_to_slice(&mut signature);

        Ok(Self {
            computor_index,
            epoch,
            tick,
            clock,
            timelock,
            transaction_digests,
            contract_fees,
            signature,
        })
    }

    /// Hash identifying this proposal's content (signature excluded), used
    /// in the storage key so duplicate proposals coexist until admission.
    pub fn content_hash(&self) -> Digest {
        let encoded = self.encode();
        digest(&encoded[..TICK_DATA_SIZE - SIGNATURE_SIZE])
    }

    /// Re-derive the digest of the transaction set this proposal carries.
    /// A proposal is canonical when this matches the quorum's agreed
    /// transaction digest.
    pub fn transaction_set_digest(&self) -> Digest {
        let mut buf = Vec::with_capacity(TRANSACTIONS_PER_TICK * DIGEST_SIZE);
        for i in 0..TRANSACTIONS_PER_TICK {
            match self.transaction_digests.get(i) {
                Some(d) => buf.extend_from_slice(d),
                None => buf.extend_from_slice(&[0u8; DIGEST_SIZE]),
            }
        }
        digest(&buf)
    }

    /// Transaction digests that actually reference a transaction.
    pub fn present_transaction_digests(&self) -> impl Iterator<Item = (usize, &Digest)> {
        self.transaction_digests
            .iter()
            .enumerate()
            .filter(|(_, d)| **d != [0u8; DIGEST_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vote(tick: u32, index: u16) -> TickVote {
        TickVote {
            computor_index: index,
            epoch: 100,
            tick,
            clock: WallClock {
                millisecond: 500,
                second: 30,
                minute: 15,
                hour: 12,
                day: 1,
                month: 6,
                year: 26,
            },
            prev_resource_testing_digest: 1,
            salted_resource_testing_digest: 2,
            prev_transaction_body_digest: 3,
            salted_transaction_body_digest: 4,
            prev_spectrum_digest: [1u8; 32],
            prev_universe_digest: [2u8; 32],
            prev_computer_digest: [3u8; 32],
            salted_spectrum_digest: [4u8; 32],
            salted_universe_digest: [5u8; 32],
            salted_computer_digest: [6u8; 32],
            transaction_digest: [7u8; 32],
            expected_next_tick_transaction_digest: [8u8; 32],
            signature: [9u8; 64],
        }
    }

    #[test]
    fn vote_codec_round_trip() {
        let vote = sample_vote(1000, 42);
        let encoded = vote.encode();
        assert_eq!(encoded.len(), TICK_VOTE_SIZE);
        assert_eq!(TickVote::decode(&encoded).unwrap(), vote);
    }

    #[test]
    fn signing_digest_excludes_signature() {
        let mut vote = sample_vote(1000, 42);
        let before = vote.signing_digest();
        vote.signature = [0xAB; 64];
        assert_eq!(vote.signing_digest(), before);
    }

    #[test]
    fn group_key_ignores_salted_fields() {
        let mut a = sample_vote(1000, 1);
        let mut b = sample_vote(1000, 2);
        a.salted_spectrum_digest = [10u8; 32];
        b.salted_spectrum_digest = [11u8; 32];
        assert_eq!(a.group_key(), b.group_key());
    }

    #[test]
    fn tick_data_codec_round_trip() {
        let td = TickData {
            computor_index: 5,
            epoch: 100,
            tick: 1000,
            clock: WallClock::default(),
            timelock: [0xCC; 32],
            transaction_digests: vec![[1u8; 32], [2u8; 32]],
            contract_fees: vec![10, 20, 30],
            signature: [7u8; 64],
        };
        let encoded = td.encode();
        assert_eq!(encoded.len(), TICK_DATA_SIZE);
        let decoded = TickData::decode(&encoded).unwrap();
        assert_eq!(decoded.tick, 1000);
        assert_eq!(decoded.transaction_digests[0], [1u8; 32]);
        assert_eq!(decoded.transaction_digests[2], [0u8; 32]);
        assert_eq!(decoded.contract_fees[1], 20);
        assert_eq!(decoded.present_transaction_digests().count(), 2);
    }

    #[test]
    fn content_hash_ignores_signature() {
        let mut td = TickData {
            computor_index: 5,
            epoch: 100,
            tick: 1000,
            clock: WallClock::default(),
            timelock: [0u8; 32],
            transaction_digests: vec![],
            contract_fees: vec![],
            signature: [1u8; 64],
        };
        let before = td.content_hash();
        td.signature = [2u8; 64];
        assert_eq!(td.content_hash(), before);
        td.tick = 1001;
        assert_ne!(td.content_hash(), before);
    }
}
