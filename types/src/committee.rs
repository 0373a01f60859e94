//! Epoch committee.
//!
//! Each epoch is governed by a fixed, ordered list of 676 signing
//! identities. The list is distributed as a blob signed by the
//! arbitrator; a blob is only accepted when that signature verifies.

use bytes::{Buf, BufMut, BytesMut};

use crate::crypto::{digest, verify};
use crate::{
    Digest, PublicKey, Signature, TickwatchError, TickwatchResult, DIGEST_SIZE,
    NUMBER_OF_COMPUTORS, SIGNATURE_SIZE,
};

/// Encoded committee blob length.
pub const COMMITTEE_SIZE: usize = 2 + NUMBER_OF_COMPUTORS * DIGEST_SIZE + SIGNATURE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committee {
    pub epoch: u16,
    pub public_keys: Vec<PublicKey>,
    pub signature: Signature,
}

impl Committee {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(COMMITTEE_SIZE);
        buf.put_u16_le(self.epoch);
        for i in 0..NUMBER_OF_COMPUTORS {
            match self.public_keys.get(i) {
                Some(key) => buf.put_slice(key),
                None => buf.put_slice(&[0u8; DIGEST_SIZE]),
            }
        }
        buf.put_slice(&self.signature);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> TickwatchResult<Self> {
        if bytes.len() < COMMITTEE_SIZE {
            return Err(TickwatchError::Decode(format!(
                "committee blob is {} bytes, expected {}",
                bytes.len(),
                COMMITTEE_SIZE
            )));
        }
        let mut buf = bytes;
        let epoch = buf.get_u16_le();
        let mut public_keys = Vec::with_capacity(NUMBER_OF_COMPUTORS);
        for _ in 0..NUMBER_OF_COMPUTORS {
            let mut key = [0u8; DIGEST_SIZE];
            buf.copy_to_slice(&mut key);
            public_keys.push(key);
        }
        let mut signature = [0u8; SIGNATURE_SIZE];
        buf.copy_to_slice(&mut signature);
        Ok(Self {
            epoch,
            public_keys,
            signature,
        })
    }

    /// Digest the arbitrator signed: epoch plus the ordered key list.
    pub fn signing_digest(&self) -> Digest {
        let encoded = self.encode();
        digest(&encoded[..COMMITTEE_SIZE - SIGNATURE_SIZE])
    }

    /// Accept the blob only under the configured arbitrator identity.
    pub fn verify_arbitrator(&self, arbitrator: &PublicKey) -> bool {
        verify(arbitrator, &self.signing_digest(), &self.signature)
    }

    /// Signing key of one committee seat.
    pub fn key_at(&self, computor_index: u16) -> Option<&PublicKey> {
        self.public_keys.get(computor_index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NodeKeys;

    fn signed_committee(epoch: u16) -> (Committee, PublicKey) {
        let arbitrator = NodeKeys::from_seed("ddddddddddddddddddddddddddddddddddddddddddddddddddddddd");
        let mut committee = Committee {
            epoch,
            public_keys: (0..NUMBER_OF_COMPUTORS)
                .map(|i| {
                    let mut key = [0u8; 32];
                    key[0] = (i % 256) as u8;
                    key[1] = (i / 256) as u8;
                    key
                })
                .collect(),
            signature: [0u8; 64],
        };
        committee.signature = arbitrator.sign(&committee.signing_digest());
        (committee, arbitrator.public_key())
    }

    #[test]
    fn codec_round_trip() {
        let (committee, _) = signed_committee(100);
        assert_eq!(Committee::decode(&committee.encode()).unwrap(), committee);
    }

    #[test]
    fn arbitrator_signature_verifies() {
        let (committee, arbitrator) = signed_committee(100);
        assert!(committee.verify_arbitrator(&arbitrator));
    }

    #[test]
    fn wrong_arbitrator_rejected() {
        let (committee, _) = signed_committee(100);
        let other = NodeKeys::from_seed("eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee");
        assert!(!committee.verify_arbitrator(&other.public_key()));
    }

    #[test]
    fn key_at_out_of_range_is_none() {
        let (committee, _) = signed_committee(100);
        assert!(committee.key_at(675).is_some());
        assert!(committee.key_at(676).is_none());
    }
}
