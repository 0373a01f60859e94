//! Transaction envelope.

use bytes::{Buf, BufMut, BytesMut};

use crate::crypto::{digest, verify};
use crate::identity::identity_from_public_key;
use crate::{
    Digest, PublicKey, Signature, TickwatchError, TickwatchResult, DIGEST_SIZE, SIGNATURE_SIZE,
};

/// Fixed prefix before the variable-length input.
pub const TRANSACTION_FIXED_SIZE: usize = 2 * DIGEST_SIZE + 8 + 4 + 2 + 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub source_public_key: PublicKey,
    pub destination_public_key: PublicKey,
    pub amount: i64,
    pub tick: u32,
    pub input_type: u16,
    pub input: Vec<u8>,
    pub signature: Signature,
}

impl Transaction {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(TRANSACTION_FIXED_SIZE + self.input.len() + SIGNATURE_SIZE);
        buf.put_slice(&self.source_public_key);
        buf.put_slice(&self.destination_public_key);
        buf.put_i64_le(self.amount);
        buf.put_u32_le(self.tick);
        buf.put_u16_le(self.input_type);
        buf.put_u16_le(self.input.len() as u16);
        buf.put_slice(&self.input);
        buf.put_slice(&self.signature);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> TickwatchResult<Self> {
        if bytes.len() < TRANSACTION_FIXED_SIZE + SIGNATURE_SIZE {
            return Err(TickwatchError::Decode(format!(
                "transaction is {} bytes, below minimum",
                bytes.len()
            )));
        }
        let mut buf = bytes;
        let mut source_public_key = [0u8; DIGEST_SIZE];
        buf.copy_to_slice(&mut source_public_key);
        let mut destination_public_key = [0u8; DIGEST_SIZE];
        buf.copy_to_slice(&mut destination_public_key);
        let amount = buf.get_i64_le();
        let tick = buf.get_u32_le();
        let input_type = buf.get_u16_le();
        let input_size = buf.get_u16_le() as usize;
        if buf.remaining() != input_size + SIGNATURE_SIZE {
            return Err(TickwatchError::Decode(format!(
                "transaction input size {} does not match remaining {}",
                input_size,
                buf.remaining()
            )));
        }
        let mut input = vec![0u8; input_size];
        buf.copy_to_slice(&mut input);
        let mut signature = [0u8; SIGNATURE_SIZE];
        buf.copy_to_slice(&mut signature);

        Ok(Self {
            source_public_key,
            destination_public_key,
            amount,
            tick,
            input_type,
            input,
            signature,
        })
    }

    /// Digest the source signed: the envelope minus the signature.
    pub fn signing_digest(&self) -> Digest {
        let encoded = self.encode();
        digest(&encoded[..encoded.len() - SIGNATURE_SIZE])
    }

    /// Digest of the full signed envelope; the transaction's identity.
    pub fn hash_digest(&self) -> Digest {
        digest(&self.encode())
    }

    /// Lowercase identity-encoded transaction hash.
    pub fn hash(&self) -> String {
        identity_from_public_key(&self.hash_digest(), true)
    }

    pub fn verify_signature(&self) -> bool {
        verify(&self.source_public_key, &self.signing_digest(), &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NodeKeys;

    fn signed_transaction() -> Transaction {
        let keys = NodeKeys::from_seed("ccccccccccccccccccccccccccccccccccccccccccccccccccccccc");
        let mut tx = Transaction {
            source_public_key: keys.public_key(),
            destination_public_key: [3u8; 32],
            amount: 1_000_000,
            tick: 1234,
            input_type: 0,
            input: vec![0xAA, 0xBB],
            signature: [0u8; 64],
        };
        tx.signature = keys.sign(&tx.signing_digest());
        tx
    }

    #[test]
    fn codec_round_trip() {
        let tx = signed_transaction();
        assert_eq!(Transaction::decode(&tx.encode()).unwrap(), tx);
    }

    #[test]
    fn signature_verifies() {
        assert!(signed_transaction().verify_signature());
    }

    #[test]
    fn tampered_amount_fails_verification() {
        let mut tx = signed_transaction();
        tx.amount += 1;
        assert!(!tx.verify_signature());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = signed_transaction().encode();
        bytes.push(0);
        assert!(Transaction::decode(&bytes).is_err());
    }

    #[test]
    fn hash_is_lowercase_identity() {
        let h = signed_transaction().hash();
        assert_eq!(h.len(), 60);
        assert!(h.bytes().all(|c| c.is_ascii_lowercase()));
    }
}
