//! Cryptographic seam
//!
//! The rest of the workspace only ever needs three primitives: a
//! digest-of-record, signature verification against a raw public key, and
//! key derivation from a node seed. Everything else treats keys, digests
//! and signatures as opaque byte arrays.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest as _, Sha256};

use crate::{Digest, PublicKey, Signature, DIGEST_SIZE};

/// Digest-of-record over arbitrary bytes.
pub fn digest(data: &[u8]) -> Digest {
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Verify `signature` over `message_digest` under `public_key`.
///
/// Returns false for malformed keys or signatures instead of erroring;
/// callers treat any failure as an invalid artifact and drop it.
pub fn verify(public_key: &PublicKey, message_digest: &Digest, signature: &Signature) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let sig = DalekSignature::from_bytes(signature);
    key.verify(message_digest, &sig).is_ok()
}

/// Key material derived from a 55-character node seed.
pub struct NodeKeys {
    signing: SigningKey,
}

impl NodeKeys {
    /// Derive subseed -> private key -> public key from the seed string.
    pub fn from_seed(seed: &str) -> Self {
        let subseed = digest(seed.as_bytes());
        let private = digest(&subseed);
        Self {
            signing: SigningKey::from_bytes(&private),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.signing.verifying_key().to_bytes()
    }

    pub fn sign(&self, message_digest: &Digest) -> Signature {
        self.signing.sign(message_digest).to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let keys = NodeKeys::from_seed("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let d = digest(b"payload");
        let sig = keys.sign(&d);
        assert!(verify(&keys.public_key(), &d, &sig));
    }

    #[test]
    fn tampered_digest_fails() {
        let keys = NodeKeys::from_seed("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let sig = keys.sign(&digest(b"payload"));
        assert!(!verify(&keys.public_key(), &digest(b"other"), &sig));
    }

    #[test]
    fn garbage_key_is_rejected_not_panicking() {
        let d = digest(b"x");
        assert!(!verify(&[0xffu8; 32], &d, &[0u8; 64]));
    }
}
