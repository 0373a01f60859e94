//! Identity encoding
//!
//! A ledger identity is a 60-character string over A..Z: four 14-character
//! base-26 fragments covering the 32-byte public key (least significant
//! digit first), followed by a 4-character checksum derived from the
//! digest of the key. Transaction hashes use the same encoding in
//! lowercase.

use crate::crypto::digest;
use crate::{PublicKey, TickwatchError, TickwatchResult};

/// Encoded identity length.
pub const IDENTITY_LEN: usize = 60;

const FRAGMENT_CHARS: usize = 14;
const CHECKSUM_CHARS: usize = 4;
const CHECKSUM_MASK: u32 = 0x3FFFF;

pub type Identity = String;

/// Encode a public key as an identity string.
///
/// `lowercase` selects the transaction-hash variant.
pub fn identity_from_public_key(public_key: &PublicKey, lowercase: bool) -> Identity {
    let base = if lowercase { b'a' } else { b'A' };
    let mut out = Vec::with_capacity(IDENTITY_LEN);

    for fragment in 0..4 {
        let mut value = u64::from_le_bytes(
            public_key[fragment * 8..fragment * 8 + 8]
                .try_into()
                .unwrap(),
        );
        for _ in 0..FRAGMENT_CHARS {
            out.push(base + (value % 26) as u8);
            value /= 26;
        }
    }

    let mut checksum = checksum_bits(public_key);
    for _ in 0..CHECKSUM_CHARS {
        out.push(base + (checksum % 26) as u8);
        checksum /= 26;
    }

    String::from_utf8(out).unwrap()
}

/// Decode an identity back to its public key, validating the checksum.
pub fn public_key_from_identity(identity: &str) -> TickwatchResult<PublicKey> {
    let bytes = identity.as_bytes();
    if bytes.len() != IDENTITY_LEN {
        return Err(TickwatchError::InvalidIdentity(format!(
            "length {} (expected {})",
            bytes.len(),
            IDENTITY_LEN
        )));
    }

    let mut key = [0u8; 32];
    for fragment in 0..4 {
        let mut value: u64 = 0;
        for i in (0..FRAGMENT_CHARS).rev() {
            let c = bytes[fragment * FRAGMENT_CHARS + i];
            let d = char_value(c)?;
            value = value
                .checked_mul(26)
                .and_then(|v| v.checked_add(d as u64))
                .ok_or_else(|| {
                    TickwatchError::InvalidIdentity("fragment overflow".to_string())
                })?;
        }
        key[fragment * 8..fragment * 8 + 8].copy_from_slice(&value.to_le_bytes());
    }

    let mut expected = checksum_bits(&key);
    for i in 0..CHECKSUM_CHARS {
        let c = bytes[4 * FRAGMENT_CHARS + i];
        if char_value(c)? != (expected % 26) as u8 {
            return Err(TickwatchError::InvalidIdentity("checksum mismatch".to_string()));
        }
        expected /= 26;
    }

    Ok(key)
}

/// True when the string looks like an uppercase identity (shape only,
/// checksum not verified).
pub fn is_wellformed_identity(identity: &str) -> bool {
    identity.len() == IDENTITY_LEN && identity.bytes().all(|c| c.is_ascii_uppercase())
}

fn checksum_bits(public_key: &PublicKey) -> u32 {
    let d = digest(public_key);
    u32::from_le_bytes([d[0], d[1], d[2], 0]) & CHECKSUM_MASK
}

fn char_value(c: u8) -> TickwatchResult<u8> {
    match c {
        b'A'..=b'Z' => Ok(c - b'A'),
        b'a'..=b'z' => Ok(c - b'a'),
        _ => Err(TickwatchError::InvalidIdentity(format!(
            "invalid character {:?}",
            c as char
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_uppercase() {
        let key: PublicKey = core::array::from_fn(|i| (i * 7 + 3) as u8);
        let id = identity_from_public_key(&key, false);
        assert_eq!(id.len(), IDENTITY_LEN);
        assert!(id.bytes().all(|c| c.is_ascii_uppercase()));
        assert_eq!(public_key_from_identity(&id).unwrap(), key);
    }

    #[test]
    fn round_trip_lowercase_hash() {
        let key: PublicKey = core::array::from_fn(|i| (255 - i) as u8);
        let id = identity_from_public_key(&key, true);
        assert!(id.bytes().all(|c| c.is_ascii_lowercase()));
        assert_eq!(public_key_from_identity(&id).unwrap(), key);
    }

    #[test]
    fn checksum_catches_single_edit() {
        let key: PublicKey = [9u8; 32];
        let id = identity_from_public_key(&key, false);
        let mut chars: Vec<u8> = id.into_bytes();
        chars[0] = if chars[0] == b'A' { b'B' } else { b'A' };
        let edited = String::from_utf8(chars).unwrap();
        assert!(public_key_from_identity(&edited).is_err());
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(public_key_from_identity("ABC").is_err());
    }
}
