//! Keyed message authentication (HMAC-SHA256)
//!
//! Used to bind enable markers to a caller-held secret. Verification is
//! constant time so a tampered or stale marker cannot be distinguished from
//! a wrong key by timing.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Length of an HMAC-SHA256 tag in bytes.
pub const MAC_LEN: usize = 32;

/// Compute HMAC-SHA256 as defined in RFC 2104.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; MAC_LEN] {
    const BLOCK_SIZE: usize = 64;

    let mut key_block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let hashed = Sha256::digest(key);
        key_block[..hashed.len()].copy_from_slice(&hashed);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut ipad = [0u8; BLOCK_SIZE];
    let mut opad = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        ipad[i] = key_block[i] ^ 0x36;
        opad[i] = key_block[i] ^ 0x5c;
    }

    let mut inner = Sha256::new();
    inner.update(ipad);
    inner.update(message);
    let inner = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(opad);
    outer.update(inner);
    outer.finalize().into()
}

/// Verify an HMAC-SHA256 tag in constant time.
///
/// A tag of the wrong length fails immediately; length is not secret.
pub fn verify_hmac(key: &[u8], message: &[u8], tag: &[u8]) -> bool {
    if tag.len() != MAC_LEN {
        return false;
    }
    let expected = hmac_sha256(key, message);
    constant_time_eq(&expected, tag)
}

/// Parse a stored tag, enforcing the fixed length.
pub fn tag_from_slice(bytes: &[u8]) -> Result<[u8; MAC_LEN]> {
    bytes.try_into().map_err(|_| Error::InvalidMacLength {
        expected: MAC_LEN,
        actual: bytes.len(),
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    debug_assert_eq!(a.len(), b.len());
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
