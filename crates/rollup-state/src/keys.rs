//! Byte layouts for 256-bit integers in store keys and values.
//!
//! Keys use the minimal big-endian form (no leading zeros; the zero value is
//! empty) so they pad to the same tree path the on-chain verifier derives.
//! Values always use the full 32-byte form.

use ethers_core::types::U256;

/// Minimal big-endian key bytes of `value`.
pub fn u256_key(value: U256) -> Vec<u8> {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    let first_nonzero = word.iter().position(|b| *b != 0).unwrap_or(32);
    word[first_nonzero..].to_vec()
}

/// Full-width big-endian value bytes of `value`.
pub fn u256_value(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

/// Parses a big-endian integer of up to 32 bytes.
pub fn u256_from_bytes(bytes: &[u8]) -> U256 {
    U256::from_big_endian(bytes)
}
