use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher as _, Keccak};

use crate::NodeHash;

/// A 32-byte-output hash function parameterizing a tree.
///
/// The state tree must use Keccak-256 to match the on-chain verifier;
/// anything else is only useful for trees that never leave the node.
pub trait TreeHasher: Send + Sync + 'static {
    /// Hashes `data` to a node hash.
    fn digest(data: &[u8]) -> NodeHash;
}

/// Keccak-256, the settlement chain's hash.
#[derive(Debug, Clone, Copy)]
pub struct Keccak256Hasher;

impl TreeHasher for Keccak256Hasher {
    fn digest(data: &[u8]) -> NodeHash {
        let mut keccak = Keccak::v256();
        let mut output = [0u8; 32];
        keccak.update(data);
        keccak.finalize(&mut output);
        output
    }
}

/// SHA-256 alternative for node-local trees.
#[derive(Debug, Clone, Copy)]
pub struct Sha256Hasher;

impl TreeHasher for Sha256Hasher {
    fn digest(data: &[u8]) -> NodeHash {
        let mut output = [0u8; 32];
        output.copy_from_slice(&Sha256::digest(data));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_matches_known_vector() {
        // keccak256("") from the yellow paper.
        let empty = Keccak256Hasher::digest(b"");
        assert_eq!(
            hex::encode(empty),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn sha256_matches_known_vector() {
        let empty = Sha256Hasher::digest(b"");
        assert_eq!(
            hex::encode(empty),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
