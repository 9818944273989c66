//! Sparse Merkle tree authenticated by a namespaced key-value store.
//!
//! Nodes are stored by content hash, so the tree needs no in-memory pointer
//! graph and two trees fed the same ordered updates end up with bit-identical
//! roots no matter how the writes were batched. A fixed ladder of default
//! nodes stands in for every empty subtree, which keeps an update to
//! `height - 1` hashes and one batch write.

mod hasher;
mod proofs;
mod tree;

pub use hasher::{Keccak256Hasher, Sha256Hasher, TreeHasher};
pub use proofs::MerkleProof;
pub use tree::{SparseMerkleTree, DEFAULT_LEAF};

/// A 32-byte node or leaf hash.
pub type NodeHash = [u8; 32];

/// Errors raised by tree operations.
#[derive(Debug, thiserror::Error)]
pub enum SmtError {
    /// A node referenced from a non-default branch is missing from the
    /// store. This is unrecoverable: either the store lost writes or two
    /// incompatible tree configurations shared a namespace.
    #[error("corrupt store: node {0} missing from a non-default branch")]
    CorruptStore(String),

    /// An interior node's stored value is not two packed child hashes.
    #[error("corrupt store: interior node of {0} bytes, expected 64")]
    MalformedNode(usize),

    /// A dense key wider than the hasher output cannot be padded to a path.
    #[error("key of {got} bytes exceeds the {max}-byte path width")]
    KeyTooLong {
        /// Offending key length.
        got: usize,
        /// Hasher output size.
        max: usize,
    },

    /// Tree height must be between 1 and the path width in bits.
    #[error("unsupported tree height {0}")]
    InvalidHeight(usize),

    /// A compact or full proof has the wrong shape for this tree.
    #[error("bad proof")]
    BadProof,

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] rollup_db::StoreError),
}
