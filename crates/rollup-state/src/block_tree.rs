use std::sync::Arc;

use ethers_core::types::{H256, U256};
use rollup_db::namespaces::ROLLUP_BLOCK_TREE;
use rollup_db::MemoryDb;
use rollup_interface::{IncludedTransition, RollupBlock, TransitionInclusionProof};
use rollup_smt::{Keccak256Hasher, SmtError, SparseMerkleTree};

use crate::keys::u256_key;

/// A committed block's transition tree: the per-block Merkle tree over
/// encoded transitions that inclusion proofs are checked against on-chain.
///
/// The tree is built in a fresh in-memory store and discarded with this
/// value; nothing of it is ever persisted.
pub struct RollupBlockInfo {
    block_number: u64,
    encoded_transitions: Vec<Vec<u8>>,
    tree: SparseMerkleTree<Keccak256Hasher, Arc<MemoryDb>>,
}

impl RollupBlockInfo {
    /// Builds the tree over already-encoded transitions. The tree height
    /// equals the transition count, so empty blocks have no tree.
    pub fn from_encoded(
        block_number: u64,
        encoded_transitions: Vec<Vec<u8>>,
    ) -> Result<Self, SmtError> {
        let mut tree = SparseMerkleTree::new(
            Arc::new(MemoryDb::new()),
            ROLLUP_BLOCK_TREE,
            encoded_transitions.len(),
            false,
            None,
        )?;
        for (index, encoded) in encoded_transitions.iter().enumerate() {
            tree.update(&u256_key(U256::from(index)), encoded)?;
        }
        Ok(Self {
            block_number,
            encoded_transitions,
            tree,
        })
    }

    /// Encodes `block`'s transitions and builds their tree.
    pub fn from_block(block: &RollupBlock) -> Result<Self, SmtError> {
        Self::from_encoded(block.block_number, rollup_abi::encode_transitions(block))
    }

    /// The tree root the settlement contract records for this block.
    pub fn root(&self) -> H256 {
        H256::from(self.tree.root())
    }

    /// Number of transitions in the block.
    pub fn num_transitions(&self) -> usize {
        self.encoded_transitions.len()
    }

    /// The encoded transition at `index`, if it exists.
    pub fn encoded_transition(&self, index: usize) -> Option<&[u8]> {
        self.encoded_transitions.get(index).map(Vec::as_slice)
    }

    /// Assembles the [`IncludedTransition`] witness for `index`.
    pub fn included_transition(
        &self,
        index: usize,
    ) -> Result<Option<IncludedTransition>, SmtError> {
        let Some(encoded) = self.encoded_transitions.get(index) else {
            return Ok(None);
        };
        let siblings = self.tree.prove(&u256_key(U256::from(index)))?;
        Ok(Some(IncludedTransition {
            transition: encoded.clone(),
            inclusion_proof: TransitionInclusionProof {
                block_number: U256::from(self.block_number),
                transition_index: U256::from(index),
                siblings: siblings.into_iter().map(H256::from).collect(),
            },
        }))
    }

    /// Checks an [`IncludedTransition`] against this block's tree.
    pub fn verify_included_transition(&self, included: &IncludedTransition) -> bool {
        let index = included.inclusion_proof.transition_index;
        if index > U256::from(usize::MAX) {
            return false;
        }
        let siblings: Vec<[u8; 32]> = included
            .inclusion_proof
            .siblings
            .iter()
            .map(|h| h.0)
            .collect();
        self.tree.verify_proof(
            &siblings,
            self.tree.root(),
            &u256_key(index),
            &included.transition,
        )
    }
}

#[cfg(test)]
mod tests {
    use rollup_interface::Transition;

    use super::*;

    fn block_with(n: usize) -> RollupBlock {
        let mut block = RollupBlock::new(3);
        for i in 0..n {
            block.transitions.push(Transition::Deposit {
                state_root: H256::repeat_byte(i as u8),
                slot_index: U256::from(i),
                token_index: U256::zero(),
                amount: U256::from(100 + i),
                signature: vec![i as u8],
            });
        }
        block
    }

    #[test]
    fn included_transitions_verify_against_the_root() {
        for size in [1usize, 2, 3, 5, 8] {
            let info = RollupBlockInfo::from_block(&block_with(size)).unwrap();
            for index in 0..size {
                let included = info.included_transition(index).unwrap().unwrap();
                assert_eq!(
                    included.inclusion_proof.block_number,
                    U256::from(3u64),
                    "block number is carried into the witness"
                );
                assert!(info.verify_included_transition(&included));
            }
            assert!(info.included_transition(size).unwrap().is_none());
        }
    }

    #[test]
    fn tampered_witness_fails_verification() {
        let info = RollupBlockInfo::from_block(&block_with(4)).unwrap();
        let mut included = info.included_transition(1).unwrap().unwrap();
        included.transition[40] ^= 0xff;
        assert!(!info.verify_included_transition(&included));
    }

    #[test]
    fn empty_blocks_have_no_tree() {
        assert!(RollupBlockInfo::from_encoded(0, Vec::new()).is_err());
    }

    #[test]
    fn identical_blocks_reproduce_the_same_root() {
        let a = RollupBlockInfo::from_block(&block_with(4)).unwrap();
        let b = RollupBlockInfo::from_block(&block_with(4)).unwrap();
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn root_covers_transitions_only() {
        let a = RollupBlockInfo::from_encoded(1, vec![b"t0".to_vec(), b"t1".to_vec()]).unwrap();
        let b = RollupBlockInfo::from_encoded(9, vec![b"t0".to_vec(), b"t1".to_vec()]).unwrap();
        assert_eq!(a.root(), b.root());
    }
}
