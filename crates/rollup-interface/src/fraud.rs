use ethers_core::types::{H256, U256};
use serde::{Deserialize, Serialize};

use crate::AccountInfo;

/// A pre-state witness of one storage slot: the account record plus its
/// inclusion proof against the state root the witness was taken at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Slot the witness covers.
    pub slot_index: U256,
    /// Account record stored at the slot.
    pub account_info: AccountInfo,
    /// Sibling hashes proving the slot's value, leaf-adjacent first.
    pub inclusion_proof: Vec<H256>,
}

/// The `(slot_index, AccountInfo)` pair as the fraud verifier consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSlot {
    /// Slot index.
    pub slot_index: U256,
    /// Account record stored at the slot.
    pub account_info: AccountInfo,
}

/// A storage slot paired with its inclusion proof against the pre-state
/// root of the challenged transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludedStorageSlot {
    /// The slot contents.
    pub storage_slot: StorageSlot,
    /// Sibling hashes, leaf-adjacent first.
    pub siblings: Vec<H256>,
}

/// Locates a transition inside a committed block's transition tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionInclusionProof {
    /// Block the transition belongs to.
    pub block_number: U256,
    /// Index of the transition within the block.
    pub transition_index: U256,
    /// Sibling hashes against the per-block tree over encoded transitions.
    pub siblings: Vec<H256>,
}

/// An encoded transition plus the proof that it is part of a committed
/// block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludedTransition {
    /// The transition exactly as encoded in the block.
    pub transition: Vec<u8>,
    /// Where it sits and how to verify it.
    pub inclusion_proof: TransitionInclusionProof,
}

/// The contract-ready bundle submitted via `proveTransitionInvalid`.
///
/// `pre_state` is transition *i − 1* of the same block, or the last
/// transition of the previous block when the invalid transition is the
/// block's first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudProof {
    /// Witness fixing the pre-state root of the challenged transition.
    pub pre_state_transition: IncludedTransition,
    /// The transition whose claimed post-state root is inconsistent.
    pub invalid_transition: IncludedTransition,
    /// One entry per storage slot the invalid transition reads, proven
    /// against the pre-state root.
    pub storage_slots: Vec<IncludedStorageSlot>,
}
