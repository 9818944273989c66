use serde::{Deserialize, Serialize};

use crate::Transition;

/// An ordered sequence of transitions; the unit of settlement-chain
/// submission. Block 0 is genesis and may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupBlock {
    /// Position in the chain of committed blocks.
    pub block_number: u64,
    /// Transitions in application order: transition `i`'s pre-state is
    /// transition `i - 1`'s post-state.
    pub transitions: Vec<Transition>,
}

impl RollupBlock {
    /// An empty block at `block_number`.
    pub fn new(block_number: u64) -> Self {
        Self {
            block_number,
            transitions: Vec::new(),
        }
    }

    /// Number of transitions currently in the block.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// True if the block holds no transitions.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}
