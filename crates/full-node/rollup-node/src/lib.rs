//! The rollup node.
//!
//! In aggregator mode the node ingests settlement-chain events, applies
//! them through the state machine, assembles pending blocks, and drives the
//! propose/sign/commit protocol across the proposal and settlement chains.
//! In validator mode it re-executes every committed block against an
//! independent state machine and challenges divergence with an on-chain
//! fraud proof.

pub mod aggregator;
pub mod archive;
pub mod config;
pub mod ingestor;
pub mod relayer;
pub mod submitter;
pub mod validator;

use std::sync::Arc;

use ethers_core::types::H256;
use rollup_db::KeyValueStore;
use rollup_interface::services::ChainError;

/// The store handle threaded through node components.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Failures of the block submission protocol.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// `proposeBlock` mined with a failed receipt.
    #[error("block proposal failed in tx {tx_hash:?}")]
    ProposeFailed {
        /// The failed transaction.
        tx_hash: H256,
    },
    /// `commitBlock` mined with a failed receipt.
    #[error("block commit failed in tx {tx_hash:?}")]
    CommitFailed {
        /// The failed transaction.
        tx_hash: H256,
    },
    /// The chain interaction itself failed.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Signing the block bytes failed.
    #[error(transparent)]
    Sign(#[from] rollup_abi::SignError),
}
