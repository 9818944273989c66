//! Core data model of the rollup and the traits its collaborators implement.
//!
//! The types here are deliberately free of storage and RPC concerns: a
//! [`Transaction`] is what the event ingestor hands to the state machine, a
//! [`Transition`] is what ends up inside a [`RollupBlock`] on the settlement
//! chain, and the [`services`] traits describe the two chains the node talks
//! to without fixing a client implementation.

mod account;
mod block;
pub mod events;
mod fraud;
pub mod services;
mod transaction;
mod transition;

pub use account::AccountInfo;
pub use block::RollupBlock;
pub use fraud::{
    FraudProof, IncludedStorageSlot, IncludedTransition, StateSnapshot, StorageSlot,
    TransitionInclusionProof,
};
pub use transaction::{Transaction, TransactionKind};
pub use transition::{Transition, TransitionKind};

/// Re-exported primitive types used throughout the wire contract.
pub use ethers_core::types::{Address, H256, U256};
