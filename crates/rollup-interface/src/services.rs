//! Async traits describing the two chains the node talks to.
//!
//! Real RPC clients live outside this workspace; the traits pin down exactly
//! the surface the core depends on. Every method may suspend, every
//! subscription is an owned stream, and every error is classified as
//! transient (safe to retry with backoff) or permanent.

use async_trait::async_trait;
use ethers_core::types::{Address, H256, U256};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::events::{
    BlockCommittedEvent, BlockConsensusReachedEvent, BlockProposedEvent, TokenEvent,
    TokenMappedEvent, TokenRegisteredEvent,
};
use crate::{FraudProof, IncludedTransition};

/// Failure of a chain interaction, classified for retry purposes.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Connection loss, timeout, or similar; the call may be retried.
    #[error("transient rpc failure: {0}")]
    Transient(String),
    /// The call can never succeed as issued.
    #[error("permanent chain failure: {0}")]
    Permanent(String),
}

impl ChainError {
    /// True if the failed call is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }
}

/// The mined result of a submitted chain transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutcome {
    /// Hash of the mined transaction.
    pub tx_hash: H256,
    /// Receipt status; `1` is success, `0` a protocol-level failure.
    pub status: u64,
}

impl TxOutcome {
    /// True if the receipt reported success.
    pub fn is_success(&self) -> bool {
        self.status == 1
    }
}

/// On-chain summary of a committed block, served by `RollupChain.blocks(i)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Root of the per-block tree over encoded transitions.
    pub root_hash: H256,
    /// Number of transitions in the block.
    pub block_size: U256,
}

/// The settlement chain: token registry, rollup chain, and
/// deposit/withdraw manager contracts.
#[async_trait]
pub trait SettlementService: Send + Sync + 'static {
    /// `RollupChain.committerAddress()`.
    async fn committer_address(&self) -> Result<Address, ChainError>;

    /// `RollupChain.blocks(block_number)`; `None` if nothing is committed
    /// there yet.
    async fn block_info(&self, block_number: u64) -> Result<Option<BlockInfo>, ChainError>;

    /// `DepositWithdrawManager.depositNonces(account, token)`.
    async fn deposit_nonce(&self, account: Address, token: Address) -> Result<U256, ChainError>;

    /// `DepositWithdrawManager.withdrawNonces(account, token)`.
    async fn withdraw_nonce(&self, account: Address, token: Address) -> Result<U256, ChainError>;

    /// `RollupChain.commitBlock(block_number, transitions, signatures)`.
    async fn commit_block(
        &self,
        block_number: u64,
        transitions: Vec<Vec<u8>>,
        signatures: Vec<Vec<u8>>,
    ) -> Result<TxOutcome, ChainError>;

    /// `RollupChain.proveTransitionInvalid(pre, invalid, slots)`.
    async fn prove_transition_invalid(&self, proof: FraudProof) -> Result<TxOutcome, ChainError>;

    /// `DepositWithdrawManager.withdraw(account, included_transition,
    /// signature)`.
    async fn withdraw(
        &self,
        account: Address,
        transition: IncludedTransition,
        signature: Vec<u8>,
    ) -> Result<TxOutcome, ChainError>;

    /// Subscribes to `TokenRegistry.TokenRegistered`.
    async fn subscribe_token_registered(
        &self,
    ) -> Result<BoxStream<'static, TokenRegisteredEvent>, ChainError>;

    /// Subscribes to `TokenMapper.TokenMapped`.
    async fn subscribe_token_mapped(
        &self,
    ) -> Result<BoxStream<'static, TokenMappedEvent>, ChainError>;

    /// Subscribes to the operation events of one sidechain token contract.
    /// Event order within the subscription matches chain order.
    async fn subscribe_token_events(
        &self,
        sidechain_token: Address,
    ) -> Result<BoxStream<'static, TokenEvent>, ChainError>;

    /// Subscribes to `RollupChain.BlockCommitted`.
    async fn subscribe_block_committed(
        &self,
    ) -> Result<BoxStream<'static, BlockCommittedEvent>, ChainError>;
}

/// The proposal chain's `BlockCommittee` contract.
#[async_trait]
pub trait CommitteeService: Send + Sync + 'static {
    /// `BlockCommittee.currentProposer()`.
    async fn current_proposer(&self) -> Result<Address, ChainError>;

    /// `BlockCommittee.proposeBlock(block_number, transitions, signature)`.
    async fn propose_block(
        &self,
        block_number: u64,
        transitions: Vec<Vec<u8>>,
        signature: Vec<u8>,
    ) -> Result<TxOutcome, ChainError>;

    /// `BlockCommittee.signBlock(from, signature)`.
    async fn sign_block(&self, from: Address, signature: Vec<u8>) -> Result<TxOutcome, ChainError>;

    /// Subscribes to `BlockCommittee.BlockProposed`.
    async fn subscribe_block_proposed(
        &self,
    ) -> Result<BoxStream<'static, BlockProposedEvent>, ChainError>;

    /// Subscribes to `BlockCommittee.BlockConsensusReached`.
    async fn subscribe_consensus_reached(
        &self,
    ) -> Result<BoxStream<'static, BlockConsensusReachedEvent>, ChainError>;
}
