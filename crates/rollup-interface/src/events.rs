//! Normalized payloads of the chain events the node subscribes to.

use ethers_core::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::Transaction;

/// `TokenRegistry.TokenRegistered`: a token joined the rollup's dense index
/// space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRegisteredEvent {
    /// Mainchain token contract address.
    pub token_address: Address,
    /// Dense index assigned by the registry.
    pub token_index: U256,
}

/// `TokenMapper.TokenMapped`: a mainchain token gained its sidechain
/// counterpart contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMappedEvent {
    /// Token contract on the settlement chain.
    pub mainchain_token: Address,
    /// Mirrored contract on the sidechain.
    pub sidechain_token: Address,
}

/// A user operation event emitted by a watched sidechain token contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenEvent {
    /// A deposit credited on the sidechain.
    Deposit {
        /// Beneficiary account.
        account: Address,
        /// Mainchain token the sidechain contract mirrors.
        mainchain_token: Address,
        /// Amount credited.
        amount: U256,
        /// User authorization bytes.
        signature: Vec<u8>,
    },
    /// A withdrawal debited on the sidechain.
    Withdraw {
        /// Account withdrawing.
        account: Address,
        /// Mainchain token the sidechain contract mirrors.
        mainchain_token: Address,
        /// Amount debited.
        amount: U256,
        /// Withdraw nonce consumed.
        nonce: U256,
        /// User authorization bytes.
        signature: Vec<u8>,
    },
    /// An in-sidechain transfer.
    Transfer {
        /// Paying account.
        sender: Address,
        /// Receiving account.
        recipient: Address,
        /// Mainchain token the sidechain contract mirrors.
        mainchain_token: Address,
        /// Amount moved.
        amount: U256,
        /// Transfer nonce consumed.
        nonce: U256,
        /// User authorization bytes.
        signature: Vec<u8>,
    },
}

impl From<TokenEvent> for Transaction {
    fn from(event: TokenEvent) -> Self {
        match event {
            TokenEvent::Deposit {
                account,
                mainchain_token,
                amount,
                signature,
            } => Transaction::Deposit {
                account,
                token: mainchain_token,
                amount,
                signature,
            },
            TokenEvent::Withdraw {
                account,
                mainchain_token,
                amount,
                nonce,
                signature,
            } => Transaction::Withdraw {
                account,
                token: mainchain_token,
                amount,
                nonce,
                signature,
            },
            TokenEvent::Transfer {
                sender,
                recipient,
                mainchain_token,
                amount,
                nonce,
                signature,
            } => Transaction::Transfer {
                sender,
                recipient,
                token: mainchain_token,
                amount,
                nonce,
                signature,
            },
        }
    }
}

/// `BlockCommittee.BlockProposed`: the proposer published a candidate block
/// on the proposal chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProposedEvent {
    /// Proposed block number.
    pub block_number: u64,
    /// Encoded transitions exactly as the proposer serialized them.
    pub transitions: Vec<Vec<u8>>,
}

/// `BlockCommittee.BlockConsensusReached`: the committee signature threshold
/// was met for a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockConsensusReachedEvent {
    /// Block number of the agreed proposal.
    pub block_number: u64,
    /// Encoded transitions of the agreed proposal.
    pub transitions: Vec<Vec<u8>>,
    /// Committee signatures over the encoded block.
    pub signatures: Vec<Vec<u8>>,
}

/// `RollupChain.BlockCommitted`: a block became durable on the settlement
/// chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCommittedEvent {
    /// Committed block number.
    pub block_number: u64,
    /// Encoded transitions of the committed block.
    pub transitions: Vec<Vec<u8>>,
}
