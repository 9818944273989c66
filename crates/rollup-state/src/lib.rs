//! The sidechain's account state: slot registry, token registry, and the
//! state machine that applies transactions against the authenticated tree.

mod block_tree;
mod keys;
mod machine;
mod tokens;

pub use block_tree::RollupBlockInfo;
pub use machine::{StateMachine, StateUpdate, StateUpdateEntry, STATE_TREE_HEIGHT};
pub use tokens::TokenRegistry;

use ethers_core::types::{Address, U256};

/// Why a transaction could not be applied.
///
/// Every variant except the storage/tree/codec pass-throughs aborts only the
/// offending transaction; the pass-throughs indicate configuration drift or
/// a corrupt store and are fatal to the node.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The referenced token was never registered.
    #[error("unknown token {0:?}")]
    UnknownToken(Address),

    /// The operation requires an existing account.
    #[error("account {0:?} not found")]
    AccountNotFound(Address),

    /// Crediting the amount would overflow the 256-bit balance.
    #[error("invalid amount")]
    InvalidAmount,

    /// The operation's nonce does not match the account's next nonce.
    #[error("invalid nonce: required {required}, got {got}")]
    InvalidNonce {
        /// The nonce the account expects next.
        required: U256,
        /// The nonce the transaction carried.
        got: U256,
    },

    /// The account's balance cannot cover the debit.
    #[error("insufficient balance: have {balance}, need {amount}")]
    InsufficientBalance {
        /// Current balance for the token.
        balance: U256,
        /// Amount the operation tried to move.
        amount: U256,
    },

    /// A transfer names the same account on both sides.
    #[error("transfer sender and recipient are the same account")]
    SelfTransfer,

    /// The backing store failed; fatal.
    #[error(transparent)]
    Store(#[from] rollup_db::StoreError),

    /// The state tree failed; fatal.
    #[error(transparent)]
    Tree(#[from] rollup_smt::SmtError),

    /// A persisted record failed to decode; fatal.
    #[error(transparent)]
    Codec(#[from] rollup_abi::CodecError),
}

impl StateError {
    /// True if the error only invalidates the current transaction, leaving
    /// the node healthy.
    pub fn is_transaction_rejection(&self) -> bool {
        !matches!(
            self,
            StateError::Store(_) | StateError::Tree(_) | StateError::Codec(_)
        )
    }
}
