use ethers_core::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// A user operation observed as a finalized settlement-chain event.
///
/// Signatures are carried opaquely: the contracts have already authorized
/// the operation on-chain, so the state machine never re-checks them, but
/// they are embedded in the emitted transitions for the fraud verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transaction {
    /// Credit `amount` of `token` to `account`.
    Deposit {
        /// Beneficiary account.
        account: Address,
        /// Mainchain token contract.
        token: Address,
        /// Amount credited.
        amount: U256,
        /// User authorization over the packed deposit arguments.
        signature: Vec<u8>,
    },
    /// Debit `amount` of `token` from `account` for a mainchain withdrawal.
    Withdraw {
        /// Account withdrawing.
        account: Address,
        /// Mainchain token contract.
        token: Address,
        /// Amount withdrawn.
        amount: U256,
        /// Expected withdraw nonce for `(account, token)`.
        nonce: U256,
        /// User authorization over the packed withdraw arguments.
        signature: Vec<u8>,
    },
    /// Move `amount` of `token` from `sender` to `recipient` inside the
    /// sidechain.
    Transfer {
        /// Paying account; must already exist.
        sender: Address,
        /// Receiving account; created on first touch.
        recipient: Address,
        /// Mainchain token contract.
        token: Address,
        /// Amount moved.
        amount: U256,
        /// Expected transfer nonce for `(sender, token)`.
        nonce: U256,
        /// User authorization over the packed transfer arguments.
        signature: Vec<u8>,
    },
}

/// Discriminates the three [`Transaction`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// A [`Transaction::Deposit`].
    Deposit,
    /// A [`Transaction::Withdraw`].
    Withdraw,
    /// A [`Transaction::Transfer`].
    Transfer,
}

impl Transaction {
    /// The variant tag.
    pub fn kind(&self) -> TransactionKind {
        match self {
            Transaction::Deposit { .. } => TransactionKind::Deposit,
            Transaction::Withdraw { .. } => TransactionKind::Withdraw,
            Transaction::Transfer { .. } => TransactionKind::Transfer,
        }
    }

    /// The mainchain token contract this operation touches.
    pub fn token(&self) -> Address {
        match self {
            Transaction::Deposit { token, .. }
            | Transaction::Withdraw { token, .. }
            | Transaction::Transfer { token, .. } => *token,
        }
    }

    /// The carried user authorization.
    pub fn signature(&self) -> &[u8] {
        match self {
            Transaction::Deposit { signature, .. }
            | Transaction::Withdraw { signature, .. }
            | Transaction::Transfer { signature, .. } => signature,
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::Transfer => "transfer",
        };
        write!(f, "{name}")
    }
}
