use ethers_core::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// A single state-transition record inside a rollup block.
///
/// Every variant carries the post-state root the on-chain verifier will
/// recompute, and enough data to re-execute the underlying operation. The
/// first 32-byte word of every encoded transition is the variant
/// discriminant; see [`Transition::discriminant`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// First deposit of a previously unseen account; assigns its slot.
    CreateAndDeposit {
        /// Root of the state tree after applying this transition.
        state_root: H256,
        /// Slot assigned to the new account.
        slot_index: U256,
        /// The new account's address.
        account: Address,
        /// Dense index of the deposited token.
        token_index: U256,
        /// Amount credited.
        amount: U256,
        /// User authorization carried over from the deposit event.
        signature: Vec<u8>,
    },
    /// Deposit into an existing slot.
    Deposit {
        /// Root of the state tree after applying this transition.
        state_root: H256,
        /// Slot of the beneficiary account.
        slot_index: U256,
        /// Dense index of the deposited token.
        token_index: U256,
        /// Amount credited.
        amount: U256,
        /// User authorization carried over from the deposit event.
        signature: Vec<u8>,
    },
    /// Withdrawal from an existing slot.
    Withdraw {
        /// Root of the state tree after applying this transition.
        state_root: H256,
        /// Slot of the withdrawing account.
        slot_index: U256,
        /// Dense index of the withdrawn token.
        token_index: U256,
        /// Amount debited.
        amount: U256,
        /// Withdraw nonce consumed by this operation.
        nonce: U256,
        /// User authorization carried over from the withdraw event.
        signature: Vec<u8>,
    },
    /// Transfer whose recipient account is created by this transition.
    CreateAndTransfer {
        /// Root of the state tree after applying this transition.
        state_root: H256,
        /// Slot of the paying account.
        sender_slot: U256,
        /// Slot assigned to the new recipient account.
        recipient_slot: U256,
        /// The new recipient's address.
        recipient: Address,
        /// Dense index of the transferred token.
        token_index: U256,
        /// Amount moved.
        amount: U256,
        /// Transfer nonce consumed by the sender.
        nonce: U256,
        /// User authorization carried over from the transfer event.
        signature: Vec<u8>,
    },
    /// Transfer between two existing slots.
    Transfer {
        /// Root of the state tree after applying this transition.
        state_root: H256,
        /// Slot of the paying account.
        sender_slot: U256,
        /// Slot of the receiving account.
        recipient_slot: U256,
        /// Dense index of the transferred token.
        token_index: U256,
        /// Amount moved.
        amount: U256,
        /// Transfer nonce consumed by the sender.
        nonce: U256,
        /// User authorization carried over from the transfer event.
        signature: Vec<u8>,
    },
}

/// Discriminates the five [`Transition`] variants; the numeric value is the
/// on-wire discriminant word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u64)]
pub enum TransitionKind {
    /// [`Transition::CreateAndDeposit`], discriminant 0.
    CreateAndDeposit = 0,
    /// [`Transition::Deposit`], discriminant 1.
    Deposit = 1,
    /// [`Transition::Withdraw`], discriminant 2.
    Withdraw = 2,
    /// [`Transition::CreateAndTransfer`], discriminant 3.
    CreateAndTransfer = 3,
    /// [`Transition::Transfer`], discriminant 4.
    Transfer = 4,
}

impl TransitionKind {
    /// Maps an on-wire discriminant back to a kind.
    pub fn from_discriminant(value: u64) -> Option<Self> {
        match value {
            0 => Some(TransitionKind::CreateAndDeposit),
            1 => Some(TransitionKind::Deposit),
            2 => Some(TransitionKind::Withdraw),
            3 => Some(TransitionKind::CreateAndTransfer),
            4 => Some(TransitionKind::Transfer),
            _ => None,
        }
    }
}

impl Transition {
    /// The variant tag.
    pub fn kind(&self) -> TransitionKind {
        match self {
            Transition::CreateAndDeposit { .. } => TransitionKind::CreateAndDeposit,
            Transition::Deposit { .. } => TransitionKind::Deposit,
            Transition::Withdraw { .. } => TransitionKind::Withdraw,
            Transition::CreateAndTransfer { .. } => TransitionKind::CreateAndTransfer,
            Transition::Transfer { .. } => TransitionKind::Transfer,
        }
    }

    /// The on-wire discriminant word of this variant.
    pub fn discriminant(&self) -> u64 {
        self.kind() as u64
    }

    /// The claimed post-state root.
    pub fn state_root(&self) -> H256 {
        match self {
            Transition::CreateAndDeposit { state_root, .. }
            | Transition::Deposit { state_root, .. }
            | Transition::Withdraw { state_root, .. }
            | Transition::CreateAndTransfer { state_root, .. }
            | Transition::Transfer { state_root, .. } => *state_root,
        }
    }

    /// Overwrites the claimed post-state root.
    pub fn set_state_root(&mut self, root: H256) {
        match self {
            Transition::CreateAndDeposit { state_root, .. }
            | Transition::Deposit { state_root, .. }
            | Transition::Withdraw { state_root, .. }
            | Transition::CreateAndTransfer { state_root, .. }
            | Transition::Transfer { state_root, .. } => *state_root = root,
        }
    }

    /// The carried user authorization.
    pub fn signature(&self) -> &[u8] {
        match self {
            Transition::CreateAndDeposit { signature, .. }
            | Transition::Deposit { signature, .. }
            | Transition::Withdraw { signature, .. }
            | Transition::CreateAndTransfer { signature, .. }
            | Transition::Transfer { signature, .. } => signature,
        }
    }
}

impl core::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            TransitionKind::CreateAndDeposit => "create-and-deposit",
            TransitionKind::Deposit => "deposit",
            TransitionKind::Withdraw => "withdraw",
            TransitionKind::CreateAndTransfer => "create-and-transfer",
            TransitionKind::Transfer => "transfer",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_are_stable() {
        for (value, kind) in [
            (0, TransitionKind::CreateAndDeposit),
            (1, TransitionKind::Deposit),
            (2, TransitionKind::Withdraw),
            (3, TransitionKind::CreateAndTransfer),
            (4, TransitionKind::Transfer),
        ] {
            assert_eq!(TransitionKind::from_discriminant(value), Some(kind));
            assert_eq!(kind as u64, value);
        }
        assert_eq!(TransitionKind::from_discriminant(5), None);
    }
}
