use ethers_core::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// The authenticated per-account record stored under a slot of the state
/// tree.
///
/// The three sequences are indexed by token index and always have the same
/// length; an operation referencing an index beyond the current length
/// right-extends all three with zeros first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// The 20-byte identity owning this slot.
    pub account: Address,
    /// Balance per token index.
    pub balances: Vec<U256>,
    /// Transfer nonce per token index.
    pub transfer_nonces: Vec<U256>,
    /// Withdraw nonce per token index.
    pub withdraw_nonces: Vec<U256>,
}

impl AccountInfo {
    /// A fresh record with all-zero sequences covering `0..=token_index`.
    pub fn empty(account: Address, token_index: usize) -> Self {
        let len = token_index + 1;
        Self {
            account,
            balances: vec![U256::zero(); len],
            transfer_nonces: vec![U256::zero(); len],
            withdraw_nonces: vec![U256::zero(); len],
        }
    }

    /// Right-extends all three sequences with zeros so `token_index` is a
    /// valid position.
    pub fn ensure_token_index(&mut self, token_index: usize) {
        if token_index >= self.balances.len() {
            let len = token_index + 1;
            self.balances.resize(len, U256::zero());
            self.transfer_nonces.resize(len, U256::zero());
            self.withdraw_nonces.resize(len, U256::zero());
        }
    }

    /// Number of token indices this record covers.
    pub fn num_tokens(&self) -> usize {
        self.balances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_account_covers_requested_index() {
        let info = AccountInfo::empty(Address::repeat_byte(0xaa), 2);
        assert_eq!(info.num_tokens(), 3);
        assert!(info.balances.iter().all(U256::is_zero));
        assert_eq!(info.balances.len(), info.transfer_nonces.len());
        assert_eq!(info.balances.len(), info.withdraw_nonces.len());
    }

    #[test]
    fn ensure_token_index_extends_all_sequences() {
        let mut info = AccountInfo::empty(Address::zero(), 0);
        info.balances[0] = U256::from(7);
        info.ensure_token_index(4);
        assert_eq!(info.num_tokens(), 5);
        assert_eq!(info.balances[0], U256::from(7));
        assert_eq!(info.balances[4], U256::zero());
        assert_eq!(info.transfer_nonces.len(), 5);
        assert_eq!(info.withdraw_nonces.len(), 5);

        // Already-covered indices leave the record untouched.
        info.ensure_token_index(1);
        assert_eq!(info.num_tokens(), 5);
    }
}
