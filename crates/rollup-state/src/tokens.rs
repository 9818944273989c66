use ethers_core::types::{Address, U256};
use rollup_db::namespaces::{
    MAINCHAIN_TO_SIDECHAIN_TOKEN, TOKEN_ADDRESS_TO_INDEX, TOKEN_INDEX_TO_ADDRESS,
};
use rollup_db::{KeyValueStore, StoreError, WriteBatch};

use crate::keys::{u256_from_bytes, u256_key, u256_value};

/// The bidirectional token address ↔ dense index map, fed exclusively by
/// `TokenRegistered`/`TokenMapped` chain events and never mutated otherwise.
#[derive(Debug, Clone)]
pub struct TokenRegistry<S> {
    store: S,
}

impl<S: KeyValueStore> TokenRegistry<S> {
    /// Opens the registry over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Records `token` ↔ `index`, both directions atomically.
    pub fn register(&self, token: Address, index: U256) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        batch.put(TOKEN_ADDRESS_TO_INDEX, token.as_bytes(), &u256_value(index));
        batch.put(TOKEN_INDEX_TO_ADDRESS, &u256_key(index), token.as_bytes());
        self.store.write(batch)
    }

    /// Records the sidechain counterpart contract of a mainchain token.
    pub fn map_sidechain(&self, mainchain: Address, sidechain: Address) -> Result<(), StoreError> {
        self.store.put(
            MAINCHAIN_TO_SIDECHAIN_TOKEN,
            mainchain.as_bytes(),
            sidechain.as_bytes(),
        )
    }

    /// The dense index of `token`, if registered.
    pub fn token_index(&self, token: Address) -> Result<Option<U256>, StoreError> {
        Ok(self
            .store
            .get(TOKEN_ADDRESS_TO_INDEX, token.as_bytes())?
            .map(|bytes| u256_from_bytes(&bytes)))
    }

    /// The token registered at `index`, if any.
    pub fn token_address(&self, index: U256) -> Result<Option<Address>, StoreError> {
        Ok(self
            .store
            .get(TOKEN_INDEX_TO_ADDRESS, &u256_key(index))?
            .map(|bytes| Address::from_slice(&bytes)))
    }

    /// The sidechain counterpart of `mainchain`, if mapped.
    pub fn sidechain_token(&self, mainchain: Address) -> Result<Option<Address>, StoreError> {
        Ok(self
            .store
            .get(MAINCHAIN_TO_SIDECHAIN_TOKEN, mainchain.as_bytes())?
            .map(|bytes| Address::from_slice(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rollup_db::MemoryDb;

    use super::*;

    #[test]
    fn registration_is_bidirectional() {
        let registry = TokenRegistry::new(Arc::new(MemoryDb::new()));
        let token = Address::repeat_byte(0x01);
        registry.register(token, U256::zero()).unwrap();

        assert_eq!(registry.token_index(token).unwrap(), Some(U256::zero()));
        assert_eq!(registry.token_address(U256::zero()).unwrap(), Some(token));
        assert_eq!(registry.token_index(Address::repeat_byte(0x02)).unwrap(), None);
        assert_eq!(registry.token_address(U256::from(9)).unwrap(), None);
    }

    #[test]
    fn sidechain_mapping_round_trips() {
        let registry = TokenRegistry::new(Arc::new(MemoryDb::new()));
        let mainchain = Address::repeat_byte(0x0a);
        let sidechain = Address::repeat_byte(0x0b);
        registry.map_sidechain(mainchain, sidechain).unwrap();
        assert_eq!(registry.sidechain_token(mainchain).unwrap(), Some(sidechain));
        assert_eq!(registry.sidechain_token(sidechain).unwrap(), None);
    }
}
