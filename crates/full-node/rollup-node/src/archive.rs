//! Durable archive of committed blocks, used by the validator for
//! fraud-proof construction across block boundaries and by the withdrawal
//! relayer to assemble inclusion witnesses.

use borsh::{BorshDeserialize, BorshSerialize};
use byteorder::{BigEndian, ByteOrder};
use rollup_db::namespaces::ROLLUP_BLOCK_NUMBER;
use rollup_db::{KeyValueStore, StoreError};

use crate::SharedStore;

/// Reserved key for the validator's replay high-water mark; never collides
/// with the 8-byte block-number keys.
const LAST_VALIDATED_KEY: &[u8] = b"latest";

/// A committed block as persisted: its number plus the raw encoded
/// transitions exactly as they appeared on chain.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StoredBlock {
    /// Block number.
    pub block_number: u64,
    /// Encoded transitions in block order.
    pub transitions: Vec<Vec<u8>>,
}

/// Errors reading the archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A persisted record failed to deserialize.
    #[error("corrupt block record: {0}")]
    Corrupt(String),
}

/// Block archive over the `rbn` namespace of one store.
#[derive(Clone)]
pub struct BlockArchive {
    store: SharedStore,
}

impl BlockArchive {
    /// Opens the archive over `store`.
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Persists a committed block's encoded transitions.
    pub fn save_block(&self, block_number: u64, transitions: &[Vec<u8>]) -> Result<(), ArchiveError> {
        let record = StoredBlock {
            block_number,
            transitions: transitions.to_vec(),
        };
        let bytes = borsh::to_vec(&record).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        self.store
            .put(ROLLUP_BLOCK_NUMBER, &block_key(block_number), &bytes)?;
        Ok(())
    }

    /// Loads a previously persisted block.
    pub fn load_block(&self, block_number: u64) -> Result<Option<StoredBlock>, ArchiveError> {
        match self
            .store
            .get(ROLLUP_BLOCK_NUMBER, &block_key(block_number))?
        {
            Some(bytes) => {
                let record = StoredBlock::try_from_slice(&bytes)
                    .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Walks every archived block from newest to oldest.
    ///
    /// The reserved high-water key shares the namespace but not the 8-byte
    /// key shape, so it is filtered out here.
    pub fn blocks_newest_first(&self) -> Result<Vec<StoredBlock>, ArchiveError> {
        let mut blocks = Vec::new();
        for (key, value) in self.store.scan(ROLLUP_BLOCK_NUMBER, true)? {
            if key.len() != 8 {
                continue;
            }
            blocks.push(
                StoredBlock::try_from_slice(&value)
                    .map_err(|e| ArchiveError::Corrupt(e.to_string()))?,
            );
        }
        Ok(blocks)
    }

    /// The highest block number fully validated so far.
    pub fn last_validated(&self) -> Result<Option<u64>, ArchiveError> {
        Ok(self
            .store
            .get(ROLLUP_BLOCK_NUMBER, LAST_VALIDATED_KEY)?
            .map(|bytes| BigEndian::read_u64(&bytes)))
    }

    /// Advances the replay high-water mark.
    pub fn set_last_validated(&self, block_number: u64) -> Result<(), ArchiveError> {
        let mut bytes = [0u8; 8];
        BigEndian::write_u64(&mut bytes, block_number);
        self.store
            .put(ROLLUP_BLOCK_NUMBER, LAST_VALIDATED_KEY, &bytes)?;
        Ok(())
    }
}

fn block_key(block_number: u64) -> [u8; 8] {
    let mut key = [0u8; 8];
    BigEndian::write_u64(&mut key, block_number);
    key
}
