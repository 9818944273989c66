//! In-memory store used by tests, per-block transition trees, and the demo
//! runner.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{KeyValueStore, Namespace, StoreError, WriteBatch};

/// A [`KeyValueStore`] over a `BTreeMap`.
///
/// Batches commit under a single write lock, so readers observe them
/// atomically.
#[derive(Debug, Default)]
pub struct MemoryDb {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDb {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys across all namespaces.
    pub fn len(&self) -> usize {
        self.map.read().expect("memory db lock poisoned").len()
    }

    /// True if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryDb {
    fn get(&self, namespace: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self
            .map
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(map.get(&namespace.prefixed_key(key)).cloned())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut map = self
            .map
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        for (full_key, value) in batch.into_ops() {
            match value {
                Some(value) => {
                    map.insert(full_key, value);
                }
                None => {
                    map.remove(&full_key);
                }
            }
        }
        Ok(())
    }

    fn scan(
        &self,
        namespace: Namespace,
        reverse: bool,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>, StoreError> {
        let map = self
            .map
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let prefix = namespace.prefixed_key(b"");
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = map
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, value)| (key[prefix.len()..].to_vec(), value.clone()))
            .collect();
        if reverse {
            entries.reverse();
        }
        Ok(Box::new(entries.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::{LAST_SLOT, ROLLUP_BLOCK_NUMBER};

    #[test]
    fn scan_walks_a_namespace_in_key_order() {
        let db = MemoryDb::new();
        for block_number in [2u64, 0, 1] {
            db.put(
                ROLLUP_BLOCK_NUMBER,
                &block_number.to_be_bytes(),
                format!("block-{block_number}").as_bytes(),
            )
            .unwrap();
        }
        // Another namespace must not leak into the scan.
        db.put(LAST_SLOT, b"", b"\x07").unwrap();

        let forward: Vec<Vec<u8>> = db
            .scan(ROLLUP_BLOCK_NUMBER, false)
            .unwrap()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(
            forward,
            vec![
                0u64.to_be_bytes().to_vec(),
                1u64.to_be_bytes().to_vec(),
                2u64.to_be_bytes().to_vec(),
            ]
        );

        let newest_first: Vec<Vec<u8>> = db
            .scan(ROLLUP_BLOCK_NUMBER, true)
            .unwrap()
            .map(|(key, value)| {
                assert!(value.starts_with(b"block-"));
                key
            })
            .collect();
        assert_eq!(newest_first[0], 2u64.to_be_bytes().to_vec());
        assert_eq!(newest_first[2], 0u64.to_be_bytes().to_vec());
    }

    #[test]
    fn batch_commit_is_all_or_nothing_in_order() {
        let db = MemoryDb::new();
        let mut batch = WriteBatch::default();
        batch.put(ROLLUP_BLOCK_NUMBER, b"1", b"a");
        batch.put(ROLLUP_BLOCK_NUMBER, b"1", b"b");
        batch.delete(ROLLUP_BLOCK_NUMBER, b"2");
        db.write(batch).unwrap();

        assert_eq!(db.get(ROLLUP_BLOCK_NUMBER, b"1").unwrap(), Some(b"b".to_vec()));
        assert_eq!(db.get(ROLLUP_BLOCK_NUMBER, b"2").unwrap(), None);
        assert!(db.exists(ROLLUP_BLOCK_NUMBER, b"1").unwrap());
    }
}
