//! Atomic write batches with a read-through view.

use crate::{KeyValueStore, Namespace, StoreError};

#[derive(Debug, Clone)]
enum BatchOp {
    Put { value: Vec<u8> },
    Delete,
}

/// An ordered set of write operations applied atomically by
/// [`KeyValueStore::write`].
///
/// Later operations shadow earlier ones on the same key. [`WriteBatch::get`]
/// exposes the staged view so multi-step mutations (a Merkle update that
/// reads nodes written moments earlier in the same transaction) can run
/// entirely against one uncommitted batch.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<(Vec<u8>, BatchOp)>,
}

impl WriteBatch {
    /// Stages a put of `key` → `value` under `namespace`.
    pub fn put(&mut self, namespace: Namespace, key: &[u8], value: &[u8]) {
        let full = namespace.prefixed_key(key);
        self.ops.push((
            full,
            BatchOp::Put {
                value: value.to_vec(),
            },
        ));
    }

    /// Stages a delete of `key` under `namespace`.
    pub fn delete(&mut self, namespace: Namespace, key: &[u8]) {
        let full = namespace.prefixed_key(key);
        self.ops.push((full, BatchOp::Delete));
    }

    /// Looks `key` up in the staged operations only.
    ///
    /// `Some(Some(v))`: staged put. `Some(None)`: staged delete. `None`:
    /// the batch says nothing about this key.
    pub fn get(&self, namespace: Namespace, key: &[u8]) -> Option<Option<&[u8]>> {
        let full = namespace.prefixed_key(key);
        self.ops.iter().rev().find_map(|(k, op)| {
            if k != &full {
                return None;
            }
            match op {
                BatchOp::Put { value } => Some(Some(value.as_slice())),
                BatchOp::Delete => Some(None),
            }
        })
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Appends all operations of `other` after the ones staged here.
    pub fn append(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    /// Wraps this batch and a backing store into a combined read view.
    pub fn read_through<'a, S: KeyValueStore + ?Sized>(&'a self, store: &'a S) -> BatchReader<'a, S> {
        BatchReader { batch: self, store }
    }

    /// Drains the batch into `(full_key, Option<value>)` pairs in staging
    /// order; `None` values are deletes.
    pub fn into_ops(self) -> impl Iterator<Item = (Vec<u8>, Option<Vec<u8>>)> {
        self.ops.into_iter().map(|(full, op)| match op {
            BatchOp::Put { value } => (full, Some(value)),
            BatchOp::Delete => (full, None),
        })
    }
}

/// A read view that consults staged batch operations before the store.
pub struct BatchReader<'a, S: ?Sized> {
    batch: &'a WriteBatch,
    store: &'a S,
}

impl<S: KeyValueStore + ?Sized> BatchReader<'_, S> {
    /// Reads `key`, preferring staged writes over committed state.
    pub fn get(&self, namespace: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.batch.get(namespace, key) {
            Some(Some(value)) => Ok(Some(value.to_vec())),
            Some(None) => Ok(None),
            None => self.store.get(namespace, key),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::namespaces::{ACCOUNT_TO_SLOT, LAST_SLOT};
    use crate::{KeyValueStore, MemoryDb, WriteBatch};

    #[test]
    fn batch_shadows_in_order() {
        let mut batch = WriteBatch::default();
        batch.put(LAST_SLOT, b"", b"\x01");
        batch.put(LAST_SLOT, b"", b"\x02");
        assert_eq!(batch.get(LAST_SLOT, b""), Some(Some(b"\x02".as_slice())));

        batch.delete(LAST_SLOT, b"");
        assert_eq!(batch.get(LAST_SLOT, b""), Some(None));
    }

    #[test]
    fn read_through_prefers_staged_state() {
        let db = MemoryDb::default();
        db.put(ACCOUNT_TO_SLOT, b"alice", b"\x00").unwrap();

        let mut batch = WriteBatch::default();
        batch.put(ACCOUNT_TO_SLOT, b"bob", b"\x01");

        let reader = batch.read_through(&db);
        assert_eq!(reader.get(ACCOUNT_TO_SLOT, b"alice").unwrap(), Some(b"\x00".to_vec()));
        assert_eq!(reader.get(ACCOUNT_TO_SLOT, b"bob").unwrap(), Some(b"\x01".to_vec()));
        assert_eq!(reader.get(ACCOUNT_TO_SLOT, b"carol").unwrap(), None);

        db.write(batch).unwrap();
        assert_eq!(db.get(ACCOUNT_TO_SLOT, b"bob").unwrap(), Some(b"\x01".to_vec()));
    }

    #[test]
    fn namespaces_do_not_collide() {
        let db = MemoryDb::default();
        db.put(ACCOUNT_TO_SLOT, b"k", b"account").unwrap();
        db.put(LAST_SLOT, b"k", b"slot").unwrap();
        assert_eq!(db.get(ACCOUNT_TO_SLOT, b"k").unwrap(), Some(b"account".to_vec()));
        assert_eq!(db.get(LAST_SLOT, b"k").unwrap(), Some(b"slot".to_vec()));
    }
}
