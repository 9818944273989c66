//! Abstract key-value storage for the rollup node.
//!
//! Every persistent structure in the node (Merkle trees, account registry,
//! token registry, committed-block archive) lives in one [`KeyValueStore`]
//! under its own [`Namespace`]. The trait deliberately stays small: point
//! reads plus atomic [`WriteBatch`] commits are all the node needs, and they
//! are what any production backend (rocksdb, badger-style LSM stores) can
//! provide without contortions.

mod batch;
mod memory;
pub mod namespaces;

pub use batch::{BatchReader, WriteBatch};
pub use memory::MemoryDb;

/// Errors surfaced by a key-value backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed to serve a read or commit a batch.
    #[error("key-value backend error: {0}")]
    Backend(String),
}

/// A byte prefix qualifying every key written through it.
///
/// The full key layout is `prefix || b"|" || key`, so distinct namespaces can
/// never collide even when their prefixes share a stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Namespace(&'static [u8]);

impl Namespace {
    /// Creates a namespace from a static prefix.
    pub const fn new(prefix: &'static [u8]) -> Self {
        Self(prefix)
    }

    /// The raw prefix bytes.
    pub fn prefix(&self) -> &'static [u8] {
        self.0
    }

    /// Builds the full backend key for `key` under this namespace.
    pub fn prefixed_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.0.len() + 1 + key.len());
        full.extend_from_slice(self.0);
        full.push(b'|');
        full.extend_from_slice(key);
        full
    }
}

impl core::fmt::Display for Namespace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.0))
    }
}

/// Namespaced byte key → byte value storage with atomic batch writes.
///
/// Implementations must apply a [`WriteBatch`] atomically: a reader observes
/// either none or all of its operations, and a crash mid-commit must not
/// leave a partial batch behind.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored for `key` under `namespace`.
    fn get(&self, namespace: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Atomically applies all operations in `batch`.
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Iterates every `(key, value)` pair under `namespace` in ascending
    /// key order, or descending with `reverse`. Keys come back without the
    /// namespace prefix. Big-endian numeric keys therefore scan
    /// oldest-first forward and newest-first in reverse.
    fn scan(
        &self,
        namespace: Namespace,
        reverse: bool,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>, StoreError>;

    /// Returns true if `key` exists under `namespace`.
    fn exists(&self, namespace: Namespace, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(namespace, key)?.is_some())
    }

    /// Convenience single-key write.
    fn put(&self, namespace: Namespace, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        batch.put(namespace, key, value);
        self.write(batch)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, namespace: Namespace, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.as_ref().get(namespace, key)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.as_ref().write(batch)
    }

    fn scan(
        &self,
        namespace: Namespace,
        reverse: bool,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>, StoreError> {
        self.as_ref().scan(namespace, reverse)
    }
}
