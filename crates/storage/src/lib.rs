// Path: crates/storage/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Persistent key-value storage (redb) for the authenticated state trees.
//! Provides the `KvRead`/`KvStore` abstraction, an atomic `WriteBatch`,
//! point-in-time snapshots and the copy-on-write `Overlay` used as the
//! write-transaction buffer.

pub mod overlay;
pub mod redb_store;

pub use overlay::Overlay;
pub use redb_store::{RedbSnapshot, RedbStore};

use std::collections::BTreeMap;
use std::sync::Arc;
use tally_types::error::StorageError;

/// An atomically reference-counted, owned key slice.
pub type KvKey = Arc<[u8]>;
/// An atomically reference-counted, owned value slice.
pub type KvVal = Arc<[u8]>;
/// An owned key-value pair, using cheap-to-clone Arcs.
pub type KvPair = (KvKey, KvVal);
/// A streaming iterator over key-value pairs in ascending key order.
/// `Sync` is omitted as iterators are stateful.
pub type KvScanIter<'a> = Box<dyn Iterator<Item = Result<KvPair, StorageError>> + Send + 'a>;

/// Read access to an ordered key-value map.
pub trait KvRead: Send + Sync {
    /// Gets a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Scans keys with the given prefix, in ascending key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<KvScanIter<'_>, StorageError>;
}

/// A set of puts and deletes applied atomically by [`KvStore::write`].
/// Ordered for deterministic application.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, Some(value));
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.entries.insert(key, None);
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the batch, yielding its operations in key order.
    pub fn into_entries(self) -> BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        self.entries
    }
}

/// A persistent ordered key-value store with atomic multi-key writes and
/// stable read snapshots.
pub trait KvStore: KvRead {
    /// Applies a batch atomically: after a crash either all of its writes
    /// are present or none.
    fn write(&self, batch: WriteBatch) -> Result<(), StorageError>;
}

/// Calculates the smallest byte vector that is strictly greater than all
/// keys starting with the given prefix. Returns `None` if the prefix is
/// empty or all `0xFF` bytes.
pub fn next_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    if prefix.is_empty() {
        return None;
    }
    let mut ub = prefix.to_vec();
    for i in (0..ub.len()).rev() {
        if let Some(byte) = ub.get_mut(i) {
            if *byte != 0xFF {
                *byte += 1;
                ub.truncate(i + 1);
                return Some(ub);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_prefix_increments_last_byte() {
        assert_eq!(next_prefix(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(next_prefix(&[0x01, 0xFF]), Some(vec![0x02]));
        assert_eq!(next_prefix(&[0xFF, 0xFF]), None);
        assert_eq!(next_prefix(b""), None);
    }
}
