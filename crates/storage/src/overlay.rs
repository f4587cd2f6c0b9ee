// Path: crates/storage/src/overlay.rs
//! A copy-on-write overlay over a base `KvRead`.
//!
//! Reads are first checked against the local write set; misses pass
//! through to the base. All writes are captured locally and do not touch
//! the base until the overlay is converted into a `WriteBatch` and
//! committed. This is the buffer behind every write transaction.

use crate::{KvPair, KvRead, KvScanIter, KvStore, WriteBatch};
use std::collections::{btree_map, BTreeMap};
use std::iter::{Fuse, Peekable};
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::Arc;
use tally_types::error::StorageError;

struct MergingIterator<'a> {
    base: Peekable<Fuse<KvScanIter<'a>>>,
    writes: Peekable<btree_map::Range<'a, Vec<u8>, Option<Vec<u8>>>>,
}

impl<'a> Iterator for MergingIterator<'a> {
    type Item = Result<KvPair, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let base_key = self
                .base
                .peek()
                .and_then(|res| res.as_ref().ok().map(|(k, _)| k.as_ref()));
            let write_key = self.writes.peek().map(|(k, _)| k.as_slice());

            let decision = match (base_key, write_key) {
                (Some(bk), Some(wk)) => Some(bk.cmp(wk)),
                (Some(_), None) => Some(std::cmp::Ordering::Less),
                (None, Some(_)) => Some(std::cmp::Ordering::Greater),
                (None, None) => None,
            };

            match decision {
                Some(std::cmp::Ordering::Less) => return self.base.next(),
                Some(std::cmp::Ordering::Greater) => {
                    if let Some((key, val_opt)) = self.writes.next() {
                        if let Some(val) = val_opt {
                            return Some(Ok((Arc::from(key.as_slice()), Arc::from(val.as_slice()))));
                        }
                    }
                }
                Some(std::cmp::Ordering::Equal) => {
                    self.base.next(); // shadowed by the write set
                    if let Some((key, val_opt)) = self.writes.next() {
                        if let Some(val) = val_opt {
                            return Some(Ok((Arc::from(key.as_slice()), Arc::from(val.as_slice()))));
                        }
                    }
                }
                None => return None,
            }
        }
    }
}

/// An in-memory, copy-on-write overlay for any `KvRead`.
pub struct Overlay {
    base: Arc<dyn KvRead>,
    // BTreeMap keeps the commit order deterministic.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Overlay {
    /// Creates a new, empty overlay on top of a base reader.
    pub fn new(base: Arc<dyn KvRead>) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    /// Queues a put, visible to subsequent reads through this overlay.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// Number of pending writes.
    pub fn pending(&self) -> usize {
        self.writes.len()
    }

    /// Consumes the overlay, yielding its writes as an atomic batch.
    pub fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (key, value_opt) in self.writes {
            match value_opt {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        batch
    }

    /// Commits the pending writes to the given store and resets the
    /// overlay to empty on top of the same base.
    pub fn commit_to(&mut self, store: &dyn KvStore) -> Result<(), StorageError> {
        let writes = std::mem::take(&mut self.writes);
        let mut batch = WriteBatch::new();
        for (key, value_opt) in writes {
            match value_opt {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        store.write(batch)
    }
}

impl KvRead for Overlay {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        match self.writes.get(key) {
            // In the write set; `None` means deleted.
            Some(value_opt) => Ok(value_opt.clone()),
            None => self.base.get(key),
        }
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<KvScanIter<'_>, StorageError> {
        let base = self.base.scan_prefix(prefix)?.fuse().peekable();

        let start = Included(prefix.to_vec());
        let end = match crate::next_prefix(prefix) {
            Some(ub) => Excluded(ub),
            None => Unbounded,
        };
        let writes = self.writes.range((start, end)).peekable();

        Ok(Box::new(MergingIterator { base, writes }))
    }
}
