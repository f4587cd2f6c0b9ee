// Path: crates/storage/src/redb_store.rs
//! Single-table redb store. One database file holds every tree namespace;
//! keys are opaque byte strings composed of `namespace ‖ node address`.

use crate::{KvPair, KvRead, KvScanIter, KvStore, WriteBatch};
use redb::{Database, ReadOnlyTable, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tally_types::error::StorageError;
use tracing::debug;

const STATE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("STATE");

/// Name of the database file created inside the store directory.
const DB_FILE: &str = "state.redb";

/// A persistent ordered key-value store backed by a single redb table.
///
/// Atomicity comes from redb's transactional commit: after a crash either
/// all writes of the last committed batch are present or none.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Opens or creates a store inside the given directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| StorageError::Backend(e.to_string()))?;
        let db = Database::create(dir.join(DB_FILE))
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Ensure the table exists so reads on a fresh store don't fail.
        let w = db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        w.open_table(STATE)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        w.commit().map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(path = %dir.display(), "opened state store");
        Ok(Self { db: Arc::new(db) })
    }

    fn read_table(&self) -> Result<ReadOnlyTable<&'static [u8], &'static [u8]>, StorageError> {
        let r = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        r.open_table(STATE)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    /// Returns a stable point-in-time view, unaffected by later writes.
    /// Multiple snapshots may coexist.
    pub fn snapshot(&self) -> Result<RedbSnapshot, StorageError> {
        Ok(RedbSnapshot {
            table: self.read_table()?,
        })
    }
}

fn collect_prefix(
    table: &ReadOnlyTable<&'static [u8], &'static [u8]>,
    prefix: &[u8],
) -> Result<Vec<KvPair>, StorageError> {
    let mut out: Vec<KvPair> = Vec::new();
    let iter = table
        .range(prefix..)
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    for entry in iter {
        let (k, v) = entry.map_err(|e| StorageError::Backend(e.to_string()))?;
        if !k.value().starts_with(prefix) {
            break;
        }
        out.push((Arc::from(k.value()), Arc::from(v.value())));
    }
    Ok(out)
}

impl KvRead for RedbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let table = self.read_table()?;
        let out = table
            .get(key)
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .map(|v| v.value().to_vec());
        Ok(out)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<KvScanIter<'_>, StorageError> {
        let table = self.read_table()?;
        let pairs = collect_prefix(&table, prefix)?;
        Ok(Box::new(pairs.into_iter().map(Ok)))
    }
}

impl KvStore for RedbStore {
    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let w = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        {
            let mut table = w
                .open_table(STATE)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            for (key, value) in batch.into_entries() {
                match value {
                    Some(value) => {
                        table
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(|e| StorageError::Backend(e.to_string()))?;
                    }
                    None => {
                        table
                            .remove(key.as_slice())
                            .map_err(|e| StorageError::Backend(e.to_string()))?;
                    }
                }
            }
        }
        w.commit().map_err(|e| StorageError::Backend(e.to_string()))
    }
}

/// A stable read view pinned to the store state at snapshot time.
pub struct RedbSnapshot {
    table: ReadOnlyTable<&'static [u8], &'static [u8]>,
}

impl KvRead for RedbSnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let out = self
            .table
            .get(key)
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .map(|v| v.value().to_vec());
        Ok(out)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<KvScanIter<'_>, StorageError> {
        let pairs = collect_prefix(&self.table, prefix)?;
        Ok(Box::new(pairs.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, RedbStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_roundtrip() {
        let (_dir, store) = open_temp();
        let mut batch = WriteBatch::new();
        batch.put(b"k1".to_vec(), b"v1".to_vec());
        store.write(batch).unwrap();
        assert_eq!(store.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(store.get(b"missing").unwrap(), None);
    }

    #[test]
    fn batch_applies_atomically_and_in_key_order() {
        let (_dir, store) = open_temp();
        let mut batch = WriteBatch::new();
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(b"c".to_vec(), b"3".to_vec());
        store.write(batch).unwrap();

        let keys: Vec<Vec<u8>> = store
            .scan_prefix(b"")
            .unwrap()
            .map(|r| r.unwrap().0.to_vec())
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn scan_respects_prefix_boundaries() {
        let (_dir, store) = open_temp();
        let mut batch = WriteBatch::new();
        batch.put(b"x/1".to_vec(), b"a".to_vec());
        batch.put(b"x/2".to_vec(), b"b".to_vec());
        batch.put(b"y/1".to_vec(), b"c".to_vec());
        store.write(batch).unwrap();

        let pairs: Vec<KvPair> = store
            .scan_prefix(b"x/")
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0.as_ref(), b"x/1");
        assert_eq!(pairs[1].0.as_ref(), b"x/2");
    }

    #[test]
    fn snapshot_is_stable_across_later_writes() {
        let (_dir, store) = open_temp();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"old".to_vec());
        store.write(batch).unwrap();

        let snap = store.snapshot().unwrap();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"new".to_vec());
        batch.put(b"k2".to_vec(), b"x".to_vec());
        store.write(batch).unwrap();

        assert_eq!(snap.get(b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(snap.get(b"k2").unwrap(), None);
        assert_eq!(store.get(b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn delete_removes_key() {
        let (_dir, store) = open_temp();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"v".to_vec());
        store.write(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(b"k".to_vec());
        store.write(batch).unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RedbStore::open(dir.path()).unwrap();
            let mut batch = WriteBatch::new();
            batch.put(b"persisted".to_vec(), b"yes".to_vec());
            store.write(batch).unwrap();
        }
        let store = RedbStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"persisted").unwrap(), Some(b"yes".to_vec()));
    }
}
