//! # SledStore: On-Disk Key-Value Store
//!
//! The persistent [`KeyValueStore`] behind a running node, built on sled's
//! embedded B+ tree.
//!
//! ## Tree Layout
//!
//! Everything lives in one named tree, `ledger`. Keys already carry a
//! one-byte table tag (see [`crate::storage::blocks`]), so separate trees
//! would add nothing:
//!
//! | Key                          | Value                   |
//! |------------------------------|-------------------------|
//! | `0x01 ++ hash`               | directory block bytes   |
//! | `0x02 ++ height (4B BE)`     | directory block hash    |
//! | `0x03 ++ hash`               | entry block bytes       |
//! | `0x04 ++ key_merkle_root`    | entry block hash        |
//! | `0x05 ++ hash`               | entry-credit block bytes|
//! | `0x06 ++ hash`               | entry bytes             |
//!
//! Heights are big-endian so sled's lexicographic order is numeric order.
//!
//! ## Atomicity
//!
//! [`KeyValueStore::write_batch`] maps onto a single `sled::Batch` followed
//! by a flush: a sealed height lands on disk completely or not at all.

use sled::{Batch, Db, Tree};
use std::path::Path;

use super::kv::{KeyValueStore, StoreResult, WriteBatch};

const LEDGER_TREE: &str = "ledger";

/// sled-backed [`KeyValueStore`].
///
/// sled handles its own synchronization, so a `SledStore` can be shared
/// across threads behind an `Arc` as is.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    tree: Tree,
}

impl SledStore {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that is removed when dropped.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let tree = db.open_tree(LEDGER_TREE)?;
        Ok(Self { db, tree })
    }

    /// Number of records across all tables.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Block until every buffered write is durable.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl KeyValueStore for SledStore {
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|value| value.to_vec()))
    }

    fn iterate_range(&self, from: &[u8], to: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        if from >= to {
            return Ok(Vec::new());
        }
        let mut values = Vec::new();
        for item in self.tree.range(from..to) {
            let (_key, value) = item?;
            values.push(value.to_vec());
        }
        Ok(values)
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut sled_batch = Batch::default();
        for (key, value) in batch.into_ops() {
            sled_batch.insert(key, value);
        }
        self.tree.apply_batch(sled_batch)?;
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_temporary_database() {
        let store = SledStore::open_temporary().expect("should create temp db");
        assert!(store.is_empty());
    }

    #[test]
    fn put_get_and_overwrite() {
        let store = SledStore::open_temporary().unwrap();
        assert!(store.get(b"k").unwrap().is_none());
        store.put(b"k", b"v1").unwrap();
        store.put(b"k", b"v2").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn range_scan_uses_big_endian_order() {
        let store = SledStore::open_temporary().unwrap();
        for height in [300u32, 2, 70_000, 1] {
            let mut key = vec![0x02];
            key.extend_from_slice(&height.to_be_bytes());
            store.put(&key, &height.to_be_bytes()).unwrap();
        }

        let values = store.iterate_range(&[0x02], &[0x03]).unwrap();
        let heights: Vec<u32> = values
            .iter()
            .map(|v| u32::from_be_bytes([v[0], v[1], v[2], v[3]]))
            .collect();
        assert_eq!(heights, vec![1, 2, 300, 70_000]);
        assert!(store.iterate_range(&[0x03], &[0x02]).unwrap().is_empty());
    }

    #[test]
    fn batch_is_applied_whole() {
        let store = SledStore::open_temporary().unwrap();
        let mut batch = WriteBatch::new();
        for i in 0..10u8 {
            batch.put(vec![i], vec![i; 3]);
        }
        store.write_batch(batch).unwrap();
        assert_eq!(store.len(), 10);
        assert_eq!(store.get(&[9]).unwrap(), Some(vec![9, 9, 9]));
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = SledStore::open(dir.path()).expect("should open db");
            store.put(b"height", &7u32.to_be_bytes()).unwrap();
            store.flush().unwrap();
        }

        let reopened = SledStore::open(dir.path()).expect("should reopen db");
        assert_eq!(reopened.get(b"height").unwrap(), Some(7u32.to_be_bytes().to_vec()));
    }
}
