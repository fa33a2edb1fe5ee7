//! The key-value collaborator the ledger persists through, plus an
//! in-memory implementation.
//!
//! Keys and values are opaque bytes. Range scans return values in key order
//! with the upper bound excluded.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::error::LedgerError;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors surfaced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored record failed to decode: {0}")]
    Codec(#[from] LedgerError),

    #[error("corrupt store: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// WriteBatch
// ---------------------------------------------------------------------------

/// A set of puts applied all-or-nothing by [`KeyValueStore::write_batch`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push((key.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.ops.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn into_ops(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.ops
    }
}

// ---------------------------------------------------------------------------
// KeyValueStore
// ---------------------------------------------------------------------------

/// Byte-oriented store the block store is written against.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Values whose keys fall in `[from, to)`, in key order.
    fn iterate_range(&self, from: &[u8], to: &[u8]) -> StoreResult<Vec<Vec<u8>>>;

    /// Apply every put in `batch` atomically.
    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Ordered map behind a lock. Used by tests and ephemeral nodes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn iterate_range(&self, from: &[u8], to: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        if from >= to {
            return Ok(Vec::new());
        }
        let map = self.map.read();
        let values = map
            .range::<[u8], _>((Bound::Included(from), Bound::Excluded(to)))
            .map(|(_, v)| v.clone())
            .collect();
        Ok(values)
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut map = self.map.write();
        for (key, value) in batch.into_ops() {
            map.insert(key, value);
        }
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
    fn put_then_get() {
        let store = MemoryStore::new();
        assert!(store.get(b"missing").unwrap().is_none());
        store.put(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));

        store.put(b"k", b"w").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"w".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn range_is_ordered_and_half_open() {
        let store = MemoryStore::new();
        for i in [3u8, 1, 4, 0, 2] {
            store.put(&[0x07, i], &[i]).unwrap();
        }
        store.put(&[0x08, 0], b"other table").unwrap();

        let values = store.iterate_range(&[0x07, 1], &[0x07, 4]).unwrap();
        assert_eq!(values, vec![vec![1], vec![2], vec![3]]);

        let whole_table = store.iterate_range(&[0x07], &[0x08]).unwrap();
        assert_eq!(whole_table.len(), 5);
    }

    #[test]
    fn inverted_range_is_empty() {
        let store = MemoryStore::new();
        store.put(b"a", b"1").unwrap();
        assert!(store.iterate_range(b"z", b"a").unwrap().is_empty());
        assert!(store.iterate_range(b"a", b"a").unwrap().is_empty());
    }

    #[test]
    fn batch_applies_every_put() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(vec![b'b'], vec![b'2']);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.iter().next(), Some((&b"a"[..], &b"1"[..])));

        store.write_batch(batch).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }
}
