//! Typed block persistence over any [`KeyValueStore`].
//!
//! Every record is keyed `table_tag(1) ++ key`, where `key` is a digest or a
//! big-endian height. Values are the records' binary encodings. A sealed
//! height (directory block, credit block, entry blocks, revealed entries,
//! and every index) is written as one batch.
//!
//! The external id index is keyed `sha256(ext_id) ++ entry_hash`, so one
//! external id can name many entries and a prefix scan finds them all.

use crate::block::{ChainBlock, DirectoryBlock, Entry, EntryBlock, EntryCreditBlock};
use crate::chain::ledger::SealedHeight;
use crate::codec::BinaryCodec;
use crate::config::{
    HASH_LENGTH, TABLE_CREDIT_BLOCK, TABLE_DIRECTORY_BLOCK, TABLE_DIRECTORY_HEIGHT, TABLE_ENTRY,
    TABLE_ENTRY_BLOCK, TABLE_ENTRY_BLOCK_KEY_MR, TABLE_ENTRY_EXT_ID,
};
use crate::crypto::hash::{sha256, Digest};

use super::kv::{KeyValueStore, StoreError, StoreResult, WriteBatch};

fn table_key(table: u8, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + key.len());
    out.push(table);
    out.extend_from_slice(key);
    out
}

fn height_key(height: u32) -> Vec<u8> {
    table_key(TABLE_DIRECTORY_HEIGHT, &height.to_be_bytes())
}

/// Decode a stored record, rejecting trailing bytes.
fn decode_exact<T: BinaryCodec>(bytes: &[u8]) -> StoreResult<T> {
    let (value, rest) = T::decode(bytes)?;
    if !rest.is_empty() {
        return Err(StoreError::Corrupt(format!(
            "{} trailing bytes after record",
            rest.len()
        )));
    }
    Ok(value)
}

fn ext_id_key(ext_id: &[u8], entry_hash: &[u8]) -> Vec<u8> {
    let mut key = sha256(ext_id).as_bytes().to_vec();
    key.extend_from_slice(entry_hash);
    table_key(TABLE_ENTRY_EXT_ID, &key)
}

fn decode_digest(bytes: &[u8]) -> StoreResult<Digest> {
    Digest::from_slice(bytes)
        .ok_or_else(|| StoreError::Corrupt(format!("index value is {} bytes", bytes.len())))
}

/// Block and entry persistence on top of a [`KeyValueStore`].
#[derive(Debug)]
pub struct BlockStore<S> {
    kv: S,
}

impl<S: KeyValueStore> BlockStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    /// The underlying key-value store.
    pub fn inner(&self) -> &S {
        &self.kv
    }

    // -- Writes -------------------------------------------------------------

    /// Persist everything sealed at one height in a single batch.
    pub fn put_sealed_height(&self, sealed: &SealedHeight) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        Self::stage_directory_block(&mut batch, &sealed.directory);
        Self::stage_credit_block(&mut batch, &sealed.credit);
        for block in &sealed.entry_blocks {
            Self::stage_entry_block(&mut batch, block);
        }
        for entry in &sealed.entries {
            Self::stage_entry(&mut batch, entry);
        }
        self.kv.write_batch(batch)?;
        tracing::debug!(
            height = sealed.height(),
            entry_blocks = sealed.entry_blocks.len(),
            entries = sealed.entries.len(),
            "sealed height persisted"
        );
        Ok(())
    }

    pub fn put_directory_block(&self, block: &DirectoryBlock) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        Self::stage_directory_block(&mut batch, block);
        self.kv.write_batch(batch)
    }

    pub fn put_entry_block(&self, block: &EntryBlock) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        Self::stage_entry_block(&mut batch, block);
        self.kv.write_batch(batch)
    }

    pub fn put_credit_block(&self, block: &EntryCreditBlock) -> StoreResult<()> {
        self.kv.put(
            &table_key(TABLE_CREDIT_BLOCK, block.hash().as_bytes()),
            &block.encode(),
        )
    }

    pub fn put_entry(&self, entry: &Entry) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        Self::stage_entry(&mut batch, entry);
        self.kv.write_batch(batch)
    }

    fn stage_directory_block(batch: &mut WriteBatch, block: &DirectoryBlock) {
        let hash = block.hash();
        batch.put(table_key(TABLE_DIRECTORY_BLOCK, hash.as_bytes()), block.encode());
        batch.put(height_key(block.height()), hash.as_bytes().to_vec());
    }

    fn stage_entry_block(batch: &mut WriteBatch, block: &EntryBlock) {
        let hash = block.hash();
        batch.put(table_key(TABLE_ENTRY_BLOCK, hash.as_bytes()), block.encode());
        batch.put(
            table_key(TABLE_ENTRY_BLOCK_KEY_MR, block.key_merkle_root().as_bytes()),
            hash.as_bytes().to_vec(),
        );
    }

    fn stage_credit_block(batch: &mut WriteBatch, block: &EntryCreditBlock) {
        batch.put(
            table_key(TABLE_CREDIT_BLOCK, block.hash().as_bytes()),
            block.encode(),
        );
    }

    fn stage_entry(batch: &mut WriteBatch, entry: &Entry) {
        let hash = entry.hash();
        batch.put(table_key(TABLE_ENTRY, hash.as_bytes()), entry.encode());
        for ext_id in entry.ext_ids() {
            batch.put(ext_id_key(ext_id, hash.as_bytes()), hash.as_bytes().to_vec());
        }
    }

    // -- Point lookups ------------------------------------------------------

    fn fetch<T: BinaryCodec>(&self, table: u8, key: &[u8]) -> StoreResult<Option<T>> {
        match self.kv.get(&table_key(table, key))? {
            Some(bytes) => Ok(Some(decode_exact(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn fetch_directory_block_by_hash(&self, hash: &Digest) -> StoreResult<Option<DirectoryBlock>> {
        self.fetch(TABLE_DIRECTORY_BLOCK, hash.as_bytes())
    }

    pub fn fetch_entry_block_by_hash(&self, hash: &Digest) -> StoreResult<Option<EntryBlock>> {
        self.fetch(TABLE_ENTRY_BLOCK, hash.as_bytes())
    }

    pub fn fetch_credit_block_by_hash(&self, hash: &Digest) -> StoreResult<Option<EntryCreditBlock>> {
        self.fetch(TABLE_CREDIT_BLOCK, hash.as_bytes())
    }

    pub fn fetch_entry_by_hash(&self, hash: &Digest) -> StoreResult<Option<Entry>> {
        self.fetch(TABLE_ENTRY, hash.as_bytes())
    }

    /// Two-step lookup: key-Merkle-root → hash → entry block.
    pub fn fetch_entry_block_by_key_mr(&self, key_mr: &Digest) -> StoreResult<Option<EntryBlock>> {
        match self
            .kv
            .get(&table_key(TABLE_ENTRY_BLOCK_KEY_MR, key_mr.as_bytes()))?
        {
            Some(bytes) => self.fetch_entry_block_by_hash(&decode_digest(&bytes)?),
            None => Ok(None),
        }
    }

    /// Two-step lookup: height → hash → directory block.
    pub fn fetch_directory_block_by_height(&self, height: u32) -> StoreResult<Option<DirectoryBlock>> {
        match self.kv.get(&height_key(height))? {
            Some(bytes) => self.fetch_directory_block_by_hash(&decode_digest(&bytes)?),
            None => Ok(None),
        }
    }

    // -- Scans --------------------------------------------------------------

    /// Directory blocks with heights in `[from, to)`, ascending.
    pub fn fetch_directory_blocks(&self, from: u32, to: u32) -> StoreResult<Vec<DirectoryBlock>> {
        let hashes = self.kv.iterate_range(&height_key(from), &height_key(to))?;
        let mut blocks = Vec::with_capacity(hashes.len());
        for bytes in hashes {
            let hash = decode_digest(&bytes)?;
            let block = self.fetch_directory_block_by_hash(&hash)?.ok_or_else(|| {
                StoreError::Corrupt(format!("height index points at missing block {hash}"))
            })?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Every stored entry carrying `ext_id` among its external ids, ordered
    /// by entry hash.
    pub fn fetch_entries_by_ext_id(&self, ext_id: &[u8]) -> StoreResult<Vec<Entry>> {
        let from = ext_id_key(ext_id, &[0x00; HASH_LENGTH]);
        // One byte past the longest key under this prefix.
        let to = ext_id_key(ext_id, &[0xFF; HASH_LENGTH + 1]);
        let hashes = self.kv.iterate_range(&from, &to)?;

        let mut entries = Vec::with_capacity(hashes.len());
        for bytes in hashes {
            let hash = decode_digest(&bytes)?;
            let entry = self.fetch_entry_by_hash(&hash)?.ok_or_else(|| {
                StoreError::Corrupt(format!("ext id index points at missing entry {hash}"))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Height of the newest persisted directory block.
    pub fn latest_directory_height(&self) -> StoreResult<Option<u32>> {
        let hashes = self
            .kv
            .iterate_range(&[TABLE_DIRECTORY_HEIGHT], &[TABLE_DIRECTORY_HEIGHT + 1])?;
        match hashes.last() {
            Some(bytes) => {
                let hash = decode_digest(bytes)?;
                let block = self.fetch_directory_block_by_hash(&hash)?.ok_or_else(|| {
                    StoreError::Corrupt(format!("height index points at missing block {hash}"))
                })?;
                Ok(Some(block.height()))
            }
            None => Ok(None),
        }
    }

    fn fetch_table<T: BinaryCodec>(&self, table: u8) -> StoreResult<Vec<T>> {
        self.kv
            .iterate_range(&[table], &[table + 1])?
            .iter()
            .map(|bytes| decode_exact(bytes))
            .collect()
    }

    /// Every directory block, ascending by height.
    pub fn fetch_all_directory_blocks(&self) -> StoreResult<Vec<DirectoryBlock>> {
        let mut blocks: Vec<DirectoryBlock> = self.fetch_table(TABLE_DIRECTORY_BLOCK)?;
        blocks.sort_by_key(|b| b.height());
        Ok(blocks)
    }

    /// Every entry-credit block, ascending by height.
    pub fn fetch_all_credit_blocks(&self) -> StoreResult<Vec<EntryCreditBlock>> {
        let mut blocks: Vec<EntryCreditBlock> = self.fetch_table(TABLE_CREDIT_BLOCK)?;
        blocks.sort_by_key(|b| b.height());
        Ok(blocks)
    }

    /// Every entry block, grouped by chain and ascending by height within a
    /// chain.
    pub fn fetch_all_entry_blocks(&self) -> StoreResult<Vec<EntryBlock>> {
        let mut blocks: Vec<EntryBlock> = self.fetch_table(TABLE_ENTRY_BLOCK)?;
        blocks.sort_by_key(|b| (b.chain_id(), b.height()));
        Ok(blocks)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::credit::PublicKey;
    use crate::block::CreditEntry;
    use crate::chain::Ledger;
    use crate::config::NETWORK_ID_LOCALNET;
    use crate::storage::MemoryStore;

    fn build_heights(ledger: &Ledger, count: u32) -> Vec<SealedHeight> {
        let chain_id = ledger
            .create_chain(Entry::new(Digest::new([0x11; 32]), vec![b"first".to_vec()], vec![]).unwrap())
            .unwrap();
        let mut sealed = Vec::new();
        for height in 0..count {
            ledger
                .submit_entry(Entry::new(chain_id, vec![], height.to_be_bytes().to_vec()).unwrap())
                .unwrap();
            ledger
                .submit_credit_entry(CreditEntry::Buy {
                    public_key: PublicKey::new([0xAA; 32]),
                    credits: 10,
                    funding_tx_hash: Digest::new([height as u8; 32]),
                })
                .unwrap();
            sealed.push(ledger.close_directory_block().unwrap());
        }
        sealed
    }

    #[test]
    fn sealed_height_is_fetchable_every_way() {
        let ledger = Ledger::new(NETWORK_ID_LOCALNET, 0).unwrap();
        let store = BlockStore::new(MemoryStore::new());
        let heights = build_heights(&ledger, 1);
        store.put_sealed_height(&heights[0]).unwrap();

        let sealed = &heights[0];
        let directory = store
            .fetch_directory_block_by_hash(&sealed.directory.hash())
            .unwrap()
            .expect("directory block by hash");
        assert_eq!(&directory, sealed.directory.as_ref());
        assert_eq!(directory.hash(), sealed.directory.hash());

        let by_height = store.fetch_directory_block_by_height(0).unwrap().unwrap();
        assert_eq!(by_height.hash(), sealed.directory.hash());

        let credit = store
            .fetch_credit_block_by_hash(&sealed.credit.hash())
            .unwrap()
            .unwrap();
        assert_eq!(&credit, sealed.credit.as_ref());

        let eb = &sealed.entry_blocks[0];
        assert_eq!(
            store.fetch_entry_block_by_hash(&eb.hash()).unwrap().unwrap().hash(),
            eb.hash()
        );
        assert_eq!(
            store
                .fetch_entry_block_by_key_mr(&eb.key_merkle_root())
                .unwrap()
                .unwrap()
                .key_merkle_root(),
            eb.key_merkle_root()
        );

        for entry in &sealed.entries {
            assert_eq!(
                store.fetch_entry_by_hash(&entry.hash()).unwrap().as_ref(),
                Some(entry)
            );
        }
    }

    #[test]
    fn entries_are_found_by_ext_id() {
        let ledger = Ledger::new(NETWORK_ID_LOCALNET, 0).unwrap();
        let store = BlockStore::new(MemoryStore::new());
        let chain_id = ledger
            .create_chain(Entry::new(Digest::new([0x22; 32]), vec![b"invoice".to_vec()], vec![]).unwrap())
            .unwrap();
        let tagged = [
            Entry::new(chain_id, vec![b"invoice".to_vec(), b"2024-17".to_vec()], vec![1]).unwrap(),
            Entry::new(chain_id, vec![b"receipt".to_vec(), b"2024-17".to_vec()], vec![2]).unwrap(),
        ];
        for entry in &tagged {
            ledger.submit_entry(entry.clone()).unwrap();
        }
        ledger
            .submit_entry(Entry::new(chain_id, vec![b"2024-170".to_vec()], vec![3]).unwrap())
            .unwrap();
        store.put_sealed_height(&ledger.close_directory_block().unwrap()).unwrap();

        let mut expected: Vec<Digest> = tagged.iter().map(Entry::hash).collect();
        expected.sort();
        let found: Vec<Digest> = store
            .fetch_entries_by_ext_id(b"2024-17")
            .unwrap()
            .iter()
            .map(Entry::hash)
            .collect();
        assert_eq!(found, expected);

        assert_eq!(store.fetch_entries_by_ext_id(b"invoice").unwrap().len(), 2);
        assert!(store.fetch_entries_by_ext_id(b"2024").unwrap().is_empty());
    }

    #[test]
    fn missing_records_are_none() {
        let store = BlockStore::new(MemoryStore::new());
        let unknown = Digest::new([0xEE; 32]);
        assert!(store.fetch_directory_block_by_hash(&unknown).unwrap().is_none());
        assert!(store.fetch_entry_block_by_key_mr(&unknown).unwrap().is_none());
        assert!(store.fetch_directory_block_by_height(3).unwrap().is_none());
        assert!(store.fetch_entry_by_hash(&unknown).unwrap().is_none());
        assert_eq!(store.latest_directory_height().unwrap(), None);
    }

    #[test]
    fn scans_return_height_order() {
        let ledger = Ledger::new(NETWORK_ID_LOCALNET, 0).unwrap();
        let store = BlockStore::new(MemoryStore::new());
        for sealed in build_heights(&ledger, 4).iter().rev() {
            store.put_sealed_height(sealed).unwrap();
        }

        assert_eq!(store.latest_directory_height().unwrap(), Some(3));

        let range: Vec<u32> = store
            .fetch_directory_blocks(1, 3)
            .unwrap()
            .iter()
            .map(|b| b.height())
            .collect();
        assert_eq!(range, vec![1, 2]);

        let all: Vec<u32> = store
            .fetch_all_directory_blocks()
            .unwrap()
            .iter()
            .map(|b| b.height())
            .collect();
        assert_eq!(all, vec![0, 1, 2, 3]);

        let credits: Vec<u32> = store
            .fetch_all_credit_blocks()
            .unwrap()
            .iter()
            .map(|b| b.height())
            .collect();
        assert_eq!(credits, vec![0, 1, 2, 3]);

        let entry_heights: Vec<u32> = store
            .fetch_all_entry_blocks()
            .unwrap()
            .iter()
            .map(|b| b.height())
            .collect();
        assert_eq!(entry_heights, vec![0, 1, 2, 3]);
    }

    #[test]
    fn corrupt_record_is_reported() {
        let store = BlockStore::new(MemoryStore::new());
        let hash = Digest::new([1; 32]);
        store
            .inner()
            .put(&table_key(TABLE_DIRECTORY_BLOCK, hash.as_bytes()), &[0u8; 10])
            .unwrap();
        assert!(matches!(
            store.fetch_directory_block_by_hash(&hash),
            Err(StoreError::Codec(_))
        ));

        store
            .inner()
            .put(&height_key(0), &[0u8; 5])
            .unwrap();
        assert!(matches!(
            store.fetch_directory_block_by_height(0),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn trailing_bytes_are_corruption() {
        let store = BlockStore::new(MemoryStore::new());
        let entry = Entry::new(Digest::new([2; 32]), vec![], vec![1, 2, 3]).unwrap();
        let mut bytes = entry.encode();
        bytes.push(0);
        store
            .inner()
            .put(&table_key(TABLE_ENTRY, entry.hash().as_bytes()), &bytes)
            .unwrap();
        assert!(matches!(
            store.fetch_entry_by_hash(&entry.hash()),
            Err(StoreError::Corrupt(_))
        ));
    }
}
