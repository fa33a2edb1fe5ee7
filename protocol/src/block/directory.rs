//! # Directory Block
//!
//! One directory block per global height. Its body lists a
//! `(chain_id, merkle_root)` pair for every child chain that sealed a block
//! at that height, which is what ties all the chains into one ledger.
//!
//! ## Slots
//!
//! ```text
//! slot 0  entry-credit chain   root = identity hash of the credit block
//! slot 1  factoid chain        root = supplied by the caller
//! slot 2+ entry chains         root = key-Merkle-root of the entry block,
//!                              in arrival order
//! ```
//!
//! ## Layout
//!
//! ```text
//! version(1) | network_id(4) | body_merkle_root(32) | prev_key_merkle_root(32)
//! | prev_block_hash(32) | height(4) | start_time(8) | entry_count(4)
//! | count(4) | count × (chain_id(32) | merkle_root(32))
//! ```
//!
//! The body Merkle root is built over `SHA256(encode(entry))` of each slot.

use bytes::BufMut;
use serde::Serialize;
use tracing::debug;

use super::credit_block::EntryCreditBlock;
use super::entry_block::EntryBlock;
use super::{ensure_open, ensure_room, BlockContext, ChainBlock};
use crate::codec::{BinaryCodec, Reader};
use crate::config::{
    DIRECTORY_BLOCK_VERSION, DIRECTORY_CHAIN_ID, ENTRY_CREDIT_CHAIN_ID, ENTRY_CREDIT_SLOT,
    FACTOID_CHAIN_ID, FACTOID_SLOT, HASH_LENGTH,
};
use crate::crypto::hash::{sha256, Digest};
use crate::crypto::merkle::{key_merkle_root, merkle_root};
use crate::error::{LedgerError, Result};

/// Encoded size of [`DirectoryBlockHeader`].
pub const DIRECTORY_BLOCK_HEADER_SIZE: usize = 1 + 4 + 3 * HASH_LENGTH + 4 + 8 + 4;

/// Encoded size of [`DirectoryBlockEntry`].
pub const DIRECTORY_ENTRY_SIZE: usize = 2 * HASH_LENGTH;

// ---------------------------------------------------------------------------
// DirectoryBlockHeader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryBlockHeader {
    pub version: u8,
    pub network_id: u32,
    pub body_merkle_root: Digest,
    pub prev_key_merkle_root: Digest,
    pub prev_block_hash: Digest,
    /// Global height.
    pub height: u32,
    pub start_time: u64,
    pub entry_count: u32,
}

impl BinaryCodec for DirectoryBlockHeader {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.version);
        buf.put_u32(self.network_id);
        buf.put_slice(self.body_merkle_root.as_bytes());
        buf.put_slice(self.prev_key_merkle_root.as_bytes());
        buf.put_slice(self.prev_block_hash.as_bytes());
        buf.put_u32(self.height);
        buf.put_u64(self.start_time);
        buf.put_u32(self.entry_count);
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        let mut reader = Reader::new(input);
        reader.ensure(DIRECTORY_BLOCK_HEADER_SIZE)?;
        let header = DirectoryBlockHeader {
            version: reader.read_u8()?,
            network_id: reader.read_u32()?,
            body_merkle_root: reader.read_digest()?,
            prev_key_merkle_root: reader.read_digest()?,
            prev_block_hash: reader.read_digest()?,
            height: reader.read_u32()?,
            start_time: reader.read_u64()?,
            entry_count: reader.read_u32()?,
        };
        Ok((header, reader.into_rest()))
    }

    fn encoded_size(&self) -> usize {
        DIRECTORY_BLOCK_HEADER_SIZE
    }
}

// ---------------------------------------------------------------------------
// DirectoryBlockEntry
// ---------------------------------------------------------------------------

/// A child chain's contribution to one height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirectoryBlockEntry {
    pub chain_id: Digest,
    pub merkle_root: Digest,
}

impl DirectoryBlockEntry {
    pub fn new(chain_id: Digest, merkle_root: Digest) -> Self {
        Self {
            chain_id,
            merkle_root,
        }
    }

    /// Leaf used for the directory body Merkle tree.
    pub fn hash(&self) -> Digest {
        sha256(&self.encode())
    }
}

impl BinaryCodec for DirectoryBlockEntry {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_slice(self.chain_id.as_bytes());
        buf.put_slice(self.merkle_root.as_bytes());
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        let mut reader = Reader::new(input);
        reader.ensure(DIRECTORY_ENTRY_SIZE)?;
        let entry = DirectoryBlockEntry {
            chain_id: reader.read_digest()?,
            merkle_root: reader.read_digest()?,
        };
        Ok((entry, reader.into_rest()))
    }

    fn encoded_size(&self) -> usize {
        DIRECTORY_ENTRY_SIZE
    }
}

// ---------------------------------------------------------------------------
// DirectoryBlock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryBlock {
    #[serde(skip)]
    chain_id: Digest,
    header: DirectoryBlockHeader,
    entries: Vec<DirectoryBlockEntry>,
    #[serde(skip)]
    sealed: bool,
    hash: Option<Digest>,
    key_merkle_root: Option<Digest>,
}

impl PartialEq for DirectoryBlock {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.entries == other.entries
    }
}

impl Eq for DirectoryBlock {}

impl DirectoryBlock {
    pub fn header(&self) -> &DirectoryBlockHeader {
        &self.header
    }

    pub fn entries(&self) -> &[DirectoryBlockEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an arbitrary slot.
    pub fn add_entry(&mut self, entry: DirectoryBlockEntry) -> Result<()> {
        ensure_open(self.sealed)?;
        ensure_room(self.entries.len(), "directory entries")?;
        self.entries.push(entry);
        self.header.entry_count = self.entries.len() as u32;
        Ok(())
    }

    /// Put placeholders into the entry-credit and factoid slots.
    pub fn reserve_well_known_slots(&mut self) -> Result<()> {
        ensure_open(self.sealed)?;
        if !self.entries.is_empty() {
            return Err(LedgerError::InvalidChainTransition(
                "well-known slots must be reserved before any other entry".to_string(),
            ));
        }
        self.add_entry(DirectoryBlockEntry::new(
            Digest::new(ENTRY_CREDIT_CHAIN_ID),
            Digest::ZERO,
        ))?;
        self.add_entry(DirectoryBlockEntry::new(
            Digest::new(FACTOID_CHAIN_ID),
            Digest::ZERO,
        ))
    }

    /// Register a sealed entry block: appends its chain id and
    /// key-Merkle-root.
    pub fn add_entry_block_root(&mut self, block: &EntryBlock) -> Result<()> {
        if !block.is_sealed() {
            return Err(LedgerError::BlockNotSealed);
        }
        self.add_entry(DirectoryBlockEntry::new(
            block.chain_id(),
            block.key_merkle_root(),
        ))
    }

    /// Register a sealed entry-credit block in slot 0, replacing whatever
    /// credit root is already there.
    pub fn add_entry_credit_block_root(&mut self, block: &EntryCreditBlock) -> Result<()> {
        ensure_open(self.sealed)?;
        if !block.is_sealed() {
            return Err(LedgerError::BlockNotSealed);
        }
        let entry = DirectoryBlockEntry::new(block.chain_id(), block.hash());
        match self.entries.get_mut(ENTRY_CREDIT_SLOT) {
            Some(slot) if slot.chain_id == entry.chain_id => *slot = entry,
            Some(_) => {
                ensure_room(self.entries.len(), "directory entries")?;
                self.entries.insert(ENTRY_CREDIT_SLOT, entry);
            }
            None => self.entries.push(entry),
        }
        self.header.entry_count = self.entries.len() as u32;
        Ok(())
    }

    /// Write the factoid root into slot 1. The slot must already exist and
    /// belong to the factoid chain.
    pub fn add_factoid_root(&mut self, merkle_root: Digest) -> Result<()> {
        ensure_open(self.sealed)?;
        let factoid = Digest::new(FACTOID_CHAIN_ID);
        match self.entries.get_mut(FACTOID_SLOT) {
            Some(slot) if slot.chain_id == factoid => {
                slot.merkle_root = merkle_root;
                Ok(())
            }
            _ => Err(LedgerError::ReservedSlotMissing(FACTOID_SLOT)),
        }
    }

    /// Merkle root over the hashes of every slot.
    pub fn build_body_merkle_root(&self) -> Digest {
        let leaves: Vec<Digest> = self.entries.iter().map(DirectoryBlockEntry::hash).collect();
        merkle_root(&leaves)
    }

    /// Key-Merkle-root over the current header and body root.
    pub fn build_key_merkle_root(&self) -> Digest {
        key_merkle_root(&self.header.encode(), &self.header.body_merkle_root)
    }

    /// Look up the slot a chain contributed at this height.
    pub fn entry_for_chain(&self, chain_id: &Digest) -> Option<&DirectoryBlockEntry> {
        self.entries.iter().find(|e| &e.chain_id == chain_id)
    }
}

impl ChainBlock for DirectoryBlock {
    fn open(
        chain_id: Digest,
        height: u32,
        previous: Option<&Self>,
        ctx: &BlockContext,
        capacity_hint: usize,
    ) -> Self {
        let header = DirectoryBlockHeader {
            version: DIRECTORY_BLOCK_VERSION,
            network_id: ctx.network_id,
            body_merkle_root: Digest::ZERO,
            prev_key_merkle_root: previous.map_or(Digest::ZERO, |p| p.key_merkle_root()),
            prev_block_hash: previous.map_or(Digest::ZERO, |p| p.hash()),
            height,
            start_time: ctx.start_time,
            entry_count: 0,
        };
        Self {
            chain_id,
            header,
            entries: Vec::with_capacity(capacity_hint),
            sealed: false,
            hash: None,
            key_merkle_root: None,
        }
    }

    fn chain_id(&self) -> Digest {
        self.chain_id
    }

    fn height(&self) -> u32 {
        self.header.height
    }

    fn prev_hash(&self) -> Digest {
        self.header.prev_block_hash
    }

    fn prev_key_merkle_root(&self) -> Digest {
        self.header.prev_key_merkle_root
    }

    fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn seal(&mut self) -> Result<()> {
        ensure_open(self.sealed)?;
        self.header.entry_count = self.entries.len() as u32;
        self.header.body_merkle_root = self.build_body_merkle_root();
        self.key_merkle_root = Some(self.build_key_merkle_root());
        let hash = sha256(&self.encode());
        self.hash = Some(hash);
        self.sealed = true;
        debug!(
            height = self.header.height,
            slots = self.entries.len(),
            hash = %hash,
            "directory block sealed"
        );
        Ok(())
    }

    fn hash(&self) -> Digest {
        self.hash.unwrap_or_else(|| sha256(&self.encode()))
    }

    fn key_merkle_root(&self) -> Digest {
        self.key_merkle_root
            .unwrap_or_else(|| self.build_key_merkle_root())
    }
}

impl BinaryCodec for DirectoryBlock {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.header.encode_into(buf);
        buf.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            entry.encode_into(buf);
        }
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        let mut reader = Reader::new(input);
        let header: DirectoryBlockHeader = reader.read_decoded()?;
        let count = reader.read_u32()? as usize;
        reader.ensure(count.saturating_mul(DIRECTORY_ENTRY_SIZE))?;
        if count != header.entry_count as usize {
            return Err(LedgerError::InvalidChainTransition(format!(
                "directory block body holds {count} slots but header declares {}",
                header.entry_count
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(reader.read_decoded::<DirectoryBlockEntry>()?);
        }

        let consumed = reader.consumed();
        let rest = reader.into_rest();
        let key_mr = key_merkle_root(&header.encode(), &header.body_merkle_root);
        let block = DirectoryBlock {
            chain_id: Digest::new(DIRECTORY_CHAIN_ID),
            header,
            entries,
            sealed: true,
            hash: Some(sha256(&input[..consumed])),
            key_merkle_root: Some(key_mr),
        };
        Ok((block, rest))
    }

    fn encoded_size(&self) -> usize {
        DIRECTORY_BLOCK_HEADER_SIZE + 4 + self.entries.len() * DIRECTORY_ENTRY_SIZE
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{create_block, Entry};
    use crate::config::NETWORK_ID_LOCALNET;

    fn ctx(height: u32) -> BlockContext {
        BlockContext::new(NETWORK_ID_LOCALNET, height, 1_700_000_000 + height as u64 * 600)
    }

    fn open_genesis() -> DirectoryBlock {
        create_block(Digest::new(DIRECTORY_CHAIN_ID), 0, None, &ctx(0), 8).unwrap()
    }

    fn sealed_entry_block(chain: u8) -> EntryBlock {
        let chain_id = Digest::new([chain; 32]);
        let mut block: EntryBlock = create_block(chain_id, 0, None, &ctx(0), 1).unwrap();
        block
            .append(&Entry::new(chain_id, vec![], vec![chain]).unwrap())
            .unwrap();
        block.seal().unwrap();
        block
    }

    fn sealed_credit_block() -> EntryCreditBlock {
        let mut block: EntryCreditBlock =
            create_block(Digest::new(ENTRY_CREDIT_CHAIN_ID), 0, None, &ctx(0), 1).unwrap();
        block.add_server_index_entry(0).unwrap();
        block.seal().unwrap();
        block
    }

    #[test]
    fn header_size_is_fixed() {
        assert_eq!(DIRECTORY_BLOCK_HEADER_SIZE, 117);
        assert_eq!(open_genesis().header().encode().len(), 117);
    }

    #[test]
    fn header_carries_network_and_start_time() {
        let block = open_genesis();
        assert_eq!(block.header().network_id, NETWORK_ID_LOCALNET);
        assert_eq!(block.header().start_time, 1_700_000_000);
        let bytes = block.header().encode();
        assert_eq!(&bytes[1..5], &NETWORK_ID_LOCALNET.to_be_bytes());
        assert_eq!(&bytes[105..113], &1_700_000_000u64.to_be_bytes());
    }

    #[test]
    fn entry_credit_root_goes_to_slot_zero_and_replaces() {
        let mut block = open_genesis();
        block.reserve_well_known_slots().unwrap();
        let credit = sealed_credit_block();

        block.add_entry_credit_block_root(&credit).unwrap();
        assert_eq!(block.entries()[0].merkle_root, credit.hash());
        assert_eq!(block.len(), 2);

        // A second registration replaces instead of appending.
        block.add_entry_credit_block_root(&credit).unwrap();
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn entry_credit_root_appends_into_empty_block() {
        let mut block = open_genesis();
        block.add_entry_credit_block_root(&sealed_credit_block()).unwrap();
        assert_eq!(block.len(), 1);
        assert_eq!(block.entries()[0].chain_id, Digest::new(ENTRY_CREDIT_CHAIN_ID));
    }

    #[test]
    fn entry_credit_root_claims_slot_zero_from_other_chain() {
        let mut block = open_genesis();
        block.add_entry_block_root(&sealed_entry_block(5)).unwrap();
        block.add_entry_credit_block_root(&sealed_credit_block()).unwrap();
        assert_eq!(block.entries()[0].chain_id, Digest::new(ENTRY_CREDIT_CHAIN_ID));
        assert_eq!(block.entries()[1].chain_id, Digest::new([5; 32]));
    }

    #[test]
    fn factoid_root_needs_reserved_slot() {
        let mut block = open_genesis();
        assert_eq!(
            block.add_factoid_root(Digest::new([1; 32])).unwrap_err(),
            LedgerError::ReservedSlotMissing(FACTOID_SLOT)
        );

        block.reserve_well_known_slots().unwrap();
        block.add_factoid_root(Digest::new([1; 32])).unwrap();
        assert_eq!(block.entries()[1].chain_id, Digest::new(FACTOID_CHAIN_ID));
        assert_eq!(block.entries()[1].merkle_root, Digest::new([1; 32]));
    }

    #[test]
    fn factoid_root_leaves_foreign_slot_alone() {
        let mut block = open_genesis();
        block.add_entry_block_root(&sealed_entry_block(5)).unwrap();
        block.add_entry_block_root(&sealed_entry_block(6)).unwrap();
        assert_eq!(
            block.add_factoid_root(Digest::new([1; 32])).unwrap_err(),
            LedgerError::ReservedSlotMissing(FACTOID_SLOT)
        );
        assert_eq!(block.entries()[1].chain_id, Digest::new([6; 32]));
    }

    #[test]
    fn entry_block_roots_append_in_arrival_order() {
        let mut block = open_genesis();
        block.reserve_well_known_slots().unwrap();
        let a = sealed_entry_block(0xA1);
        let b = sealed_entry_block(0xB2);
        block.add_entry_block_root(&a).unwrap();
        block.add_entry_block_root(&b).unwrap();

        assert_eq!(block.entries()[2], DirectoryBlockEntry::new(a.chain_id(), a.key_merkle_root()));
        assert_eq!(block.entries()[3], DirectoryBlockEntry::new(b.chain_id(), b.key_merkle_root()));
        assert_eq!(
            block.entry_for_chain(&b.chain_id()).map(|e| e.merkle_root),
            Some(b.key_merkle_root())
        );
    }

    #[test]
    fn unsealed_children_are_rejected() {
        let mut block = open_genesis();
        let open_eb: EntryBlock = create_block(Digest::new([1; 32]), 0, None, &ctx(0), 0).unwrap();
        assert_eq!(
            block.add_entry_block_root(&open_eb).unwrap_err(),
            LedgerError::BlockNotSealed
        );
        let open_ecb: EntryCreditBlock =
            create_block(Digest::new(ENTRY_CREDIT_CHAIN_ID), 0, None, &ctx(0), 0).unwrap();
        assert_eq!(
            block.add_entry_credit_block_root(&open_ecb).unwrap_err(),
            LedgerError::BlockNotSealed
        );
    }

    #[test]
    fn body_root_is_merkle_over_entry_hashes() {
        let mut block = open_genesis();
        block.reserve_well_known_slots().unwrap();
        block.add_entry_block_root(&sealed_entry_block(3)).unwrap();
        let leaves: Vec<Digest> = block
            .entries()
            .iter()
            .map(|e| sha256(&e.encode()))
            .collect();
        assert_eq!(block.build_body_merkle_root(), merkle_root(&leaves));
    }

    #[test]
    fn empty_body_uses_empty_hash() {
        let mut block = open_genesis();
        block.seal().unwrap();
        assert_eq!(block.header().body_merkle_root, sha256(b""));
    }

    #[test]
    fn seal_is_one_way() {
        let mut block = open_genesis();
        block.reserve_well_known_slots().unwrap();
        block.seal().unwrap();
        let key_mr = block.key_merkle_root();

        assert_eq!(block.seal().unwrap_err(), LedgerError::BlockSealed);
        assert_eq!(
            block.add_entry_block_root(&sealed_entry_block(1)).unwrap_err(),
            LedgerError::BlockSealed
        );
        assert_eq!(
            block.add_factoid_root(Digest::ZERO).unwrap_err(),
            LedgerError::BlockSealed
        );
        assert_eq!(block.key_merkle_root(), key_mr);
        assert_eq!(
            key_mr,
            key_merkle_root(&block.header().encode(), &block.header().body_merkle_root)
        );
    }

    #[test]
    fn round_trip_preserves_slots_and_identity() {
        let mut block = open_genesis();
        block.reserve_well_known_slots().unwrap();
        block.add_entry_block_root(&sealed_entry_block(7)).unwrap();
        block.add_entry_credit_block_root(&sealed_credit_block()).unwrap();
        block.seal().unwrap();

        let bytes = block.encode();
        assert_eq!(bytes.len(), block.encoded_size());
        let (decoded, rest) = DirectoryBlock::decode(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded.key_merkle_root(), block.key_merkle_root());
        assert_eq!(decoded.chain_id(), Digest::new(DIRECTORY_CHAIN_ID));
    }

    #[test]
    fn zeroed_entry_round_trips() {
        let entry = DirectoryBlockEntry::new(Digest::ZERO, Digest::ZERO);
        let encoded = entry.encode();
        let (decoded, rest) = DirectoryBlockEntry::decode(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, entry);
        assert_eq!(entry.encoded_size(), 64);
    }

    #[test]
    fn successor_links_to_predecessor() {
        let mut genesis = open_genesis();
        genesis.seal().unwrap();
        let next: DirectoryBlock =
            create_block(Digest::new(DIRECTORY_CHAIN_ID), 1, Some(&genesis), &ctx(1), 8).unwrap();
        assert_eq!(next.header().prev_block_hash, genesis.hash());
        assert_eq!(next.header().prev_key_merkle_root, genesis.key_merkle_root());
        assert_eq!(next.header().height, 1);
    }

    #[test]
    fn slot_count_must_match_header() {
        let mut block = open_genesis();
        block.reserve_well_known_slots().unwrap();
        block.header.entry_count = 1;
        assert!(matches!(
            DirectoryBlock::decode(&block.encode()),
            Err(LedgerError::InvalidChainTransition(_))
        ));
    }

    #[test]
    fn truncated_slots_are_reported() {
        let mut block = open_genesis();
        block.reserve_well_known_slots().unwrap();
        let bytes = block.encode();
        assert!(matches!(
            DirectoryBlock::decode(&bytes[..bytes.len() - 1]),
            Err(LedgerError::TruncatedInput { .. })
        ));
    }
}
