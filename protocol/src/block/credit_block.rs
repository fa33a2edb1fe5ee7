//! # Entry-Credit Block
//!
//! All credit entries recorded at one directory height.
//!
//! ## Layout
//!
//! ```text
//! chain_id(32) | body_hash(32) | prev_key_merkle_root(32) | prev_hash(32)
//! | directory_height(4) | segments_merkle_root(32) | balance_merkle_root(32)
//! | entry_count(4) | body_size(4)
//! | entry_count × CreditEntry
//! ```
//!
//! There is no separate count in front of the body: the decoder reads
//! exactly `entry_count` credit entries. The body is committed to by a flat
//! hash (`SHA256` of the concatenated entry encodings), not a Merkle root,
//! and the key-Merkle-root pairs that hash with the header hash.

use bytes::BufMut;
use serde::Serialize;
use tracing::debug;

use super::credit::{tally_balances, CreditEntry, PublicKey};
use super::{ensure_open, ensure_room, BlockContext, ChainBlock};
use crate::codec::{BinaryCodec, Reader};
use crate::config::HASH_LENGTH;
use crate::crypto::hash::{sha256, Digest};
use crate::crypto::merkle::key_merkle_root;
use crate::error::{LedgerError, Result};

/// Encoded size of [`EntryCreditBlockHeader`].
pub const CREDIT_BLOCK_HEADER_SIZE: usize = 6 * HASH_LENGTH + 4 + 4 + 4;

// ---------------------------------------------------------------------------
// EntryCreditBlockHeader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryCreditBlockHeader {
    pub chain_id: Digest,
    /// SHA-256 over the concatenated entry encodings. Zero until sealed.
    pub body_hash: Digest,
    pub prev_key_merkle_root: Digest,
    pub prev_hash: Digest,
    /// Directory height this block belongs to. Doubles as its chain height.
    pub directory_height: u32,
    /// Reserved, always zero.
    pub segments_merkle_root: Digest,
    /// Reserved, always zero.
    pub balance_merkle_root: Digest,
    pub entry_count: u32,
    /// Byte length of the encoded body.
    pub body_size: u32,
}

impl BinaryCodec for EntryCreditBlockHeader {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_slice(self.chain_id.as_bytes());
        buf.put_slice(self.body_hash.as_bytes());
        buf.put_slice(self.prev_key_merkle_root.as_bytes());
        buf.put_slice(self.prev_hash.as_bytes());
        buf.put_u32(self.directory_height);
        buf.put_slice(self.segments_merkle_root.as_bytes());
        buf.put_slice(self.balance_merkle_root.as_bytes());
        buf.put_u32(self.entry_count);
        buf.put_u32(self.body_size);
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        let mut reader = Reader::new(input);
        reader.ensure(CREDIT_BLOCK_HEADER_SIZE)?;
        let header = EntryCreditBlockHeader {
            chain_id: reader.read_digest()?,
            body_hash: reader.read_digest()?,
            prev_key_merkle_root: reader.read_digest()?,
            prev_hash: reader.read_digest()?,
            directory_height: reader.read_u32()?,
            segments_merkle_root: reader.read_digest()?,
            balance_merkle_root: reader.read_digest()?,
            entry_count: reader.read_u32()?,
            body_size: reader.read_u32()?,
        };
        Ok((header, reader.into_rest()))
    }

    fn encoded_size(&self) -> usize {
        CREDIT_BLOCK_HEADER_SIZE
    }
}

// ---------------------------------------------------------------------------
// EntryCreditBlock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct EntryCreditBlock {
    header: EntryCreditBlockHeader,
    entries: Vec<CreditEntry>,
    #[serde(skip)]
    sealed: bool,
    hash: Option<Digest>,
    key_merkle_root: Option<Digest>,
}

impl PartialEq for EntryCreditBlock {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.entries == other.entries
    }
}

impl Eq for EntryCreditBlock {}

impl EntryCreditBlock {
    pub fn header(&self) -> &EntryCreditBlockHeader {
        &self.header
    }

    pub fn entries(&self) -> &[CreditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a credit entry. Order is preserved; positions are not typed.
    pub fn add_credit_entry(&mut self, entry: CreditEntry) -> Result<()> {
        ensure_open(self.sealed)?;
        ensure_room(self.entries.len(), "credit block entries")?;
        let body_size = self.header.body_size as usize + entry.encoded_size();
        if body_size > u32::MAX as usize {
            return Err(LedgerError::PayloadTooLarge {
                field: "credit block body",
                size: body_size,
                max: u32::MAX as usize,
            });
        }
        self.entries.push(entry);
        self.header.entry_count = self.entries.len() as u32;
        self.header.body_size = body_size as u32;
        Ok(())
    }

    pub fn add_end_of_minute_marker(&mut self, minute: u8) -> Result<()> {
        self.add_credit_entry(CreditEntry::EndOfMinute { minute })
    }

    pub fn add_server_index_entry(&mut self, index: u8) -> Result<()> {
        self.add_credit_entry(CreditEntry::ServerIndex { index })
    }

    /// SHA-256 over every entry's encoding, in order.
    pub fn build_body_hash(&self) -> Digest {
        sha256(&self.encode_body())
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.header.body_size as usize);
        for entry in &self.entries {
            entry.encode_into(&mut body);
        }
        body
    }

    /// Net credit change per public key within this block.
    pub fn balance_deltas(&self) -> std::collections::HashMap<PublicKey, i64> {
        tally_balances(&self.entries)
    }
}

impl ChainBlock for EntryCreditBlock {
    fn open(
        chain_id: Digest,
        height: u32,
        previous: Option<&Self>,
        _ctx: &BlockContext,
        capacity_hint: usize,
    ) -> Self {
        let header = EntryCreditBlockHeader {
            chain_id,
            body_hash: Digest::ZERO,
            prev_key_merkle_root: previous.map_or(Digest::ZERO, |p| p.key_merkle_root()),
            prev_hash: previous.map_or(Digest::ZERO, |p| p.hash()),
            directory_height: height,
            segments_merkle_root: Digest::ZERO,
            balance_merkle_root: Digest::ZERO,
            entry_count: 0,
            body_size: 0,
        };
        Self {
            header,
            entries: Vec::with_capacity(capacity_hint),
            sealed: false,
            hash: None,
            key_merkle_root: None,
        }
    }

    fn chain_id(&self) -> Digest {
        self.header.chain_id
    }

    fn height(&self) -> u32 {
        self.header.directory_height
    }

    fn prev_hash(&self) -> Digest {
        self.header.prev_hash
    }

    fn prev_key_merkle_root(&self) -> Digest {
        self.header.prev_key_merkle_root
    }

    fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn seal(&mut self) -> Result<()> {
        ensure_open(self.sealed)?;
        self.header.body_hash = self.build_body_hash();
        self.key_merkle_root = Some(key_merkle_root(
            &self.header.encode(),
            &self.header.body_hash,
        ));
        let hash = sha256(&self.encode());
        self.hash = Some(hash);
        self.sealed = true;
        debug!(
            height = self.header.directory_height,
            entries = self.entries.len(),
            hash = %hash,
            "entry-credit block sealed"
        );
        Ok(())
    }

    fn hash(&self) -> Digest {
        self.hash.unwrap_or_else(|| sha256(&self.encode()))
    }

    fn key_merkle_root(&self) -> Digest {
        self.key_merkle_root
            .unwrap_or_else(|| key_merkle_root(&self.header.encode(), &self.header.body_hash))
    }
}

impl BinaryCodec for EntryCreditBlock {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.header.encode_into(buf);
        for entry in &self.entries {
            entry.encode_into(buf);
        }
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        let mut reader = Reader::new(input);
        let header: EntryCreditBlockHeader = reader.read_decoded()?;
        let count = header.entry_count as usize;

        // The smallest credit entry is two bytes.
        let mut entries = Vec::with_capacity(count.min(reader.remaining() / 2));
        for _ in 0..count {
            entries.push(reader.read_decoded::<CreditEntry>()?);
        }

        let consumed = reader.consumed();
        let rest = reader.into_rest();
        let key_mr = key_merkle_root(&header.encode(), &header.body_hash);
        let block = EntryCreditBlock {
            header,
            entries,
            sealed: true,
            hash: Some(sha256(&input[..consumed])),
            key_merkle_root: Some(key_mr),
        };
        Ok((block, rest))
    }

    fn encoded_size(&self) -> usize {
        CREDIT_BLOCK_HEADER_SIZE + self.entries.iter().map(|e| e.encoded_size()).sum::<usize>()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::create_block;
    use crate::config::ENTRY_CREDIT_CHAIN_ID;
    use crate::crypto::merkle::merkle_root;

    fn chain() -> Digest {
        Digest::new(ENTRY_CREDIT_CHAIN_ID)
    }

    fn open_genesis() -> EntryCreditBlock {
        create_block(chain(), 0, None, &BlockContext::default(), 4).unwrap()
    }

    fn buy(n: u8, credits: u32) -> CreditEntry {
        CreditEntry::Buy {
            public_key: PublicKey::new([n; 32]),
            credits,
            funding_tx_hash: Digest::new([n.wrapping_add(1); 32]),
        }
    }

    fn pay_entry(n: u8) -> CreditEntry {
        CreditEntry::PayEntry {
            public_key: PublicKey::new([n; 32]),
            credits: 1,
            entry_hash: Digest::new([0xEE; 32]),
            timestamp: 1_700_000_123,
            signature: vec![n; 64],
        }
    }

    #[test]
    fn header_size_is_fixed() {
        assert_eq!(CREDIT_BLOCK_HEADER_SIZE, 204);
        assert_eq!(open_genesis().header().encode().len(), 204);
    }

    #[test]
    fn buy_and_end_of_minute_scenario() {
        let mut block = open_genesis();
        let purchase = buy(1, 500);
        let marker = CreditEntry::EndOfMinute { minute: 1 };
        block.add_credit_entry(purchase.clone()).unwrap();
        block.add_end_of_minute_marker(1).unwrap();
        block.seal().unwrap();

        let mut concat = purchase.encode();
        concat.extend_from_slice(&marker.encode());
        assert_eq!(block.header().body_hash, sha256(&concat));

        let header_hash = sha256(&block.header().encode());
        assert_eq!(
            block.key_merkle_root(),
            merkle_root(&[header_hash, block.header().body_hash])
        );
        assert_eq!(block.header().entry_count, 2);
        assert_eq!(block.header().body_size as usize, concat.len());
    }

    #[test]
    fn appends_preserve_order() {
        let mut block = open_genesis();
        block.add_server_index_entry(0).unwrap();
        block.add_credit_entry(buy(1, 5)).unwrap();
        block.add_credit_entry(pay_entry(2)).unwrap();
        block.add_end_of_minute_marker(1).unwrap();
        assert_eq!(block.entries()[0], CreditEntry::ServerIndex { index: 0 });
        assert_eq!(block.entries()[1], buy(1, 5));
        assert_eq!(block.entries()[3], CreditEntry::EndOfMinute { minute: 1 });
    }

    #[test]
    fn sealed_block_rejects_mutation() {
        let mut block = open_genesis();
        block.add_credit_entry(buy(1, 5)).unwrap();
        block.seal().unwrap();
        let key_mr = block.key_merkle_root();

        assert_eq!(block.seal().unwrap_err(), LedgerError::BlockSealed);
        assert_eq!(
            block.add_credit_entry(buy(2, 5)).unwrap_err(),
            LedgerError::BlockSealed
        );
        assert_eq!(
            block.add_server_index_entry(1).unwrap_err(),
            LedgerError::BlockSealed
        );
        assert_eq!(block.key_merkle_root(), key_mr);
        assert_eq!(block.len(), 1);
    }

    #[test]
    fn round_trip_preserves_entries_and_identity() {
        let mut block = open_genesis();
        block.add_server_index_entry(2).unwrap();
        block.add_credit_entry(buy(1, 5)).unwrap();
        block.add_credit_entry(pay_entry(3)).unwrap();
        block.add_end_of_minute_marker(1).unwrap();
        block.seal().unwrap();

        let bytes = block.encode();
        assert_eq!(bytes.len(), block.encoded_size());

        let (decoded, rest) = EntryCreditBlock::decode(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded.key_merkle_root(), block.key_merkle_root());
        assert!(decoded.is_sealed());
    }

    #[test]
    fn empty_block_round_trips() {
        let mut block = open_genesis();
        block.seal().unwrap();
        assert_eq!(block.header().body_hash, sha256(b""));
        let (decoded, _) = EntryCreditBlock::decode(&block.encode()).unwrap();
        assert_eq!(decoded, block);
        assert!(decoded.is_empty());
    }

    #[test]
    fn bad_tag_in_body_is_reported() {
        let mut block = open_genesis();
        block.add_end_of_minute_marker(1).unwrap();
        let mut bytes = block.encode();
        bytes[CREDIT_BLOCK_HEADER_SIZE] = 0x42;
        assert_eq!(
            EntryCreditBlock::decode(&bytes).unwrap_err(),
            LedgerError::UnknownEntryType(0x42)
        );
    }

    #[test]
    fn missing_entries_are_truncated_input() {
        let mut block = open_genesis();
        block.add_credit_entry(buy(1, 5)).unwrap();
        block.add_credit_entry(buy(2, 6)).unwrap();
        let bytes = block.encode();
        assert!(matches!(
            EntryCreditBlock::decode(&bytes[..bytes.len() - 1]),
            Err(LedgerError::TruncatedInput { .. })
        ));
        assert!(matches!(
            EntryCreditBlock::decode(&bytes[..100]),
            Err(LedgerError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn successor_links_and_uses_chain_height() {
        let mut genesis = open_genesis();
        genesis.seal().unwrap();
        let next: EntryCreditBlock =
            create_block(chain(), 1, Some(&genesis), &BlockContext::default(), 4).unwrap();
        assert_eq!(next.height(), 1);
        assert_eq!(next.header().directory_height, 1);
        assert_eq!(next.prev_hash(), genesis.hash());
        assert_eq!(next.prev_key_merkle_root(), genesis.key_merkle_root());
    }

    #[test]
    fn balance_deltas_cover_block() {
        let mut block = open_genesis();
        block.add_credit_entry(buy(1, 20)).unwrap();
        block.add_credit_entry(pay_entry(1)).unwrap();
        let deltas = block.balance_deltas();
        assert_eq!(deltas[&PublicKey::new([1; 32])], 19);
    }
}
