//! # Entry Block
//!
//! An ordered batch of entry digests for one user chain at one height.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  EntryBlockHeader (149 bytes)                │
//! │  ├── version               u8                │
//! │  ├── chain_id              [u8; 32]          │
//! │  ├── body_merkle_root      [u8; 32]          │
//! │  ├── prev_key_merkle_root  [u8; 32]          │
//! │  ├── prev_hash             [u8; 32]          │
//! │  ├── height                u32               │
//! │  ├── directory_height      u32               │
//! │  ├── start_time            u64               │
//! │  └── entry_count           u32               │
//! ├──────────────────────────────────────────────┤
//! │  count u32 · count × entry digest [u8; 32]   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Minute boundaries are recorded in-line as synthetic digests: the
//! SHA-256 of 32 bytes that are zero except for the last, which holds the
//! minute number.

use bytes::BufMut;
use serde::Serialize;
use tracing::debug;

use super::entry::Entry;
use super::{ensure_open, ensure_room, BlockContext, ChainBlock};
use crate::codec::{BinaryCodec, Reader};
use crate::config::{ENTRY_BLOCK_VERSION, HASH_LENGTH};
use crate::crypto::hash::{sha256, Digest};
use crate::crypto::merkle::{key_merkle_root, merkle_root};
use crate::error::{LedgerError, Result};

/// Encoded size of [`EntryBlockHeader`].
pub const ENTRY_BLOCK_HEADER_SIZE: usize = 1 + 4 * HASH_LENGTH + 4 + 4 + 8 + 4;

// ---------------------------------------------------------------------------
// EntryBlockHeader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryBlockHeader {
    pub version: u8,
    /// Chain the block belongs to.
    pub chain_id: Digest,
    /// Merkle root over the entry digests. Zero until sealed.
    pub body_merkle_root: Digest,
    pub prev_key_merkle_root: Digest,
    /// Identity hash of the previous entry block in this chain.
    pub prev_hash: Digest,
    /// Height within the chain.
    pub height: u32,
    /// Directory height the block was opened for.
    pub directory_height: u32,
    /// Unix seconds at which the directory height started.
    pub start_time: u64,
    pub entry_count: u32,
}

impl BinaryCodec for EntryBlockHeader {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.version);
        buf.put_slice(self.chain_id.as_bytes());
        buf.put_slice(self.body_merkle_root.as_bytes());
        buf.put_slice(self.prev_key_merkle_root.as_bytes());
        buf.put_slice(self.prev_hash.as_bytes());
        buf.put_u32(self.height);
        buf.put_u32(self.directory_height);
        buf.put_u64(self.start_time);
        buf.put_u32(self.entry_count);
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        let mut reader = Reader::new(input);
        reader.ensure(ENTRY_BLOCK_HEADER_SIZE)?;
        let header = EntryBlockHeader {
            version: reader.read_u8()?,
            chain_id: reader.read_digest()?,
            body_merkle_root: reader.read_digest()?,
            prev_key_merkle_root: reader.read_digest()?,
            prev_hash: reader.read_digest()?,
            height: reader.read_u32()?,
            directory_height: reader.read_u32()?,
            start_time: reader.read_u64()?,
            entry_count: reader.read_u32()?,
        };
        Ok((header, reader.into_rest()))
    }

    fn encoded_size(&self) -> usize {
        ENTRY_BLOCK_HEADER_SIZE
    }
}

// ---------------------------------------------------------------------------
// EntryBlock
// ---------------------------------------------------------------------------

/// Digest appended to mark the end of `minute`.
pub fn end_of_minute_marker(minute: u8) -> Digest {
    let mut buf = [0u8; HASH_LENGTH];
    buf[HASH_LENGTH - 1] = minute;
    sha256(&buf)
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryBlock {
    header: EntryBlockHeader,
    entries: Vec<Digest>,
    #[serde(skip)]
    sealed: bool,
    hash: Option<Digest>,
    key_merkle_root: Option<Digest>,
}

impl PartialEq for EntryBlock {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.entries == other.entries
    }
}

impl Eq for EntryBlock {}

impl EntryBlock {
    pub fn header(&self) -> &EntryBlockHeader {
        &self.header
    }

    /// Entry digests and minute markers, in append order.
    pub fn entries(&self) -> &[Digest] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry's identity digest. Returns that digest.
    pub fn append(&mut self, entry: &Entry) -> Result<Digest> {
        let digest = entry.hash();
        self.push(digest)?;
        Ok(digest)
    }

    /// Append the synthetic marker for the end of `minute`.
    pub fn append_end_of_minute_marker(&mut self, minute: u8) -> Result<Digest> {
        let marker = end_of_minute_marker(minute);
        self.push(marker)?;
        Ok(marker)
    }

    fn push(&mut self, digest: Digest) -> Result<()> {
        ensure_open(self.sealed)?;
        ensure_room(self.entries.len(), "entry block entries")?;
        self.entries.push(digest);
        self.header.entry_count = self.entries.len() as u32;
        Ok(())
    }

    /// Merkle root over the current entry digests.
    pub fn build_body_merkle_root(&self) -> Digest {
        merkle_root(&self.entries)
    }
}

impl ChainBlock for EntryBlock {
    fn open(
        chain_id: Digest,
        height: u32,
        previous: Option<&Self>,
        ctx: &BlockContext,
        capacity_hint: usize,
    ) -> Self {
        let header = EntryBlockHeader {
            version: ENTRY_BLOCK_VERSION,
            chain_id,
            body_merkle_root: Digest::ZERO,
            prev_key_merkle_root: previous.map_or(Digest::ZERO, |p| p.key_merkle_root()),
            prev_hash: previous.map_or(Digest::ZERO, |p| p.hash()),
            height,
            directory_height: ctx.directory_height,
            start_time: ctx.start_time,
            entry_count: 0,
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
        self.header.height
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
        self.header.entry_count = self.entries.len() as u32;
        self.header.body_merkle_root = self.build_body_merkle_root();
        self.key_merkle_root = Some(key_merkle_root(
            &self.header.encode(),
            &self.header.body_merkle_root,
        ));
        let hash = sha256(&self.encode());
        self.hash = Some(hash);
        self.sealed = true;
        debug!(
            chain = %self.header.chain_id,
            height = self.header.height,
            entries = self.entries.len(),
            hash = %hash,
            "entry block sealed"
        );
        Ok(())
    }

    fn hash(&self) -> Digest {
        self.hash.unwrap_or_else(|| sha256(&self.encode()))
    }

    fn key_merkle_root(&self) -> Digest {
        self.key_merkle_root.unwrap_or_else(|| {
            key_merkle_root(&self.header.encode(), &self.header.body_merkle_root)
        })
    }
}

impl BinaryCodec for EntryBlock {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.header.encode_into(buf);
        buf.put_u32(self.entries.len() as u32);
        for digest in &self.entries {
            buf.put_slice(digest.as_bytes());
        }
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        let mut reader = Reader::new(input);
        let header: EntryBlockHeader = reader.read_decoded()?;
        let count = reader.read_u32()? as usize;
        reader.ensure(count.saturating_mul(HASH_LENGTH))?;
        if count != header.entry_count as usize {
            return Err(LedgerError::InvalidChainTransition(format!(
                "entry block body holds {count} entries but header declares {}",
                header.entry_count
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(reader.read_digest()?);
        }

        let consumed = reader.consumed();
        let rest = reader.into_rest();
        let key_mr = key_merkle_root(&header.encode(), &header.body_merkle_root);
        let block = EntryBlock {
            header,
            entries,
            sealed: true,
            hash: Some(sha256(&input[..consumed])),
            key_merkle_root: Some(key_mr),
        };
        Ok((block, rest))
    }

    fn encoded_size(&self) -> usize {
        ENTRY_BLOCK_HEADER_SIZE + 4 + self.entries.len() * HASH_LENGTH
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
