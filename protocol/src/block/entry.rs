//! # Entry
//!
//! The leaf record of a user chain: a payload plus a list of external ids.
//!
//! ## Layout
//!
//! ```text
//! version(1) | chain_id(32) | ext_id_size(2) | payload_size(2)
//! | ext_id section (ext_id_size bytes) | data (payload_size bytes)
//! ```
//!
//! The ext-id section is a run of `len(2) | bytes(len)` records, so an
//! empty ext id still costs two bytes. `ext_id_size` is the byte length of
//! the whole section and `payload_size` the length of `data`. Both are
//! 16-bit, which caps each part at 65535 bytes.

use bytes::BufMut;
use serde::Serialize;

use crate::codec::{BinaryCodec, Reader};
use crate::config::{ENTRY_VERSION, HASH_LENGTH};
use crate::crypto::hash::{hex_bytes, hex_bytes_list, sha256, sha256_multi, Digest};
use crate::error::{LedgerError, Result};

/// Largest ext-id section or payload the 16-bit length prefixes can carry.
pub const MAX_FIELD_SIZE: usize = u16::MAX as usize;

/// Bytes before the ext-id section.
const FIXED_PREFIX_SIZE: usize = 1 + HASH_LENGTH + 2 + 2;

/// A single entry destined for one user chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    version: u8,
    chain_id: Digest,
    #[serde(with = "hex_bytes_list")]
    ext_ids: Vec<Vec<u8>>,
    #[serde(with = "hex_bytes")]
    data: Vec<u8>,
}

impl Entry {
    /// Build an entry with the current entry version.
    pub fn new(chain_id: Digest, ext_ids: Vec<Vec<u8>>, data: Vec<u8>) -> Result<Self> {
        Self::with_version(ENTRY_VERSION, chain_id, ext_ids, data)
    }

    /// Build an entry with an explicit version byte.
    pub fn with_version(
        version: u8,
        chain_id: Digest,
        ext_ids: Vec<Vec<u8>>,
        data: Vec<u8>,
    ) -> Result<Self> {
        let section = ext_id_section_size(&ext_ids);
        if section > MAX_FIELD_SIZE {
            return Err(LedgerError::PayloadTooLarge {
                field: "ext_ids",
                size: section,
                max: MAX_FIELD_SIZE,
            });
        }
        if data.len() > MAX_FIELD_SIZE {
            return Err(LedgerError::PayloadTooLarge {
                field: "data",
                size: data.len(),
                max: MAX_FIELD_SIZE,
            });
        }
        Ok(Self {
            version,
            chain_id,
            ext_ids,
            data,
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn chain_id(&self) -> &Digest {
        &self.chain_id
    }

    pub fn ext_ids(&self) -> &[Vec<u8>] {
        &self.ext_ids
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Identity digest: SHA-256 of the full encoding.
    pub fn hash(&self) -> Digest {
        sha256(&self.encode())
    }

    /// Byte length of the encoded ext-id section.
    pub fn ext_id_size(&self) -> usize {
        ext_id_section_size(&self.ext_ids)
    }
}

fn ext_id_section_size(ext_ids: &[Vec<u8>]) -> usize {
    ext_ids.iter().map(|id| 2 + id.len()).sum()
}

/// Derive a chain id from the parts of a chain name:
/// `SHA256(SHA256(part_0) || SHA256(part_1) || ...)`.
pub fn chain_id_from_name<P: AsRef<[u8]>>(parts: &[P]) -> Digest {
    let part_hashes: Vec<Digest> = parts.iter().map(|p| sha256(p.as_ref())).collect();
    let slices: Vec<&[u8]> = part_hashes.iter().map(|d| &d.as_bytes()[..]).collect();
    sha256_multi(&slices)
}

impl BinaryCodec for Entry {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.version);
        buf.put_slice(self.chain_id.as_bytes());
        // Sizes were bounded at construction.
        buf.put_u16(self.ext_id_size() as u16);
        buf.put_u16(self.data.len() as u16);
        for ext_id in &self.ext_ids {
            buf.put_u16(ext_id.len() as u16);
            buf.put_slice(ext_id);
        }
        buf.put_slice(&self.data);
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        let mut reader = Reader::new(input);
        let version = reader.read_u8()?;
        let chain_id = reader.read_digest()?;
        let ext_id_size = reader.read_u16()? as usize;
        let payload_size = reader.read_u16()? as usize;

        let section = reader.read_bytes(ext_id_size)?;
        let mut ext_reader = Reader::new(section);
        let mut ext_ids = Vec::new();
        while ext_reader.remaining() > 0 {
            let len = ext_reader.read_u16()? as usize;
            ext_ids.push(ext_reader.read_bytes(len)?.to_vec());
        }

        let data = reader.read_bytes(payload_size)?.to_vec();

        let entry = Entry {
            version,
            chain_id,
            ext_ids,
            data,
        };
        Ok((entry, reader.into_rest()))
    }

    fn encoded_size(&self) -> usize {
        FIXED_PREFIX_SIZE + self.ext_id_size() + self.data.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
