//! # Digests
//!
//! The [`Digest`] is the identity and content-address primitive of the
//! ledger. Every block, entry, and directory slot is named by the SHA-256 of
//! its binary encoding, and every Merkle node is a SHA-256 over two child
//! digests.
//!
//! ## Sameness
//!
//! Header fields such as a previous key-Merkle-root may be absent while a
//! block is still being assembled. [`is_same_as`] treats absence as
//! unequal to everything, including another absence: two digests are the
//! same only when both exist and match byte for byte.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::codec::{BinaryCodec, Reader};
use crate::config::HASH_LENGTH;
use crate::error::{LedgerError, Result};

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// A 32-byte SHA-256 output.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Digest([u8; HASH_LENGTH]);

impl Digest {
    /// The all-zero digest, used as the predecessor of every genesis block.
    pub const ZERO: Digest = Digest([0u8; HASH_LENGTH]);

    /// Wrap raw digest bytes.
    pub const fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Copy a digest out of a slice. Returns `None` unless the slice is
    /// exactly [`HASH_LENGTH`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; HASH_LENGTH] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| LedgerError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes).ok_or_else(|| {
            LedgerError::InvalidHex(format!(
                "expected {} bytes, got {}",
                HASH_LENGTH,
                bytes.len()
            ))
        })
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }
}

impl From<[u8; HASH_LENGTH]> for Digest {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl BinaryCodec for Digest {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0);
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        let mut reader = Reader::new(input);
        let digest = reader.read_digest()?;
        Ok((digest, reader.into_rest()))
    }

    fn encoded_size(&self) -> usize {
        HASH_LENGTH
    }
}

// ---------------------------------------------------------------------------
// Hash Functions
// ---------------------------------------------------------------------------

/// SHA-256 of `data`.
///
/// ```
/// use meridian_protocol::crypto::sha256;
///
/// let digest = sha256(b"");
/// assert_eq!(
///     digest.to_hex(),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
pub fn sha256(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    finish(hasher)
}

/// SHA-256 over several slices fed in order, without concatenating them
/// into a temporary buffer first.
pub fn sha256_multi(parts: &[&[u8]]) -> Digest {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    finish(hasher)
}

/// SHA-256 over the concatenated encodings of `entities`, in order.
pub fn digest_of(entities: &[&dyn BinaryCodec]) -> Digest {
    let mut hasher = Sha256::new();
    let mut buf = Vec::new();
    for entity in entities {
        buf.clear();
        entity.encode_into(&mut buf);
        hasher.update(&buf);
    }
    finish(hasher)
}

fn finish(hasher: Sha256) -> Digest {
    let mut output = [0u8; HASH_LENGTH];
    output.copy_from_slice(&hasher.finalize());
    Digest(output)
}

/// Whether two optional digests are the same. Absent is never the same as
/// anything.
pub fn is_same_as(a: Option<&Digest>, b: Option<&Digest>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Serde Helpers
// ---------------------------------------------------------------------------

/// `#[serde(with = "hex_bytes")]` for a `Vec<u8>` shown as a hex string.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "hex_bytes_list")]` for a `Vec<Vec<u8>>` shown as a list
/// of hex strings.
pub mod hex_bytes_list {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(&hex::encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .into_iter()
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
