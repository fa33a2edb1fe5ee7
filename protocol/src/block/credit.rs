//! # Credit Entries
//!
//! Operations recorded in the entry-credit chain. Each variant starts with
//! a one-byte type tag that alone decides how the rest is decoded.
//!
//! | Tag | Variant       | Fields after the tag                                                  |
//! |-----|---------------|-----------------------------------------------------------------------|
//! | 0   | `ServerIndex` | index(1)                                                              |
//! | 1   | `EndOfMinute` | minute(1)                                                             |
//! | 2   | `PayChain`    | key(32) credits(4) entry(32) chain_id_hash(32) entry_chain_id_hash(32) sig_len(4) sig |
//! | 3   | `PayEntry`    | key(32) credits(4) entry(32) timestamp(8) sig_len(4) sig              |
//! | 4   | `Buy`         | key(32) credits(4) funding_tx(32)                                     |
//!
//! Signatures are carried as opaque bytes; checking them is the job of
//! whoever admits the entry, not of the format.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bytes::BufMut;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::{BinaryCodec, Reader};
use crate::config::HASH_LENGTH;
use crate::crypto::hash::{hex_bytes, sha256, Digest};
use crate::error::{LedgerError, Result};

pub const TAG_SERVER_INDEX: u8 = 0;
pub const TAG_END_OF_MINUTE: u8 = 1;
pub const TAG_PAY_CHAIN: u8 = 2;
pub const TAG_PAY_ENTRY: u8 = 3;
pub const TAG_BUY: u8 = 4;

/// Length of a public key on the wire.
pub const PUBLIC_KEY_LENGTH: usize = 32;

const BUY_SIZE: usize = 1 + PUBLIC_KEY_LENGTH + 4 + HASH_LENGTH;
const PAY_ENTRY_FIXED_SIZE: usize = 1 + PUBLIC_KEY_LENGTH + 4 + HASH_LENGTH + 8 + 4;
const PAY_CHAIN_FIXED_SIZE: usize = 1 + PUBLIC_KEY_LENGTH + 4 + 3 * HASH_LENGTH + 4;
const MARKER_SIZE: usize = 2;

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// Raw 32-byte public key of a credit holder.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub const fn new(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| LedgerError::InvalidHex(e.to_string()))?;
        let array: [u8; PUBLIC_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
            LedgerError::InvalidHex(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

fn read_public_key(reader: &mut Reader<'_>) -> Result<PublicKey> {
    let bytes = reader.read_bytes(PUBLIC_KEY_LENGTH)?;
    let mut array = [0u8; PUBLIC_KEY_LENGTH];
    array.copy_from_slice(bytes);
    Ok(PublicKey(array))
}

// ---------------------------------------------------------------------------
// CreditEntry
// ---------------------------------------------------------------------------

/// One operation in an entry-credit block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CreditEntry {
    /// Credits bought by `public_key`, funded by an external transaction.
    Buy {
        public_key: PublicKey,
        credits: u32,
        funding_tx_hash: Digest,
    },
    /// Credits spent to reveal one entry.
    PayEntry {
        public_key: PublicKey,
        credits: u32,
        entry_hash: Digest,
        timestamp: i64,
        #[serde(with = "hex_bytes")]
        signature: Vec<u8>,
    },
    /// Credits spent to create a chain with its first entry.
    PayChain {
        public_key: PublicKey,
        credits: u32,
        entry_hash: Digest,
        chain_id_hash: Digest,
        entry_chain_id_hash: Digest,
        #[serde(with = "hex_bytes")]
        signature: Vec<u8>,
    },
    /// Index of the server that built the block.
    ServerIndex { index: u8 },
    /// End of a minute within the directory height.
    EndOfMinute { minute: u8 },
}

impl CreditEntry {
    pub fn tag(&self) -> u8 {
        match self {
            CreditEntry::Buy { .. } => TAG_BUY,
            CreditEntry::PayEntry { .. } => TAG_PAY_ENTRY,
            CreditEntry::PayChain { .. } => TAG_PAY_CHAIN,
            CreditEntry::ServerIndex { .. } => TAG_SERVER_INDEX,
            CreditEntry::EndOfMinute { .. } => TAG_END_OF_MINUTE,
        }
    }

    /// Whether the entry is a bookkeeping marker rather than a credit
    /// movement.
    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            CreditEntry::ServerIndex { .. } | CreditEntry::EndOfMinute { .. }
        )
    }

    /// Signed change this entry applies to its holder's balance.
    pub fn balance_delta(&self) -> Option<(PublicKey, i64)> {
        match self {
            CreditEntry::Buy {
                public_key,
                credits,
                ..
            } => Some((*public_key, i64::from(*credits))),
            CreditEntry::PayEntry {
                public_key,
                credits,
                ..
            }
            | CreditEntry::PayChain {
                public_key,
                credits,
                ..
            } => Some((*public_key, -i64::from(*credits))),
            CreditEntry::ServerIndex { .. } | CreditEntry::EndOfMinute { .. } => None,
        }
    }

    /// Identity digest: SHA-256 of the encoding.
    pub fn hash(&self) -> Digest {
        sha256(&self.encode())
    }
}

/// Sum balance deltas per public key.
pub fn tally_balances<'a, I>(entries: I) -> HashMap<PublicKey, i64>
where
    I: IntoIterator<Item = &'a CreditEntry>,
{
    let mut balances = HashMap::new();
    for (key, delta) in entries.into_iter().filter_map(CreditEntry::balance_delta) {
        *balances.entry(key).or_insert(0) += delta;
    }
    balances
}

fn put_signature(buf: &mut Vec<u8>, signature: &[u8]) {
    buf.put_u32(signature.len() as u32);
    buf.put_slice(signature);
}

fn read_signature(reader: &mut Reader<'_>) -> Result<Vec<u8>> {
    let len = reader.read_u32()? as usize;
    Ok(reader.read_bytes(len)?.to_vec())
}

impl BinaryCodec for CreditEntry {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.tag());
        match self {
            CreditEntry::Buy {
                public_key,
                credits,
                funding_tx_hash,
            } => {
                buf.put_slice(public_key.as_bytes());
                buf.put_u32(*credits);
                buf.put_slice(funding_tx_hash.as_bytes());
            }
            CreditEntry::PayEntry {
                public_key,
                credits,
                entry_hash,
                timestamp,
                signature,
            } => {
                buf.put_slice(public_key.as_bytes());
                buf.put_u32(*credits);
                buf.put_slice(entry_hash.as_bytes());
                buf.put_i64(*timestamp);
                put_signature(buf, signature);
            }
            CreditEntry::PayChain {
                public_key,
                credits,
                entry_hash,
                chain_id_hash,
                entry_chain_id_hash,
                signature,
            } => {
                buf.put_slice(public_key.as_bytes());
                buf.put_u32(*credits);
                buf.put_slice(entry_hash.as_bytes());
                buf.put_slice(chain_id_hash.as_bytes());
                buf.put_slice(entry_chain_id_hash.as_bytes());
                put_signature(buf, signature);
            }
            CreditEntry::ServerIndex { index } => buf.put_u8(*index),
            CreditEntry::EndOfMinute { minute } => buf.put_u8(*minute),
        }
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        let mut reader = Reader::new(input);
        let entry = match reader.read_u8()? {
            TAG_BUY => CreditEntry::Buy {
                public_key: read_public_key(&mut reader)?,
                credits: reader.read_u32()?,
                funding_tx_hash: reader.read_digest()?,
            },
            TAG_PAY_ENTRY => CreditEntry::PayEntry {
                public_key: read_public_key(&mut reader)?,
                credits: reader.read_u32()?,
                entry_hash: reader.read_digest()?,
                timestamp: reader.read_i64()?,
                signature: read_signature(&mut reader)?,
            },
            TAG_PAY_CHAIN => CreditEntry::PayChain {
                public_key: read_public_key(&mut reader)?,
                credits: reader.read_u32()?,
                entry_hash: reader.read_digest()?,
                chain_id_hash: reader.read_digest()?,
                entry_chain_id_hash: reader.read_digest()?,
                signature: read_signature(&mut reader)?,
            },
            TAG_SERVER_INDEX => CreditEntry::ServerIndex {
                index: reader.read_u8()?,
            },
            TAG_END_OF_MINUTE => CreditEntry::EndOfMinute {
                minute: reader.read_u8()?,
            },
            unknown => return Err(LedgerError::UnknownEntryType(unknown)),
        };
        Ok((entry, reader.into_rest()))
    }

    fn encoded_size(&self) -> usize {
        match self {
            CreditEntry::Buy { .. } => BUY_SIZE,
            CreditEntry::PayEntry { signature, .. } => PAY_ENTRY_FIXED_SIZE + signature.len(),
            CreditEntry::PayChain { signature, .. } => PAY_CHAIN_FIXED_SIZE + signature.len(),
            CreditEntry::ServerIndex { .. } | CreditEntry::EndOfMinute { .. } => MARKER_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn key(n: u8) -> PublicKey {
        PublicKey::new([n; 32])
    }

    fn samples() -> Vec<CreditEntry> {
        vec![
            CreditEntry::Buy {
                public_key: key(1),
                credits: 100,
                funding_tx_hash: Digest::new([2; 32]),
            },
            CreditEntry::PayEntry {
                public_key: key(3),
                credits: 1,
                entry_hash: Digest::new([4; 32]),
                timestamp: -1_234_567,
                signature: vec![0xAA; 64],
            },
            CreditEntry::PayChain {
                public_key: key(5),
                credits: 10,
                entry_hash: Digest::new([6; 32]),
                chain_id_hash: Digest::new([7; 32]),
                entry_chain_id_hash: Digest::new([8; 32]),
                signature: vec![0xBB; 64],
            },
            CreditEntry::ServerIndex { index: 3 },
            CreditEntry::EndOfMinute { minute: 9 },
        ]
    }

    fn zeroed() -> Vec<CreditEntry> {
        vec![
            CreditEntry::Buy {
                public_key: PublicKey::default(),
                credits: 0,
                funding_tx_hash: Digest::ZERO,
            },
            CreditEntry::PayEntry {
                public_key: PublicKey::default(),
                credits: 0,
                entry_hash: Digest::ZERO,
                timestamp: 0,
                signature: vec![],
            },
            CreditEntry::PayChain {
                public_key: PublicKey::default(),
                credits: 0,
                entry_hash: Digest::ZERO,
                chain_id_hash: Digest::ZERO,
                entry_chain_id_hash: Digest::ZERO,
                signature: vec![],
            },
            CreditEntry::ServerIndex { index: 0 },
            CreditEntry::EndOfMinute { minute: 0 },
        ]
    }

    #[test]
    fn every_variant_round_trips() {
        for entry in samples().into_iter().chain(zeroed()) {
            let bytes = entry.encode();
            let (decoded, rest) = CreditEntry::decode(&bytes).unwrap();
            assert!(rest.is_empty());
            assert_eq!(decoded, entry);
        }
    }

    #[test]
    fn encoded_size_matches_encoding() {
        for entry in samples().into_iter().chain(zeroed()) {
            assert_eq!(entry.encoded_size(), entry.encode().len(), "{entry:?}");
        }
    }

    #[test]
    fn tag_leads_the_encoding() {
        let tags: Vec<u8> = samples().iter().map(|e| e.encode()[0]).collect();
        assert_eq!(
            tags,
            vec![TAG_BUY, TAG_PAY_ENTRY, TAG_PAY_CHAIN, TAG_SERVER_INDEX, TAG_END_OF_MINUTE]
        );
    }

    #[test]
    fn buy_layout_matches_table() {
        let bytes = samples()[0].encode();
        assert_eq!(bytes.len(), 69);
        assert_eq!(&bytes[1..33], &[1u8; 32]);
        assert_eq!(&bytes[33..37], &100u32.to_be_bytes());
        assert_eq!(&bytes[37..], &[2u8; 32]);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        for tag in [5u8, 0x7F, 0xFF] {
            assert_eq!(
                CreditEntry::decode(&[tag, 0, 0]).unwrap_err(),
                LedgerError::UnknownEntryType(tag)
            );
        }
    }

    #[test]
    fn oversized_signature_length_is_truncated_input() {
        let mut bytes = samples()[1].encode();
        // Declared signature length sits right before the 64 signature bytes.
        let len_at = bytes.len() - 64 - 4;
        bytes[len_at..len_at + 4].copy_from_slice(&1_000u32.to_be_bytes());
        assert_eq!(
            CreditEntry::decode(&bytes).unwrap_err(),
            LedgerError::TruncatedInput {
                needed: 1_000,
                remaining: 64
            }
        );

        bytes[len_at..len_at + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            CreditEntry::decode(&bytes),
            Err(LedgerError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn random_truncations_never_panic() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xC0FFEE);
        for entry in samples() {
            let bytes = entry.encode();
            for _ in 0..32 {
                let cut = rng.gen_range(0..bytes.len());
                assert!(matches!(
                    CreditEntry::decode(&bytes[..cut]),
                    Err(LedgerError::TruncatedInput { .. })
                ));
            }
        }
    }

    #[test]
    fn decode_leaves_following_entries() {
        let mut bytes = Vec::new();
        for entry in samples() {
            entry.encode_into(&mut bytes);
        }
        let mut rest = bytes.as_slice();
        let mut decoded = Vec::new();
        while !rest.is_empty() {
            let (entry, tail) = CreditEntry::decode(rest).unwrap();
            decoded.push(entry);
            rest = tail;
        }
        assert_eq!(decoded, samples());
    }

    #[test]
    fn balances_add_buys_and_subtract_payments() {
        let entries = vec![
            CreditEntry::Buy {
                public_key: key(1),
                credits: 50,
                funding_tx_hash: Digest::ZERO,
            },
            CreditEntry::PayEntry {
                public_key: key(1),
                credits: 2,
                entry_hash: Digest::ZERO,
                timestamp: 0,
                signature: vec![],
            },
            CreditEntry::PayChain {
                public_key: key(1),
                credits: 10,
                entry_hash: Digest::ZERO,
                chain_id_hash: Digest::ZERO,
                entry_chain_id_hash: Digest::ZERO,
                signature: vec![],
            },
            CreditEntry::EndOfMinute { minute: 1 },
            CreditEntry::Buy {
                public_key: key(2),
                credits: 7,
                funding_tx_hash: Digest::ZERO,
            },
        ];
        let balances = tally_balances(&entries);
        assert_eq!(balances[&key(1)], 38);
        assert_eq!(balances[&key(2)], 7);
        assert_eq!(balances.len(), 2);
    }

    #[test]
    fn json_is_tagged_by_variant() {
        let json = serde_json::to_value(&samples()[1]).unwrap();
        assert_eq!(json["type"], "pay_entry");
        assert_eq!(json["public_key"], key(3).to_hex());
        assert_eq!(json["signature"], hex::encode([0xAA; 64]));

        let marker = serde_json::to_value(CreditEntry::EndOfMinute { minute: 4 }).unwrap();
        assert_eq!(marker, serde_json::json!({ "type": "end_of_minute", "minute": 4 }));
    }

    #[test]
    fn public_key_hex_round_trip() {
        let parsed: PublicKey = key(9).to_hex().parse().unwrap();
        assert_eq!(parsed, key(9));
        assert!(PublicKey::from_hex("00").is_err());
    }
}
