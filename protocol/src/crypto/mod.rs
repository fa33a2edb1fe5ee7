//! # Cryptographic Primitives
//!
//! The ledger needs exactly one hash function, SHA-256, and one structure
//! built on it, the Merkle tree. Both are fixed by the wire format: a node
//! that hashes differently forks itself off the network.
//!
//! - [`hash`] — the [`Digest`] type, SHA-256 helpers, and hex serde glue.
//! - [`merkle`] — the Merkle builder and key-Merkle-root.

pub mod hash;
pub mod merkle;

pub use hash::{digest_of, is_same_as, sha256, sha256_multi, Digest};
pub use merkle::{key_merkle_root, merkle_root, MerkleTree};
