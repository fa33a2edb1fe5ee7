// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Meridian Protocol — Ledger Core
//!
//! Meridian records arbitrary data in many independent user chains and
//! stitches them together, height by height, under a single directory chain.
//! Writing costs entry credits, which are tracked in a chain of their own.
//!
//! ## Architecture
//!
//! - **crypto** — SHA-256 digests and the Merkle builder.
//! - **codec** — The one binary layout every block and entry has.
//! - **block** — Entries, entry blocks, credit entries and blocks, directory
//!   blocks. How they open, fill, and seal.
//! - **chain** — Per-chain state and the ledger that closes heights.
//! - **storage** — Key-value persistence for sealed heights.
//! - **config** — Protocol constants and network parameters.
//!
//! ## Hash chaining
//!
//! Every block commits to its predecessor twice: by identity hash
//! (`SHA256(encode(block))`) and by key-Merkle-root (the Merkle root of the
//! header hash and the body root). A directory block commits to every child
//! block sealed at its height, so one directory key-Merkle-root pins down
//! the whole ledger up to that height.
//!
//! ## Design Philosophy
//!
//! 1. Decoding never panics. Short input is an error.
//! 2. Sealing is one-way. A sealed block is shared behind `Arc` and never
//!    touched again.
//! 3. One lock per chain. Unrelated chains do not wait on each other.

pub mod block;
pub mod chain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod storage;

pub use block::{
    create_block, BlockContext, ChainBlock, CreditEntry, DirectoryBlock, Entry, EntryBlock,
    EntryCreditBlock, PublicKey,
};
pub use chain::{ChainState, Ledger, SealedHeight};
pub use codec::BinaryCodec;
pub use crypto::hash::Digest;
pub use error::{LedgerError, Result};
pub use storage::{BlockStore, KeyValueStore, MemoryStore, SledStore, StoreError};
