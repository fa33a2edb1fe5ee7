//! # Storage Module
//!
//! Persistence for sealed ledger heights. The core never writes partially:
//! a height is sealed in memory first and then handed to the store as one
//! batch.
//!
//! ## Architecture
//!
//! ```text
//! kv.rs     — KeyValueStore trait, WriteBatch, MemoryStore, StoreError
//! db.rs     — SledStore, the on-disk KeyValueStore
//! blocks.rs — BlockStore: table-tagged keys, typed puts and fetches
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! Ledger::close_directory_block → SealedHeight → BlockStore::put_sealed_height
//!                                                        ↓
//!                                              KeyValueStore::write_batch
//!
//! BlockStore::fetch_all_* → Ledger::restore → ChainState::archive
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Binary codec on disk.** Stored values are exactly the wire
//!    encodings, so a block's identity hash can be recomputed from what was
//!    read back.
//!
//! 2. **One keyspace, tagged tables.** Every key starts with a table tag from
//!    [`crate::config`]; range scans over a tag enumerate a table.

pub mod blocks;
pub mod db;
pub mod kv;

pub use blocks::BlockStore;
pub use db::SledStore;
pub use kv::{KeyValueStore, MemoryStore, StoreError, StoreResult, WriteBatch};
