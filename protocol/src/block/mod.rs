//! # Block Formats
//!
//! The three kinds of block the ledger chains together, plus the entries
//! they carry.
//!
//! ```text
//! entry.rs        — Entry, the leaf record of a user chain
//! entry_block.rs  — EntryBlock: entry digests for one chain at one height
//! credit.rs       — CreditEntry, the tagged union of credit operations
//! credit_block.rs — EntryCreditBlock: credit entries for one height
//! directory.rs    — DirectoryBlock: (chain id, root) pairs for one height
//! ```
//!
//! ## Lifecycle
//!
//! Every block is born open through [`create_block`], accepts appends while
//! open, and is sealed exactly once. Sealing fixes the body root, the
//! key-Merkle-root, and the identity hash (`SHA256(encode(block))`). After
//! that the block only moves between threads behind an `Arc`.
//!
//! A block decoded from bytes is already sealed: its identity hash is the
//! SHA-256 of the bytes it was decoded from.

pub mod credit;
pub mod credit_block;
pub mod directory;
pub mod entry;
pub mod entry_block;

pub use credit::{CreditEntry, PublicKey};
pub use credit_block::{EntryCreditBlock, EntryCreditBlockHeader};
pub use directory::{DirectoryBlock, DirectoryBlockEntry, DirectoryBlockHeader};
pub use entry::{chain_id_from_name, Entry};
pub use entry_block::{EntryBlock, EntryBlockHeader};

use crate::codec::BinaryCodec;
use crate::crypto::hash::Digest;
use crate::error::{LedgerError, Result};

/// Height-wide values stamped into a block when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockContext {
    /// Network the directory block belongs to.
    pub network_id: u32,
    /// Directory height the block is being built for.
    pub directory_height: u32,
    /// Unix seconds at which the height started.
    pub start_time: u64,
}

impl BlockContext {
    pub fn new(network_id: u32, directory_height: u32, start_time: u64) -> Self {
        Self {
            network_id,
            directory_height,
            start_time,
        }
    }

    /// Same context, moved to another directory height.
    pub fn at_height(self, directory_height: u32) -> Self {
        Self {
            directory_height,
            ..self
        }
    }
}

/// Behaviour shared by directory, entry, and entry-credit blocks, as seen by
/// chain state.
pub trait ChainBlock: BinaryCodec + Send + Sync + Sized {
    /// Build an open block at `height` whose header links to `previous`.
    ///
    /// Callers go through [`create_block`], which enforces the genesis rule
    /// first.
    fn open(
        chain_id: Digest,
        height: u32,
        previous: Option<&Self>,
        ctx: &BlockContext,
        capacity_hint: usize,
    ) -> Self;

    /// Chain the block belongs to.
    fn chain_id(&self) -> Digest;

    /// Height of the block within its own chain.
    fn height(&self) -> u32;

    /// Identity hash of the predecessor (zero at genesis).
    fn prev_hash(&self) -> Digest;

    /// Key-Merkle-root of the predecessor (zero at genesis).
    fn prev_key_merkle_root(&self) -> Digest;

    fn is_sealed(&self) -> bool;

    /// Compute the roots and freeze the block. A second call fails with
    /// [`LedgerError::BlockSealed`].
    fn seal(&mut self) -> Result<()>;

    /// Identity hash. Cached once sealed, computed from the current
    /// encoding before that.
    fn hash(&self) -> Digest;

    /// Key-Merkle-root. Cached once sealed, computed from the current
    /// header before that.
    fn key_merkle_root(&self) -> Digest;
}

/// Create a new open block for a chain whose next height is
/// `next_block_height`.
///
/// The genesis rule: height 0 takes no predecessor, every other height
/// requires one.
pub fn create_block<B: ChainBlock>(
    chain_id: Digest,
    next_block_height: u32,
    previous: Option<&B>,
    ctx: &BlockContext,
    capacity_hint: usize,
) -> Result<B> {
    match (previous, next_block_height) {
        (None, height) if height != 0 => Err(LedgerError::InvalidChainTransition(format!(
            "previous block cannot be absent at height {height}"
        ))),
        (Some(_), 0) => Err(LedgerError::InvalidChainTransition(
            "genesis block cannot have a parent block".to_string(),
        )),
        _ => Ok(B::open(
            chain_id,
            next_block_height,
            previous,
            ctx,
            capacity_hint,
        )),
    }
}

/// Reject appends to a sealed block.
pub(crate) fn ensure_open(sealed: bool) -> Result<()> {
    if sealed {
        Err(LedgerError::BlockSealed)
    } else {
        Ok(())
    }
}

/// Entry counts are written as `u32`.
pub(crate) fn ensure_room(len: usize, field: &'static str) -> Result<()> {
    if len >= u32::MAX as usize {
        return Err(LedgerError::PayloadTooLarge {
            field,
            size: len + 1,
            max: u32::MAX as usize,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
