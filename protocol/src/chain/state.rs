//! Per-chain state: the archive of sealed blocks and the one block under
//! construction.
//!
//! ## Locking
//!
//! - `open` (a `parking_lot::Mutex`) guards the block under construction and
//!   `next_block_height`. Every append, seal, and archive on this chain goes
//!   through it, so two chains never contend with each other.
//! - `blocks` (a `parking_lot::RwLock`) guards the height-indexed archive.
//!   Archived blocks are `Arc`-shared and immutable; readers clone the `Arc`
//!   and drop the lock immediately.
//!
//! When both are needed the order is always `open` then `blocks`.
//!
//! ## Height
//!
//! `next_block_height` equals the number of archived blocks. It moves only
//! when a sealed block lands in the archive.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::block::credit::CreditEntry;
use crate::block::directory::{DirectoryBlock, DirectoryBlockEntry};
use crate::block::{create_block, BlockContext, ChainBlock, Entry, EntryBlock, EntryCreditBlock};
use crate::config::DEFAULT_CHAIN_ARCHIVE_CAPACITY;
use crate::crypto::hash::Digest;
use crate::error::{LedgerError, Result};

/// The directory chain: one block per global height.
pub type DirectoryChain = ChainState<DirectoryBlock>;

/// A user-created entry chain.
pub type EntryChain = ChainState<EntryBlock>;

/// The entry-credit chain: one block per global height.
pub type EntryCreditChain = ChainState<EntryCreditBlock>;

struct OpenSlot<B> {
    next_block: Option<B>,
    next_block_height: u32,
}

/// One chain's sealed history plus its block under construction.
pub struct ChainState<B: ChainBlock> {
    chain_id: Digest,
    open: Mutex<OpenSlot<B>>,
    blocks: RwLock<Vec<Arc<B>>>,
}

impl<B: ChainBlock> std::fmt::Debug for ChainState<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainState")
            .field("chain_id", &self.chain_id)
            .field("next_block_height", &self.next_block_height())
            .field("has_open_block", &self.has_open_block())
            .finish()
    }
}

impl<B: ChainBlock> ChainState<B> {
    /// An empty chain: no archive, no open block, next height 0.
    pub fn new(chain_id: Digest) -> Self {
        Self {
            chain_id,
            open: Mutex::new(OpenSlot {
                next_block: None,
                next_block_height: 0,
            }),
            blocks: RwLock::new(Vec::with_capacity(DEFAULT_CHAIN_ARCHIVE_CAPACITY)),
        }
    }

    pub fn chain_id(&self) -> Digest {
        self.chain_id
    }

    /// Height the next sealed block will occupy.
    pub fn next_block_height(&self) -> u32 {
        self.open.lock().next_block_height
    }

    pub fn has_open_block(&self) -> bool {
        self.open.lock().next_block.is_some()
    }

    // -- Archive readers ----------------------------------------------------

    /// Sealed block at `height`, if archived.
    pub fn block(&self, height: u32) -> Option<Arc<B>> {
        self.blocks.read().get(height as usize).cloned()
    }

    /// Most recently archived block.
    pub fn tip(&self) -> Option<Arc<B>> {
        self.blocks.read().last().cloned()
    }

    /// Snapshot of the whole archive, ordered by height.
    pub fn blocks(&self) -> Vec<Arc<B>> {
        self.blocks.read().clone()
    }

    /// Number of archived blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    // -- Block lifecycle ----------------------------------------------------

    /// Build a block for this chain's next height on top of `previous`.
    ///
    /// The block is returned, not installed; see [`ChainState::open_block`].
    pub fn create_block(
        &self,
        previous: Option<&B>,
        ctx: &BlockContext,
        capacity_hint: usize,
    ) -> Result<B> {
        create_block(
            self.chain_id,
            self.next_block_height(),
            previous,
            ctx,
            capacity_hint,
        )
    }

    /// Install `block` as the block under construction.
    pub fn open_block(&self, block: B) -> Result<()> {
        let mut slot = self.open.lock();
        if slot.next_block.is_some() {
            return Err(LedgerError::InvalidChainTransition(format!(
                "chain {} already has an open block",
                self.chain_id
            )));
        }
        if block.is_sealed() {
            return Err(LedgerError::BlockSealed);
        }
        self.check_identity(&block, slot.next_block_height)?;
        slot.next_block = Some(block);
        Ok(())
    }

    /// Create a block on top of the current tip and open it, in one step.
    pub fn start_next_block(&self, ctx: &BlockContext, capacity_hint: usize) -> Result<()> {
        let mut slot = self.open.lock();
        if slot.next_block.is_some() {
            return Err(LedgerError::InvalidChainTransition(format!(
                "chain {} already has an open block",
                self.chain_id
            )));
        }
        let block = self.build_on_tip(slot.next_block_height, ctx, capacity_hint)?;
        slot.next_block = Some(block);
        Ok(())
    }

    /// Run `f` against the block under construction.
    pub fn with_open_block<R>(&self, f: impl FnOnce(&mut B) -> Result<R>) -> Result<R> {
        let mut slot = self.open.lock();
        let block = slot.next_block.as_mut().ok_or(LedgerError::NoOpenBlock)?;
        f(block)
    }

    /// Like [`ChainState::with_open_block`], but opens a block first when
    /// there is none.
    pub fn with_open_block_or_start<R>(
        &self,
        ctx: &BlockContext,
        capacity_hint: usize,
        f: impl FnOnce(&mut B) -> Result<R>,
    ) -> Result<R> {
        let mut slot = self.open.lock();
        if slot.next_block.is_none() {
            let block = self.build_on_tip(slot.next_block_height, ctx, capacity_hint)?;
            slot.next_block = Some(block);
        }
        match slot.next_block.as_mut() {
            Some(block) => f(block),
            None => Err(LedgerError::NoOpenBlock),
        }
    }

    /// Read-only view of the block under construction.
    pub fn peek_open<R>(&self, f: impl FnOnce(&B) -> R) -> Option<R> {
        self.open.lock().next_block.as_ref().map(f)
    }

    /// Seal the block under construction, archive it, and advance the
    /// height.
    pub fn seal_open_block(&self) -> Result<Arc<B>> {
        let mut slot = self.open.lock();
        let mut block = slot.next_block.take().ok_or(LedgerError::NoOpenBlock)?;
        if let Err(err) = block.seal() {
            slot.next_block = Some(block);
            return Err(err);
        }

        let block = Arc::new(block);
        self.blocks.write().push(Arc::clone(&block));
        slot.next_block_height += 1;
        info!(
            chain = %self.chain_id,
            height = block.height(),
            hash = %block.hash(),
            "block archived"
        );
        Ok(block)
    }

    /// Append an already sealed block, typically one read back from storage.
    ///
    /// The block must sit at `next_block_height` and link to the current tip
    /// by both identity hash and key-Merkle-root.
    pub fn archive(&self, block: B) -> Result<Arc<B>> {
        let mut slot = self.open.lock();
        if slot.next_block.is_some() {
            return Err(LedgerError::InvalidChainTransition(
                "cannot archive while a block is open".to_string(),
            ));
        }
        if !block.is_sealed() {
            return Err(LedgerError::BlockNotSealed);
        }
        self.check_identity(&block, slot.next_block_height)?;

        let mut blocks = self.blocks.write();
        let (prev_hash, prev_key_mr) = blocks
            .last()
            .map_or((Digest::ZERO, Digest::ZERO), |tip| {
                (tip.hash(), tip.key_merkle_root())
            });
        if block.prev_hash() != prev_hash || block.prev_key_merkle_root() != prev_key_mr {
            warn!(
                chain = %self.chain_id,
                height = block.height(),
                "rejected block that does not link to the tip"
            );
            return Err(LedgerError::InvalidChainTransition(format!(
                "block at height {} does not link to the chain tip",
                block.height()
            )));
        }

        let block = Arc::new(block);
        blocks.push(Arc::clone(&block));
        slot.next_block_height += 1;
        debug!(chain = %self.chain_id, height = block.height(), "block restored");
        Ok(block)
    }

    fn build_on_tip(&self, height: u32, ctx: &BlockContext, capacity_hint: usize) -> Result<B> {
        let tip = self.tip();
        create_block(self.chain_id, height, tip.as_deref(), ctx, capacity_hint)
    }

    fn check_identity(&self, block: &B, expected_height: u32) -> Result<()> {
        if block.chain_id() != self.chain_id {
            return Err(LedgerError::InvalidChainTransition(format!(
                "block belongs to chain {}, not {}",
                block.chain_id(),
                self.chain_id
            )));
        }
        if block.height() != expected_height {
            return Err(LedgerError::InvalidChainTransition(format!(
                "block height {} does not match next height {}",
                block.height(),
                expected_height
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Typed conveniences
// ---------------------------------------------------------------------------

impl ChainState<EntryBlock> {
    /// Append an entry's digest to the open entry block.
    pub fn add_entry(&self, entry: &Entry) -> Result<Digest> {
        self.with_open_block(|block| block.append(entry))
    }

    pub fn add_end_of_minute_marker(&self, minute: u8) -> Result<Digest> {
        self.with_open_block(|block| block.append_end_of_minute_marker(minute))
    }
}

impl ChainState<EntryCreditBlock> {
    pub fn add_credit_entry(&self, entry: CreditEntry) -> Result<()> {
        self.with_open_block(|block| block.add_credit_entry(entry))
    }

    pub fn add_end_of_minute_marker(&self, minute: u8) -> Result<()> {
        self.with_open_block(|block| block.add_end_of_minute_marker(minute))
    }

    pub fn add_server_index_entry(&self, index: u8) -> Result<()> {
        self.with_open_block(|block| block.add_server_index_entry(index))
    }
}

impl ChainState<DirectoryBlock> {
    pub fn add_entry(&self, entry: DirectoryBlockEntry) -> Result<()> {
        self.with_open_block(|block| block.add_entry(entry))
    }

    pub fn add_entry_block_root(&self, entry_block: &EntryBlock) -> Result<()> {
        self.with_open_block(|block| block.add_entry_block_root(entry_block))
    }

    pub fn add_entry_credit_block_root(&self, credit_block: &EntryCreditBlock) -> Result<()> {
        self.with_open_block(|block| block.add_entry_credit_block_root(credit_block))
    }

    pub fn add_factoid_root(&self, merkle_root: Digest) -> Result<()> {
        self.with_open_block(|block| block.add_factoid_root(merkle_root))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
