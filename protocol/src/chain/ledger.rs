//! # Ledger
//!
//! Coordinates the directory chain, the entry-credit chain, and every user
//! entry chain through one directory height at a time.
//!
//! ## Height lifecycle
//!
//! ```text
//!   open height h
//!     directory block h   slot 0 = entry-credit placeholder
//!                         slot 1 = factoid placeholder
//!     credit block h      [ServerIndex]
//!        │
//!        │  submit_entry / create_chain   → entry block of that chain
//!        │  submit_credit_entry           → credit block
//!        │  end_of_minute(m)              → credit block + open entry blocks
//!        ▼
//!   close_directory_block
//!     seal entry blocks (chain id order) → directory slots 2..
//!     seal credit block                  → directory slot 0
//!     seal directory block
//!     open height h + 1
//! ```
//!
//! ## Concurrency
//!
//! Submissions take the height gate for reading, so any number run at once;
//! each is serialized only by its own chain's lock. Closing takes the gate for
//! writing and therefore sees no half-applied submission.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::state::{DirectoryChain, EntryChain, EntryCreditChain};
use crate::block::credit::PublicKey;
use crate::block::{
    BlockContext, ChainBlock, CreditEntry, DirectoryBlock, Entry, EntryBlock, EntryCreditBlock,
};
use crate::config::{
    DEFAULT_CREDIT_BLOCK_CAPACITY, DEFAULT_DIRECTORY_BLOCK_CAPACITY, DEFAULT_ENTRY_BLOCK_CAPACITY,
    DIRECTORY_CHAIN_ID, ENTRY_CREDIT_CHAIN_ID, FACTOID_CHAIN_ID,
};
use crate::crypto::hash::Digest;
use crate::error::{LedgerError, Result};
use crate::storage::{BlockStore, KeyValueStore, StoreError, StoreResult};

/// Everything sealed when one directory height closed.
#[derive(Debug, Clone)]
pub struct SealedHeight {
    pub directory: Arc<DirectoryBlock>,
    pub credit: Arc<EntryCreditBlock>,
    /// In the order their roots were registered in the directory block.
    pub entry_blocks: Vec<Arc<EntryBlock>>,
    /// Raw entries revealed during the height, in submission order.
    pub entries: Vec<Entry>,
}

impl SealedHeight {
    pub fn height(&self) -> u32 {
        self.directory.height()
    }
}

/// The ledger of one server.
pub struct Ledger {
    network_id: u32,
    server_index: u8,
    directory: DirectoryChain,
    credits: EntryCreditChain,
    entry_chains: DashMap<Digest, Arc<EntryChain>>,
    pending_entries: Mutex<Vec<Entry>>,
    balances: RwLock<HashMap<PublicKey, i64>>,
    context: RwLock<BlockContext>,
    gate: RwLock<()>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("network_id", &format_args!("{:#010x}", self.network_id))
            .field("server_index", &self.server_index)
            .field("height", &self.height())
            .field("entry_chains", &self.entry_chains.len())
            .finish()
    }
}

fn now_unix_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

impl Ledger {
    fn empty(network_id: u32, server_index: u8) -> Self {
        Self {
            network_id,
            server_index,
            directory: DirectoryChain::new(Digest::new(DIRECTORY_CHAIN_ID)),
            credits: EntryCreditChain::new(Digest::new(ENTRY_CREDIT_CHAIN_ID)),
            entry_chains: DashMap::new(),
            pending_entries: Mutex::new(Vec::new()),
            balances: RwLock::new(HashMap::new()),
            context: RwLock::new(BlockContext::new(network_id, 0, 0)),
            gate: RwLock::new(()),
        }
    }

    /// A fresh ledger with genesis directory and credit blocks open.
    pub fn new(network_id: u32, server_index: u8) -> Result<Self> {
        let ledger = Self::empty(network_id, server_index);
        ledger.open_height(0)?;
        info!(
            network_id = format_args!("{network_id:#010x}"),
            server_index, "ledger created at genesis"
        );
        Ok(ledger)
    }

    /// Rebuild a ledger from persisted blocks and open the next height.
    pub fn restore<S: KeyValueStore>(
        network_id: u32,
        server_index: u8,
        store: &BlockStore<S>,
    ) -> StoreResult<Self> {
        let ledger = Self::empty(network_id, server_index);

        for block in store.fetch_all_directory_blocks()? {
            if block.header().network_id != network_id {
                return Err(StoreError::Corrupt(format!(
                    "directory block {} belongs to network {:#010x}",
                    block.height(),
                    block.header().network_id
                )));
            }
            ledger.directory.archive(block)?;
        }

        {
            let mut balances = ledger.balances.write();
            for block in store.fetch_all_credit_blocks()? {
                let archived = ledger.credits.archive(block)?;
                for (key, delta) in archived.balance_deltas() {
                    *balances.entry(key).or_insert(0) += delta;
                }
            }
        }

        for block in store.fetch_all_entry_blocks()? {
            let chain_id = block.chain_id();
            let chain = Arc::clone(
                ledger
                    .entry_chains
                    .entry(chain_id)
                    .or_insert_with(|| Arc::new(EntryChain::new(chain_id)))
                    .value(),
            );
            chain.archive(block)?;
        }

        let height = ledger.directory.next_block_height();
        if ledger.credits.next_block_height() != height {
            return Err(StoreError::Corrupt(format!(
                "credit chain has {} blocks but directory chain has {}",
                ledger.credits.next_block_height(),
                height
            )));
        }

        ledger.open_height(height)?;
        info!(
            height,
            entry_chains = ledger.entry_chains.len(),
            "ledger restored"
        );
        Ok(ledger)
    }

    /// Open the directory and credit blocks for `height`.
    fn open_height(&self, height: u32) -> Result<()> {
        let ctx = BlockContext::new(self.network_id, height, now_unix_secs());
        *self.context.write() = ctx;

        self.directory
            .start_next_block(&ctx, DEFAULT_DIRECTORY_BLOCK_CAPACITY)?;
        self.directory
            .with_open_block(|block| block.reserve_well_known_slots())?;

        self.credits
            .start_next_block(&ctx, DEFAULT_CREDIT_BLOCK_CAPACITY)?;
        self.credits.add_server_index_entry(self.server_index)?;
        debug!(height, "height opened");
        Ok(())
    }

    // -- Readers ------------------------------------------------------------

    pub fn network_id(&self) -> u32 {
        self.network_id
    }

    pub fn server_index(&self) -> u8 {
        self.server_index
    }

    /// Directory height currently being built.
    pub fn height(&self) -> u32 {
        self.directory.next_block_height()
    }

    pub fn directory(&self) -> &DirectoryChain {
        &self.directory
    }

    pub fn credits(&self) -> &EntryCreditChain {
        &self.credits
    }

    pub fn entry_chain(&self, chain_id: &Digest) -> Option<Arc<EntryChain>> {
        self.entry_chains.get(chain_id).map(|c| Arc::clone(c.value()))
    }

    /// Ids of every entry chain, sorted.
    pub fn chain_ids(&self) -> Vec<Digest> {
        let mut ids: Vec<Digest> = self.entry_chains.iter().map(|c| *c.key()).collect();
        ids.sort();
        ids
    }

    pub fn entry_chain_count(&self) -> usize {
        self.entry_chains.len()
    }

    /// Net credits of `public_key` over every archived credit block.
    pub fn credit_balance(&self, public_key: &PublicKey) -> i64 {
        self.balances.read().get(public_key).copied().unwrap_or(0)
    }

    // -- Submissions --------------------------------------------------------

    /// Create an entry chain whose first entry is `first_entry`. The chain id
    /// is the entry's chain id. The well-known chain ids already exist.
    pub fn create_chain(&self, first_entry: Entry) -> Result<Digest> {
        let _gate = self.gate.read();
        let chain_id = *first_entry.chain_id();
        if [DIRECTORY_CHAIN_ID, ENTRY_CREDIT_CHAIN_ID, FACTOID_CHAIN_ID]
            .iter()
            .any(|id| chain_id.as_bytes() == id)
        {
            return Err(LedgerError::ChainAlreadyExists(chain_id));
        }
        let ctx = *self.context.read();

        match self.entry_chains.entry(chain_id) {
            MapEntry::Occupied(_) => return Err(LedgerError::ChainAlreadyExists(chain_id)),
            MapEntry::Vacant(slot) => {
                let chain = EntryChain::new(chain_id);
                chain.start_next_block(&ctx, DEFAULT_ENTRY_BLOCK_CAPACITY)?;
                chain.add_entry(&first_entry)?;
                slot.insert(Arc::new(chain));
            }
        }

        self.pending_entries.lock().push(first_entry);
        info!(chain = %chain_id, height = ctx.directory_height, "entry chain created");
        Ok(chain_id)
    }

    /// Append `entry` to its chain's open entry block, opening one if the
    /// chain has none at this height. Returns the entry hash.
    pub fn submit_entry(&self, entry: Entry) -> Result<Digest> {
        let _gate = self.gate.read();
        let chain = self
            .entry_chain(entry.chain_id())
            .ok_or(LedgerError::UnknownChain(*entry.chain_id()))?;
        let ctx = *self.context.read();

        let digest = chain.with_open_block_or_start(&ctx, DEFAULT_ENTRY_BLOCK_CAPACITY, |block| {
            block.append(&entry)
        })?;
        self.pending_entries.lock().push(entry);
        debug!(chain = %chain.chain_id(), entry = %digest, "entry accepted");
        Ok(digest)
    }

    pub fn submit_credit_entry(&self, entry: CreditEntry) -> Result<()> {
        let _gate = self.gate.read();
        debug!(tag = entry.tag(), "credit entry accepted");
        self.credits.add_credit_entry(entry)
    }

    /// Write the factoid chain's root into directory slot 1.
    pub fn set_factoid_root(&self, merkle_root: Digest) -> Result<()> {
        let _gate = self.gate.read();
        self.directory.add_factoid_root(merkle_root)
    }

    /// Mark the end of `minute` in the credit block and in every entry block
    /// open at this height.
    pub fn end_of_minute(&self, minute: u8) -> Result<()> {
        let _gate = self.gate.read();
        self.credits.add_end_of_minute_marker(minute)?;

        let chains: Vec<Arc<EntryChain>> = self
            .entry_chains
            .iter()
            .map(|c| Arc::clone(c.value()))
            .collect();
        for chain in chains {
            match chain.add_end_of_minute_marker(minute) {
                Ok(_) | Err(LedgerError::NoOpenBlock) => {}
                Err(err) => return Err(err),
            }
        }
        debug!(minute, "end of minute");
        Ok(())
    }

    // -- Closing ------------------------------------------------------------

    /// Seal the current height across every chain and open the next one.
    pub fn close_directory_block(&self) -> Result<SealedHeight> {
        let _gate = self.gate.write();

        let mut chains: Vec<Arc<EntryChain>> = self
            .entry_chains
            .iter()
            .map(|c| Arc::clone(c.value()))
            .collect();
        chains.sort_by_key(|c| c.chain_id());

        let mut entry_blocks = Vec::new();
        for chain in chains {
            if !chain.has_open_block() {
                continue;
            }
            let block = chain.seal_open_block()?;
            self.directory.add_entry_block_root(&block)?;
            entry_blocks.push(block);
        }

        let credit = self.credits.seal_open_block()?;
        self.directory.add_entry_credit_block_root(&credit)?;
        let directory = self.directory.seal_open_block()?;

        {
            let mut balances = self.balances.write();
            for (key, delta) in credit.balance_deltas() {
                *balances.entry(key).or_insert(0) += delta;
            }
        }

        let entries = std::mem::take(&mut *self.pending_entries.lock());
        self.open_height(directory.height() + 1)?;

        info!(
            height = directory.height(),
            entry_blocks = entry_blocks.len(),
            credit_entries = credit.len(),
            key_mr = %directory.key_merkle_root(),
            "directory block sealed"
        );

        Ok(SealedHeight {
            directory,
            credit,
            entry_blocks,
            entries,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
