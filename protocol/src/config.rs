//! # Protocol Configuration & Constants
//!
//! Every fixed number of the ledger lives here: digest width, block format
//! versions, well-known chain ids, storage table tags, and the timing of a
//! directory height. Wire-visible values cannot change without breaking
//! every node that already holds blocks, so treat this file as frozen once
//! a network has data on it.

// ---------------------------------------------------------------------------
// Network Identifiers
// ---------------------------------------------------------------------------

/// Production network. Encoded into every directory block header.
pub const NETWORK_ID_MAINNET: u32 = 0xFA92_E5A2;

/// Public test network.
pub const NETWORK_ID_TESTNET: u32 = 0xFA92_E5A3;

/// Single-machine development network.
pub const NETWORK_ID_LOCALNET: u32 = 0xFA92_E5A4;

/// Resolve a human network name (`mainnet`, `testnet`, `localnet`) to its id.
pub fn network_id_from_name(name: &str) -> Option<u32> {
    match name.to_ascii_lowercase().as_str() {
        "mainnet" => Some(NETWORK_ID_MAINNET),
        "testnet" => Some(NETWORK_ID_TESTNET),
        "localnet" | "local" | "devnet" => Some(NETWORK_ID_LOCALNET),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate-level protocol version string reported by nodes.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Version byte written into directory block headers.
pub const DIRECTORY_BLOCK_VERSION: u8 = 0;

/// Version byte written into entry block headers.
pub const ENTRY_BLOCK_VERSION: u8 = 0;

/// Version byte of entries built by this node.
pub const ENTRY_VERSION: u8 = 0;

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Length of every digest on the wire (SHA-256 output).
pub const HASH_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Well-known Chains
// ---------------------------------------------------------------------------

const fn well_known_chain(tag: u8) -> [u8; HASH_LENGTH] {
    let mut id = [0u8; HASH_LENGTH];
    id[HASH_LENGTH - 1] = tag;
    id
}

/// Chain id of the directory chain.
pub const DIRECTORY_CHAIN_ID: [u8; HASH_LENGTH] = well_known_chain(0x0d);

/// Chain id of the entry-credit chain. Always occupies directory slot 0.
pub const ENTRY_CREDIT_CHAIN_ID: [u8; HASH_LENGTH] = well_known_chain(0x0c);

/// Chain id of the factoid chain. Always occupies directory slot 1.
pub const FACTOID_CHAIN_ID: [u8; HASH_LENGTH] = well_known_chain(0x0f);

/// Directory slot reserved for the entry-credit chain root.
pub const ENTRY_CREDIT_SLOT: usize = 0;

/// Directory slot reserved for the factoid chain root.
pub const FACTOID_SLOT: usize = 1;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Number of minutes that make up one directory height.
pub const MINUTES_PER_BLOCK: u8 = 10;

/// Default wall-clock length of a minute in milliseconds.
pub const DEFAULT_MINUTE_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Capacity Hints
// ---------------------------------------------------------------------------

/// Initial entry capacity for a freshly opened entry block.
pub const DEFAULT_ENTRY_BLOCK_CAPACITY: usize = 16;

/// Initial entry capacity for a freshly opened entry-credit block.
pub const DEFAULT_CREDIT_BLOCK_CAPACITY: usize = 64;

/// Initial slot capacity for a freshly opened directory block.
pub const DEFAULT_DIRECTORY_BLOCK_CAPACITY: usize = 32;

/// Initial number of height slots reserved by a chain's block archive.
pub const DEFAULT_CHAIN_ARCHIVE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Storage Tables
// ---------------------------------------------------------------------------
//
// Every persisted record is keyed by a one-byte table tag followed by the
// record key. Heights in index tables are big-endian so that lexicographic
// order matches numeric order.

/// Directory blocks by identity hash.
pub const TABLE_DIRECTORY_BLOCK: u8 = 0x01;

/// Directory height index: `u32` big-endian height to identity hash.
pub const TABLE_DIRECTORY_HEIGHT: u8 = 0x02;

/// Entry blocks by identity hash.
pub const TABLE_ENTRY_BLOCK: u8 = 0x03;

/// Entry block key-Merkle-root index to identity hash.
pub const TABLE_ENTRY_BLOCK_KEY_MR: u8 = 0x04;

/// Entry-credit blocks by identity hash.
pub const TABLE_CREDIT_BLOCK: u8 = 0x05;

/// Raw entries by entry hash.
pub const TABLE_ENTRY: u8 = 0x06;

/// External id index: `sha256(ext_id) ++ entry_hash` to entry hash.
pub const TABLE_ENTRY_EXT_ID: u8 = 0x07;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
