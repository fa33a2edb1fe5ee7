//! Error types for the ledger core.
//!
//! Every decode, block-building, and chain-state operation that can fail
//! returns a [`LedgerError`]. Nothing in the core panics on malformed input:
//! a short buffer is a `TruncatedInput`, never an out-of-bounds slice.

use thiserror::Error;

use crate::crypto::hash::Digest;

/// Errors produced by the codec, the block formats, and chain state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A decoder needed more bytes than the input had left.
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    TruncatedInput {
        /// Bytes the decoder tried to read.
        needed: usize,
        /// Bytes that were actually left.
        remaining: usize,
    },

    /// A credit entry started with a tag byte no variant claims.
    #[error("unknown credit entry type: {0:#04x}")]
    UnknownEntryType(u8),

    /// Block creation or archiving broke the chain's height/prev-hash rules.
    #[error("invalid chain transition: {0}")]
    InvalidChainTransition(String),

    /// A mutation or second seal was attempted on a sealed block.
    #[error("block is sealed")]
    BlockSealed,

    /// An operation that requires a sealed block got an open one.
    #[error("block is not sealed")]
    BlockNotSealed,

    /// The chain has no block under construction.
    #[error("chain has no open block")]
    NoOpenBlock,

    /// A field is too long for its length prefix.
    #[error("{field} too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Name of the offending field.
        field: &'static str,
        /// Actual size in bytes.
        size: usize,
        /// Largest size the encoding can express.
        max: usize,
    },

    /// No entry chain with this id exists.
    #[error("unknown chain: {0}")]
    UnknownChain(Digest),

    /// An entry chain with this id already exists.
    #[error("chain already exists: {0}")]
    ChainAlreadyExists(Digest),

    /// A reserved directory slot was written before it was allocated.
    #[error("reserved directory slot {0} is missing")]
    ReservedSlotMissing(usize),

    /// A hex string could not be parsed into bytes of the expected width.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// Convenience alias used across the core.
pub type Result<T> = std::result::Result<T, LedgerError>;
