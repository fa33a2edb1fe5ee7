//! # Chains
//!
//! ```text
//! state.rs  — ChainState<B>: sealed archive + one block under construction
//! ledger.rs — Ledger: drives all chains through one directory height
//! ```

pub mod ledger;
pub mod state;

pub use ledger::{Ledger, SealedHeight};
pub use state::{ChainState, DirectoryChain, EntryChain, EntryCreditChain};
