//! Terminal walkthrough of the Meridian ledger lifecycle.
//!
//! Creates two entry chains, buys and spends entry credits, closes three
//! directory heights, persists them to a temporary sled store, and restores a
//! second ledger from disk to show that both agree on every root.
//!
//! Run with:
//!   cargo run --example demo --release

use std::time::Instant;

use meridian_protocol::block::{chain_id_from_name, ChainBlock, CreditEntry, Entry, PublicKey};
use meridian_protocol::chain::{Ledger, SealedHeight};
use meridian_protocol::config::NETWORK_ID_LOCALNET;
use meridian_protocol::crypto::hash::sha256;
use meridian_protocol::storage::{BlockStore, SledStore};

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const MAGENTA: &str = "\x1b[35m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

const BG_BLUE: &str = "\x1b[44m";

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn banner() {
    println!();
    println!("{BG_BLUE}{BOLD}{WHITE}                                                              {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}    MERIDIAN LEDGER  --  Directory / Entry / Credit chains    {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}                                                              {RESET}");
    println!();
}

fn section(num: u32, title: &str) {
    println!();
    println!("{BOLD}{CYAN}===[{YELLOW} Step {num} {CYAN}]================================================{RESET}");
    println!("{BOLD}{WHITE}  {title}{RESET}");
}

fn success(text: &str) {
    println!("{GREEN}  [OK] {text}{RESET}");
}

fn info(label: &str, value: &str) {
    println!("{WHITE}  {BOLD}{label}:{RESET} {YELLOW}{value}{RESET}");
}

fn timing(label: &str, elapsed: std::time::Duration) {
    let ms = elapsed.as_secs_f64() * 1000.0;
    println!("{DIM}{MAGENTA}  [{label}: {ms:.2} ms]{RESET}");
}

fn short(hex: String) -> String {
    format!("{}..{}", &hex[..8], &hex[hex.len() - 8..])
}

fn show_height(sealed: &SealedHeight) {
    info("height", &sealed.height().to_string());
    info("directory key MR", &short(sealed.directory.key_merkle_root().to_hex()));
    info("credit block", &short(sealed.credit.hash().to_hex()));
    info(
        "entry blocks",
        &format!(
            "{} ({} entries revealed)",
            sealed.entry_blocks.len(),
            sealed.entries.len()
        ),
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    banner();
    let ledger = Ledger::new(NETWORK_ID_LOCALNET, 0)?;
    let writer = PublicKey::new(sha256(b"demo writer").as_bytes().to_owned());

    section(1, "Buy entry credits");
    ledger.submit_credit_entry(CreditEntry::Buy {
        public_key: writer,
        credits: 25,
        funding_tx_hash: sha256(b"funding"),
    })?;
    success("25 credits pending in the open credit block");

    section(2, "Create two chains");
    let mut sealed = Vec::new();
    for name in ["journal", "inventory"] {
        let first = Entry::new(
            chain_id_from_name(&[name.as_bytes()]),
            vec![name.as_bytes().to_vec()],
            format!("{name} opened").into_bytes(),
        )?;
        ledger.submit_credit_entry(CreditEntry::PayChain {
            public_key: writer,
            credits: 10,
            entry_hash: first.hash(),
            chain_id_hash: sha256(first.chain_id().as_bytes()),
            entry_chain_id_hash: sha256(first.hash().as_bytes()),
            signature: vec![],
        })?;
        let chain_id = ledger.create_chain(first)?;
        info(name, &short(chain_id.to_hex()));
    }

    let started = Instant::now();
    sealed.push(ledger.close_directory_block()?);
    timing("close height", started.elapsed());
    show_height(&sealed[0]);

    section(3, "Write to one chain, leave the other idle");
    let journal = chain_id_from_name(&[b"journal"]);
    for line in ["rained all day", "fixed the gate"] {
        ledger.submit_entry(Entry::new(journal, vec![], line.as_bytes().to_vec())?)?;
    }
    for minute in 1..=3 {
        ledger.end_of_minute(minute)?;
    }
    sealed.push(ledger.close_directory_block()?);
    sealed.push(ledger.close_directory_block()?);
    for height in &sealed[1..] {
        show_height(height);
    }
    info("writer balance", &ledger.credit_balance(&writer).to_string());

    section(4, "Persist and restore");
    let dir = std::env::temp_dir().join(format!("meridian-demo-{}", std::process::id()));
    let store = BlockStore::new(SledStore::open(&dir)?);
    for height in &sealed {
        store.put_sealed_height(height)?;
    }
    let started = Instant::now();
    let restored = Ledger::restore(NETWORK_ID_LOCALNET, 0, &store)?;
    timing("restore", started.elapsed());

    let original_tip = ledger.directory().tip().map(|b| b.key_merkle_root());
    let restored_tip = restored.directory().tip().map(|b| b.key_merkle_root());
    if original_tip == restored_tip {
        success("restored ledger agrees on the directory key-Merkle-root");
    }
    info("next height", &restored.height().to_string());
    info("chains", &restored.entry_chain_count().to_string());

    drop(store);
    std::fs::remove_dir_all(&dir)?;
    println!();
    Ok(())
}
