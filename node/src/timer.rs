//! # Block Timer
//!
//! Drives the ledger through its minutes. A directory height lasts
//! [`MINUTES_PER_BLOCK`] minutes; each tick ends one minute, and the tick that
//! ends the last minute closes the height and persists it.
//!
//! ```text
//!   tick 1..9   end_of_minute(m)
//!   tick 10     end_of_minute(10) → close_directory_block → put_sealed_height
//!               minute counter back to 0
//! ```
//!
//! A height that closed but failed to persist is held as pending. Every
//! later tick first retries the write and ends no minute until it lands, so
//! the store never skips a height.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use meridian_protocol::chain::{Ledger, SealedHeight};
use meridian_protocol::config::MINUTES_PER_BLOCK;
use meridian_protocol::storage::{BlockStore, KeyValueStore};

use crate::metrics::SharedMetrics;

/// Minute clock of one ledger.
pub struct BlockTimer<S: KeyValueStore> {
    ledger: Arc<Ledger>,
    store: Arc<BlockStore<S>>,
    metrics: SharedMetrics,
    /// Minutes already ended at the current height.
    minute: u8,
    /// Closed height whose write to the store has not succeeded yet.
    pending: Option<SealedHeight>,
}

impl<S: KeyValueStore> BlockTimer<S> {
    pub fn new(ledger: Arc<Ledger>, store: Arc<BlockStore<S>>, metrics: SharedMetrics) -> Self {
        metrics.directory_height.set(ledger.height() as i64);
        metrics
            .entry_chains
            .set(ledger.entry_chain_count() as i64);
        Self {
            ledger,
            store,
            metrics,
            minute: 0,
            pending: None,
        }
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Height of the closed block still waiting to be persisted.
    pub fn pending_height(&self) -> Option<u32> {
        self.pending.as_ref().map(SealedHeight::height)
    }

    /// End the next minute. Returns the sealed height when this tick closed
    /// one, or finally persisted one that an earlier tick closed.
    pub fn tick(&mut self) -> Result<Option<SealedHeight>> {
        if let Some(sealed) = self.pending.take() {
            return self.persist(sealed).map(Some);
        }

        // A failed close leaves every minute ended; retry the close alone.
        if self.minute < MINUTES_PER_BLOCK {
            let minute = self.minute + 1;
            self.ledger
                .end_of_minute(minute)
                .with_context(|| format!("failed to end minute {minute}"))?;
            self.minute = minute;
            tracing::debug!(minute, height = self.ledger.height(), "minute ended");
        }

        if self.minute < MINUTES_PER_BLOCK {
            return Ok(None);
        }

        let started = Instant::now();
        let sealed = self
            .ledger
            .close_directory_block()
            .context("failed to close directory block")?;
        self.minute = 0;
        self.metrics
            .close_latency_seconds
            .observe(started.elapsed().as_secs_f64());
        // directory + credit + entry blocks
        self.metrics
            .blocks_sealed_total
            .inc_by(2 + sealed.entry_blocks.len() as u64);
        self.metrics.directory_height.set(self.ledger.height() as i64);

        self.persist(sealed).map(Some)
    }

    /// Write a closed height to the store, keeping it as pending on failure.
    fn persist(&mut self, sealed: SealedHeight) -> Result<SealedHeight> {
        let height = sealed.height();
        if let Err(e) = self.store.put_sealed_height(&sealed) {
            tracing::warn!(height, error = %e, "height not persisted, will retry");
            self.pending = Some(sealed);
            return Err(e).with_context(|| format!("failed to persist height {height}"));
        }

        tracing::info!(
            height,
            entry_blocks = sealed.entry_blocks.len(),
            entries = sealed.entries.len(),
            "height persisted"
        );
        Ok(sealed)
    }

    /// Tick every `minute` of wall-clock time until the task is aborted.
    pub async fn run(mut self, minute: Duration) {
        let mut interval = tokio::time::interval(minute);
        // The first tick of a tokio interval completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = self.tick() {
                tracing::error!(error = %format!("{e:#}"), "block timer tick failed");
            }
        }
    }
}
