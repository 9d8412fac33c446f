//! Idempotent fill and settlement ingestion.
//!
//! The ingestor walks the venue's paged fill stream and inserts anything it
//! has not seen, committing in bounded batches so an interruption loses at
//! most the uncommitted tail of the current batch. Re-running with the same
//! or overlapping pages is harmless: every row is keyed by the venue's
//! `external_id` and duplicates are absorbed, never re-applied.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::ledger::store::LedgerDb;
use crate::venue::TradingVenue;

/// Default rows per committed batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

pub struct FillIngestor<'a> {
    db: &'a LedgerDb,
    batch_size: usize,
}

impl<'a> FillIngestor<'a> {
    pub fn new(db: &'a LedgerDb) -> Self {
        Self {
            db,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Pull every page of fills from the venue and insert the ones not yet
    /// stored. Returns the count of newly inserted rows.
    ///
    /// A malformed individual fill is skipped with a warning; it never
    /// aborts the sync. Network errors propagate to the caller; each
    /// committed batch is an independently valid state, so a failed sync is
    /// safe to re-run.
    pub async fn sync_fills<V: TradingVenue + ?Sized>(
        &self,
        venue: &V,
        min_ts: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let mut cursor: Option<String> = None;
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut inserted = 0u64;
        let mut skipped = 0u64;
        let mut fetched = 0u64;

        loop {
            let page = venue
                .fills_page(cursor.as_deref(), min_ts)
                .await
                .context("fetch fills page")?;
            fetched += page.fills.len() as u64;

            for wire in &page.fills {
                match wire.to_trade() {
                    Ok(trade) => batch.push(trade),
                    Err(err) => {
                        skipped += 1;
                        warn!(trade_id = %wire.trade_id, %err, "skipping malformed fill");
                    }
                }
                if batch.len() >= self.batch_size {
                    inserted += self.db.insert_trades_batch(&batch)?;
                    batch.clear();
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        if !batch.is_empty() {
            inserted += self.db.insert_trades_batch(&batch)?;
        }

        info!(fetched, inserted, skipped, "fill sync complete");
        Ok(inserted)
    }

    /// Insert any settlements not yet stored. Returns the count of newly
    /// inserted rows; malformed records are skipped like fills.
    pub async fn sync_settlements<V: TradingVenue + ?Sized>(&self, venue: &V) -> Result<u64> {
        let wires = venue.settlements().await.context("fetch settlements")?;
        let mut inserted = 0u64;
        let mut skipped = 0u64;

        for wire in &wires {
            match wire.to_settlement() {
                Ok(settlement) => {
                    if self.db.insert_settlement_if_absent(&settlement)? {
                        inserted += 1;
                    }
                }
                Err(err) => {
                    skipped += 1;
                    warn!(ticker = %wire.ticker, %err, "skipping malformed settlement");
                }
            }
        }

        info!(fetched = wires.len(), inserted, skipped, "settlement sync complete");
        Ok(inserted)
    }
}
