//! Venue position snapshot reconciliation.
//!
//! The venue snapshot is the full current state, not a delta: every row in
//! it is upserted, and every locally open ticker missing from it is marked
//! closed; absence always means "no longer held", never "unchanged". Rows
//! are keyed one-per-ticker and never deleted; a closed ticker that
//! reappears in a later snapshot is reopened in place with a fresh
//! `opened_at` (it is a new holding period).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::ledger::lots::LotBook;
use crate::ledger::pnl::PnLEngine;
use crate::ledger::store::LedgerDb;
use crate::models::{Position, Side};
use crate::venue::{MarkPriceProvider, TradingVenue};

/// Counts of state transitions applied by one snapshot sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSyncReport {
    pub created: u64,
    pub updated: u64,
    pub closed: u64,
    pub reopened: u64,
}

pub struct PositionProjector<'a> {
    db: &'a LedgerDb,
}

impl<'a> PositionProjector<'a> {
    pub fn new(db: &'a LedgerDb) -> Self {
        Self { db }
    }

    /// Reconcile the local projections with the venue's snapshot.
    ///
    /// `book` is the lot state from the latest replay; it supplies the
    /// average open price, which the venue snapshot does not carry. Venue
    /// rows with zero quantity are treated the same as absent rows.
    pub async fn sync_positions<V: TradingVenue + ?Sized>(
        &self,
        venue: &V,
        book: &LotBook,
        now: DateTime<Utc>,
    ) -> Result<PositionSyncReport> {
        let snapshot = venue.positions().await.context("fetch position snapshot")?;
        let mut still_open: HashSet<String> = self.db.open_tickers()?.into_iter().collect();
        let mut report = PositionSyncReport::default();

        for venue_pos in &snapshot {
            if venue_pos.position == 0 {
                // Flat at the venue: fall through to the closing pass below.
                continue;
            }
            let side = if venue_pos.position > 0 { Side::Yes } else { Side::No };
            let quantity = venue_pos.position.abs();
            let avg_price_cents =
                PnLEngine::avg_open_price_cents(book, &venue_pos.ticker, side).unwrap_or(0);

            let existing = self.db.get_position(&venue_pos.ticker)?;
            let position = match existing {
                None => {
                    report.created += 1;
                    Position {
                        ticker: venue_pos.ticker.clone(),
                        side,
                        quantity,
                        avg_price_cents,
                        realized_pnl_cents: venue_pos.realized_pnl_cents,
                        current_price_cents: None,
                        unrealized_pnl_cents: None,
                        opened_at: now,
                        closed_at: None,
                    }
                }
                Some(prev) if prev.is_open() => {
                    report.updated += 1;
                    Position {
                        side,
                        quantity,
                        avg_price_cents,
                        realized_pnl_cents: venue_pos.realized_pnl_cents,
                        closed_at: None,
                        ..prev
                    }
                }
                Some(prev) => {
                    debug!(ticker = %venue_pos.ticker, "closed ticker reappeared, reopening");
                    report.reopened += 1;
                    Position {
                        side,
                        quantity,
                        avg_price_cents,
                        realized_pnl_cents: venue_pos.realized_pnl_cents,
                        opened_at: now,
                        closed_at: None,
                        ..prev
                    }
                }
            };
            self.db.save_position(&position)?;
            still_open.remove(&venue_pos.ticker);
        }

        // Authoritative overwrite: anything the snapshot no longer mentions
        // is no longer held.
        for ticker in still_open {
            if self.db.close_position(&ticker, now)? {
                report.closed += 1;
            }
        }

        info!(
            created = report.created,
            updated = report.updated,
            closed = report.closed,
            reopened = report.reopened,
            "position snapshot reconciled"
        );
        Ok(report)
    }

    /// Pull marks for every open position and store them. Returns how many
    /// positions received a known mark.
    pub async fn refresh_marks<M: MarkPriceProvider + ?Sized>(&self, marks: &M) -> Result<u64> {
        let mut marked = 0u64;
        for position in self.db.list_positions(false)? {
            let mark = marks
                .mark_price_cents(&position.ticker)
                .await
                .with_context(|| format!("fetch mark for {}", position.ticker))?;
            self.db.update_mark(&position.ticker, mark)?;
            if mark.is_some() {
                marked += 1;
            }
        }
        Ok(marked)
    }
}
