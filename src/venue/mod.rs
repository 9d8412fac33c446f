//! Venue interface boundary.
//!
//! The authenticated HTTP/WebSocket client lives outside this crate; the
//! ledger consumes venue data through the [`TradingVenue`] and
//! [`MarkPriceProvider`] traits and the loosely-stringly wire records below.
//! Conversion into the typed domain models happens here, at the boundary,
//! so the rest of the crate never sees venue vocabulary.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use crate::ledger::cents::{parse_dollars_to_cents, Cents};
use crate::models::{Action, MarketResult, Settlement, Side, Trade};

// =============================================================================
// WIRE RECORDS
// =============================================================================

/// A fill as the venue reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueFill {
    pub trade_id: String,
    pub ticker: String,
    pub side: String,
    pub action: String,
    /// Contracts filled.
    pub count: i64,
    /// Price of the yes side in cents; the no side pays the complement.
    pub yes_price: i64,
    /// Fee as decimal-dollar text (e.g. `"0.5000"`), absent when free.
    #[serde(default)]
    pub fee: Option<String>,
    /// ISO-8601 execution time.
    pub created_time: String,
}

impl VenueFill {
    /// Convert to the typed domain fill.
    ///
    /// Structural problems (unknown side/action, non-positive count, price
    /// out of range, unparseable timestamp) are errors; the caller skips
    /// the record. A malformed fee string is not: it defaults to zero and is
    /// logged here, keeping the fallback decision visible at the boundary.
    pub fn to_trade(&self) -> Result<Trade> {
        let side = Side::parse(&self.side)
            .with_context(|| format!("fill {}: unknown side {:?}", self.trade_id, self.side))?;
        let action = Action::parse(&self.action)
            .with_context(|| format!("fill {}: unknown action {:?}", self.trade_id, self.action))?;
        if self.count <= 0 {
            bail!("fill {}: non-positive count {}", self.trade_id, self.count);
        }
        if !(0..=100).contains(&self.yes_price) {
            bail!("fill {}: yes_price {} out of range", self.trade_id, self.yes_price);
        }
        let price_cents = match side {
            Side::Yes => self.yes_price,
            Side::No => 100 - self.yes_price,
        };

        let fee_cents = match self.fee.as_deref() {
            None => 0,
            Some(raw) => match parse_dollars_to_cents(raw) {
                Ok(cents) if cents >= 0 => cents,
                Ok(cents) => {
                    warn!(trade_id = %self.trade_id, fee = raw, cents, "negative fee, defaulting to 0");
                    0
                }
                Err(err) => {
                    warn!(trade_id = %self.trade_id, fee = raw, %err, "unparseable fee, defaulting to 0");
                    0
                }
            },
        };

        let executed_at = DateTime::parse_from_rfc3339(&self.created_time)
            .with_context(|| {
                format!("fill {}: bad created_time {:?}", self.trade_id, self.created_time)
            })?
            .with_timezone(&Utc);

        Ok(Trade {
            id: 0,
            external_id: self.trade_id.clone(),
            ticker: self.ticker.clone(),
            side,
            action,
            quantity: self.count,
            price_cents,
            fee_cents,
            executed_at,
        })
    }
}

/// One page of fills plus the cursor for the next page, if any.
#[derive(Debug, Clone, Default)]
pub struct FillsPage {
    pub fills: Vec<VenueFill>,
    pub next_cursor: Option<String>,
}

/// A position row from the venue's full current-state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    pub ticker: String,
    /// Signed contract count: positive holds yes, negative holds no.
    pub position: i64,
    /// Realized PnL as the venue reports it, in cents.
    #[serde(default)]
    pub realized_pnl_cents: Cents,
}

/// A settlement as the venue reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueSettlement {
    pub ticker: String,
    pub market_result: String,
    #[serde(default)]
    pub settlement_value: Option<Cents>,
    /// ISO-8601 settlement time.
    pub settled_at: String,
}

impl VenueSettlement {
    pub fn to_settlement(&self) -> Result<Settlement> {
        let result = MarketResult::parse(&self.market_result).with_context(|| {
            format!("settlement {}: unknown result {:?}", self.ticker, self.market_result)
        })?;
        let settled_at = DateTime::parse_from_rfc3339(&self.settled_at)
            .with_context(|| {
                format!("settlement {}: bad settled_at {:?}", self.ticker, self.settled_at)
            })?
            .with_timezone(&Utc);
        Ok(Settlement {
            ticker: self.ticker.clone(),
            result,
            value: self.settlement_value,
            settled_at,
        })
    }
}

// =============================================================================
// BOUNDARY TRAITS
// =============================================================================

/// Read-only access to the venue's account data.
#[async_trait]
pub trait TradingVenue: Send + Sync {
    /// One page of fills, oldest first. `min_ts` filters out older fills;
    /// pages may overlap across calls; the ingestor dedupes.
    async fn fills_page(
        &self,
        cursor: Option<&str>,
        min_ts: Option<DateTime<Utc>>,
    ) -> Result<FillsPage>;

    /// The full current-state position snapshot. A ticker absent from the
    /// snapshot is no longer held.
    async fn positions(&self) -> Result<Vec<VenuePosition>>;

    /// Settlements for markets this account traded.
    async fn settlements(&self) -> Result<Vec<VenueSettlement>>;
}

/// Supplies the current market price for unrealized PnL. The ledger core
/// never fetches marks itself.
#[async_trait]
pub trait MarkPriceProvider: Send + Sync {
    async fn mark_price_cents(&self, ticker: &str) -> Result<Option<Cents>>;
}

// =============================================================================
// FILE-BACKED VENUE (offline ingestion)
// =============================================================================

/// Fixture file layout for [`FileVenue`].
#[derive(Debug, Default, Deserialize)]
struct VenueFixture {
    #[serde(default)]
    fills: Vec<serde_json::Value>,
    #[serde(default)]
    positions: Vec<VenuePosition>,
    #[serde(default)]
    settlements: Vec<VenueSettlement>,
    #[serde(default)]
    marks: HashMap<String, Cents>,
}

/// A [`TradingVenue`] over an exported-records JSON file, for offline
/// ingestion and tests. Fills are paged to exercise the same cursor path a
/// network client would; individual malformed fill records are skipped with
/// a warning instead of failing the whole file.
pub struct FileVenue {
    fills: Vec<VenueFill>,
    positions: Vec<VenuePosition>,
    settlements: Vec<VenueSettlement>,
    marks: HashMap<String, Cents>,
    page_size: usize,
}

impl FileVenue {
    pub const DEFAULT_PAGE_SIZE: usize = 500;

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read venue fixture {}", path.display()))?;
        let fixture: VenueFixture = serde_json::from_str(&raw)
            .with_context(|| format!("parse venue fixture {}", path.display()))?;

        let mut fills = Vec::with_capacity(fixture.fills.len());
        for value in fixture.fills {
            match serde_json::from_value::<VenueFill>(value) {
                Ok(fill) => fills.push(fill),
                Err(err) => warn!(%err, "skipping malformed fill record in fixture"),
            }
        }

        Ok(Self {
            fills,
            positions: fixture.positions,
            settlements: fixture.settlements,
            marks: fixture.marks,
            page_size: Self::DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn fill_passes_min_ts(fill: &VenueFill, min_ts: Option<DateTime<Utc>>) -> bool {
        let Some(min_ts) = min_ts else {
            return true;
        };
        match DateTime::parse_from_rfc3339(&fill.created_time) {
            // Unparseable timestamps pass through; conversion rejects them
            // with a better error.
            Err(_) => true,
            Ok(ts) => ts.with_timezone(&Utc) >= min_ts,
        }
    }
}

#[async_trait]
impl TradingVenue for FileVenue {
    async fn fills_page(
        &self,
        cursor: Option<&str>,
        min_ts: Option<DateTime<Utc>>,
    ) -> Result<FillsPage> {
        let filtered: Vec<&VenueFill> = self
            .fills
            .iter()
            .filter(|f| Self::fill_passes_min_ts(f, min_ts))
            .collect();

        let offset: usize = match cursor {
            None => 0,
            Some(raw) => raw
                .parse()
                .with_context(|| format!("bad fills cursor {:?}", raw))?,
        };
        let end = (offset + self.page_size).min(filtered.len());
        let fills = filtered[offset.min(end)..end].iter().map(|f| (*f).clone()).collect();
        let next_cursor = if end < filtered.len() {
            Some(end.to_string())
        } else {
            None
        };
        Ok(FillsPage { fills, next_cursor })
    }

    async fn positions(&self) -> Result<Vec<VenuePosition>> {
        Ok(self.positions.clone())
    }

    async fn settlements(&self) -> Result<Vec<VenueSettlement>> {
        Ok(self.settlements.clone())
    }
}

#[async_trait]
impl MarkPriceProvider for FileVenue {
    async fn mark_price_cents(&self, ticker: &str) -> Result<Option<Cents>> {
        Ok(self.marks.get(ticker).copied())
    }
}
