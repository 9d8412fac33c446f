//! FIFO cost-basis lot matching.
//!
//! The [`LotBook`] is the accounting core: it consumes buys and sells for
//! `(ticker, side)` keys in strictly ascending execution order and emits one
//! [`CloseEvent`] per consuming sell. Reordering trades changes which cost
//! basis a close consumes and therefore changes reported PnL, so callers
//! must feed trades sorted by `(executed_at, row id)`; the replay driver in
//! [`pnl`](crate::ledger::pnl) owns that ordering.
//!
//! # Determinism
//!
//! All arithmetic is integer cents; pro-rata splits round half-to-even on
//! the exact rational quotient. Two replays of the same ordered trades
//! always produce identical lots and identical close events.
//!
//! # Oversell
//!
//! A sell for more contracts than the book tracks is clamped to the tracked
//! quantity. The excess is logged and accumulated in the book's oversell
//! counters so a replay report can surface upstream data-quality problems
//! (missing or duplicated buy fills) instead of hiding them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::ledger::cents::{round_half_even, Cents};
use crate::models::{Action, Side, Trade};

/// Key for one open lot: a ticker plus the side held.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LotKey {
    pub ticker: String,
    pub side: Side,
}

impl LotKey {
    pub fn new(ticker: impl Into<String>, side: Side) -> Self {
        Self {
            ticker: ticker.into(),
            side,
        }
    }
}

/// Open quantity and its remaining cost basis for one `(ticker, side)`.
///
/// Invariant: `cost_remaining_cents == 0` whenever `qty_remaining == 0`;
/// emptied lots are removed from the book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub qty_remaining: i64,
    pub cost_remaining_cents: Cents,
}

impl Lot {
    /// Average cost per contract, rounded half-to-even. `None` when empty.
    pub fn avg_price_cents(&self) -> Option<Cents> {
        if self.qty_remaining <= 0 {
            return None;
        }
        Some(round_half_even(
            self.cost_remaining_cents as i128,
            self.qty_remaining as i128,
        ) as Cents)
    }
}

/// One realized close: a sell (real or settlement-synthesized) consuming
/// tracked inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseEvent {
    pub ticker: String,
    pub side: Side,
    /// Contracts consumed, possibly less than the sell's quantity when the
    /// book tracked fewer.
    pub quantity: i64,
    pub pnl_cents: Cents,
    pub closed_at: DateTime<Utc>,
    /// True for settlement-synthesized closes.
    pub synthetic: bool,
}

/// FIFO lot book for one replay pass.
///
/// Owned by the replay function and passed by reference; there is no global
/// book. The book is rebuilt from ordered trades on every replay, so it does
/// not need to be durable.
#[derive(Debug, Clone, Default)]
pub struct LotBook {
    lots: HashMap<LotKey, Lot>,
    /// Sells (or settlement closes) that exceeded tracked inventory.
    pub oversell_events: u64,
    /// Total contracts sold beyond tracked inventory.
    pub oversold_quantity: i64,
}

impl LotBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one trade in replay order. Buys accumulate; sells consume and
    /// emit a close event when any tracked inventory was matched.
    pub fn apply(&mut self, trade: &Trade, synthetic: bool) -> Option<CloseEvent> {
        match trade.action {
            Action::Buy => {
                self.apply_buy(trade);
                None
            }
            Action::Sell => self.apply_sell(trade, synthetic),
        }
    }

    /// Buy: grow the lot by the filled quantity and add the fill's notional
    /// plus fee to the remaining cost basis.
    pub fn apply_buy(&mut self, trade: &Trade) {
        let lot = self
            .lots
            .entry(LotKey::new(trade.ticker.clone(), trade.side))
            .or_default();
        lot.qty_remaining += trade.quantity;
        lot.cost_remaining_cents += trade.price_cents * trade.quantity + trade.fee_cents;
    }

    /// Sell: consume up to the tracked quantity, releasing a pro-rata share
    /// of the lot's remaining cost and of the sell's fee.
    ///
    /// Returns `None` when nothing was tracked (`consume == 0`): the sell
    /// produces no PnL event. Quantity beyond the tracked inventory is
    /// clamped and recorded in the oversell counters.
    pub fn apply_sell(&mut self, trade: &Trade, synthetic: bool) -> Option<CloseEvent> {
        let key = LotKey::new(trade.ticker.clone(), trade.side);
        let entry = self.lots.get_mut(&key);
        let tracked = entry.as_ref().map_or(0, |l| l.qty_remaining);
        let consume = tracked.min(trade.quantity);
        let excess = trade.quantity - consume;

        if excess > 0 {
            self.oversell_events += 1;
            self.oversold_quantity += excess;
            warn!(
                ticker = %trade.ticker,
                side = trade.side.as_str(),
                sell_qty = trade.quantity,
                tracked_qty = tracked,
                excess,
                synthetic,
                "sell exceeds tracked inventory, clamping"
            );
        }
        let Some(lot) = entry else {
            return None;
        };
        if consume == 0 {
            return None;
        }

        let pro_rata_cost = round_half_even(
            lot.cost_remaining_cents as i128 * consume as i128,
            lot.qty_remaining as i128,
        ) as Cents;
        let matched_fee = round_half_even(
            trade.fee_cents as i128 * consume as i128,
            trade.quantity as i128,
        ) as Cents;
        let net_proceeds = trade.price_cents * consume - matched_fee;
        let pnl_cents = net_proceeds - pro_rata_cost;

        lot.cost_remaining_cents -= pro_rata_cost;
        lot.qty_remaining -= consume;
        if lot.qty_remaining == 0 {
            debug_assert_eq!(lot.cost_remaining_cents, 0, "emptied lot retains cost");
            self.lots.remove(&key);
        }

        Some(CloseEvent {
            ticker: trade.ticker.clone(),
            side: trade.side,
            quantity: consume,
            pnl_cents,
            closed_at: trade.executed_at,
            synthetic,
        })
    }

    /// The open lot for a key, if any quantity remains.
    pub fn lot(&self, ticker: &str, side: Side) -> Option<&Lot> {
        self.lots.get(&LotKey::new(ticker, side))
    }

    /// Sides of a ticker with open quantity, in fixed yes-then-no order so
    /// settlement synthesis is deterministic.
    pub fn open_sides(&self, ticker: &str) -> Vec<(Side, i64)> {
        [Side::Yes, Side::No]
            .into_iter()
            .filter_map(|side| {
                self.lot(ticker, side)
                    .filter(|l| l.qty_remaining > 0)
                    .map(|l| (side, l.qty_remaining))
            })
            .collect()
    }

    /// True if any lot for the ticker still has open quantity.
    pub fn has_open_quantity(&self, ticker: &str) -> bool {
        !self.open_sides(ticker).is_empty()
    }

    /// Number of open lots across all keys.
    pub fn open_lot_count(&self) -> usize {
        self.lots.len()
    }
}
