//! PnL replay and aggregation.
//!
//! [`PnLEngine::replay`] drives the [`LotBook`] over the merged stream of
//! venue fills and settlements and produces a [`ReplayReport`]: the close
//! events, the ending book, and the oversell diagnostics. Realized PnL is
//! defined as the exact sum of the individual close events; nothing is
//! double-counted or dropped.
//!
//! # Event ordering
//!
//! The replay is deterministic: trades are processed in ascending
//! `executed_at` order with ties broken by source row id, and a settlement
//! whose `settled_at` equals a trade's timestamp processes after that trade
//! (fills at the settlement instant belong to the session being settled, so
//! the synthetic close must cover their inventory).

use tracing::debug;

use crate::ledger::cents::Cents;
use crate::ledger::lots::{CloseEvent, LotBook};
use crate::ledger::settlement::synthesize_closes;
use crate::models::{MarketResult, PnLSummary, Position, Settlement, Side, Trade};

// =============================================================================
// REPLAY
// =============================================================================

/// Output of one full replay pass.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Every realized close, in processing order.
    pub closes: Vec<CloseEvent>,
    /// Lot state after the last event; open lots are unsettled inventory.
    pub book: LotBook,
    /// Venue fills processed (synthetic closes excluded).
    pub trades_processed: u64,
    /// Settlements that produced synthetic closes or resolved cleanly.
    pub settlements_applied: u64,
    /// Settlements skipped as unsupported (scalar value missing/out of range).
    pub settlements_skipped: u64,
}

impl ReplayReport {
    /// Exact sum of all close events (conservation property).
    pub fn realized_pnl_cents(&self) -> Cents {
        self.closes.iter().map(|c| c.pnl_cents).sum()
    }
}

/// Stateless replay and aggregation functions.
pub struct PnLEngine;

impl PnLEngine {
    /// Replay trades and settlements through a fresh [`LotBook`].
    ///
    /// Inputs need not be pre-sorted; the engine sorts trades by
    /// `(executed_at, id)` and settlements by `settled_at` before merging.
    /// Sells for untracked tickers produce no effect, so the replay is
    /// robust to unmatched data.
    pub fn replay(trades: &[Trade], settlements: &[Settlement]) -> ReplayReport {
        let mut trades: Vec<&Trade> = trades.iter().collect();
        trades.sort_by(|a, b| {
            a.executed_at
                .cmp(&b.executed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        let mut settlements: Vec<&Settlement> = settlements.iter().collect();
        settlements.sort_by(|a, b| a.settled_at.cmp(&b.settled_at));

        let mut report = ReplayReport::default();
        let mut next_trade = 0usize;

        for settlement in settlements {
            // Trades at or before the settlement instant go first.
            while next_trade < trades.len()
                && trades[next_trade].executed_at <= settlement.settled_at
            {
                Self::apply_trade(&mut report, trades[next_trade], false);
                next_trade += 1;
            }
            Self::apply_settlement(&mut report, settlement);
        }
        for &trade in &trades[next_trade..] {
            Self::apply_trade(&mut report, trade, false);
        }

        debug!(
            trades = report.trades_processed,
            closes = report.closes.len(),
            settlements_applied = report.settlements_applied,
            settlements_skipped = report.settlements_skipped,
            oversell_events = report.book.oversell_events,
            "replay complete"
        );
        report
    }

    fn apply_trade(report: &mut ReplayReport, trade: &Trade, synthetic: bool) {
        if let Some(close) = report.book.apply(trade, synthetic) {
            report.closes.push(close);
        }
        if !synthetic {
            report.trades_processed += 1;
        }
    }

    fn apply_settlement(report: &mut ReplayReport, settlement: &Settlement) {
        match synthesize_closes(settlement, &report.book) {
            None => {
                // Void settlements have no accounting effect; only
                // unsupported scalar values count as skipped.
                if settlement.result != MarketResult::Void {
                    report.settlements_skipped += 1;
                }
            }
            Some(closes) => {
                for close in &closes {
                    Self::apply_trade(report, close, true);
                }
                report.settlements_applied += 1;
                debug_assert!(
                    !report.book.has_open_quantity(&settlement.ticker),
                    "settled ticker retains open quantity"
                );
            }
        }
    }

    // =========================================================================
    // UNREALIZED
    // =========================================================================

    /// Unrealized PnL for one open position against a mark, in cents.
    ///
    /// Yes: `(mark - avg_price) * quantity`; no: `(avg_price - mark) *
    /// quantity`. Returns `None` when no mark is supplied: unrealized PnL
    /// is never guessed.
    pub fn unrealized_pnl_cents(position: &Position, mark_price_cents: Option<Cents>) -> Option<Cents> {
        let mark = mark_price_cents?;
        let per_contract = match position.side {
            Side::Yes => mark - position.avg_price_cents,
            Side::No => position.avg_price_cents - mark,
        };
        Some(per_contract * position.quantity)
    }

    // =========================================================================
    // AGGREGATION
    // =========================================================================

    /// Build the aggregate summary from a replay report and the current
    /// position projections.
    ///
    /// Statistics are taken over individual close events, not raw trades:
    /// `winning` counts `pnl > 0`, `losing` counts `pnl < 0`, and a zero
    /// close counts as neither. Average win/loss are floored integer cents.
    pub fn summarize(report: &ReplayReport, positions: &[Position]) -> PnLSummary {
        let closes = &report.closes;
        let wins: Vec<Cents> = closes.iter().map(|c| c.pnl_cents).filter(|p| *p > 0).collect();
        let losses: Vec<Cents> = closes.iter().map(|c| c.pnl_cents).filter(|p| *p < 0).collect();

        let winning = wins.len() as u64;
        let losing = losses.len() as u64;
        let sum_wins: Cents = wins.iter().sum();
        let sum_losses: Cents = losses.iter().sum();

        let win_rate = if closes.is_empty() {
            0.0
        } else {
            winning as f64 / closes.len() as f64
        };
        let avg_win_cents = if winning > 0 { sum_wins / winning as i64 } else { 0 };
        let avg_loss_cents = if losing > 0 {
            sum_losses.abs() / losing as i64
        } else {
            0
        };
        let profit_factor = if sum_losses == 0 {
            0.0
        } else {
            (sum_wins as f64 / sum_losses as f64).abs()
        };

        let open: Vec<&Position> = positions.iter().filter(|p| p.is_open()).collect();
        let marked: Vec<Cents> = open
            .iter()
            .filter_map(|&p| Self::unrealized_pnl_cents(p, p.current_price_cents))
            .collect();
        let unrealized_pnl_cents = if open.is_empty() {
            Some(0)
        } else if marked.is_empty() {
            None
        } else {
            Some(marked.iter().sum())
        };

        let realized_pnl_cents = report.realized_pnl_cents();
        PnLSummary {
            realized_pnl_cents,
            unrealized_pnl_cents,
            total_pnl_cents: realized_pnl_cents + unrealized_pnl_cents.unwrap_or(0),
            total_trades: report.trades_processed,
            winning_trades: winning,
            losing_trades: losing,
            win_rate,
            avg_win_cents,
            avg_loss_cents,
            profit_factor,
        }
    }

    /// Average open price for a ticker/side from the replayed book, for
    /// position projection. Half-even rounded; `None` when nothing is open.
    pub fn avg_open_price_cents(book: &LotBook, ticker: &str, side: Side) -> Option<Cents> {
        book.lot(ticker, side).and_then(|l| l.avg_price_cents())
    }
}
