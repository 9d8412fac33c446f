//! Settlement-as-synthetic-close conversion.
//!
//! A terminal market outcome is expressed to the FIFO matcher as ordinary
//! closing sells: one synthetic sell per side with open inventory, priced at
//! the side's settlement value, fee-free, timestamped at `settled_at`. The
//! matcher then treats them identically to venue fills, which guarantees
//! that a non-void, supported settlement leaves no open lot for the ticker.

use tracing::{debug, warn};

use crate::ledger::cents::Cents;
use crate::ledger::lots::LotBook;
use crate::models::{Action, MarketResult, Settlement, Side, Trade};

/// Per-contract settlement value for each side, in cents.
///
/// Returns `None` when the settlement produces no synthetic close: a void
/// result, or a scalar result whose value is missing or out of range
/// (unsupported: skipped, not fatal).
pub fn settlement_prices(result: MarketResult, value: Option<Cents>) -> Option<(Cents, Cents)> {
    match result {
        MarketResult::Yes => Some((100, 0)),
        MarketResult::No => Some((0, 100)),
        MarketResult::Scalar => match value {
            Some(v) if (0..=100).contains(&v) => Some((v, 100 - v)),
            _ => None,
        },
        MarketResult::Void => None,
    }
}

/// Build the synthetic closing sells for one settlement against the current
/// book state.
///
/// `None` means the settlement has no accounting effect (void, or an
/// unsupported scalar value); `Some` carries one closing sell per side with
/// open inventory, possibly none when the ticker is already flat.
pub fn synthesize_closes(settlement: &Settlement, book: &LotBook) -> Option<Vec<Trade>> {
    let Some((yes_cents, no_cents)) = settlement_prices(settlement.result, settlement.value)
    else {
        match settlement.result {
            MarketResult::Void => {
                debug!(ticker = %settlement.ticker, "void settlement, no accounting effect");
            }
            _ => {
                warn!(
                    ticker = %settlement.ticker,
                    result = settlement.result.as_str(),
                    value = ?settlement.value,
                    "unsupported settlement value, skipping"
                );
            }
        }
        return None;
    };

    let closes = book
        .open_sides(&settlement.ticker)
        .into_iter()
        .map(|(side, qty_remaining)| {
            let price_cents = match side {
                Side::Yes => yes_cents,
                Side::No => no_cents,
            };
            Trade {
                id: 0,
                external_id: format!(
                    "settlement:{}:{}:{}",
                    settlement.ticker,
                    side.as_str(),
                    settlement.settled_at.timestamp_millis()
                ),
                ticker: settlement.ticker.clone(),
                side,
                action: Action::Sell,
                quantity: qty_remaining,
                price_cents,
                fee_cents: 0,
                executed_at: settlement.settled_at,
            }
        })
        .collect();
    Some(closes)
}
