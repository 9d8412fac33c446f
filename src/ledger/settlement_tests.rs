//! Settlement synthesis tests: price tables, full-closure, void and
//! unsupported outcomes.

use chrono::{TimeZone, Utc};

use crate::ledger::lots::LotBook;
use crate::ledger::settlement::{settlement_prices, synthesize_closes};
use crate::models::{Action, MarketResult, Settlement, Side, Trade};

fn buy(ticker: &str, side: Side, quantity: i64, price_cents: i64) -> Trade {
    Trade {
        id: 0,
        external_id: format!("buy-{}-{}", ticker, side.as_str()),
        ticker: ticker.to_string(),
        side,
        action: Action::Buy,
        quantity,
        price_cents,
        fee_cents: 0,
        executed_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    }
}

fn settlement(ticker: &str, result: MarketResult, value: Option<i64>) -> Settlement {
    Settlement {
        ticker: ticker.to_string(),
        result,
        value,
        settled_at: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
    }
}

// =============================================================================
// PRICE TABLE
// =============================================================================

#[test]
fn settlement_price_table() {
    assert_eq!(settlement_prices(MarketResult::Yes, None), Some((100, 0)));
    assert_eq!(settlement_prices(MarketResult::No, None), Some((0, 100)));
    assert_eq!(
        settlement_prices(MarketResult::Scalar, Some(37)),
        Some((37, 63))
    );
    assert_eq!(settlement_prices(MarketResult::Scalar, Some(0)), Some((0, 100)));
    assert_eq!(
        settlement_prices(MarketResult::Scalar, Some(100)),
        Some((100, 0))
    );
    // Unsupported scalar values produce no synthetic trade.
    assert_eq!(settlement_prices(MarketResult::Scalar, None), None);
    assert_eq!(settlement_prices(MarketResult::Scalar, Some(101)), None);
    assert_eq!(settlement_prices(MarketResult::Scalar, Some(-1)), None);
    assert_eq!(settlement_prices(MarketResult::Void, None), None);
}

// =============================================================================
// SYNTHESIS
// =============================================================================

#[test]
fn yes_settlement_closes_both_sides_at_their_values() {
    let mut book = LotBook::new();
    book.apply_buy(&buy("MKT-A", Side::Yes, 40, 45));
    book.apply_buy(&buy("MKT-A", Side::No, 15, 60));

    let s = settlement("MKT-A", MarketResult::Yes, None);
    let closes = synthesize_closes(&s, &book).expect("resolving settlement");

    assert_eq!(closes.len(), 2);
    let yes = closes.iter().find(|t| t.side == Side::Yes).unwrap();
    let no = closes.iter().find(|t| t.side == Side::No).unwrap();
    assert_eq!((yes.quantity, yes.price_cents), (40, 100));
    assert_eq!((no.quantity, no.price_cents), (15, 0));
    for t in &closes {
        assert_eq!(t.action, Action::Sell);
        assert_eq!(t.fee_cents, 0);
        assert_eq!(t.executed_at, s.settled_at);
    }
}

#[test]
fn settlement_only_touches_its_own_ticker() {
    let mut book = LotBook::new();
    book.apply_buy(&buy("MKT-A", Side::Yes, 10, 50));
    book.apply_buy(&buy("MKT-B", Side::Yes, 10, 50));

    let closes =
        synthesize_closes(&settlement("MKT-A", MarketResult::No, None), &book).unwrap();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].ticker, "MKT-A");
}

#[test]
fn flat_ticker_settles_with_no_closes() {
    let book = LotBook::new();
    let closes =
        synthesize_closes(&settlement("MKT-A", MarketResult::Yes, None), &book).unwrap();
    assert!(closes.is_empty());
}

#[test]
fn void_settlement_has_no_accounting_effect() {
    let mut book = LotBook::new();
    book.apply_buy(&buy("MKT-A", Side::Yes, 10, 50));

    assert!(synthesize_closes(&settlement("MKT-A", MarketResult::Void, None), &book).is_none());
    assert_eq!(book.lot("MKT-A", Side::Yes).unwrap().qty_remaining, 10);
}

#[test]
fn unsupported_scalar_is_skipped_not_fatal() {
    let mut book = LotBook::new();
    book.apply_buy(&buy("MKT-A", Side::Yes, 10, 50));

    assert!(
        synthesize_closes(&settlement("MKT-A", MarketResult::Scalar, None), &book).is_none()
    );
    assert!(
        synthesize_closes(&settlement("MKT-A", MarketResult::Scalar, Some(250)), &book)
            .is_none()
    );
    assert_eq!(book.lot("MKT-A", Side::Yes).unwrap().qty_remaining, 10);
}

// =============================================================================
// FULL CLOSURE THROUGH THE MATCHER
// =============================================================================

#[test]
fn applying_synthetic_closes_guarantees_full_closure() {
    let mut book = LotBook::new();
    book.apply_buy(&buy("MKT-A", Side::Yes, 40, 45));
    book.apply_buy(&buy("MKT-A", Side::No, 15, 60));

    let s = settlement("MKT-A", MarketResult::Scalar, Some(70));
    let closes = synthesize_closes(&s, &book).unwrap();
    let mut pnl = 0;
    for t in &closes {
        pnl += book.apply_sell(t, true).expect("synthetic close").pnl_cents;
    }

    assert!(!book.has_open_quantity("MKT-A"));
    // yes: 40 bought at 45 settle at 70 -> +1000; no: 15 bought at 60 settle
    // at 30 -> -450.
    assert_eq!(pnl, 40 * (70 - 45) + 15 * (30 - 60));
}
