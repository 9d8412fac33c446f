//! FIFO matcher tests: pro-rata partial closes, rounding determinism,
//! multi-lot accumulation, and oversell clamping.

use chrono::{DateTime, TimeZone, Utc};

use crate::ledger::cents::Cents;
use crate::ledger::lots::LotBook;
use crate::models::{Action, Side, Trade};

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

fn trade(
    external_id: &str,
    action: Action,
    quantity: i64,
    price_cents: Cents,
    fee_cents: Cents,
    executed_at: DateTime<Utc>,
) -> Trade {
    Trade {
        id: 0,
        external_id: external_id.to_string(),
        ticker: "MKT-A".to_string(),
        side: Side::Yes,
        action,
        quantity,
        price_cents,
        fee_cents,
        executed_at,
    }
}

// =============================================================================
// BUY ACCUMULATION
// =============================================================================

#[test]
fn buys_accumulate_quantity_and_cost_with_fees() {
    let mut book = LotBook::new();
    book.apply_buy(&trade("b1", Action::Buy, 100, 45, 10, at(9, 0)));
    book.apply_buy(&trade("b2", Action::Buy, 50, 50, 5, at(9, 30)));

    let lot = book.lot("MKT-A", Side::Yes).expect("open lot");
    assert_eq!(lot.qty_remaining, 150);
    // 100*45 + 10 + 50*50 + 5
    assert_eq!(lot.cost_remaining_cents, 7015);
}

#[test]
fn sides_are_independent_lots() {
    let mut book = LotBook::new();
    book.apply_buy(&trade("b1", Action::Buy, 10, 40, 0, at(9, 0)));
    let mut no_side = trade("b2", Action::Buy, 20, 60, 0, at(9, 5));
    no_side.side = Side::No;
    book.apply_buy(&no_side);

    assert_eq!(book.lot("MKT-A", Side::Yes).unwrap().qty_remaining, 10);
    assert_eq!(book.lot("MKT-A", Side::No).unwrap().qty_remaining, 20);
    assert_eq!(book.open_lot_count(), 2);
}

// =============================================================================
// PARTIAL CLOSE
// =============================================================================

#[test]
fn partial_sell_releases_pro_rata_cost_and_fee() {
    let mut book = LotBook::new();
    book.apply_buy(&trade("b1", Action::Buy, 100, 45, 10, at(9, 0)));
    book.apply_buy(&trade("b2", Action::Buy, 50, 50, 5, at(9, 30)));

    let close = book
        .apply_sell(&trade("s1", Action::Sell, 120, 60, 12, at(10, 0)), false)
        .expect("close event");

    // pro_rata_cost = round(7015 * 120 / 150) = 5612
    // matched_fee   = round(12 * 120 / 120)   = 12
    // net_proceeds  = 60*120 - 12             = 7188
    assert_eq!(close.quantity, 120);
    assert_eq!(close.pnl_cents, 7188 - 5612);
    assert_eq!(close.pnl_cents, 1576);
    assert!(!close.synthetic);

    let lot = book.lot("MKT-A", Side::Yes).expect("remainder lot");
    assert_eq!(lot.qty_remaining, 30);
    assert_eq!(lot.cost_remaining_cents, 7015 - 5612);
    assert_eq!(lot.cost_remaining_cents, 1403);
}

#[test]
fn full_close_empties_and_removes_the_lot() {
    let mut book = LotBook::new();
    book.apply_buy(&trade("b1", Action::Buy, 30, 45, 7, at(9, 0)));
    let close = book
        .apply_sell(&trade("s1", Action::Sell, 30, 55, 0, at(10, 0)), false)
        .expect("close event");

    // Full consumption releases the entire remaining cost, exactly.
    assert_eq!(close.pnl_cents, 55 * 30 - (45 * 30 + 7));
    assert!(book.lot("MKT-A", Side::Yes).is_none());
    assert_eq!(book.open_lot_count(), 0);
}

#[test]
fn sell_fee_is_matched_pro_rata_against_consumed_quantity() {
    let mut book = LotBook::new();
    book.apply_buy(&trade("b1", Action::Buy, 10, 50, 0, at(9, 0)));

    // Sell 20 with only 10 tracked: fee 7 matched on 10/20 = 3.5 -> 4 (half
    // to even).
    let close = book
        .apply_sell(&trade("s1", Action::Sell, 20, 60, 7, at(10, 0)), false)
        .expect("close event");
    assert_eq!(close.quantity, 10);
    // net = 60*10 - 4 = 596; cost = 500; pnl = 96
    assert_eq!(close.pnl_cents, 96);
}

// =============================================================================
// ROUNDING DETERMINISM
// =============================================================================

#[test]
fn one_of_three_pro_rata_is_half_even_and_reproducible() {
    let run = || {
        let mut book = LotBook::new();
        book.apply_buy(&trade("b1", Action::Buy, 3, 33, 1, at(9, 0)));
        let close = book
            .apply_sell(&trade("s1", Action::Sell, 1, 50, 0, at(10, 0)), false)
            .expect("close event");
        let lot = book.lot("MKT-A", Side::Yes).expect("remainder");
        (close.pnl_cents, lot.qty_remaining, lot.cost_remaining_cents)
    };

    // cost 100, consume 1 of 3: pro_rata = round(100/3) = 33.
    let first = run();
    assert_eq!(first, (50 - 33, 2, 67));
    // Bit-for-bit identical across replays.
    for _ in 0..10 {
        assert_eq!(run(), first);
    }
}

#[test]
fn consuming_remainder_releases_exact_residual_cost() {
    let mut book = LotBook::new();
    book.apply_buy(&trade("b1", Action::Buy, 3, 33, 1, at(9, 0)));
    book.apply_sell(&trade("s1", Action::Sell, 1, 50, 0, at(10, 0)), false)
        .unwrap();
    let close = book
        .apply_sell(&trade("s2", Action::Sell, 2, 50, 0, at(11, 0)), false)
        .expect("close event");

    // Residual cost 67 is fully released; no cent is stranded.
    assert_eq!(close.pnl_cents, 100 - 67);
    assert!(book.lot("MKT-A", Side::Yes).is_none());
}

// =============================================================================
// OVERSELL
// =============================================================================

#[test]
fn sell_without_a_lot_produces_no_close() {
    let mut book = LotBook::new();
    let close = book.apply_sell(&trade("s1", Action::Sell, 10, 60, 0, at(10, 0)), false);
    assert!(close.is_none());
    assert_eq!(book.oversell_events, 1);
    assert_eq!(book.oversold_quantity, 10);
}

#[test]
fn oversell_clamps_and_records_the_excess() {
    let mut book = LotBook::new();
    book.apply_buy(&trade("b1", Action::Buy, 5, 40, 0, at(9, 0)));

    let close = book
        .apply_sell(&trade("s1", Action::Sell, 8, 50, 0, at(10, 0)), false)
        .expect("tracked part closes");
    assert_eq!(close.quantity, 5);
    assert_eq!(close.pnl_cents, 50 * 5 - 200);
    assert_eq!(book.oversell_events, 1);
    assert_eq!(book.oversold_quantity, 3);
    assert!(book.lot("MKT-A", Side::Yes).is_none());
}
