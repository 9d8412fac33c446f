//! SQLite persistence for trades, settlements, and position projections.
//!
//! Trades and settlements are append-only; duplicates are absorbed by
//! `INSERT OR IGNORE` against the uniqueness key rather than by catching
//! constraint violations. Replay ordering is `executed_at ASC, id ASC`, so
//! fills sharing a timestamp keep their insertion order.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::sync::Arc;
use tracing::debug;

use crate::ledger::cents::Cents;
use crate::ledger::pnl::PnLEngine;
use crate::models::{Action, MarketResult, Position, Settlement, Side, Trade};

/// Timestamps are stored as unix milliseconds to preserve sub-second replay
/// ordering of venue fills.
const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    ticker TEXT NOT NULL,
    side TEXT NOT NULL,
    action TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    price_cents INTEGER NOT NULL,
    fee_cents INTEGER NOT NULL,
    executed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trades_replay
    ON trades(executed_at ASC, id ASC);

CREATE INDEX IF NOT EXISTS idx_trades_ticker
    ON trades(ticker, executed_at ASC, id ASC);

CREATE TABLE IF NOT EXISTS settlements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker TEXT NOT NULL,
    market_result TEXT NOT NULL,
    settlement_value INTEGER,
    settled_at INTEGER NOT NULL,
    UNIQUE(ticker, settled_at)
);

CREATE INDEX IF NOT EXISTS idx_settlements_ts
    ON settlements(settled_at ASC, id ASC);

CREATE TABLE IF NOT EXISTS positions (
    ticker TEXT PRIMARY KEY,
    side TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    avg_price_cents INTEGER NOT NULL,
    realized_pnl_cents INTEGER NOT NULL,
    current_price_cents INTEGER,
    opened_at INTEGER NOT NULL,
    closed_at INTEGER
) WITHOUT ROWID;
"#;

#[derive(Clone)]
pub struct LedgerDb {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerDb {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open ledger db at {}", db_path))?;
        conn.execute_batch(SCHEMA_SQL).context("apply ledger schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // -------------------------------------------------------------------------
    // Trades
    // -------------------------------------------------------------------------

    /// Insert a fill unless its `external_id` is already present. Returns
    /// whether a new row was written.
    pub fn insert_trade_if_absent(&self, trade: &Trade) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO trades \
             (external_id, ticker, side, action, quantity, price_cents, fee_cents, executed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &trade.external_id,
                &trade.ticker,
                trade.side.as_str(),
                trade.action.as_str(),
                trade.quantity,
                trade.price_cents,
                trade.fee_cents,
                trade.executed_at.timestamp_millis(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Insert a batch of fills inside one transaction, skipping duplicates.
    /// Returns the count of newly inserted rows.
    pub fn insert_trades_batch(&self, trades: &[Trade]) -> Result<u64> {
        if trades.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("begin trade batch")?;
        let mut inserted = 0u64;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO trades \
                 (external_id, ticker, side, action, quantity, price_cents, fee_cents, executed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for trade in trades {
                let changed = stmt.execute(params![
                    &trade.external_id,
                    &trade.ticker,
                    trade.side.as_str(),
                    trade.action.as_str(),
                    trade.quantity,
                    trade.price_cents,
                    trade.fee_cents,
                    trade.executed_at.timestamp_millis(),
                ])?;
                inserted += changed as u64;
            }
        }
        tx.commit().context("commit trade batch")?;
        debug!(batch = trades.len(), inserted, "trade batch committed");
        Ok(inserted)
    }

    /// All stored trades in replay order.
    pub fn load_trades(&self) -> Result<Vec<Trade>> {
        self.load_trades_where(None)
    }

    /// Stored trades for one ticker in replay order.
    pub fn load_trades_for_ticker(&self, ticker: &str) -> Result<Vec<Trade>> {
        self.load_trades_where(Some(ticker))
    }

    fn load_trades_where(&self, ticker: Option<&str>) -> Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let sql_all = "SELECT id, external_id, ticker, side, action, quantity, price_cents, \
                       fee_cents, executed_at FROM trades ORDER BY executed_at ASC, id ASC";
        let sql_one = "SELECT id, external_id, ticker, side, action, quantity, price_cents, \
                       fee_cents, executed_at FROM trades WHERE ticker = ?1 \
                       ORDER BY executed_at ASC, id ASC";

        type Row = (i64, String, String, String, String, i64, Cents, Cents, i64);
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Row> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            ))
        };

        let mut raw: Vec<Row> = Vec::new();
        if let Some(ticker) = ticker {
            let mut stmt = conn.prepare_cached(sql_one)?;
            for row in stmt.query_map(params![ticker], map)? {
                raw.push(row?);
            }
        } else {
            let mut stmt = conn.prepare_cached(sql_all)?;
            for row in stmt.query_map([], map)? {
                raw.push(row?);
            }
        }

        raw.into_iter()
            .map(|(id, external_id, ticker, side, action, quantity, price, fee, ts)| {
                Ok(Trade {
                    id,
                    external_id,
                    side: Side::parse(&side)
                        .ok_or_else(|| anyhow!("trade {}: bad side {:?}", id, side))?,
                    action: Action::parse(&action)
                        .ok_or_else(|| anyhow!("trade {}: bad action {:?}", id, action))?,
                    ticker,
                    quantity,
                    price_cents: price,
                    fee_cents: fee,
                    executed_at: millis_to_datetime(ts)
                        .ok_or_else(|| anyhow!("trade {}: bad timestamp {}", id, ts))?,
                })
            })
            .collect()
    }

    /// Execution time of the most recent stored fill, for incremental sync.
    pub fn latest_trade_executed_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT MAX(executed_at) FROM trades")?;
        let ts: Option<i64> = stmt.query_row([], |row| row.get(0))?;
        Ok(ts.and_then(millis_to_datetime))
    }

    pub fn trade_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT COUNT(*) FROM trades")?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(count as u64)
    }

    // -------------------------------------------------------------------------
    // Settlements
    // -------------------------------------------------------------------------

    /// Insert a settlement unless `(ticker, settled_at)` is already present.
    pub fn insert_settlement_if_absent(&self, settlement: &Settlement) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO settlements \
             (ticker, market_result, settlement_value, settled_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &settlement.ticker,
                settlement.result.as_str(),
                settlement.value,
                settlement.settled_at.timestamp_millis(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// All stored settlements ordered by settlement time.
    pub fn load_settlements(&self) -> Result<Vec<Settlement>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, ticker, market_result, settlement_value, settled_at \
             FROM settlements ORDER BY settled_at ASC, id ASC",
        )?;
        let mut raw: Vec<(i64, String, String, Option<Cents>, i64)> = Vec::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })? {
            raw.push(row?);
        }

        raw.into_iter()
            .map(|(id, ticker, result, value, ts)| {
                Ok(Settlement {
                    ticker,
                    result: MarketResult::parse(&result)
                        .ok_or_else(|| anyhow!("settlement {}: bad result {:?}", id, result))?,
                    value,
                    settled_at: millis_to_datetime(ts)
                        .ok_or_else(|| anyhow!("settlement {}: bad timestamp {}", id, ts))?,
                })
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Positions
    // -------------------------------------------------------------------------

    /// Create or overwrite the projection row for a ticker.
    pub fn save_position(&self, position: &Position) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO positions \
             (ticker, side, quantity, avg_price_cents, realized_pnl_cents, \
              current_price_cents, opened_at, closed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(ticker) DO UPDATE SET \
                side = excluded.side, \
                quantity = excluded.quantity, \
                avg_price_cents = excluded.avg_price_cents, \
                realized_pnl_cents = excluded.realized_pnl_cents, \
                current_price_cents = excluded.current_price_cents, \
                opened_at = excluded.opened_at, \
                closed_at = excluded.closed_at",
            params![
                &position.ticker,
                position.side.as_str(),
                position.quantity,
                position.avg_price_cents,
                position.realized_pnl_cents,
                position.current_price_cents,
                position.opened_at.timestamp_millis(),
                position.closed_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    /// Mark a position closed in place: zero quantity, stamped `closed_at`.
    pub fn close_position(&self, ticker: &str, closed_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE positions SET quantity = 0, closed_at = ?2 \
             WHERE ticker = ?1 AND closed_at IS NULL",
            params![ticker, closed_at.timestamp_millis()],
        )?;
        Ok(changed == 1)
    }

    /// Record the externally supplied mark for a ticker.
    pub fn update_mark(&self, ticker: &str, mark_price_cents: Option<Cents>) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE positions SET current_price_cents = ?2 WHERE ticker = ?1",
            params![ticker, mark_price_cents],
        )?;
        Ok(changed == 1)
    }

    pub fn get_position(&self, ticker: &str) -> Result<Option<Position>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT ticker, side, quantity, avg_price_cents, realized_pnl_cents, \
             current_price_cents, opened_at, closed_at FROM positions WHERE ticker = ?1",
        )?;
        let mut rows = stmt.query(params![ticker])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        position_from_row(row).map(Some)
    }

    /// Position projections, open first then by ticker.
    pub fn list_positions(&self, include_closed: bool) -> Result<Vec<Position>> {
        let conn = self.conn.lock();
        let sql = if include_closed {
            "SELECT ticker, side, quantity, avg_price_cents, realized_pnl_cents, \
             current_price_cents, opened_at, closed_at FROM positions \
             ORDER BY closed_at IS NOT NULL, ticker ASC"
        } else {
            "SELECT ticker, side, quantity, avg_price_cents, realized_pnl_cents, \
             current_price_cents, opened_at, closed_at FROM positions \
             WHERE closed_at IS NULL ORDER BY ticker ASC"
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(position_from_row(row)?);
        }
        Ok(out)
    }

    /// Tickers with an open (not yet closed) projection row.
    pub fn open_tickers(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT ticker FROM positions WHERE closed_at IS NULL ORDER BY ticker ASC",
        )?;
        let mut out = Vec::new();
        for row in stmt.query_map([], |row| row.get::<_, String>(0))? {
            out.push(row?);
        }
        Ok(out)
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn position_from_row(row: &rusqlite::Row<'_>) -> Result<Position> {
    let ticker: String = row.get(0)?;
    let side: String = row.get(1)?;
    let quantity: i64 = row.get(2)?;
    let avg_price_cents: Cents = row.get(3)?;
    let realized_pnl_cents: Cents = row.get(4)?;
    let current_price_cents: Option<Cents> = row.get(5)?;
    let opened_at: i64 = row.get(6)?;
    let closed_at: Option<i64> = row.get(7)?;

    let mut position = Position {
        side: Side::parse(&side)
            .ok_or_else(|| anyhow!("position {}: bad side {:?}", ticker, side))?,
        quantity,
        avg_price_cents,
        realized_pnl_cents,
        current_price_cents,
        unrealized_pnl_cents: None,
        opened_at: millis_to_datetime(opened_at)
            .ok_or_else(|| anyhow!("position {}: bad opened_at {}", ticker, opened_at))?,
        closed_at: match closed_at {
            Some(ms) => Some(
                millis_to_datetime(ms)
                    .ok_or_else(|| anyhow!("position {}: bad closed_at {}", ticker, ms))?,
            ),
            None => None,
        },
        ticker,
    };
    if position.is_open() {
        position.unrealized_pnl_cents =
            PnLEngine::unrealized_pnl_cents(&position, position.current_price_cents);
    }
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_db() -> (tempfile::TempDir, LedgerDb) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger_test.db");
        let db = LedgerDb::new(path.to_str().expect("utf8 path")).expect("open db");
        (dir, db)
    }

    fn trade(external_id: &str, ticker: &str, action: Action, qty: i64, price: Cents) -> Trade {
        Trade {
            id: 0,
            external_id: external_id.to_string(),
            ticker: ticker.to_string(),
            side: Side::Yes,
            action,
            quantity: qty,
            price_cents: price,
            fee_cents: 0,
            executed_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn insert_if_absent_dedupes_on_external_id() {
        let (_dir, db) = temp_db();
        let t = trade("f-1", "MKT-A", Action::Buy, 10, 45);

        assert!(db.insert_trade_if_absent(&t).unwrap());
        assert!(!db.insert_trade_if_absent(&t).unwrap());
        assert_eq!(db.trade_count().unwrap(), 1);
    }

    #[test]
    fn batch_insert_counts_only_new_rows() {
        let (_dir, db) = temp_db();
        let a = trade("f-1", "MKT-A", Action::Buy, 10, 45);
        let b = trade("f-2", "MKT-A", Action::Buy, 5, 50);

        assert_eq!(db.insert_trades_batch(&[a.clone(), b.clone()]).unwrap(), 2);
        // Overlapping re-ingest: one duplicate, one new.
        let c = trade("f-3", "MKT-A", Action::Sell, 8, 60);
        assert_eq!(db.insert_trades_batch(&[b, c]).unwrap(), 1);
        assert_eq!(db.trade_count().unwrap(), 3);
    }

    #[test]
    fn trades_load_in_replay_order() {
        let (_dir, db) = temp_db();
        let mut early = trade("f-early", "MKT-A", Action::Buy, 1, 40);
        early.executed_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let late = trade("f-late", "MKT-A", Action::Buy, 1, 41);
        // Same-timestamp fills keep insertion order via row id.
        let tie_a = trade("f-tie-a", "MKT-A", Action::Buy, 1, 42);
        let tie_b = trade("f-tie-b", "MKT-A", Action::Buy, 1, 43);

        db.insert_trade_if_absent(&late).unwrap();
        db.insert_trade_if_absent(&early).unwrap();
        db.insert_trade_if_absent(&tie_a).unwrap();
        db.insert_trade_if_absent(&tie_b).unwrap();

        let loaded = db.load_trades().unwrap();
        let ids: Vec<&str> = loaded.iter().map(|t| t.external_id.as_str()).collect();
        assert_eq!(ids, vec!["f-early", "f-late", "f-tie-a", "f-tie-b"]);
    }

    #[test]
    fn settlement_dedupe_and_roundtrip() {
        let (_dir, db) = temp_db();
        let s = Settlement {
            ticker: "MKT-A".to_string(),
            result: MarketResult::Scalar,
            value: Some(37),
            settled_at: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
        };
        assert!(db.insert_settlement_if_absent(&s).unwrap());
        assert!(!db.insert_settlement_if_absent(&s).unwrap());

        let loaded = db.load_settlements().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].result, MarketResult::Scalar);
        assert_eq!(loaded[0].value, Some(37));
    }

    #[test]
    fn position_save_close_and_list() {
        let (_dir, db) = temp_db();
        let opened = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let pos = Position {
            ticker: "MKT-A".to_string(),
            side: Side::Yes,
            quantity: 25,
            avg_price_cents: 47,
            realized_pnl_cents: 120,
            current_price_cents: Some(60),
            unrealized_pnl_cents: None,
            opened_at: opened,
            closed_at: None,
        };
        db.save_position(&pos).unwrap();

        let loaded = db.get_position("MKT-A").unwrap().expect("position");
        assert!(loaded.is_open());
        // Derived on read: (60 - 47) * 25.
        assert_eq!(loaded.unrealized_pnl_cents, Some(325));

        let closed_at = Utc.with_ymd_and_hms(2024, 3, 3, 8, 0, 0).unwrap();
        assert!(db.close_position("MKT-A", closed_at).unwrap());
        // Second close is a no-op.
        assert!(!db.close_position("MKT-A", closed_at).unwrap());

        let loaded = db.get_position("MKT-A").unwrap().expect("position");
        assert_eq!(loaded.quantity, 0);
        assert_eq!(loaded.closed_at, Some(closed_at));
        assert_eq!(loaded.unrealized_pnl_cents, None);

        assert!(db.list_positions(false).unwrap().is_empty());
        assert_eq!(db.list_positions(true).unwrap().len(), 1);
    }

    #[test]
    fn latest_trade_timestamp_tracks_max() {
        let (_dir, db) = temp_db();
        assert_eq!(db.latest_trade_executed_at().unwrap(), None);

        let mut t = trade("f-1", "MKT-A", Action::Buy, 1, 50);
        t.executed_at = Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap();
        db.insert_trade_if_absent(&t).unwrap();
        assert_eq!(db.latest_trade_executed_at().unwrap(), Some(t.executed_at));
    }
}
