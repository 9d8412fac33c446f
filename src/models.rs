use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::cents::Cents;

/// Contract side of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "yes" => Some(Side::Yes),
            "no" => Some(Side::No),
            _ => None,
        }
    }
}

/// Fill direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Action::Buy),
            "sell" => Some(Action::Sell),
            _ => None,
        }
    }
}

/// Terminal outcome reported by the venue when a market resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketResult {
    Yes,
    No,
    Scalar,
    Void,
}

impl MarketResult {
    pub fn as_str(&self) -> &str {
        match self {
            MarketResult::Yes => "yes",
            MarketResult::No => "no",
            MarketResult::Scalar => "scalar",
            MarketResult::Void => "void",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "yes" => Some(MarketResult::Yes),
            "no" => Some(MarketResult::No),
            "scalar" => Some(MarketResult::Scalar),
            "void" => Some(MarketResult::Void),
            _ => None,
        }
    }
}

/// An executed fill. Immutable once stored; `external_id` is the idempotency
/// key, so re-inserting the same fill is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Local row id. 0 until the trade has been persisted; assigned by the DB
    /// and used to break replay-order ties between fills with the same
    /// execution timestamp.
    pub id: i64,
    pub external_id: String,
    pub ticker: String,
    pub side: Side,
    pub action: Action,
    /// Contracts filled, always positive.
    pub quantity: i64,
    /// Price per contract in cents, 0..=100.
    pub price_cents: Cents,
    /// Fee charged for this fill, >= 0.
    pub fee_cents: Cents,
    pub executed_at: DateTime<Utc>,
}

/// A market settlement. A `void` result has no accounting effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub ticker: String,
    pub result: MarketResult,
    /// Settlement value in cents, required iff `result == Scalar`.
    pub value: Option<Cents>,
    pub settled_at: DateTime<Utc>,
}

/// Current-position projection, one row per ticker. Rows are never deleted:
/// a ticker absent from a venue snapshot is marked closed instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub side: Side,
    pub quantity: i64,
    pub avg_price_cents: Cents,
    /// Realized PnL as reported by the venue snapshot.
    pub realized_pnl_cents: Cents,
    /// Externally supplied mark, unknown until a provider delivers one.
    pub current_price_cents: Option<Cents>,
    /// Derived from the mark; never guessed when the mark is unknown.
    pub unrealized_pnl_cents: Option<Cents>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// Aggregate profit/loss view, computed on demand and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnLSummary {
    pub realized_pnl_cents: Cents,
    /// Sum over open positions with a known mark; `None` when open positions
    /// exist but none of them have a mark.
    pub unrealized_pnl_cents: Option<Cents>,
    pub total_pnl_cents: Cents,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate: f64,
    pub avg_win_cents: Cents,
    pub avg_loss_cents: Cents,
    pub profit_factor: f64,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub sync_batch_size: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./ledgerbot.db".to_string());

        let sync_batch_size = std::env::var("SYNC_BATCH_SIZE")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);

        Ok(Self {
            database_path,
            sync_batch_size,
        })
    }
}
