//! Portfolio ledger.
//!
//! Tracks positions in binary/scalar-outcome contracts and computes realized
//! and unrealized PnL from venue fills and market settlements.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────────────┐
//! │ TradingVenue│────▶│ FillIngestor │────▶│  LedgerDb (sqlite)   │
//! │ (paged)     │     │ (idempotent) │     │  trades/settlements  │
//! └─────────────┘     └──────────────┘     └──────────┬───────────┘
//!                                                     │ ordered replay
//!                                                     ▼
//!                     ┌──────────────┐     ┌──────────────────────┐
//!                     │ Settlement   │────▶│  LotBook (FIFO)      │
//!                     │ Synthesizer  │     │  close events        │
//!                     └──────────────┘     └──────────┬───────────┘
//!                                                     │
//!                     ┌──────────────┐     ┌──────────▼───────────┐
//!                     │ Position     │◀────│  PnLEngine           │
//!                     │ Projector    │     │  realized/unrealized │
//!                     └──────────────┘     └──────────────────────┘
//! ```
//!
//! # Correctness properties
//!
//! - Ingestion is idempotent on the venue's fill id; re-syncing overlapping
//!   pages has no additional effect.
//! - Replay is deterministic: trades ordered by `(executed_at, row id)`,
//!   integer-cent arithmetic, half-even pro-rata rounding.
//! - Realized PnL is the exact sum of individual close events.
//! - A non-void, supported settlement leaves no open lot for its ticker.

pub mod cents;
pub mod ingest;
pub mod lots;
pub mod pnl;
pub mod positions;
pub mod settlement;
pub mod store;

#[cfg(test)]
mod lots_tests;
#[cfg(test)]
mod settlement_tests;

// Re-exports for convenience
pub use cents::{parse_dollars_to_cents, round_half_even, Cents, CentsParseError};
pub use ingest::FillIngestor;
pub use lots::{CloseEvent, Lot, LotBook, LotKey};
pub use pnl::{PnLEngine, ReplayReport};
pub use positions::{PositionProjector, PositionSyncReport};
pub use settlement::{settlement_prices, synthesize_closes};
pub use store::LedgerDb;
