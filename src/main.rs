//! LedgerBot - Portfolio ledger for binary-outcome contracts
//!
//! Synchronizes fills, settlements, and positions from an exported venue
//! record file, replays them through the FIFO matcher, and reports PnL.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledgerbot_backend::ledger::ingest::FillIngestor;
use ledgerbot_backend::ledger::pnl::{PnLEngine, ReplayReport};
use ledgerbot_backend::ledger::positions::PositionProjector;
use ledgerbot_backend::ledger::store::LedgerDb;
use ledgerbot_backend::models::Config;
use ledgerbot_backend::venue::FileVenue;

#[derive(Parser)]
#[command(name = "ledgerbot", about = "Portfolio ledger for binary-outcome contracts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest venue records from a fixture file, replay, and reconcile
    /// positions.
    Sync {
        /// Exported venue records (JSON). Falls back to FIXTURE_PATH.
        #[arg(long, env = "FIXTURE_PATH")]
        fixture: String,
        /// Only ingest fills at or after the most recent stored fill.
        #[arg(long)]
        incremental: bool,
    },
    /// Replay the local ledger and log the PnL summary.
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing();

    let cli = Cli::parse();
    let db = LedgerDb::new(&config.database_path)
        .with_context(|| format!("open ledger db {}", config.database_path))?;

    match cli.command {
        Command::Sync { fixture, incremental } => {
            let venue = FileVenue::load(&fixture)?;

            let min_ts = if incremental {
                db.latest_trade_executed_at()?
            } else {
                None
            };
            let ingestor = FillIngestor::new(&db).with_batch_size(config.sync_batch_size);
            let new_fills = ingestor.sync_fills(&venue, min_ts).await?;
            let new_settlements = ingestor.sync_settlements(&venue).await?;
            info!(new_fills, new_settlements, "ingestion complete");

            let report = run_replay(&db)?;
            let projector = PositionProjector::new(&db);
            projector.sync_positions(&venue, &report.book, Utc::now()).await?;
            let marked = projector.refresh_marks(&venue).await?;
            info!(marked, "marks refreshed");

            log_summary(&db, &report)?;
        }
        Command::Summary => {
            let report = run_replay(&db)?;
            log_summary(&db, &report)?;
        }
    }

    Ok(())
}

fn run_replay(db: &LedgerDb) -> Result<ReplayReport> {
    let trades = db.load_trades()?;
    let settlements = db.load_settlements()?;
    let report = PnLEngine::replay(&trades, &settlements);
    if report.book.oversell_events > 0 {
        warn!(
            events = report.book.oversell_events,
            contracts = report.book.oversold_quantity,
            "replay clamped sells beyond tracked inventory; check for missing buy fills"
        );
    }
    Ok(report)
}

fn log_summary(db: &LedgerDb, report: &ReplayReport) -> Result<()> {
    let positions = db.list_positions(false)?;
    let summary = PnLEngine::summarize(report, &positions);
    info!(
        realized_cents = summary.realized_pnl_cents,
        unrealized_cents = ?summary.unrealized_pnl_cents,
        total_cents = summary.total_pnl_cents,
        total_trades = summary.total_trades,
        winning = summary.winning_trades,
        losing = summary.losing_trades,
        win_rate = summary.win_rate,
        avg_win_cents = summary.avg_win_cents,
        avg_loss_cents = summary.avg_loss_cents,
        profit_factor = summary.profit_factor,
        open_positions = positions.len(),
        "portfolio summary"
    );
    Ok(())
}

/// Initialize tracing with env-filter overrides
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledgerbot_backend=info,ledgerbot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
