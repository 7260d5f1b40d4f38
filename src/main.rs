//! Arbitrage Trader - Main Entry Point
//!
//! Runs the trading loop and the trade reconciler, or one-shot maintenance
//! commands against the exchanges and the local ledger.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use arb_trader::config::{Config, Credentials};
use arb_trader::exchange::{build_adapters, ExchangeAdapter, Pair, PaperHub};
use arb_trader::persistence::PersistenceManager;
use arb_trader::strategy::{ArbitrageTrader, BalanceSheet, TradeReconciler};
use arb_trader::utils::describe_join_error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Arbitrage Trader CLI
#[derive(Parser)]
#[command(name = "arb-trader")]
#[command(version, about = "Cross-exchange arbitrage with automatic fund rebalancing")]
struct Cli {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Exchange credentials JSON file (overrides `credentials_path`)
    #[arg(long, global = true)]
    credentials: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop and the reconciler (default)
    Run {
        /// Pair to trade, e.g. zec_btc
        #[arg(short, long)]
        pair: Option<String>,

        /// Simulate orders and transfers against live order books
        #[arg(long)]
        paper: bool,
    },

    /// Reconcile pending orders once and exit
    Reconcile,

    /// Show trading balances of every exchange
    Balances {
        /// Pair whose currencies are shown
        #[arg(short, long)]
        pair: Option<String>,
    },

    /// Show what the ledger holds
    Status {
        /// Path to SQLite database (default: `database.path`)
        #[arg(short, long)]
        db: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load(cli.config.as_deref())?;
    config.validate().context("Invalid configuration")?;

    let credentials_path = cli
        .credentials
        .clone()
        .unwrap_or_else(|| config.credentials_path.clone());

    match cli.command.unwrap_or(Commands::Run {
        pair: None,
        paper: false,
    }) {
        Commands::Run { pair, paper } => run(&config, &credentials_path, pair.as_deref(), paper).await,
        Commands::Reconcile => reconcile_once(&config, &credentials_path).await,
        Commands::Balances { pair } => show_balances(&config, &credentials_path, pair.as_deref()).await,
        Commands::Status { db } => show_status(db.as_deref().unwrap_or(&config.database.path)),
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "arb-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("arb_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn load_adapters(config: &Config, credentials_path: &str) -> Result<Vec<Arc<dyn ExchangeAdapter>>> {
    let credentials = Credentials::load(credentials_path)?;
    let adapters = build_adapters(&credentials, &config.network)?;
    anyhow::ensure!(
        !adapters.is_empty(),
        "No supported exchange configured in {}",
        credentials_path
    );
    Ok(adapters)
}

/// Paper runs keep their own ledger next to the live one.
fn paper_database_path(path: &str) -> PathBuf {
    let path = Path::new(path);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "arb_trader".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}_paper.{}", stem, ext.to_string_lossy()),
        None => format!("{}_paper", stem),
    };
    path.with_file_name(name)
}

async fn run(config: &Config, credentials_path: &str, pair: Option<&str>, paper: bool) -> Result<()> {
    let pair = Pair::parse(pair.unwrap_or(&config.trading.pair)).context("Unknown pair")?;
    let live = load_adapters(config, credentials_path)?;

    let (adapters, db_path) = if paper {
        warn!("PAPER MODE - orders and transfers are simulated");
        let hub = PaperHub::new();
        let mut adapters: Vec<Arc<dyn ExchangeAdapter>> = Vec::with_capacity(live.len());
        for adapter in &live {
            hub.seed_from(adapter.as_ref())
                .await
                .with_context(|| format!("Failed to seed paper balances from {}", adapter.name()))?;
            adapters.push(Arc::new(hub.mirror(Arc::clone(adapter))));
        }
        (adapters, paper_database_path(&config.database.path))
    } else {
        warn!("LIVE TRADING MODE - real funds at risk");
        (live, PathBuf::from(&config.database.path))
    };

    let store = Arc::new(PersistenceManager::new(&db_path)?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pair = %pair,
        exchanges = ?adapters.iter().map(|a| a.name()).collect::<Vec<_>>(),
        database = %db_path.display(),
        "Arbitrage trader starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let reconciler = TradeReconciler::new(
        &adapters,
        Arc::clone(&store),
        config.reconcile.interval(),
        config.reconcile.throttle(),
        config.network.request_timeout(),
    );
    let reconcile_shutdown = shutdown_rx.clone();
    let reconcile_task = tokio::spawn(async move { reconciler.run(reconcile_shutdown).await });

    let trader = ArbitrageTrader::new(pair, config, adapters, store);
    let trader_task = tokio::spawn(async move { trader.run(shutdown_rx).await });

    if let Err(e) = trader_task.await {
        error!(reason = %describe_join_error(e), "Trading task failed");
    }
    if let Err(e) = reconcile_task.await {
        error!(reason = %describe_join_error(e), "Reconciler task failed");
    }

    info!("Arbitrage trader shutdown complete");
    Ok(())
}

async fn reconcile_once(config: &Config, credentials_path: &str) -> Result<()> {
    let adapters = load_adapters(config, credentials_path)?;
    let store = Arc::new(PersistenceManager::new(&config.database.path)?);

    let reconciler = TradeReconciler::new(
        &adapters,
        store,
        config.reconcile.interval(),
        config.reconcile.throttle(),
        config.network.request_timeout(),
    );

    let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let report = reconciler.run_cycle(&mut shutdown_rx).await?;

    println!("Pending orders:   {}", report.pending);
    println!("Reconciled:       {}", report.reconciled);
    println!("Trades saved:     {}", report.trades_saved);
    println!("Still unfilled:   {}", report.unfilled);
    println!("Skipped / failed: {} / {}", report.skipped, report.failed);
    Ok(())
}

async fn show_balances(config: &Config, credentials_path: &str, pair: Option<&str>) -> Result<()> {
    let pair = Pair::parse(pair.unwrap_or(&config.trading.pair)).context("Unknown pair")?;
    let adapters = load_adapters(config, credentials_path)?;
    let sheet = BalanceSheet::fetch(&adapters, config.network.request_timeout()).await?;

    println!("{:<12} {:>20} {:>20}", "Exchange", pair.base, pair.quote);
    for exchange in sheet.exchanges() {
        println!(
            "{:<12} {:>20} {:>20}",
            exchange,
            sheet.get(exchange, &pair.base),
            sheet.get(exchange, &pair.quote)
        );
    }
    println!(
        "{:<12} {:>20} {:>20}",
        "Total",
        sheet.total(&pair.base),
        sheet.total(&pair.quote)
    );
    Ok(())
}

fn show_status(db_path: &str) -> Result<()> {
    if !Path::new(db_path).exists() {
        println!("Database not found: {}", db_path);
        println!("The trader has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let store = PersistenceManager::new(db_path)?;
    let summary = store.summary()?;

    println!("Ledger {}", db_path);
    println!("  Arbitrages:    {}", summary.arbitrages);
    println!("  Order acks:    {} ({} pending)", summary.order_acks, summary.pending_acks);
    println!("  Trades:        {}", summary.trades);
    println!("  Transfers:     {}", summary.transfers);

    let volumes = store.trade_volumes()?;
    if !volumes.is_empty() {
        println!("\nTraded volume");
        for v in volumes {
            println!("  {:<12} {:<4} {:>4} trades {:>20}", v.exchanger, v.side.as_str(), v.trades, v.quantity);
        }
    }

    let transfers = store.recent_transfers(10)?;
    if !transfers.is_empty() {
        println!("\nRecent transfers");
        for t in transfers {
            println!(
                "  {} {:>16} {:<5} {} -> {} ({})",
                t.timestamp.format("%Y-%m-%d %H:%M:%S"),
                t.amount,
                t.currency,
                t.origin,
                t.destination,
                t.withdrawal_id
            );
        }
    }

    Ok(())
}
