//! Arbitrage strategy implementation.
//!
//! Contains the core logic for:
//! - Concurrent order book collection
//! - Pairwise arbitrage detection
//! - Two-legged order execution
//! - Balance rebalancing between exchanges
//! - Reconciliation of placed orders into trades

mod balances;
mod collector;
mod detector;
mod executor;
mod rebalancer;
mod reconciler;
mod trader;

pub use balances::BalanceSheet;
pub use collector::OrderBookCollector;
pub use detector::{arbitrage_id, compute_arbitrage, detect, detect_stream, Arbitrage, ArbitrageDetector};
pub use executor::{clamp_volume, ExecutionReport, LegOutcome, TradeExecutor};
pub use rebalancer::{plan_transfers, BalanceRebalancer, RebalanceError, Transaction};
pub use reconciler::{ReconcileReport, TradeReconciler};
pub use trader::{ArbitrageTrader, CycleOutcome};
