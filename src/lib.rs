//! # Arbitrage Trader
//!
//! Cross-exchange arbitrage for cryptocurrency pairs: buys where a pair is
//! cheap, sells where it is expensive, and moves funds back between exchanges
//! so that every venue can keep trading.
//!
//! ## Architecture
//!
//! - `config`: Configuration and credential loading
//! - `exchange`: Exchange adapters (Poloniex, Hitbtc, Kraken) and the paper venue
//! - `strategy`: Collection, detection, execution, rebalancing and reconciliation
//! - `persistence`: SQLite ledger of arbitrages, orders, trades and transfers
//! - `utils`: Decimal helpers, task boundaries and cancellable waits

pub mod config;
pub mod exchange;
pub mod persistence;
pub mod strategy;
pub mod utils;

pub use config::Config;
