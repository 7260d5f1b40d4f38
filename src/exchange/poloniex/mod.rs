//! Poloniex exchange integration.
//!
//! - Public order books through `returnOrderBook`
//! - Signed `tradingApi` commands for balances, limit orders, withdrawals,
//!   deposit addresses and per-order trades
//!
//! Poloniex quotes pairs as `QUOTE_BASE` (`BTC_ZEC` for `ZEC_BTC`).

mod client;
mod types;

pub use client::{PoloniexClient, EXCHANGE_NAME};
