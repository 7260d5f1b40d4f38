//! Exchange integrations for cross-exchange arbitrage.
//!
//! Every venue implements [`ExchangeAdapter`]; the engine never talks to a
//! concrete client directly.
//!
//! ## Live venues
//! - Poloniex: limit orders, cached deposit addresses
//! - Hitbtc: market IOC orders in lots, main/trading account split
//! - Kraken: market orders, withdrawals to named keys
//!
//! ## Paper venue
//! [`PaperHub`] / [`PaperExchange`] simulate balances, fills and delayed
//! transfers for tests and dry runs.

mod auth;
mod error;
pub mod hitbtc;
mod http;
pub mod kraken;
pub mod mock;
pub mod poloniex;
mod registry;
mod traits;
mod types;

pub use error::ExchangeError;
pub use hitbtc::HitbtcClient;
pub use kraken::KrakenClient;
pub use mock::{PaperExchange, PaperHub};
pub use poloniex::PoloniexClient;
pub use registry::{build_adapters, SUPPORTED_EXCHANGES};
pub use traits::{AddressScheme, ExchangeAdapter};
#[cfg(test)]
pub use traits::MockExchangeAdapter;
pub use types::*;
