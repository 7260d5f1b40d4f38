//! Construction of the live adapters from the credentials file.

use super::hitbtc::{self, HitbtcClient};
use super::kraken::{self, KrakenClient};
use super::poloniex::{self, PoloniexClient};
use super::ExchangeAdapter;
use crate::config::{Credentials, NetworkConfig};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Exchanges this build can trade on.
pub const SUPPORTED_EXCHANGES: &[&str] = &[
    hitbtc::EXCHANGE_NAME,
    kraken::EXCHANGE_NAME,
    poloniex::EXCHANGE_NAME,
];

/// Instantiate one adapter per exchange present in `credentials`.
///
/// Entries for unknown exchanges are logged and ignored.
pub fn build_adapters(
    credentials: &Credentials,
    network: &NetworkConfig,
) -> Result<Vec<Arc<dyn ExchangeAdapter>>> {
    let timeout = network.request_timeout();
    let mut adapters: Vec<Arc<dyn ExchangeAdapter>> = Vec::new();

    for name in credentials.exchanges() {
        let Some(credential) = credentials.get(name) else {
            continue;
        };

        let adapter: Arc<dyn ExchangeAdapter> = match name {
            poloniex::EXCHANGE_NAME => Arc::new(
                PoloniexClient::new(credential, timeout).context("Failed to create Poloniex client")?,
            ),
            hitbtc::EXCHANGE_NAME => Arc::new(
                HitbtcClient::new(credential, timeout).context("Failed to create Hitbtc client")?,
            ),
            kraken::EXCHANGE_NAME => Arc::new(
                KrakenClient::new(credential, timeout).context("Failed to create Kraken client")?,
            ),
            other => {
                warn!(exchange = %other, supported = ?SUPPORTED_EXCHANGES, "Ignoring credentials for unknown exchange");
                continue;
            }
        };

        info!(exchange = %name, "Exchange adapter ready");
        adapters.push(adapter);
    }

    Ok(adapters)
}
