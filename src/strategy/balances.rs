//! Point-in-time trading balances across all exchanges.

use crate::exchange::{Balances, ExchangeAdapter, ExchangeError};
use crate::utils::guarded_call;
use futures_util::future::try_join_all;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Trading balances of every exchange, fetched together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceSheet {
    balances: BTreeMap<String, Balances>,
}

impl BalanceSheet {
    /// Query all exchanges concurrently.
    ///
    /// Any single failure, a crashed request included, fails the whole
    /// snapshot: decisions are never made on a partial view of the funds.
    #[instrument(skip(adapters), name = "balance_snapshot")]
    pub async fn fetch(
        adapters: &[Arc<dyn ExchangeAdapter>],
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        let requests = adapters.iter().map(|adapter| async move {
            let balances = guarded_call(adapter, "trading balances", timeout, |adapter| async move {
                adapter.trading_balances().await
            })
            .await?;
            Ok::<_, ExchangeError>((adapter.name().to_string(), balances))
        });

        let balances: BTreeMap<String, Balances> = try_join_all(requests).await?.into_iter().collect();
        debug!(exchanges = balances.len(), "Balances fetched");

        Ok(Self { balances })
    }

    pub fn from_map(balances: BTreeMap<String, Balances>) -> Self {
        Self { balances }
    }

    /// Balance of `currency` on `exchange`, zero when unknown.
    pub fn get(&self, exchange: &str, currency: &str) -> Decimal {
        self.balances
            .get(exchange)
            .and_then(|b| b.get(currency))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// One currency across every exchange of the sheet, missing entries as zero.
    pub fn currency(&self, currency: &str) -> BTreeMap<String, Decimal> {
        self.balances
            .keys()
            .map(|exchange| (exchange.clone(), self.get(exchange, currency)))
            .collect()
    }

    pub fn total(&self, currency: &str) -> Decimal {
        self.balances
            .values()
            .filter_map(|b| b.get(currency))
            .copied()
            .sum()
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &str> {
        self.balances.keys().map(String::as_str)
    }
}
