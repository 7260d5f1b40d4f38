//! Venue-agnostic capability set implemented once per exchange.
//!
//! The engine only ever talks to exchanges through [`ExchangeAdapter`]:
//! - Order book collection for arbitrage detection
//! - Order placement for both legs of a trade
//! - Balances, withdrawals and deposit addresses for rebalancing
//! - Fill lookup for trade reconciliation

use super::error::ExchangeError;
use super::types::{Balances, Fill, OrderBook, Pair, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// How a withdrawal destination is addressed when funds leave an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressScheme {
    /// Ask the destination exchange for its deposit address.
    DepositAddress,
    /// Destinations are pre-registered on the origin under
    /// `"<DestinationName>-<CURRENCY>"` keys.
    NamedKey,
}

impl AddressScheme {
    /// Withdrawal key for a destination under the [`AddressScheme::NamedKey`] convention.
    pub fn named_key(destination: &str, currency: &str) -> String {
        format!("{}-{}", destination.replace(' ', "-"), currency)
    }
}

/// Capability set of one exchange account.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Display name, also used as the key in balances and persisted rows.
    fn name(&self) -> &str;

    /// Whether the exchange lists this pair.
    fn supports(&self, pair: &Pair) -> bool;

    /// Fetch and validate the current order book.
    async fn fetch_order_book(&self, pair: &Pair) -> Result<OrderBook, ExchangeError>;

    /// Submit an order; some exchanges return several ids for one submission.
    async fn place_order(
        &self,
        side: Side,
        pair: &Pair,
        price: Decimal,
        volume: Decimal,
    ) -> Result<Vec<String>, ExchangeError>;

    /// Available trading balances by currency.
    async fn trading_balances(&self) -> Result<Balances, ExchangeError>;

    /// Send `volume` of `currency` to `address`, returning the exchange's transfer id.
    async fn withdraw(
        &self,
        volume: Decimal,
        currency: &str,
        address: &str,
    ) -> Result<String, ExchangeError>;

    /// Deposit address for `currency` on this exchange.
    async fn payment_address(&self, currency: &str) -> Result<String, ExchangeError>;

    /// Fills recorded for a previously placed order.
    async fn fetch_fills(
        &self,
        _order_id: &str,
        _pair: &Pair,
        _side: Side,
    ) -> Result<Vec<Fill>, ExchangeError> {
        Err(ExchangeError::unsupported(self.name(), "fill lookup"))
    }

    fn address_scheme(&self) -> AddressScheme {
        AddressScheme::DepositAddress
    }

    /// Balance that reflects deposits still in flight to the trading account.
    async fn incoming_balance(&self, currency: &str) -> Result<Decimal, ExchangeError> {
        let balances = self.trading_balances().await?;
        Ok(balances.get(currency).copied().unwrap_or(Decimal::ZERO))
    }

    /// Called once after a deposit of `currency` has been observed.
    async fn settle_deposit(&self, _currency: &str) -> Result<(), ExchangeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_key_replaces_spaces() {
        assert_eq!(AddressScheme::named_key("Poloniex", "ZEC"), "Poloniex-ZEC");
        assert_eq!(AddressScheme::named_key("The Rock Trading", "BTC"), "The-Rock-Trading-BTC");
    }
}
