//! Simulated exchanges for paper trading and tests.
//!
//! A [`PaperHub`] holds the balances of every simulated account so that
//! withdrawals from one [`PaperExchange`] land on another. Orders fill
//! immediately at the requested price; transfers arrive after a delay.

use super::error::ExchangeError;
use super::traits::{AddressScheme, ExchangeAdapter};
use super::types::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct HubState {
    balances: HashMap<String, Balances>,
    fills: HashMap<String, Vec<Fill>>,
    next_order: u64,
    next_transfer: u64,
}

/// Shared ledger of all simulated accounts.
#[derive(Debug, Clone)]
pub struct PaperHub {
    state: Arc<RwLock<HubState>>,
    transfer_delay: Duration,
    withdrawal_fee: Decimal,
}

impl Default for PaperHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(HubState::default())),
            transfer_delay: Duration::from_secs(1),
            withdrawal_fee: Decimal::ZERO,
        }
    }

    /// Time between a withdrawal and the matching deposit.
    pub fn with_transfer_delay(mut self, delay: Duration) -> Self {
        self.transfer_delay = delay;
        self
    }

    /// Flat amount deducted from every withdrawal while in flight.
    pub fn with_withdrawal_fee(mut self, fee: Decimal) -> Self {
        self.withdrawal_fee = fee;
        self
    }

    /// A simulated exchange backed by this hub.
    pub fn exchange(&self, name: &str) -> PaperExchange {
        PaperExchange {
            name: name.to_string(),
            hub: self.clone(),
            fee_rate: Decimal::ZERO,
            scheme: AddressScheme::DepositAddress,
            books: Mutex::new(HashMap::new()),
            feed: None,
        }
    }

    /// A simulated exchange that reads order books from a live adapter.
    pub fn mirror(&self, feed: Arc<dyn ExchangeAdapter>) -> PaperExchange {
        let mut exchange = self.exchange(feed.name());
        exchange.scheme = feed.address_scheme();
        exchange.feed = Some(feed);
        exchange
    }

    pub async fn set_balance(&self, exchange: &str, currency: &str, amount: Decimal) {
        let mut state = self.state.write().await;
        state
            .balances
            .entry(exchange.to_string())
            .or_default()
            .insert(currency.to_string(), amount);
    }

    /// Copy the live balances of `adapter` into the hub.
    pub async fn seed_from(&self, adapter: &dyn ExchangeAdapter) -> Result<(), ExchangeError> {
        let balances = adapter.trading_balances().await?;
        info!(exchange = %adapter.name(), currencies = balances.len(), "Seeded paper balances");
        self.state
            .write()
            .await
            .balances
            .insert(adapter.name().to_string(), balances);
        Ok(())
    }

    pub async fn balance(&self, exchange: &str, currency: &str) -> Decimal {
        let state = self.state.read().await;
        state
            .balances
            .get(exchange)
            .and_then(|b| b.get(currency))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Sum of `currency` across all accounts, excluding funds in flight.
    pub async fn total(&self, currency: &str) -> Decimal {
        let state = self.state.read().await;
        state
            .balances
            .values()
            .filter_map(|b| b.get(currency))
            .copied()
            .sum()
    }

    async fn account_for_address(&self, address: &str, currency: &str) -> Option<String> {
        let (destination, suffix) = address.rsplit_once('-')?;
        if suffix != currency {
            return None;
        }
        let state = self.state.read().await;
        state
            .balances
            .keys()
            .find(|name| name.replace(' ', "-") == destination)
            .cloned()
    }
}

/// One simulated exchange account.
pub struct PaperExchange {
    name: String,
    hub: PaperHub,
    fee_rate: Decimal,
    scheme: AddressScheme,
    books: Mutex<HashMap<String, OrderBook>>,
    feed: Option<Arc<dyn ExchangeAdapter>>,
}

impl PaperExchange {
    /// Trading fee charged on the received currency.
    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    pub fn with_address_scheme(mut self, scheme: AddressScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Install a static order book for `pair`.
    pub fn set_order_book(
        &self,
        pair: &Pair,
        bids: Vec<Order>,
        asks: Vec<Order>,
    ) -> Result<(), ExchangeError> {
        let book = OrderBook::new(self.name.clone(), bids, asks)?;
        let mut books = self
            .books
            .lock()
            .map_err(|_| ExchangeError::api(&self.name, "order book table poisoned"))?;
        books.insert(pair.label.clone(), book);
        Ok(())
    }

    fn static_book(&self, pair: &Pair) -> Option<OrderBook> {
        self.books
            .lock()
            .ok()
            .and_then(|books| books.get(&pair.label).cloned())
    }

    fn insufficient(&self, currency: &str) -> ExchangeError {
        ExchangeError::InsufficientBalance {
            exchange: self.name.clone(),
            currency: currency.to_string(),
        }
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, pair: &Pair) -> bool {
        match &self.feed {
            Some(feed) => feed.supports(pair),
            None => self
                .books
                .lock()
                .map(|books| books.contains_key(&pair.label))
                .unwrap_or(false),
        }
    }

    async fn fetch_order_book(&self, pair: &Pair) -> Result<OrderBook, ExchangeError> {
        if let Some(book) = self.static_book(pair) {
            return Ok(book);
        }
        match &self.feed {
            Some(feed) => feed.fetch_order_book(pair).await,
            None => Err(ExchangeError::unsupported_pair(&self.name, pair)),
        }
    }

    async fn place_order(
        &self,
        side: Side,
        pair: &Pair,
        price: Decimal,
        volume: Decimal,
    ) -> Result<Vec<String>, ExchangeError> {
        if volume <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(ExchangeError::api(&self.name, "price and volume must be positive"));
        }

        let mut state = self.hub.state.write().await;
        state.next_order += 1;
        let order_id = format!("{}-{}", self.name, state.next_order);

        let account = state.balances.entry(self.name.clone()).or_default();
        let base_held = account.get(&pair.base).copied().unwrap_or(Decimal::ZERO);
        let quote_held = account.get(&pair.quote).copied().unwrap_or(Decimal::ZERO);
        let notional = price * volume;

        let (fee, fee_currency) = match side {
            Side::Buy => {
                if quote_held < notional {
                    return Err(self.insufficient(&pair.quote));
                }
                let fee = volume * self.fee_rate;
                *account.entry(pair.quote.clone()).or_default() -= notional;
                *account.entry(pair.base.clone()).or_default() += volume - fee;
                (fee, pair.base.clone())
            }
            Side::Sell => {
                if base_held < volume {
                    return Err(self.insufficient(&pair.base));
                }
                let fee = notional * self.fee_rate;
                *account.entry(pair.base.clone()).or_default() -= volume;
                *account.entry(pair.quote.clone()).or_default() += notional - fee;
                (fee, pair.quote.clone())
            }
        };

        state.fills.insert(
            order_id.clone(),
            vec![Fill {
                trade_id: format!("{}-t", order_id),
                price,
                quantity: volume,
                fee,
                fee_currency,
            }],
        );

        debug!(exchange = %self.name, %side, %pair, %price, %volume, %order_id, "Paper order filled");
        Ok(vec![order_id])
    }

    async fn trading_balances(&self) -> Result<Balances, ExchangeError> {
        let state = self.hub.state.read().await;
        Ok(state.balances.get(&self.name).cloned().unwrap_or_default())
    }

    async fn withdraw(
        &self,
        volume: Decimal,
        currency: &str,
        address: &str,
    ) -> Result<String, ExchangeError> {
        let destination = self
            .hub
            .account_for_address(address, currency)
            .await
            .ok_or_else(|| ExchangeError::api(&self.name, format!("unknown address {}", address)))?;

        let transfer_id = {
            let mut state = self.hub.state.write().await;
            let account = state.balances.entry(self.name.clone()).or_default();
            let available = account.get(currency).copied().unwrap_or(Decimal::ZERO);
            if volume <= Decimal::ZERO || available < volume {
                return Err(self.insufficient(currency));
            }
            account.insert(currency.to_string(), available - volume);

            state.next_transfer += 1;
            format!("{}-w{}", self.name, state.next_transfer)
        };

        let credited = (volume - self.hub.withdrawal_fee).max(Decimal::ZERO);
        let hub = self.hub.clone();
        let currency = currency.to_string();
        let delay = hub.transfer_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = hub.state.write().await;
            match state.balances.get_mut(&destination) {
                Some(account) => *account.entry(currency).or_default() += credited,
                None => warn!(%destination, "Paper transfer destination disappeared"),
            }
        });

        Ok(transfer_id)
    }

    async fn payment_address(&self, currency: &str) -> Result<String, ExchangeError> {
        Ok(AddressScheme::named_key(&self.name, currency))
    }

    async fn fetch_fills(
        &self,
        order_id: &str,
        _pair: &Pair,
        _side: Side,
    ) -> Result<Vec<Fill>, ExchangeError> {
        let state = self.hub.state.read().await;
        Ok(state.fills.get(order_id).cloned().unwrap_or_default())
    }

    fn address_scheme(&self) -> AddressScheme {
        self.scheme
    }
}
