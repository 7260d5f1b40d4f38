//! Poloniex REST API client.

use super::types::*;
use crate::config::ApiCredential;
use crate::exchange::auth::{encode_form, hmac_sha512, Nonce};
use crate::exchange::http::{build_client, decode, id_string, read_json};
use crate::exchange::{
    parse_levels, Balances, ExchangeAdapter, ExchangeError, Fill, OrderBook, Pair, Side,
};
use crate::utils::decimal_from_json;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

pub const EXCHANGE_NAME: &str = "Poloniex";

const API_URL: &str = "https://poloniex.com";
const BOOK_DEPTH: &str = "10";

/// Poloniex API client, public and trading endpoints.
pub struct PoloniexClient {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    nonce: Nonce,
    /// Deposit addresses, loaded on first use.
    addresses: Mutex<Option<HashMap<String, String>>>,
}

impl PoloniexClient {
    /// Create a new client against the production API.
    pub fn new(credential: &ApiCredential, timeout: Duration) -> anyhow::Result<Self> {
        Self::with_base_url(API_URL, credential, timeout)
    }

    /// Create a new client with a custom base URL.
    pub fn with_base_url(
        base_url: &str,
        credential: &ApiCredential,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            api_key: credential.key.clone(),
            api_secret: credential.secret.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            nonce: Nonce::new(),
            addresses: Mutex::new(None),
        })
    }

    /// Poloniex market name for a pair.
    pub fn market(pair: &Pair) -> Option<&'static str> {
        match pair.label.as_str() {
            "ETH_BTC" => Some("BTC_ETH"),
            "ETC_BTC" => Some("BTC_ETC"),
            "LTC_BTC" => Some("BTC_LTC"),
            "ZEC_BTC" => Some("BTC_ZEC"),
            _ => None,
        }
    }

    fn sign(&self, body: &str) -> Result<String, ExchangeError> {
        let mac = hmac_sha512(EXCHANGE_NAME, self.api_secret.as_bytes(), body.as_bytes())?;
        Ok(hex::encode(mac))
    }

    /// POST a signed `tradingApi` command.
    async fn trading_api<T: DeserializeOwned>(
        &self,
        command: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        params.push(("command", command.to_string()));
        params.push(("nonce", self.nonce.next().to_string()));

        let body = encode_form(&params);
        let signature = self.sign(&body)?;

        let response = self
            .http
            .post(format!("{}/tradingApi", self.base_url))
            .header("Key", &self.api_key)
            .header("Sign", signature)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let value = read_json(EXCHANGE_NAME, response).await?;
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return Err(ExchangeError::api(EXCHANGE_NAME, message));
        }

        decode(EXCHANGE_NAME, value)
    }

    fn market_or_err(pair: &Pair) -> Result<&'static str, ExchangeError> {
        Self::market(pair).ok_or_else(|| ExchangeError::unsupported_pair(EXCHANGE_NAME, pair))
    }
}

#[async_trait]
impl ExchangeAdapter for PoloniexClient {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    fn supports(&self, pair: &Pair) -> bool {
        Self::market(pair).is_some()
    }

    #[instrument(skip(self), name = "poloniex_order_book")]
    async fn fetch_order_book(&self, pair: &Pair) -> Result<OrderBook, ExchangeError> {
        let market = Self::market_or_err(pair)?;

        let response = self
            .http
            .get(format!("{}/public", self.base_url))
            .query(&[
                ("command", "returnOrderBook"),
                ("currencyPair", market),
                ("depth", BOOK_DEPTH),
            ])
            .send()
            .await?;

        let value = read_json(EXCHANGE_NAME, response).await?;
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return Err(ExchangeError::api(EXCHANGE_NAME, message));
        }

        let book: OrderBookResponse = decode(EXCHANGE_NAME, value)?;
        let bids = parse_levels(EXCHANGE_NAME, &book.bids)?;
        let asks = parse_levels(EXCHANGE_NAME, &book.asks)?;

        debug!(bids = bids.len(), asks = asks.len(), "Fetched Poloniex order book");
        OrderBook::new(EXCHANGE_NAME, bids, asks)
    }

    /// Limit order at `price`; it may rest on the book if the market moved.
    #[instrument(skip(self), name = "poloniex_place_order")]
    async fn place_order(
        &self,
        side: Side,
        pair: &Pair,
        price: Decimal,
        volume: Decimal,
    ) -> Result<Vec<String>, ExchangeError> {
        let market = Self::market_or_err(pair)?;

        let response: PlaceOrderResponse = self
            .trading_api(
                side.as_str(),
                vec![
                    ("currencyPair", market.to_string()),
                    ("rate", price.normalize().to_string()),
                    ("amount", volume.normalize().to_string()),
                ],
            )
            .await?;

        let id = id_string(&response.order_number)
            .ok_or_else(|| ExchangeError::parse(EXCHANGE_NAME, "missing orderNumber"))?;
        Ok(vec![id])
    }

    #[instrument(skip(self), name = "poloniex_balances")]
    async fn trading_balances(&self) -> Result<Balances, ExchangeError> {
        let raw: HashMap<String, Value> = self.trading_api("returnBalances", vec![]).await?;

        raw.into_iter()
            .map(|(currency, value)| {
                decimal_from_json(&value)
                    .map(|amount| (currency.clone(), amount))
                    .ok_or_else(|| {
                        ExchangeError::parse(EXCHANGE_NAME, format!("bad {} balance", currency))
                    })
            })
            .collect()
    }

    #[instrument(skip(self), name = "poloniex_withdraw")]
    async fn withdraw(
        &self,
        volume: Decimal,
        currency: &str,
        address: &str,
    ) -> Result<String, ExchangeError> {
        let response: WithdrawResponse = self
            .trading_api(
                "withdraw",
                vec![
                    ("currency", currency.to_string()),
                    ("amount", volume.normalize().to_string()),
                    ("address", address.to_string()),
                ],
            )
            .await?;
        Ok(response.response)
    }

    async fn payment_address(&self, currency: &str) -> Result<String, ExchangeError> {
        let mut cache = self.addresses.lock().await;
        if cache.is_none() {
            let loaded: HashMap<String, String> =
                self.trading_api("returnDepositAddresses", vec![]).await?;
            *cache = Some(loaded);
        }

        cache
            .as_ref()
            .and_then(|addresses| addresses.get(currency))
            .cloned()
            .ok_or_else(|| ExchangeError::MissingAddress {
                exchange: EXCHANGE_NAME.to_string(),
                currency: currency.to_string(),
            })
    }

    /// Buys pay the fee in base (`amount * fee`), sells in quote (`total * fee`).
    #[instrument(skip(self), name = "poloniex_fills")]
    async fn fetch_fills(
        &self,
        order_id: &str,
        pair: &Pair,
        side: Side,
    ) -> Result<Vec<Fill>, ExchangeError> {
        let trades: Vec<OrderTrade> = self
            .trading_api("returnOrderTrades", vec![("orderNumber", order_id.to_string())])
            .await?;

        trades
            .iter()
            .map(|trade| {
                let field = |value: &Value, name: &str| {
                    decimal_from_json(value).ok_or_else(|| {
                        ExchangeError::parse(EXCHANGE_NAME, format!("bad `{}` in order trade", name))
                    })
                };

                let amount = field(&trade.amount, "amount")?;
                let rate = field(&trade.fee, "fee")?;
                let (fee, fee_currency) = match side {
                    Side::Buy => (amount * rate, pair.base.clone()),
                    Side::Sell => (field(&trade.total, "total")? * rate, pair.quote.clone()),
                };

                Ok(Fill {
                    trade_id: id_string(&trade.trade_id)
                        .ok_or_else(|| ExchangeError::parse(EXCHANGE_NAME, "missing tradeID"))?,
                    price: field(&trade.rate, "rate")?,
                    quantity: amount,
                    fee,
                    fee_currency,
                })
            })
            .collect()
    }
}
