//! Hitbtc REST API client.

use super::types::*;
use crate::config::ApiCredential;
use crate::exchange::auth::{encode_form, hmac_sha512, Nonce};
use crate::exchange::http::{build_client, decode, id_string, read_json};
use crate::exchange::{
    parse_levels, Balances, ExchangeAdapter, ExchangeError, Fill, OrderBook, Pair, Side,
};
use crate::utils::{decimal_from_json, round_down_to_lot};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub const EXCHANGE_NAME: &str = "Hitbtc";

const API_URL: &str = "https://api.hitbtc.com";

/// Hitbtc API client, public and authenticated endpoints.
pub struct HitbtcClient {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    nonce: Nonce,
}

impl HitbtcClient {
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
        })
    }

    /// Hitbtc symbol for a pair.
    pub fn symbol(pair: &Pair) -> Option<&'static str> {
        match pair.label.as_str() {
            "BTC_EUR" => Some("BTCEUR"),
            "BTC_USD" => Some("BTCUSD"),
            "LTC_BTC" => Some("LTCBTC"),
            "LTC_USD" => Some("LTCUSD"),
            "ETH_BTC" => Some("ETHBTC"),
            "ZEC_BTC" => Some("ZECBTC"),
            _ => None,
        }
    }

    /// Base-currency quantity of one lot.
    pub fn lot_size(pair: &Pair) -> Option<Decimal> {
        match pair.label.as_str() {
            "BTC_USD" | "BTC_EUR" => Some(dec!(0.01)),
            "LTC_BTC" | "LTC_USD" => Some(dec!(0.1)),
            "ETH_BTC" | "ZEC_BTC" => Some(dec!(0.001)),
            _ => None,
        }
    }

    fn market(pair: &Pair) -> Result<(&'static str, Decimal), ExchangeError> {
        match (Self::symbol(pair), Self::lot_size(pair)) {
            (Some(symbol), Some(lot)) => Ok((symbol, lot)),
            _ => Err(ExchangeError::unsupported_pair(EXCHANGE_NAME, pair)),
        }
    }

    /// Append the `nonce` and `apikey` parameters to a request path.
    fn signed_uri(&self, path: &str) -> String {
        let separator = if path.contains('?') { '&' } else { '?' };
        format!(
            "{}{}nonce={}&apikey={}",
            path,
            separator,
            self.nonce.next(),
            self.api_key
        )
    }

    /// `X-Signature` is the HMAC-SHA512 of the signed URI followed by the body.
    fn sign(&self, uri: &str, body: &str) -> Result<String, ExchangeError> {
        let message = format!("{}{}", uri, body);
        let mac = hmac_sha512(EXCHANGE_NAME, self.api_secret.as_bytes(), message.as_bytes())?;
        Ok(hex::encode(mac))
    }

    async fn auth_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExchangeError> {
        let uri = self.signed_uri(path);
        let signature = self.sign(&uri, "")?;

        let response = self
            .http
            .get(format!("{}{}", self.base_url, uri))
            .header("X-Signature", signature)
            .send()
            .await?;

        Self::decode_response(response).await
    }

    async fn auth_post<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let uri = self.signed_uri(path);
        let body = encode_form(params);
        let signature = self.sign(&uri, &body)?;

        let response = self
            .http
            .post(format!("{}{}", self.base_url, uri))
            .header("X-Signature", signature)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        Self::decode_response(response).await
    }

    async fn decode_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let value = read_json(EXCHANGE_NAME, response).await?;
        if let (Some(code), Some(message)) = (
            value.get("code").and_then(Value::as_str),
            value.get("message").and_then(Value::as_str),
        ) {
            return Err(ExchangeError::api(EXCHANGE_NAME, format!("{}: {}", code, message)));
        }
        decode(EXCHANGE_NAME, value)
    }

    /// Balances of the main (payment) account.
    #[instrument(skip(self), name = "hitbtc_main_balances")]
    pub async fn main_balances(&self) -> Result<Balances, ExchangeError> {
        let response: MainBalanceResponse = self.auth_get("/api/1/payment/balance").await?;
        response
            .balance
            .iter()
            .map(|row| {
                decimal_from_json(&row.balance)
                    .map(|amount| (row.currency_code.clone(), amount))
                    .ok_or_else(|| {
                        ExchangeError::parse(
                            EXCHANGE_NAME,
                            format!("bad {} main balance", row.currency_code),
                        )
                    })
            })
            .collect()
    }

    async fn transfer(&self, path: &str, amount: Decimal, currency: &str) -> Result<String, ExchangeError> {
        let response: TransactionResponse = self
            .auth_post(
                path,
                &[
                    ("amount", amount.normalize().to_string()),
                    ("currency_code", currency.to_string()),
                ],
            )
            .await?;
        Ok(response.transaction)
    }

    /// Move funds from the trading account to the main account.
    pub async fn transfer_to_main(&self, amount: Decimal, currency: &str) -> Result<String, ExchangeError> {
        self.transfer("/api/1/payment/transfer_to_main", amount, currency).await
    }

    /// Move funds from the main account to the trading account.
    pub async fn transfer_to_trading(&self, amount: Decimal, currency: &str) -> Result<String, ExchangeError> {
        self.transfer("/api/1/payment/transfer_to_trading", amount, currency).await
    }
}

#[async_trait]
impl ExchangeAdapter for HitbtcClient {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    fn supports(&self, pair: &Pair) -> bool {
        Self::market(pair).is_ok()
    }

    #[instrument(skip(self), name = "hitbtc_order_book")]
    async fn fetch_order_book(&self, pair: &Pair) -> Result<OrderBook, ExchangeError> {
        let (symbol, _) = Self::market(pair)?;

        let response = self
            .http
            .get(format!("{}/api/1/public/{}/orderbook", self.base_url, symbol))
            .send()
            .await?;

        let book: OrderBookResponse = Self::decode_response(response).await?;
        let bids = parse_levels(EXCHANGE_NAME, &book.bids)?;
        let asks = parse_levels(EXCHANGE_NAME, &book.asks)?;

        debug!(bids = bids.len(), asks = asks.len(), "Fetched Hitbtc order book");
        OrderBook::new(EXCHANGE_NAME, bids, asks)
    }

    /// Immediate-or-cancel market order; `price` is informational only.
    #[instrument(skip(self), name = "hitbtc_place_order")]
    async fn place_order(
        &self,
        side: Side,
        pair: &Pair,
        _price: Decimal,
        volume: Decimal,
    ) -> Result<Vec<String>, ExchangeError> {
        let (symbol, lot) = Self::market(pair)?;

        let lots = round_down_to_lot(volume, lot) / lot;
        if lots <= Decimal::ZERO {
            return Err(ExchangeError::api(
                EXCHANGE_NAME,
                format!("volume {} is below one lot of {}", volume, lot),
            ));
        }

        let client_order_id = format!("arb-{}", self.nonce.next());
        let response: NewOrderResponse = self
            .auth_post(
                "/api/1/trading/new_order",
                &[
                    ("clientOrderId", client_order_id),
                    ("symbol", symbol.to_string()),
                    ("side", side.as_str().to_string()),
                    ("quantity", lots.normalize().to_string()),
                    ("type", "market".to_string()),
                    ("timeInForce", "IOC".to_string()),
                ],
            )
            .await?;

        let report = response.execution_report;
        if report.order_status == "rejected" {
            return Err(ExchangeError::api(
                EXCHANGE_NAME,
                format!(
                    "order rejected: {}",
                    report.order_reject_reason.as_deref().unwrap_or("unknown reason")
                ),
            ));
        }

        Ok(vec![report.client_order_id])
    }

    #[instrument(skip(self), name = "hitbtc_balances")]
    async fn trading_balances(&self) -> Result<Balances, ExchangeError> {
        let response: TradingBalanceResponse = self.auth_get("/api/1/trading/balance").await?;
        response
            .balance
            .iter()
            .map(|row| {
                decimal_from_json(&row.cash)
                    .map(|amount| (row.currency_code.clone(), amount))
                    .ok_or_else(|| {
                        ExchangeError::parse(
                            EXCHANGE_NAME,
                            format!("bad {} trading balance", row.currency_code),
                        )
                    })
            })
            .collect()
    }

    /// Payouts leave from the main account, so funds are moved there first.
    #[instrument(skip(self), name = "hitbtc_withdraw")]
    async fn withdraw(
        &self,
        volume: Decimal,
        currency: &str,
        address: &str,
    ) -> Result<String, ExchangeError> {
        let transfer_id = self.transfer_to_main(volume, currency).await?;
        info!(%currency, amount = %volume, %transfer_id, "Moved funds from Hitbtc trading to main account");

        let response: TransactionResponse = self
            .auth_post(
                "/api/1/payment/payout",
                &[
                    ("amount", volume.normalize().to_string()),
                    ("currency_code", currency.to_string()),
                    ("address", address.to_string()),
                ],
            )
            .await?;
        Ok(response.transaction)
    }

    async fn payment_address(&self, currency: &str) -> Result<String, ExchangeError> {
        let response: AddressResponse = self
            .auth_get(&format!("/api/1/payment/address/{}", currency))
            .await?;
        if response.address.is_empty() {
            return Err(ExchangeError::MissingAddress {
                exchange: EXCHANGE_NAME.to_string(),
                currency: currency.to_string(),
            });
        }
        Ok(response.address)
    }

    /// Quantities come back in lots and fees in the quote currency.
    #[instrument(skip(self), name = "hitbtc_fills")]
    async fn fetch_fills(
        &self,
        order_id: &str,
        pair: &Pair,
        _side: Side,
    ) -> Result<Vec<Fill>, ExchangeError> {
        let (_, lot) = Self::market(pair)?;

        let response: TradesResponse = self
            .auth_get(&format!(
                "/api/1/trading/trades/by/order?clientOrderId={}",
                urlencoding::encode(order_id)
            ))
            .await?;

        response
            .trades
            .iter()
            .map(|trade| {
                let field = |value: &Value, name: &str| {
                    decimal_from_json(value).ok_or_else(|| {
                        ExchangeError::parse(EXCHANGE_NAME, format!("bad `{}` in trade", name))
                    })
                };

                Ok(Fill {
                    trade_id: id_string(&trade.trade_id)
                        .ok_or_else(|| ExchangeError::parse(EXCHANGE_NAME, "missing tradeId"))?,
                    price: field(&trade.exec_price, "execPrice")?,
                    quantity: field(&trade.exec_quantity, "execQuantity")? * lot,
                    fee: field(&trade.fee, "fee")?,
                    fee_currency: pair.quote.clone(),
                })
            })
            .collect()
    }

    /// Deposits land on the main account, so both accounts are counted.
    async fn incoming_balance(&self, currency: &str) -> Result<Decimal, ExchangeError> {
        let (main, trading) = tokio::try_join!(self.main_balances(), self.trading_balances())?;
        let held = |balances: &Balances| balances.get(currency).copied().unwrap_or(Decimal::ZERO);
        Ok(held(&main) + held(&trading))
    }

    /// Sweep the main account into the trading account.
    async fn settle_deposit(&self, currency: &str) -> Result<(), ExchangeError> {
        let main = self.main_balances().await?;
        let amount = main.get(currency).copied().unwrap_or(Decimal::ZERO);
        if amount <= Decimal::ZERO {
            return Ok(());
        }

        let transfer_id = self.transfer_to_trading(amount, currency).await?;
        info!(%currency, %amount, %transfer_id, "Moved deposit from Hitbtc main to trading account");
        Ok(())
    }
}
