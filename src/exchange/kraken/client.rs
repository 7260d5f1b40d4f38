//! Kraken REST API client.

use super::types::*;
use crate::config::ApiCredential;
use crate::exchange::auth::{encode_form, hmac_sha512, Nonce};
use crate::exchange::http::{build_client, decode, read_json};
use crate::exchange::{
    parse_levels, AddressScheme, Balances, ExchangeAdapter, ExchangeError, Fill, OrderBook, Pair,
    Side,
};
use crate::utils::decimal_from_json;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, instrument};

pub const EXCHANGE_NAME: &str = "Kraken";

const API_URL: &str = "https://api.kraken.com";
const API_VERSION: &str = "0";
const BOOK_DEPTH: &str = "10";

/// Plain currency code to Kraken asset code.
const ASSETS: &[(&str, &str)] = &[
    ("BTC", "XXBT"),
    ("ZEC", "XZEC"),
    ("LTC", "XLTC"),
    ("ETH", "XETH"),
    ("ETC", "XETC"),
    ("EUR", "ZEUR"),
    ("USD", "ZUSD"),
];

/// Kraken API client, public and private endpoints.
pub struct KrakenClient {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    nonce: Nonce,
}

impl KrakenClient {
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

    /// Kraken pair name.
    pub fn market(pair: &Pair) -> Option<&'static str> {
        match pair.label.as_str() {
            "BTC_EUR" => Some("XXBTZEUR"),
            "BTC_USD" => Some("XXBTZUSD"),
            "LTC_USD" => Some("XLTCZUSD"),
            "LTC_BTC" => Some("XLTCXXBT"),
            "ETH_USD" => Some("XETHZUSD"),
            "ETH_BTC" => Some("XETHXXBT"),
            "ETC_USD" => Some("XETCZUSD"),
            "ETC_BTC" => Some("XETCXXBT"),
            "ZEC_BTC" => Some("XZECXXBT"),
            _ => None,
        }
    }

    /// Kraken asset code for a plain currency code.
    pub fn asset_code(currency: &str) -> &str {
        ASSETS
            .iter()
            .find(|(plain, _)| *plain == currency)
            .map(|(_, asset)| *asset)
            .unwrap_or(currency)
    }

    /// Plain currency code for a Kraken asset code; unknown codes pass through.
    pub fn currency_code(asset: &str) -> &str {
        ASSETS
            .iter()
            .find(|(_, code)| *code == asset)
            .map(|(plain, _)| *plain)
            .unwrap_or(asset)
    }

    fn market_or_err(pair: &Pair) -> Result<&'static str, ExchangeError> {
        Self::market(pair).ok_or_else(|| ExchangeError::unsupported_pair(EXCHANGE_NAME, pair))
    }

    /// `API-Sign`: base64(HMAC-SHA512(base64-decoded secret, path + SHA256(nonce + body))).
    fn sign(&self, path: &str, nonce: &str, body: &str) -> Result<String, ExchangeError> {
        let secret = STANDARD
            .decode(self.api_secret.as_bytes())
            .map_err(|_| ExchangeError::api(EXCHANGE_NAME, "API secret is not valid base64"))?;

        let digest = Sha256::digest(format!("{}{}", nonce, body).as_bytes());
        let mut message = path.as_bytes().to_vec();
        message.extend_from_slice(&digest);

        Ok(STANDARD.encode(hmac_sha512(EXCHANGE_NAME, &secret, &message)?))
    }

    fn unwrap_envelope<T: DeserializeOwned>(value: Value) -> Result<T, ExchangeError> {
        let envelope: Envelope = decode(EXCHANGE_NAME, value)?;
        if !envelope.error.is_empty() {
            return Err(ExchangeError::api(EXCHANGE_NAME, envelope.error.join("; ")));
        }
        decode(EXCHANGE_NAME, envelope.result)
    }

    /// POST a signed private method.
    async fn private<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let path = format!("/{}/private/{}", API_VERSION, method);
        let nonce = self.nonce.next().to_string();

        let mut form = vec![("nonce", nonce.clone())];
        form.extend(params.iter().cloned());
        let body = encode_form(&form);
        let signature = self.sign(&path, &nonce, &body)?;

        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("API-Key", &self.api_key)
            .header("API-Sign", signature)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        Self::unwrap_envelope(read_json(EXCHANGE_NAME, response).await?)
    }
}

#[async_trait]
impl ExchangeAdapter for KrakenClient {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    fn supports(&self, pair: &Pair) -> bool {
        Self::market(pair).is_some()
    }

    #[instrument(skip(self), name = "kraken_order_book")]
    async fn fetch_order_book(&self, pair: &Pair) -> Result<OrderBook, ExchangeError> {
        let market = Self::market_or_err(pair)?;

        let response = self
            .http
            .get(format!("{}/{}/public/Depth", self.base_url, API_VERSION))
            .query(&[("pair", market), ("count", BOOK_DEPTH)])
            .send()
            .await?;

        let result: serde_json::Map<String, Value> =
            Self::unwrap_envelope(read_json(EXCHANGE_NAME, response).await?)?;
        let book_value = result
            .into_iter()
            .next()
            .map(|(_, book)| book)
            .ok_or_else(|| ExchangeError::parse(EXCHANGE_NAME, "empty Depth result"))?;

        let book: DepthBook = decode(EXCHANGE_NAME, book_value)?;
        let bids = parse_levels(EXCHANGE_NAME, &book.bids)?;
        let asks = parse_levels(EXCHANGE_NAME, &book.asks)?;

        debug!(bids = bids.len(), asks = asks.len(), "Fetched Kraken order book");
        OrderBook::new(EXCHANGE_NAME, bids, asks)
    }

    /// Market order; one submission may yield several transaction ids.
    #[instrument(skip(self), name = "kraken_place_order")]
    async fn place_order(
        &self,
        side: Side,
        pair: &Pair,
        _price: Decimal,
        volume: Decimal,
    ) -> Result<Vec<String>, ExchangeError> {
        let market = Self::market_or_err(pair)?;

        let result: AddOrderResult = self
            .private(
                "AddOrder",
                &[
                    ("type", side.as_str().to_string()),
                    ("pair", market.to_string()),
                    ("ordertype", "market".to_string()),
                    ("volume", volume.normalize().to_string()),
                ],
            )
            .await?;

        if result.txid.is_empty() {
            return Err(ExchangeError::parse(EXCHANGE_NAME, "AddOrder returned no txid"));
        }
        Ok(result.txid)
    }

    #[instrument(skip(self), name = "kraken_balances")]
    async fn trading_balances(&self) -> Result<Balances, ExchangeError> {
        let raw: serde_json::Map<String, Value> = self.private("Balance", &[]).await?;

        raw.iter()
            .map(|(asset, value)| {
                decimal_from_json(value)
                    .map(|amount| (Self::currency_code(asset).to_string(), amount))
                    .ok_or_else(|| ExchangeError::parse(EXCHANGE_NAME, format!("bad {} balance", asset)))
            })
            .collect()
    }

    /// `address` is the name of a withdrawal key registered on the account.
    #[instrument(skip(self), name = "kraken_withdraw")]
    async fn withdraw(
        &self,
        volume: Decimal,
        currency: &str,
        address: &str,
    ) -> Result<String, ExchangeError> {
        let result: WithdrawResult = self
            .private(
                "Withdraw",
                &[
                    ("asset", currency.to_string()),
                    ("key", address.to_string()),
                    ("amount", volume.normalize().to_string()),
                ],
            )
            .await?;
        Ok(result.refid)
    }

    async fn payment_address(&self, currency: &str) -> Result<String, ExchangeError> {
        let asset = Self::asset_code(currency).to_string();
        let missing = || ExchangeError::MissingAddress {
            exchange: EXCHANGE_NAME.to_string(),
            currency: currency.to_string(),
        };

        let methods: Vec<DepositMethod> = self
            .private("DepositMethods", &[("asset", asset.clone())])
            .await?;
        let method = methods.into_iter().next().ok_or_else(missing)?.method;

        let addresses: Vec<DepositAddress> = self
            .private("DepositAddresses", &[("asset", asset), ("method", method)])
            .await?;
        addresses
            .into_iter()
            .next()
            .map(|a| a.address)
            .ok_or_else(missing)
    }

    fn address_scheme(&self) -> AddressScheme {
        AddressScheme::NamedKey
    }

    /// Two calls: the order lists its trade ids, then the trades are queried.
    #[instrument(skip(self), name = "kraken_fills")]
    async fn fetch_fills(
        &self,
        order_id: &str,
        pair: &Pair,
        _side: Side,
    ) -> Result<Vec<Fill>, ExchangeError> {
        let orders: OrdersInfo = self
            .private(
                "QueryOrders",
                &[("txid", order_id.to_string()), ("trades", "true".to_string())],
            )
            .await?;

        let trade_ids = orders
            .get(order_id)
            .map(|order| order.trades.clone())
            .unwrap_or_default();
        if trade_ids.is_empty() {
            return Ok(Vec::new());
        }

        let trades: TradesInfo = self
            .private("QueryTrades", &[("txid", trade_ids.join(","))])
            .await?;

        trade_ids
            .iter()
            .map(|trade_id| {
                let trade = trades.get(trade_id).ok_or_else(|| {
                    ExchangeError::parse(EXCHANGE_NAME, format!("trade {} missing from QueryTrades", trade_id))
                })?;
                let field = |value: &Value, name: &str| {
                    decimal_from_json(value).ok_or_else(|| {
                        ExchangeError::parse(EXCHANGE_NAME, format!("bad `{}` in trade {}", name, trade_id))
                    })
                };

                Ok(Fill {
                    trade_id: trade_id.clone(),
                    price: field(&trade.price, "price")?,
                    quantity: field(&trade.vol, "vol")?,
                    fee: field(&trade.fee, "fee")?,
                    fee_currency: pair.quote.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    /// base64("kraken-secret")
    const SECRET: &str = "a3Jha2VuLXNlY3JldA==";

    /// Recomputes `API-Sign` from the request path and form body.
    struct SignedForm;

    impl Match for SignedForm {
        fn matches(&self, request: &Request) -> bool {
            let body = String::from_utf8_lossy(&request.body).to_string();
            let nonce = body
                .split('&')
                .find_map(|pair| pair.strip_prefix("nonce="))
                .unwrap_or_default()
                .to_string();

            let digest = Sha256::digest(format!("{}{}", nonce, body).as_bytes());
            let mut message = request.url.path().as_bytes().to_vec();
            message.extend_from_slice(&digest);

            let expected = hmac_sha512(EXCHANGE_NAME, b"kraken-secret", &message)
                .map(|mac| STANDARD.encode(mac))
                .ok();
            let actual = request
                .headers
                .get("API-Sign")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            !nonce.is_empty() && expected.is_some() && expected == actual
        }
    }

    fn client(server: &MockServer) -> KrakenClient {
        let credential = ApiCredential {
            key: "kraken-key".to_string(),
            secret: SECRET.to_string(),
        };
        KrakenClient::with_base_url(&server.uri(), &credential, Duration::from_secs(5)).unwrap()
    }

    fn zec_btc() -> Pair {
        Pair::parse("zec_btc").unwrap()
    }

    #[test]
    fn test_asset_translation() {
        assert_eq!(KrakenClient::asset_code("BTC"), "XXBT");
        assert_eq!(KrakenClient::asset_code("DOGE"), "DOGE");
        assert_eq!(KrakenClient::currency_code("XZEC"), "ZEC");
        assert_eq!(KrakenClient::currency_code("ZEUR"), "EUR");
        assert_eq!(KrakenClient::currency_code("KFEE"), "KFEE");
        assert_eq!(KrakenClient::market(&zec_btc()), Some("XZECXXBT"));
    }

    #[tokio::test]
    async fn test_fetch_order_book() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Depth"))
            .and(query_param("pair", "XZECXXBT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {
                    "XZECXXBT": {
                        "asks": [["0.03730", "2.500", 1490000001], ["0.03740", "1.000", 1490000002]],
                        "bids": [["0.03690", "4.000", 1490000003]]
                    }
                }
            })))
            .mount(&server)
            .await;

        let book = client(&server).fetch_order_book(&zec_btc()).await.unwrap();
        assert_eq!(book.exchanger(), "Kraken");
        assert_eq!(book.best_ask().price, dec!(0.0373));
        assert_eq!(book.best_ask().timestamp, dec!(1490000001));
        assert_eq!(book.best_bid().volume, dec!(4));
    }

    #[tokio::test]
    async fn test_signed_balance_translates_assets() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/Balance"))
            .and(SignedForm)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {"XXBT": "0.4500000000", "XZEC": "2.0000000000"}
            })))
            .mount(&server)
            .await;

        let balances = client(&server).trading_balances().await.unwrap();
        assert_eq!(balances["BTC"], dec!(0.45));
        assert_eq!(balances["ZEC"], dec!(2));
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/AddOrder"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": ["EOrder:Insufficient funds"]
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .place_order(Side::Buy, &zec_btc(), dec!(0.0373), dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Api { ref message, .. } if message.contains("Insufficient")));
    }

    #[tokio::test]
    async fn test_add_order_returns_all_txids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/AddOrder"))
            .and(body_string_contains("ordertype=market"))
            .and(body_string_contains("pair=XZECXXBT"))
            .and(body_string_contains("type=sell"))
            .and(SignedForm)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {
                    "descr": {"order": "sell 1.00000000 ZECXBT @ market"},
                    "txid": ["OAVY7T-MV5VK-KHDF5X", "OBCMZD-JIEE7-77TH3F"]
                }
            })))
            .mount(&server)
            .await;

        let ids = client(&server)
            .place_order(Side::Sell, &zec_btc(), dec!(0.0373), dec!(1))
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_withdraw_uses_key_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/Withdraw"))
            .and(body_string_contains("key=Poloniex-ZEC"))
            .and(body_string_contains("asset=ZEC"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {"refid": "AGBSO6T-UFMTTQ-I7KGS6"}
            })))
            .mount(&server)
            .await;

        let kraken = client(&server);
        assert_eq!(kraken.address_scheme(), AddressScheme::NamedKey);
        let refid = kraken
            .withdraw(dec!(1.5), "ZEC", &AddressScheme::named_key("Poloniex", "ZEC"))
            .await
            .unwrap();
        assert_eq!(refid, "AGBSO6T-UFMTTQ-I7KGS6");
    }

    #[tokio::test]
    async fn test_payment_address_uses_first_method() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/DepositMethods"))
            .and(body_string_contains("asset=XZEC"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": [{"method": "Zcash (Transparent)", "limit": false, "fee": "0.0000000000"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/0/private/DepositAddresses"))
            .and(body_string_contains("method=Zcash%20%28Transparent%29"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": [{"address": "t1Kraken", "expiretm": "0"}]
            })))
            .mount(&server)
            .await;

        assert_eq!(client(&server).payment_address("ZEC").await.unwrap(), "t1Kraken");
    }

    #[tokio::test]
    async fn test_fills_follow_trade_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/QueryOrders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {"OAVY7T-MV5VK-KHDF5X": {"status": "closed", "trades": ["TID-1", "TID-2"]}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/0/private/QueryTrades"))
            .and(body_string_contains("txid=TID-1%2CTID-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {
                    "TID-1": {"price": "0.0373", "vol": "0.6", "fee": "0.00005"},
                    "TID-2": {"price": "0.0374", "vol": "0.4", "fee": "0.00004"}
                }
            })))
            .mount(&server)
            .await;

        let fills = client(&server)
            .fetch_fills("OAVY7T-MV5VK-KHDF5X", &zec_btc(), Side::Sell)
            .await
            .unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].trade_id, "TID-1");
        assert_eq!(fills[1].quantity, dec!(0.4));
        assert!(fills.iter().all(|f| f.fee_currency == "BTC"));
    }

    #[tokio::test]
    async fn test_unfilled_order_has_no_fills() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/QueryOrders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {"OPEN-1": {"status": "open"}}
            })))
            .mount(&server)
            .await;

        let fills = client(&server).fetch_fills("OPEN-1", &zec_btc(), Side::Buy).await.unwrap();
        assert!(fills.is_empty());
    }
}
