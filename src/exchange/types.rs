//! Normalized market types shared by every exchange adapter.

use super::error::ExchangeError;
use crate::utils::decimal_from_json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Currency pairs the trader knows about, as `BASE_QUOTE` labels.
pub const PAIR_REGISTRY: &[&str] = &[
    "BTC_USD", "BTC_EUR", "LTC_BTC", "LTC_USD", "ETH_BTC", "ETH_USD", "ETC_BTC", "ETC_USD",
    "ZEC_BTC",
];

/// Balances of one account, keyed by currency code.
pub type Balances = HashMap<String, Decimal>;

/// A currency pair such as `ZEC_BTC`.
///
/// `base` is the traded asset and `quote` the currency it is priced in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pair {
    pub label: String,
    pub base: String,
    pub quote: String,
}

impl Pair {
    /// Build a pair from a `BASE_QUOTE` label without consulting the registry.
    pub fn new(label: &str) -> Result<Self, ExchangeError> {
        let label = label.trim().to_uppercase();
        match label.split_once('_') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() && !quote.contains('_') => {
                Ok(Self {
                    base: base.to_string(),
                    quote: quote.to_string(),
                    label,
                })
            }
            _ => Err(ExchangeError::InvalidPair(label)),
        }
    }

    /// Resolve a user-supplied selector (`zec_btc`, `ZEC_BTC`) against the registry.
    pub fn parse(selector: &str) -> Result<Self, ExchangeError> {
        let pair = Self::new(selector)?;
        if PAIR_REGISTRY.contains(&pair.label.as_str()) {
            Ok(pair)
        } else {
            Err(ExchangeError::InvalidPair(pair.label))
        }
    }

    /// All registered pairs.
    pub fn registry() -> Vec<Pair> {
        PAIR_REGISTRY
            .iter()
            .filter_map(|label| Self::new(label).ok())
            .collect()
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl FromStr for Pair {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(ExchangeError::InvalidSide(other.to_string())),
        }
    }
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub price: Decimal,
    pub volume: Decimal,
    /// Exchange-reported timestamp in seconds, zero when the venue omits it.
    pub timestamp: Decimal,
}

impl Order {
    pub fn new(price: Decimal, volume: Decimal) -> Self {
        Self {
            price,
            volume,
            timestamp: Decimal::ZERO,
        }
    }

    /// Parse a `[price, volume, timestamp?]` row as sent by most exchange APIs.
    pub fn from_row(exchange: &str, row: &[serde_json::Value]) -> Result<Self, ExchangeError> {
        let field = |index: usize, name: &str| {
            row.get(index)
                .and_then(decimal_from_json)
                .ok_or_else(|| ExchangeError::parse(exchange, format!("bad {} in order row {:?}", name, row)))
        };

        let mut order = Self::new(field(0, "price")?, field(1, "volume")?);
        if row.len() > 2 {
            order.timestamp = field(2, "timestamp")?;
        }
        Ok(order)
    }
}

/// Parse every row of one book side.
pub fn parse_levels(exchange: &str, rows: &[Vec<serde_json::Value>]) -> Result<Vec<Order>, ExchangeError> {
    rows.iter().map(|row| Order::from_row(exchange, row)).collect()
}

/// Snapshot of one exchange's book for one pair.
///
/// Bids are sorted by descending price and asks by ascending price; neither
/// side is empty. The only way to obtain a book is [`OrderBook::new`], which
/// enforces both properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBook {
    exchanger: String,
    bids: Vec<Order>,
    asks: Vec<Order>,
}

impl OrderBook {
    pub fn new(
        exchanger: impl Into<String>,
        bids: Vec<Order>,
        asks: Vec<Order>,
    ) -> Result<Self, ExchangeError> {
        let exchanger = exchanger.into();
        let invalid = |reason: &str| ExchangeError::InvalidOrderBook {
            exchange: exchanger.clone(),
            reason: reason.to_string(),
        };

        if bids.is_empty() {
            return Err(invalid("no bid orders"));
        }
        if asks.is_empty() {
            return Err(invalid("no ask orders"));
        }
        if bids.windows(2).any(|w| w[1].price > w[0].price) {
            return Err(invalid("bid orders are not sorted"));
        }
        if asks.windows(2).any(|w| w[1].price < w[0].price) {
            return Err(invalid("ask orders are not sorted"));
        }

        Ok(Self {
            exchanger,
            bids,
            asks,
        })
    }

    pub fn exchanger(&self) -> &str {
        &self.exchanger
    }

    pub fn bids(&self) -> &[Order] {
        &self.bids
    }

    pub fn asks(&self) -> &[Order] {
        &self.asks
    }

    /// Highest bid. Never fails because construction rejects empty sides.
    pub fn best_bid(&self) -> &Order {
        &self.bids[0]
    }

    /// Lowest ask.
    pub fn best_ask(&self) -> &Order {
        &self.asks[0]
    }
}

/// An exchange-reported execution of (part of) an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub trade_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
}

/// Persisted acknowledgment of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub arbitrage_id: String,
    pub external_id: String,
    pub exchanger: String,
    pub pair: Pair,
    pub side: Side,
}

/// A fill tied back to the order that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub arbitrage_id: String,
    pub exchanger: String,
    pub external_id: String,
    pub pair: Pair,
    pub side: Side,
    pub fill: Fill,
}

impl Trade {
    pub fn from_fill(ack: &OrderAck, fill: Fill) -> Self {
        Self {
            arbitrage_id: ack.arbitrage_id.clone(),
            exchanger: ack.exchanger.clone(),
            external_id: ack.external_id.clone(),
            pair: ack.pair.clone(),
            side: ack.side,
            fill,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn levels(prices: &[Decimal]) -> Vec<Order> {
        prices.iter().map(|p| Order::new(*p, dec!(1))).collect()
    }

    #[test]
    fn test_pair_parse_from_selector() {
        let pair = Pair::parse("zec_btc").unwrap();
        assert_eq!(pair.label, "ZEC_BTC");
        assert_eq!(pair.base, "ZEC");
        assert_eq!(pair.quote, "BTC");
        assert_eq!(pair.to_string(), "ZEC_BTC");
    }

    #[test]
    fn test_pair_parse_rejects_unknown() {
        assert!(Pair::parse("doge_btc").is_err());
        assert!(Pair::parse("zecbtc").is_err());
        assert!(Pair::new("_BTC").is_err());
        assert_eq!(Pair::registry().len(), PAIR_REGISTRY.len());
    }

    #[test]
    fn test_side_round_trip_strings() {
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!(Side::Sell.to_string(), "sell");
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn test_order_book_accepts_sorted_sides() {
        let book = OrderBook::new(
            "Poloniex",
            levels(&[dec!(100), dec!(99), dec!(99)]),
            levels(&[dec!(101), dec!(101), dec!(102)]),
        )
        .unwrap();
        assert_eq!(book.best_bid().price, dec!(100));
        assert_eq!(book.best_ask().price, dec!(101));
        assert_eq!(book.exchanger(), "Poloniex");
    }

    #[test]
    fn test_order_from_mixed_row() {
        let row = vec![serde_json::json!("0.0371"), serde_json::json!(1.25), serde_json::json!(1490000000)];
        let order = Order::from_row("Kraken", &row).unwrap();
        assert_eq!(order.price, dec!(0.0371));
        assert_eq!(order.volume, dec!(1.25));
        assert_eq!(order.timestamp, dec!(1490000000));

        assert!(Order::from_row("Kraken", &[serde_json::json!("x")]).is_err());
    }

    #[test]
    fn test_order_book_rejects_empty_sides() {
        assert!(OrderBook::new("X", vec![], levels(&[dec!(1)])).is_err());
        assert!(OrderBook::new("X", levels(&[dec!(1)]), vec![]).is_err());
    }

    #[test]
    fn test_order_book_rejects_unsorted_sides() {
        let err = OrderBook::new(
            "X",
            levels(&[dec!(99), dec!(100)]),
            levels(&[dec!(101)]),
        )
        .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOrderBook { .. }));

        assert!(OrderBook::new("X", levels(&[dec!(100)]), levels(&[dec!(102), dec!(101)])).is_err());
    }
}
