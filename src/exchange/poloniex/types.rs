//! Type definitions for Poloniex API responses.

use serde::Deserialize;
use serde_json::Value;

/// `returnOrderBook` payload. Prices are strings, volumes are numbers.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookResponse {
    pub bids: Vec<Vec<Value>>,
    pub asks: Vec<Vec<Value>>,
}

/// `buy` / `sell` acknowledgment.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderResponse {
    #[serde(rename = "orderNumber")]
    pub order_number: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawResponse {
    pub response: String,
}

/// One row of `returnOrderTrades`. `fee` is a rate, not an amount.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderTrade {
    #[serde(rename = "tradeID")]
    pub trade_id: Value,
    pub rate: Value,
    pub amount: Value,
    pub fee: Value,
    pub total: Value,
}
