//! Type definitions for Kraken API responses.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Every Kraken response is wrapped in this envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub error: Vec<String>,
    #[serde(default)]
    pub result: Value,
}

/// One side-pair of `Depth`; rows are `[price, volume, timestamp]`.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthBook {
    pub bids: Vec<Vec<Value>>,
    pub asks: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddOrderResult {
    #[serde(default)]
    pub txid: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawResult {
    pub refid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositMethod {
    pub method: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositAddress {
    pub address: String,
}

/// `QueryOrders` entry; `trades` is only present when requested and filled.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderInfo {
    #[serde(default)]
    pub trades: Vec<String>,
}

pub type OrdersInfo = HashMap<String, OrderInfo>;

#[derive(Debug, Clone, Deserialize)]
pub struct TradeInfo {
    pub price: Value,
    pub vol: Value,
    pub fee: Value,
}

pub type TradesInfo = HashMap<String, TradeInfo>;
