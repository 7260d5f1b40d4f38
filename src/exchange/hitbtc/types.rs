//! Type definitions for Hitbtc api/1 responses.

use serde::Deserialize;
use serde_json::Value;

/// Public order book. Rows are `[price, volume]` strings.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookResponse {
    pub bids: Vec<Vec<Value>>,
    pub asks: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingBalanceResponse {
    pub balance: Vec<TradingBalanceRow>,
}

/// `cash` is the available amount; reserved funds are already excluded from it.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingBalanceRow {
    pub currency_code: String,
    pub cash: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainBalanceResponse {
    pub balance: Vec<MainBalanceRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainBalanceRow {
    pub currency_code: String,
    pub balance: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderResponse {
    #[serde(rename = "ExecutionReport")]
    pub execution_report: ExecutionReport,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub client_order_id: String,
    #[serde(default)]
    pub order_status: String,
    #[serde(default)]
    pub order_reject_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionResponse {
    #[serde(alias = "Transaction")]
    pub transaction: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressResponse {
    #[serde(alias = "Address")]
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradesResponse {
    #[serde(default)]
    pub trades: Vec<OrderTrade>,
}

/// `execQuantity` is expressed in lots.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTrade {
    pub trade_id: Value,
    pub exec_price: Value,
    pub exec_quantity: Value,
    pub fee: Value,
}
