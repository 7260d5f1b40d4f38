//! Pairwise arbitrage detection over order books of one pair.
//!
//! Books are consumed one at a time. Each new book is compared in both
//! directions against every book seen before it, so candidates are emitted as
//! soon as the second book arrives instead of after the whole collection.

use crate::exchange::{OrderBook, Pair};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream, StreamExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// A buy-low / sell-high opportunity between two exchanges.
#[derive(Debug, Clone)]
pub struct Arbitrage {
    /// Digest of timestamp, pair and both exchanges.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub pair: Pair,
    /// Book to buy from (its best ask is the buy price).
    pub buy: Arc<OrderBook>,
    /// Book to sell into (its best bid is the sell price).
    pub sell: Arc<OrderBook>,
    /// Base-currency volume; starts as the smaller of the two top levels.
    pub volume: Decimal,
    pub spread_percent: Decimal,
}

impl Arbitrage {
    pub fn buy_exchange(&self) -> &str {
        self.buy.exchanger()
    }

    pub fn sell_exchange(&self) -> &str {
        self.sell.exchanger()
    }

    pub fn buy_price(&self) -> Decimal {
        self.buy.best_ask().price
    }

    pub fn sell_price(&self) -> Decimal {
        self.sell.best_bid().price
    }
}

/// Deterministic identifier of an arbitrage.
pub fn arbitrage_id(timestamp: DateTime<Utc>, pair: &Pair, buy: &str, sell: &str) -> String {
    let nanos = timestamp
        .timestamp_nanos_opt()
        .unwrap_or_else(|| timestamp.timestamp_micros().saturating_mul(1000));
    let digest = Sha256::digest(format!("{}-{}-{}-{}", nanos, pair, buy, sell).as_bytes());
    hex::encode(digest)
}

/// Compare the best ask of `buy` with the best bid of `sell`.
///
/// Returns a candidate only when the ask is strictly below the bid.
pub fn compute_arbitrage(
    pair: &Pair,
    buy: &Arc<OrderBook>,
    sell: &Arc<OrderBook>,
    timestamp: DateTime<Utc>,
) -> Option<Arbitrage> {
    let ask = buy.best_ask();
    let bid = sell.best_bid();

    if ask.price <= Decimal::ZERO || ask.price >= bid.price {
        return None;
    }

    Some(Arbitrage {
        id: arbitrage_id(timestamp, pair, buy.exchanger(), sell.exchanger()),
        timestamp,
        pair: pair.clone(),
        buy: Arc::clone(buy),
        sell: Arc::clone(sell),
        volume: ask.volume.min(bid.volume),
        spread_percent: dec!(100) * (bid.price / ask.price - Decimal::ONE),
    })
}

/// Incremental detector: feed books with [`ArbitrageDetector::push`].
#[derive(Debug)]
pub struct ArbitrageDetector {
    pair: Pair,
    seen: Vec<Arc<OrderBook>>,
}

impl ArbitrageDetector {
    pub fn new(pair: Pair) -> Self {
        Self {
            pair,
            seen: Vec::new(),
        }
    }

    /// Add a book and return the candidates it forms with earlier books.
    pub fn push(&mut self, book: OrderBook) -> Vec<Arbitrage> {
        let book = Arc::new(book);
        let now = Utc::now();
        let mut found = Vec::new();

        for other in &self.seen {
            if other.exchanger() == book.exchanger() {
                continue;
            }
            found.extend(compute_arbitrage(&self.pair, &book, other, now));
            found.extend(compute_arbitrage(&self.pair, other, &book, now));
        }

        for arb in &found {
            debug!(
                pair = %self.pair,
                buy = %arb.buy_exchange(),
                sell = %arb.sell_exchange(),
                spread = %arb.spread_percent.round_dp(4),
                volume = %arb.volume,
                "Arbitrage candidate"
            );
        }

        self.seen.push(book);
        found
    }

    pub fn books_seen(&self) -> usize {
        self.seen.len()
    }
}

/// Lazily detect candidates over an iterator of books.
pub fn detect<I>(pair: Pair, books: I) -> impl Iterator<Item = Arbitrage>
where
    I: IntoIterator<Item = OrderBook>,
{
    let mut detector = ArbitrageDetector::new(pair);
    books.into_iter().flat_map(move |book| detector.push(book))
}

/// Detect candidates as books arrive on a stream.
pub fn detect_stream<S>(pair: Pair, books: S) -> impl Stream<Item = Arbitrage>
where
    S: Stream<Item = OrderBook>,
{
    let mut detector = ArbitrageDetector::new(pair);
    books.flat_map(move |book| stream::iter(detector.push(book)))
}
