//! Concurrent order book collection.
//!
//! One task per exchange supporting the pair; results fan in through a
//! `JoinSet` as they complete. Failing exchanges (network error, invalid book,
//! timeout, panic) are logged and excluded, never fatal to the others.

use crate::exchange::{ExchangeAdapter, ExchangeError, OrderBook, Pair};
use crate::utils::{describe_join_error, with_deadline};
use futures_util::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

type FetchResult = (String, Result<OrderBook, ExchangeError>);

/// Fetches the books of one pair from every exchange at once.
pub struct OrderBookCollector {
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
    timeout: Duration,
}

impl OrderBookCollector {
    pub fn new(adapters: Vec<Arc<dyn ExchangeAdapter>>, timeout: Duration) -> Self {
        Self { adapters, timeout }
    }

    fn spawn_fetches(&self, pair: &Pair) -> JoinSet<FetchResult> {
        let mut tasks = JoinSet::new();

        for adapter in &self.adapters {
            if !adapter.supports(pair) {
                debug!(exchange = %adapter.name(), pair = %pair, "Pair not listed, skipping");
                continue;
            }

            let adapter = Arc::clone(adapter);
            let pair = pair.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let name = adapter.name().to_string();
                let result =
                    with_deadline(&name, "order book", timeout, adapter.fetch_order_book(&pair)).await;
                (name, result)
            });
        }

        tasks
    }

    fn accept(joined: Result<FetchResult, JoinError>) -> Option<OrderBook> {
        match joined {
            Ok((exchange, Ok(book))) => {
                debug!(
                    exchange = %exchange,
                    bid = %book.best_bid().price,
                    ask = %book.best_ask().price,
                    "Order book received"
                );
                Some(book)
            }
            Ok((exchange, Err(e))) => {
                warn!(exchange = %exchange, error = %e, "Order book unavailable");
                None
            }
            Err(e) => {
                error!(reason = %describe_join_error(e), "Order book task failed");
                None
            }
        }
    }

    /// Wait for every exchange and return the books that were fetched.
    pub async fn collect(&self, pair: &Pair) -> Vec<OrderBook> {
        let mut tasks = self.spawn_fetches(pair);
        let dispatched = tasks.len();
        let mut books = Vec::with_capacity(dispatched);

        while let Some(joined) = tasks.join_next().await {
            books.extend(Self::accept(joined));
        }

        info!(pair = %pair, dispatched, received = books.len(), "Order books collected");
        books
    }

    /// Books in completion order.
    ///
    /// Dropping the stream aborts the fetches that are still running.
    pub fn stream(&self, pair: &Pair) -> impl Stream<Item = OrderBook> + Send + 'static {
        let tasks = self.spawn_fetches(pair);

        stream::unfold(tasks, |mut tasks| async move {
            while let Some(joined) = tasks.join_next().await {
                if let Some(book) = Self::accept(joined) {
                    return Some((book, tasks));
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MockExchangeAdapter, Order, PaperHub};
    use futures_util::StreamExt;
    use rust_decimal_macros::dec;

    fn pair() -> Pair {
        Pair::parse("zec_btc").unwrap()
    }

    fn paper(hub: &PaperHub, name: &str) -> Arc<dyn ExchangeAdapter> {
        let exchange = hub.exchange(name);
        exchange
            .set_order_book(
                &pair(),
                vec![Order::new(dec!(0.02), dec!(1))],
                vec![Order::new(dec!(0.021), dec!(1))],
            )
            .unwrap();
        Arc::new(exchange)
    }

    fn failing(name: &'static str) -> MockExchangeAdapter {
        let mut mock = MockExchangeAdapter::new();
        mock.expect_name().return_const(name.to_string());
        mock.expect_supports().return_const(true);
        mock
    }

    #[tokio::test]
    async fn test_failures_are_excluded() {
        let hub = PaperHub::new();

        let mut erroring = failing("Hitbtc");
        erroring
            .expect_fetch_order_book()
            .returning(|_| Err(ExchangeError::api("Hitbtc", "service unavailable")));

        let mut panicking = failing("Kraken");
        panicking
            .expect_fetch_order_book()
            .returning(|_| panic!("malformed payload"));

        let collector = OrderBookCollector::new(
            vec![
                paper(&hub, "Poloniex"),
                Arc::new(erroring),
                Arc::new(panicking),
                paper(&hub, "Bitfinex"),
            ],
            Duration::from_secs(5),
        );

        let mut names: Vec<String> = collector
            .collect(&pair())
            .await
            .iter()
            .map(|b| b.exchanger().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["Bitfinex", "Poloniex"]);
    }

    #[tokio::test]
    async fn test_unsupported_pair_not_dispatched() {
        let mut unlisted = MockExchangeAdapter::new();
        unlisted.expect_name().return_const("Kraken".to_string());
        unlisted.expect_supports().return_const(false);
        unlisted.expect_fetch_order_book().never();

        let hub = PaperHub::new();
        let collector = OrderBookCollector::new(
            vec![Arc::new(unlisted), paper(&hub, "Poloniex")],
            Duration::from_secs(5),
        );

        assert_eq!(collector.collect(&pair()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_yields_every_book() {
        let hub = PaperHub::new();
        let collector = OrderBookCollector::new(
            vec![paper(&hub, "Poloniex"), paper(&hub, "Kraken")],
            Duration::from_secs(5),
        );

        let books: Vec<OrderBook> = collector.stream(&pair()).collect().await;
        assert_eq!(books.len(), 2);
    }
}
