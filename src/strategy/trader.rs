//! The trading loop: collect, detect, execute, rebalance.

use super::balances::BalanceSheet;
use super::collector::OrderBookCollector;
use super::detector::{detect_stream, Arbitrage};
use super::executor::{clamp_volume, ExecutionReport, TradeExecutor};
use super::rebalancer::BalanceRebalancer;
use crate::config::{Config, TradingConfig};
use crate::exchange::{ExchangeAdapter, Pair};
use crate::persistence::PersistenceManager;
use crate::utils::{sleep_or_shutdown, Shutdown};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How one trading cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No candidate met the spread and volume thresholds.
    NoOpportunity,
    /// A candidate was found but could not be funded.
    Skipped(String),
    Executed(ExecutionReport),
    /// Shutdown arrived before the cycle completed.
    Interrupted,
}

/// Drives the collector, detector, executor and rebalancer for one pair.
pub struct ArbitrageTrader {
    pair: Pair,
    config: TradingConfig,
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
    collector: OrderBookCollector,
    executor: TradeExecutor,
    rebalancer: BalanceRebalancer,
    timeout: Duration,
}

impl ArbitrageTrader {
    pub fn new(
        pair: Pair,
        config: &Config,
        adapters: Vec<Arc<dyn ExchangeAdapter>>,
        store: Arc<PersistenceManager>,
    ) -> Self {
        let timeout = config.network.request_timeout();
        Self {
            collector: OrderBookCollector::new(adapters.clone(), timeout),
            executor: TradeExecutor::new(&adapters, Arc::clone(&store), timeout),
            rebalancer: BalanceRebalancer::new(adapters.clone(), store, config.rebalance.clone(), timeout),
            pair,
            config: config.trading.clone(),
            adapters,
            timeout,
        }
    }

    fn qualifies(&self, arb: &Arbitrage) -> bool {
        arb.spread_percent >= self.config.min_spread_percent && arb.volume >= self.config.min_volume
    }

    /// First candidate above both thresholds, as books arrive.
    ///
    /// Fetches still running when a candidate is found are aborted.
    async fn find_opportunity(&self) -> Option<Arbitrage> {
        let candidates = detect_stream(self.pair.clone(), self.collector.stream(&self.pair));
        futures_util::pin_mut!(candidates);

        while let Some(arb) = candidates.next().await {
            if self.qualifies(&arb) {
                return Some(arb);
            }
            debug!(
                buy = %arb.buy_exchange(),
                sell = %arb.sell_exchange(),
                spread = %arb.spread_percent.round_dp(4),
                volume = %arb.volume,
                "Candidate below thresholds"
            );
        }
        None
    }

    /// One pass of the trading loop.
    #[instrument(skip(self, shutdown), name = "trading_cycle", fields(pair = %self.pair))]
    pub async fn run_cycle(&self, shutdown: &mut Shutdown) -> CycleOutcome {
        let Some(mut arb) = self.find_opportunity().await else {
            debug!("No arbitrage opportunity");
            return CycleOutcome::NoOpportunity;
        };

        let sheet = match BalanceSheet::fetch(&self.adapters, self.timeout).await {
            Ok(sheet) => sheet,
            Err(e) => {
                warn!(error = %e, "Balance snapshot failed, skipping opportunity");
                return CycleOutcome::Skipped(e.to_string());
            }
        };

        // Funds may cut a qualifying candidate down to dust.
        let volume = clamp_volume(&arb, &sheet, self.config.buy_balance_margin);
        if volume <= Decimal::ZERO || volume < self.config.min_volume {
            info!(
                buy = %arb.buy_exchange(),
                sell = %arb.sell_exchange(),
                detected = %arb.volume,
                fundable = %volume,
                "Insufficient balances for arbitrage"
            );
            return CycleOutcome::Skipped("insufficient balances".to_string());
        }
        arb.volume = volume;

        let report = self.executor.execute(&arb).await;

        if sleep_or_shutdown(self.config.settle_delay(), shutdown).await {
            return CycleOutcome::Interrupted;
        }
        self.rebalancer.rebalance_pair(&self.pair, shutdown.clone()).await;

        CycleOutcome::Executed(report)
    }

    /// Trade until shutdown.
    pub async fn run(&self, mut shutdown: Shutdown) {
        info!(
            pair = %self.pair,
            exchanges = ?self.adapters.iter().map(|a| a.name()).collect::<Vec<_>>(),
            min_spread = %self.config.min_spread_percent,
            min_volume = %self.config.min_volume,
            "Arbitrage trader started"
        );

        loop {
            match self.run_cycle(&mut shutdown).await {
                CycleOutcome::Interrupted => break,
                CycleOutcome::Executed(report) => {
                    info!(id = %report.arbitrage_id, complete = report.is_complete(), "Trading cycle done")
                }
                CycleOutcome::NoOpportunity | CycleOutcome::Skipped(_) => {}
            }

            if sleep_or_shutdown(self.config.cycle_interval(), &mut shutdown).await {
                break;
            }
        }

        info!("Arbitrage trader stopped");
    }
}
