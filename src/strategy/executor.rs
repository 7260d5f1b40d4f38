//! Execution of both legs of an arbitrage.
//!
//! The buy and the sell order are submitted concurrently, each in its own task
//! with a deadline. The legs are independent: a failure on one side does not
//! cancel or roll back the other. Whatever was acknowledged is persisted, and
//! the arbitrage itself is recorded after every attempt.

use super::balances::BalanceSheet;
use super::detector::Arbitrage;
use crate::exchange::{ExchangeAdapter, OrderAck, Pair, Side};
use crate::persistence::PersistenceManager;
use crate::utils::{guarded_call, safe_div};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Result of one order submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegOutcome {
    /// Exchange order ids returned by the venue.
    Placed(Vec<String>),
    Failed(String),
}

impl LegOutcome {
    pub fn is_placed(&self) -> bool {
        matches!(self, LegOutcome::Placed(_))
    }
}

/// What happened to both legs of an arbitrage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub arbitrage_id: String,
    pub buy: LegOutcome,
    pub sell: LegOutcome,
    /// Acks written to the store.
    pub acks_saved: usize,
}

impl ExecutionReport {
    pub fn is_complete(&self) -> bool {
        self.buy.is_placed() && self.sell.is_placed()
    }
}

/// Largest volume both exchanges can fund.
///
/// Bounded by the detected volume, the base balance on the sell exchange and
/// `margin` of the quote balance on the buy exchange converted at the buy
/// price. Never negative.
pub fn clamp_volume(arb: &Arbitrage, sheet: &BalanceSheet, margin: Decimal) -> Decimal {
    let sellable = sheet.get(arb.sell_exchange(), &arb.pair.base);
    let spendable = sheet.get(arb.buy_exchange(), &arb.pair.quote) * margin;
    let affordable = safe_div(spendable, arb.buy_price());

    arb.volume.min(sellable).min(affordable).max(Decimal::ZERO)
}

/// Places orders for detected arbitrages.
pub struct TradeExecutor {
    adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
    store: Arc<PersistenceManager>,
    timeout: Duration,
}

impl TradeExecutor {
    pub fn new(
        adapters: &[Arc<dyn ExchangeAdapter>],
        store: Arc<PersistenceManager>,
        timeout: Duration,
    ) -> Self {
        let adapters = adapters
            .iter()
            .map(|a| (a.name().to_string(), Arc::clone(a)))
            .collect();
        Self {
            adapters,
            store,
            timeout,
        }
    }

    /// Submit both legs and persist the outcome.
    #[instrument(skip(self, arb), name = "execute_arbitrage", fields(id = %arb.id))]
    pub async fn execute(&self, arb: &Arbitrage) -> ExecutionReport {
        info!(
            pair = %arb.pair,
            buy = %arb.buy_exchange(),
            sell = %arb.sell_exchange(),
            buy_price = %arb.buy_price(),
            sell_price = %arb.sell_price(),
            volume = %arb.volume,
            spread = %arb.spread_percent.round_dp(4),
            "Executing arbitrage"
        );

        let (buy, sell) = tokio::join!(
            self.run_leg(Side::Buy, arb.buy_exchange(), &arb.pair, arb.buy_price(), arb.volume),
            self.run_leg(Side::Sell, arb.sell_exchange(), &arb.pair, arb.sell_price(), arb.volume),
        );

        let mut acks = Vec::new();
        for (side, exchange, outcome) in [
            (Side::Buy, arb.buy_exchange(), &buy),
            (Side::Sell, arb.sell_exchange(), &sell),
        ] {
            match outcome {
                LegOutcome::Placed(ids) => acks.extend(ids.iter().map(|id| OrderAck {
                    arbitrage_id: arb.id.clone(),
                    external_id: id.clone(),
                    exchanger: exchange.to_string(),
                    pair: arb.pair.clone(),
                    side,
                })),
                LegOutcome::Failed(reason) => {
                    error!(%side, exchange = %exchange, %reason, "Order leg failed");
                }
            }
        }

        let acks_saved = match self.store.save_order_acks(&acks) {
            Ok(saved) => saved,
            Err(e) => {
                error!(error = %e, acks = ?acks, "Failed to persist order acks");
                0
            }
        };

        if let Err(e) = self.store.save_arbitrage(arb) {
            error!(error = %e, "Failed to persist arbitrage");
        }

        let report = ExecutionReport {
            arbitrage_id: arb.id.clone(),
            buy,
            sell,
            acks_saved,
        };

        if report.is_complete() {
            info!(acks = acks_saved, "Both legs placed");
        } else {
            warn!(buy = ?report.buy, sell = ?report.sell, "Arbitrage executed partially");
        }
        report
    }

    async fn run_leg(
        &self,
        side: Side,
        exchange: &str,
        pair: &Pair,
        price: Decimal,
        volume: Decimal,
    ) -> LegOutcome {
        let Some(adapter) = self.adapters.get(exchange).cloned() else {
            return LegOutcome::Failed(format!("no adapter for {}", exchange));
        };

        let pair = pair.clone();
        let placed = guarded_call(&adapter, "place order", self.timeout, |adapter| async move {
            adapter.place_order(side, &pair, price, volume).await
        })
        .await;

        match placed {
            Ok(ids) => {
                info!(%side, exchange = %exchange, ids = ?ids, "Order placed");
                LegOutcome::Placed(ids)
            }
            Err(e) => LegOutcome::Failed(e.to_string()),
        }
    }
}
