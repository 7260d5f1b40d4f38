//! Background reconciliation of order acks into trades.
//!
//! Every cycle loads the acks that have no trade yet, asks the owning
//! exchange for the fills and stores them. Acks whose fills are not visible
//! yet stay pending and are retried next cycle; lookups are throttled because
//! the trader uses the same API keys. Each lookup runs in its own task, so a
//! crashing adapter only fails its own ack.

use crate::exchange::{ExchangeAdapter, Trade};
use crate::persistence::PersistenceManager;
use crate::utils::{guarded_call, sleep_or_shutdown, Shutdown};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Counters of one reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub pending: usize,
    /// Acks for which at least one trade was stored.
    pub reconciled: usize,
    pub trades_saved: usize,
    /// Acks still waiting for fills.
    pub unfilled: usize,
    /// Acks whose exchange has no adapter.
    pub skipped: usize,
    pub failed: usize,
}

pub struct TradeReconciler {
    adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
    store: Arc<PersistenceManager>,
    interval: Duration,
    throttle: Duration,
    timeout: Duration,
}

impl TradeReconciler {
    pub fn new(
        adapters: &[Arc<dyn ExchangeAdapter>],
        store: Arc<PersistenceManager>,
        interval: Duration,
        throttle: Duration,
        timeout: Duration,
    ) -> Self {
        let adapters = adapters
            .iter()
            .map(|a| (a.name().to_string(), Arc::clone(a)))
            .collect();
        Self {
            adapters,
            store,
            interval,
            throttle,
            timeout,
        }
    }

    /// Reconcile every pending ack once.
    #[instrument(skip(self, shutdown), name = "reconcile_cycle")]
    pub async fn run_cycle(&self, shutdown: &mut Shutdown) -> Result<ReconcileReport> {
        let acks = self.store.pending_order_acks()?;
        let mut report = ReconcileReport {
            pending: acks.len(),
            ..ReconcileReport::default()
        };

        for (i, ack) in acks.iter().enumerate() {
            if i > 0 && sleep_or_shutdown(self.throttle, shutdown).await {
                info!("Shutdown requested, stopping reconciliation cycle");
                break;
            }

            let Some(adapter) = self.adapters.get(&ack.exchanger) else {
                warn!(exchange = %ack.exchanger, order = %ack.external_id, "No adapter for pending order");
                report.skipped += 1;
                continue;
            };

            let (order_id, pair, side) = (ack.external_id.clone(), ack.pair.clone(), ack.side);
            let fills = match guarded_call(adapter, "fetch fills", self.timeout, |adapter| async move {
                adapter.fetch_fills(&order_id, &pair, side).await
            })
            .await
            {
                Ok(fills) => fills,
                Err(e) => {
                    warn!(exchange = %ack.exchanger, order = %ack.external_id, error = %e, "Fill lookup failed");
                    report.failed += 1;
                    continue;
                }
            };

            if fills.is_empty() {
                debug!(exchange = %ack.exchanger, order = %ack.external_id, "No fills yet");
                report.unfilled += 1;
                continue;
            }

            let trades: Vec<Trade> = fills.into_iter().map(|fill| Trade::from_fill(ack, fill)).collect();
            match self.store.save_trades(&trades) {
                Ok(saved) => {
                    info!(
                        exchange = %ack.exchanger,
                        order = %ack.external_id,
                        arbitrage = %ack.arbitrage_id,
                        trades = saved,
                        "Order reconciled"
                    );
                    report.reconciled += 1;
                    report.trades_saved += saved;
                }
                Err(e) => {
                    error!(exchange = %ack.exchanger, order = %ack.external_id, error = %e, "Failed to store trades");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run cycles until shutdown.
    pub async fn run(&self, mut shutdown: Shutdown) {
        info!(interval = ?self.interval, throttle = ?self.throttle, "Trade reconciler started");

        loop {
            match self.run_cycle(&mut shutdown).await {
                Ok(report) if report.pending > 0 => info!(?report, "Reconciliation cycle done"),
                Ok(_) => debug!("Nothing to reconcile"),
                Err(e) => error!(error = %e, "Reconciliation cycle failed"),
            }

            if sleep_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }

        info!("Trade reconciler stopped");
    }
}
