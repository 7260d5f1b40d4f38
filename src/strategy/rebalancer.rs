//! Redistribution of funds between exchanges.
//!
//! After trading, each currency of the pair is checked independently: an
//! exchange holding less than `min_allocation` of the currency's total is
//! topped up towards the equal share, taking funds from the exchanges that
//! hold more than their share.
//!
//! ## Flow
//! 1. Snapshot all balances (all-or-nothing)
//! 2. Plan transfers with [`plan_transfers`]
//! 3. Resolve destination addresses and withdraw
//! 4. Poll destinations until deposits arrive, with backoff and a deadline
//!
//! Every exchange call runs in its own task: a crash inside an adapter is
//! reported like any other failed call.

use super::balances::BalanceSheet;
use crate::config::RebalanceConfig;
use crate::exchange::{AddressScheme, ExchangeAdapter, ExchangeError, Pair};
use crate::persistence::{PersistenceManager, TransferRecord};
use crate::utils::{guarded_call, poll_until, sleep_or_shutdown, PollPolicy, Shutdown, WaitError};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// A planned withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub origin: String,
    pub destination: String,
    pub amount: Decimal,
}

#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error("cannot read {currency} balances: {source}")]
    Balances {
        currency: String,
        source: ExchangeError,
    },

    #[error("{failed} of {planned} {currency} withdrawals failed")]
    Withdrawals {
        currency: String,
        failed: usize,
        planned: usize,
    },

    #[error("{currency} deposits to {pending:?} not confirmed after {polls} polls ({elapsed:?})")]
    ArrivalTimeout {
        currency: String,
        pending: Vec<String>,
        polls: u32,
        elapsed: Duration,
    },

    #[error("{currency} rebalance cancelled by shutdown")]
    Cancelled { currency: String },
}

/// Plan the transfers that bring under-allocated exchanges up to the equal share.
///
/// With `target = total / N`, an exchange is a sink when its share of the
/// total is below `min_allocation` and it needs a positive amount to reach
/// the target. Sources are exchanges above the target, drained largest
/// surplus first (ties by name). Sinks are served in name order. Planned
/// amounts never exceed any source's surplus, and the plan is empty when the
/// total is zero.
pub fn plan_transfers(balances: &BTreeMap<String, Decimal>, min_allocation: Decimal) -> Vec<Transaction> {
    let total: Decimal = balances.values().copied().sum();
    if balances.is_empty() || total <= Decimal::ZERO {
        return Vec::new();
    }

    let target = total / Decimal::from(balances.len());

    let sinks: Vec<(&String, Decimal)> = balances
        .iter()
        .filter(|(_, balance)| **balance / total < min_allocation)
        .map(|(exchange, balance)| (exchange, target - *balance))
        .filter(|(_, need)| *need > Decimal::ZERO)
        .collect();

    let mut sources: Vec<(&String, Decimal)> = balances
        .iter()
        .map(|(exchange, balance)| (exchange, *balance - target))
        .filter(|(_, surplus)| *surplus > Decimal::ZERO)
        .collect();
    sources.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut plan = Vec::new();
    for (destination, mut need) in sinks {
        while need > Decimal::ZERO {
            let Some((origin, surplus)) = sources.first_mut() else {
                break;
            };

            let amount = need.min(*surplus);
            plan.push(Transaction {
                origin: (*origin).clone(),
                destination: destination.clone(),
                amount,
            });
            need -= amount;
            *surplus -= amount;

            if *surplus <= Decimal::ZERO {
                sources.remove(0);
            }
        }
    }

    plan
}

/// Executes transfer plans and waits for the funds to land.
pub struct BalanceRebalancer {
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
    store: Arc<PersistenceManager>,
    config: RebalanceConfig,
    timeout: Duration,
}

impl BalanceRebalancer {
    pub fn new(
        adapters: Vec<Arc<dyn ExchangeAdapter>>,
        store: Arc<PersistenceManager>,
        config: RebalanceConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            adapters,
            store,
            config,
            timeout,
        }
    }

    fn adapter(&self, name: &str) -> Option<&Arc<dyn ExchangeAdapter>> {
        self.adapters.iter().find(|a| a.name() == name)
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.config.poll_interval_secs),
            max_interval: Duration::from_secs(self.config.max_poll_interval_secs),
            multiplier: self.config.backoff_multiplier,
            timeout: Duration::from_secs(self.config.wait_timeout_secs),
        }
    }

    /// Rebalance both currencies of `pair` concurrently.
    ///
    /// The quote currency starts `currency_stagger` after the base currency so
    /// the two do not hit the same exchange APIs at once.
    pub async fn rebalance_pair(
        &self,
        pair: &Pair,
        shutdown: Shutdown,
    ) -> (
        Result<Vec<Transaction>, RebalanceError>,
        Result<Vec<Transaction>, RebalanceError>,
    ) {
        let mut quote_shutdown = shutdown.clone();
        let stagger = self.config.currency_stagger();

        let base = self.rebalance_currency(&pair.base, shutdown);
        let quote = async {
            if sleep_or_shutdown(stagger, &mut quote_shutdown).await {
                return Err(RebalanceError::Cancelled {
                    currency: pair.quote.clone(),
                });
            }
            self.rebalance_currency(&pair.quote, quote_shutdown).await
        };

        let (base, quote) = tokio::join!(base, quote);

        for (currency, result) in [(&pair.base, &base), (&pair.quote, &quote)] {
            match result {
                Ok(plan) => info!(currency = %currency, transfers = plan.len(), "Currency rebalanced"),
                Err(e) => error!(currency = %currency, error = %e, "Rebalance failed"),
            }
        }

        (base, quote)
    }

    /// Rebalance one currency and wait for the transfers to arrive.
    #[instrument(skip(self, shutdown), name = "rebalance")]
    pub async fn rebalance_currency(
        &self,
        currency: &str,
        mut shutdown: Shutdown,
    ) -> Result<Vec<Transaction>, RebalanceError> {
        let sheet = BalanceSheet::fetch(&self.adapters, self.timeout)
            .await
            .map_err(|source| RebalanceError::Balances {
                currency: currency.to_string(),
                source,
            })?;

        let balances = sheet.currency(currency);
        let plan = plan_transfers(&balances, self.config.min_allocation);
        if plan.is_empty() {
            debug!(balances = ?balances, "Allocation within bounds");
            return Ok(plan);
        }

        info!(transfers = plan.len(), plan = ?plan, "Rebalancing");

        // Per destination: incoming balance before the transfers, amount sent.
        let mut inbound: BTreeMap<String, (Decimal, Decimal)> = BTreeMap::new();
        let mut failed = 0;

        for tx in &plan {
            if !inbound.contains_key(&tx.destination) {
                let before = self.incoming_balance(&tx.destination, currency, &sheet).await;
                inbound.insert(tx.destination.clone(), (before, Decimal::ZERO));
            }

            match self.transfer(tx, currency).await {
                Ok(withdrawal_id) => {
                    info!(
                        origin = %tx.origin,
                        destination = %tx.destination,
                        amount = %tx.amount,
                        %withdrawal_id,
                        "Withdrawal issued"
                    );
                    if let Some((_, sent)) = inbound.get_mut(&tx.destination) {
                        *sent += tx.amount;
                    }
                    let record = TransferRecord {
                        currency: currency.to_string(),
                        origin: tx.origin.clone(),
                        destination: tx.destination.clone(),
                        amount: tx.amount,
                        withdrawal_id,
                        timestamp: Utc::now(),
                    };
                    if let Err(e) = self.store.record_transfer(&record) {
                        error!(error = %e, "Failed to persist transfer");
                    }
                }
                Err(e) => {
                    failed += 1;
                    error!(
                        origin = %tx.origin,
                        destination = %tx.destination,
                        amount = %tx.amount,
                        error = %e,
                        "Withdrawal failed"
                    );
                }
            }
        }

        let thresholds: BTreeMap<String, Decimal> = inbound
            .into_iter()
            .filter(|(_, (_, sent))| *sent > Decimal::ZERO)
            .map(|(destination, (before, sent))| (destination, (before + sent) * self.config.arrival_ratio))
            .collect();

        if !thresholds.is_empty() {
            self.wait_for_arrivals(currency, thresholds, &mut shutdown).await?;
        }

        if failed > 0 {
            return Err(RebalanceError::Withdrawals {
                currency: currency.to_string(),
                failed,
                planned: plan.len(),
            });
        }
        Ok(plan)
    }

    async fn incoming_balance(&self, exchange: &str, currency: &str, sheet: &BalanceSheet) -> Decimal {
        let Some(adapter) = self.adapter(exchange) else {
            return sheet.get(exchange, currency);
        };
        match self.incoming(adapter, currency).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(exchange = %exchange, error = %e, "Using snapshot balance as arrival baseline");
                sheet.get(exchange, currency)
            }
        }
    }

    async fn transfer(&self, tx: &Transaction, currency: &str) -> Result<String, ExchangeError> {
        let origin = self
            .adapter(&tx.origin)
            .ok_or_else(|| ExchangeError::unsupported(&tx.origin, "withdrawal without adapter"))?;
        let destination = self
            .adapter(&tx.destination)
            .ok_or_else(|| ExchangeError::unsupported(&tx.destination, "deposit without adapter"))?;

        let address = match origin.address_scheme() {
            AddressScheme::NamedKey => AddressScheme::named_key(destination.name(), currency),
            AddressScheme::DepositAddress => {
                let currency = currency.to_string();
                guarded_call(destination, "payment address", self.timeout, |adapter| async move {
                    adapter.payment_address(&currency).await
                })
                .await?
            }
        };

        if address.is_empty() {
            return Err(ExchangeError::MissingAddress {
                exchange: destination.name().to_string(),
                currency: currency.to_string(),
            });
        }

        let (amount, currency) = (tx.amount, currency.to_string());
        guarded_call(origin, "withdraw", self.timeout, |adapter| async move {
            adapter.withdraw(amount, &currency, &address).await
        })
        .await
    }

    async fn incoming(&self, adapter: &Arc<dyn ExchangeAdapter>, currency: &str) -> Result<Decimal, ExchangeError> {
        let currency = currency.to_string();
        guarded_call(adapter, "incoming balance", self.timeout, |adapter| async move {
            adapter.incoming_balance(&currency).await
        })
        .await
    }

    async fn settle(&self, adapter: &Arc<dyn ExchangeAdapter>, currency: &str) -> Result<(), ExchangeError> {
        let currency = currency.to_string();
        guarded_call(adapter, "settle deposit", self.timeout, |adapter| async move {
            adapter.settle_deposit(&currency).await
        })
        .await
    }

    /// Poll every destination until its deposit is visible.
    ///
    /// A destination has arrived once its incoming balance reaches its
    /// threshold or the configured floor for the currency. Each destination
    /// is settled exactly once on arrival.
    async fn wait_for_arrivals(
        &self,
        currency: &str,
        thresholds: BTreeMap<String, Decimal>,
        shutdown: &mut Shutdown,
    ) -> Result<(), RebalanceError> {
        let outstanding = Mutex::new(thresholds);
        let floor = self.config.min_balance(currency);
        let alert_after = self.config.alert_after_polls;

        let pending = &outstanding;
        let result = poll_until(&self.poll_policy(), shutdown, move |poll| {
            async move {
                let waiting: Vec<(String, Decimal)> = lock(pending)
                    .iter()
                    .map(|(k, v)| (k.clone(), *v))
                    .collect();

                for (destination, threshold) in waiting {
                    let Some(adapter) = self.adapter(&destination) else {
                        lock(pending).remove(&destination);
                        continue;
                    };

                    let balance = match self.incoming(adapter, currency).await {
                        Ok(balance) => balance,
                        Err(e) => {
                            warn!(exchange = %destination, error = %e, poll, "Balance poll failed");
                            continue;
                        }
                    };

                    let arrived = balance >= threshold || floor.is_some_and(|f| balance >= f);
                    if !arrived {
                        debug!(exchange = %destination, %balance, %threshold, poll, "Deposit not arrived yet");
                        continue;
                    }

                    info!(exchange = %destination, %balance, poll, "Deposit arrived");
                    if let Err(e) = self.settle(adapter, currency).await {
                        error!(exchange = %destination, error = %e, "Failed to settle deposit");
                    }
                    lock(pending).remove(&destination);
                }

                let remaining = lock(pending).len();
                if remaining == 0 {
                    return Some(());
                }
                if poll == alert_after {
                    error!(
                        %currency,
                        pending = ?lock(pending).keys().collect::<Vec<_>>(),
                        poll,
                        "Deposits still missing, manual check required"
                    );
                }
                None
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(WaitError::Cancelled) => Err(RebalanceError::Cancelled {
                currency: currency.to_string(),
            }),
            Err(WaitError::TimedOut { polls, elapsed }) => Err(RebalanceError::ArrivalTimeout {
                currency: currency.to_string(),
                pending: lock(&outstanding).keys().cloned().collect(),
                polls,
                elapsed,
            }),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Balances, MockExchangeAdapter, PaperHub};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    fn balances(entries: &[(&str, Decimal)]) -> BTreeMap<String, Decimal> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn tx(origin: &str, destination: &str, amount: Decimal) -> Transaction {
        Transaction {
            origin: origin.to_string(),
            destination: destination.to_string(),
            amount,
        }
    }

    fn config() -> RebalanceConfig {
        RebalanceConfig {
            poll_interval_secs: 2,
            max_poll_interval_secs: 8,
            wait_timeout_secs: 60,
            currency_stagger_secs: 1,
            ..RebalanceConfig::default()
        }
    }

    #[test]
    fn test_single_sink_single_source() {
        let plan = plan_transfers(
            &balances(&[("m1", dec!(1)), ("m2", dec!(19)), ("m3", dec!(11)), ("m4", dec!(9))]),
            dec!(0.05),
        );
        assert_eq!(plan, vec![tx("m2", "m1", dec!(9))]);
    }

    #[test]
    fn test_balanced_or_empty_plans_nothing() {
        assert!(plan_transfers(&balances(&[("a", dec!(5)), ("b", dec!(6))]), dec!(0.05)).is_empty());
        assert!(plan_transfers(&balances(&[("a", dec!(0)), ("b", dec!(0))]), dec!(0.05)).is_empty());
        assert!(plan_transfers(&BTreeMap::new(), dec!(0.05)).is_empty());
    }

    #[test]
    fn test_sinks_drain_sources_in_surplus_order() {
        let plan = plan_transfers(
            &balances(&[("a", dec!(0)), ("b", dec!(0)), ("c", dec!(10)), ("d", dec!(10))]),
            dec!(0.05),
        );
        assert_eq!(plan, vec![tx("c", "a", dec!(5)), tx("d", "b", dec!(5))]);

        let plan = plan_transfers(
            &balances(&[("a", dec!(0)), ("b", dec!(3)), ("c", dec!(9))]),
            dec!(0.05),
        );
        // target 4: only `a` is under-allocated and `c` holds the surplus
        assert_eq!(plan, vec![tx("c", "a", dec!(4))]);
    }

    #[test]
    fn test_plans_respect_surplus_and_threshold() {
        let grid = [dec!(0), dec!(0.1), dec!(1), dec!(7), dec!(40)];
        let theta = dec!(0.05);

        for a in grid {
            for b in grid {
                for c in grid {
                    let input = balances(&[("a", a), ("b", b), ("c", c)]);
                    let total: Decimal = input.values().copied().sum();
                    let plan = plan_transfers(&input, theta);

                    if total.is_zero() {
                        assert!(plan.is_empty());
                        continue;
                    }
                    let target = total / dec!(3);

                    let mut after = input.clone();
                    for t in &plan {
                        assert!(t.amount > Decimal::ZERO);
                        assert!(input[&t.destination] / total < theta);
                        assert!(input[&t.origin] > target);
                        *after.get_mut(&t.origin).unwrap() -= t.amount;
                        *after.get_mut(&t.destination).unwrap() += t.amount;
                    }

                    // thirds do not divide exactly; allow rounding in the last places
                    let eps = dec!(0.000000000001);
                    let after_total: Decimal = after.values().copied().sum();
                    assert!((after_total - total).abs() < eps);
                    for t in &plan {
                        assert!(after[&t.origin] >= target - eps);
                        assert!(after[&t.destination] <= target + eps);
                    }
                }
            }
        }
    }

    async fn paper_setup(hub: &PaperHub, scheme: AddressScheme) -> Vec<Arc<dyn ExchangeAdapter>> {
        hub.set_balance("Kraken", "BTC", dec!(0.01)).await;
        hub.set_balance("Poloniex", "BTC", dec!(1.99)).await;
        vec![
            Arc::new(hub.exchange("Kraken")),
            Arc::new(hub.exchange("Poloniex").with_address_scheme(scheme)),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_arrives_via_deposit_address() {
        let hub = PaperHub::new().with_transfer_delay(Duration::from_secs(30));
        let adapters = paper_setup(&hub, AddressScheme::DepositAddress).await;
        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        let rebalancer = BalanceRebalancer::new(adapters, Arc::clone(&store), config(), Duration::from_secs(5));

        let (_tx, rx) = watch::channel(false);
        let plan = rebalancer.rebalance_currency("BTC", rx).await.unwrap();

        assert_eq!(plan, vec![tx("Poloniex", "Kraken", dec!(0.99))]);
        assert_eq!(hub.balance("Kraken", "BTC").await, dec!(1.00));
        assert_eq!(hub.balance("Poloniex", "BTC").await, dec!(1.00));
        assert_eq!(store.summary().unwrap().transfers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_arrives_via_named_key() {
        let hub = PaperHub::new()
            .with_transfer_delay(Duration::from_secs(5))
            .with_withdrawal_fee(dec!(0.0005));
        let adapters = paper_setup(&hub, AddressScheme::NamedKey).await;
        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        let rebalancer = BalanceRebalancer::new(adapters, store, config(), Duration::from_secs(5));

        let (_tx, rx) = watch::channel(false);
        rebalancer.rebalance_currency("BTC", rx).await.unwrap();

        // the fee is deducted in flight and still counts as arrived
        assert_eq!(hub.balance("Kraken", "BTC").await, dec!(0.9995));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_deposit_times_out() {
        let hub = PaperHub::new().with_transfer_delay(Duration::from_secs(10_000));
        let adapters = paper_setup(&hub, AddressScheme::DepositAddress).await;
        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        let rebalancer = BalanceRebalancer::new(adapters, store, config(), Duration::from_secs(5));

        let (_tx, rx) = watch::channel(false);
        let err = rebalancer.rebalance_currency("BTC", rx).await.unwrap_err();

        match err {
            RebalanceError::ArrivalTimeout { currency, pending, .. } => {
                assert_eq!(currency, "BTC");
                assert_eq!(pending, vec!["Kraken".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_the_wait() {
        let hub = PaperHub::new().with_transfer_delay(Duration::from_secs(10_000));
        let adapters = paper_setup(&hub, AddressScheme::DepositAddress).await;
        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        let rebalancer = BalanceRebalancer::new(adapters, store, config(), Duration::from_secs(5));

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let err = rebalancer.rebalance_currency("BTC", rx).await.unwrap_err();
        assert!(matches!(err, RebalanceError::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deposit_settled_once() {
        let mut origin = MockExchangeAdapter::new();
        origin.expect_name().return_const("Poloniex".to_string());
        origin
            .expect_trading_balances()
            .returning(|| Ok(Balances::from([("BTC".to_string(), dec!(2))])));
        origin
            .expect_address_scheme()
            .return_const(AddressScheme::NamedKey);
        origin
            .expect_withdraw()
            .withf(|amount, currency, address| {
                *amount == dec!(1) && currency.to_string() == "BTC" && address.to_string() == "Hitbtc-BTC"
            })
            .times(1)
            .returning(|_, _, _| Ok("W1".to_string()));

        let mut destination = MockExchangeAdapter::new();
        destination.expect_name().return_const("Hitbtc".to_string());
        destination
            .expect_trading_balances()
            .returning(|| Ok(Balances::from([("BTC".to_string(), dec!(0))])));
        let mut calls = 0;
        destination.expect_incoming_balance().returning(move |_| {
            calls += 1;
            Ok(if calls <= 2 { dec!(0) } else { dec!(1) })
        });
        destination
            .expect_settle_deposit()
            .times(1)
            .returning(|_| Ok(()));

        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        let rebalancer = BalanceRebalancer::new(
            vec![Arc::new(origin), Arc::new(destination)],
            Arc::clone(&store),
            config(),
            Duration::from_secs(5),
        );

        let (_tx, rx) = watch::channel(false);
        let plan = rebalancer.rebalance_currency("BTC", rx).await;

        tokio_test::assert_ok!(plan);
        assert_eq!(store.recent_transfers(5).unwrap()[0].withdrawal_id, "W1");
    }

    fn named_key_origin() -> MockExchangeAdapter {
        let mut origin = MockExchangeAdapter::new();
        origin.expect_name().return_const("Poloniex".to_string());
        origin
            .expect_trading_balances()
            .returning(|| Ok(Balances::from([("BTC".to_string(), dec!(2))])));
        origin
            .expect_address_scheme()
            .return_const(AddressScheme::NamedKey);
        origin
    }

    /// Destination whose incoming balance walks through `incoming`, the last
    /// value repeating. The first value is the baseline read before withdrawing.
    fn hitbtc_destination(incoming: Vec<Decimal>, calls: Arc<AtomicUsize>) -> MockExchangeAdapter {
        let mut destination = MockExchangeAdapter::new();
        destination.expect_name().return_const("Hitbtc".to_string());
        destination
            .expect_trading_balances()
            .returning(|| Ok(Balances::from([("BTC".to_string(), dec!(0))])));
        destination.expect_incoming_balance().returning(move |_| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            Ok(incoming[call.min(incoming.len() - 1)])
        });
        destination
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashing_withdrawal_is_reported() {
        let mut origin = named_key_origin();
        origin
            .expect_withdraw()
            .returning(|_, _, _| panic!("withdrawal response without id"));
        let destination = hitbtc_destination(vec![dec!(0)], Arc::new(AtomicUsize::new(0)));

        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        let rebalancer = BalanceRebalancer::new(
            vec![Arc::new(origin), Arc::new(destination)],
            Arc::clone(&store),
            config(),
            Duration::from_secs(5),
        );

        let (_tx, rx) = watch::channel(false);
        let err = tokio_test::assert_err!(rebalancer.rebalance_currency("BTC", rx).await);

        assert!(matches!(
            err,
            RebalanceError::Withdrawals { ref currency, failed: 1, planned: 1 } if currency == "BTC"
        ));
        assert_eq!(store.summary().unwrap().transfers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_currency_floor_counts_as_arrival() {
        let mut origin = named_key_origin();
        origin
            .expect_withdraw()
            .times(1)
            .returning(|_, _, _| Ok("W7".to_string()));

        // 0.5 stays below 0.9 * (0 + 1) but reaches the configured floor
        let calls = Arc::new(AtomicUsize::new(0));
        let mut destination = hitbtc_destination(vec![dec!(0), dec!(0), dec!(0.5)], Arc::clone(&calls));
        destination
            .expect_settle_deposit()
            .times(1)
            .returning(|_| Ok(()));

        let mut config = config();
        config.min_balances.insert("BTC".to_string(), dec!(0.5));

        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        let rebalancer = BalanceRebalancer::new(
            vec![Arc::new(origin), Arc::new(destination)],
            store,
            config,
            Duration::from_secs(5),
        );

        let (_tx, rx) = watch::channel(false);
        let plan = tokio_test::assert_ok!(rebalancer.rebalance_currency("BTC", rx).await);

        assert_eq!(plan, vec![tx("Poloniex", "Hitbtc", dec!(1))]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_keeps_waiting() {
        let mut origin = named_key_origin();
        origin
            .expect_withdraw()
            .times(1)
            .returning(|_, _, _| Ok("W8".to_string()));

        // baseline, four empty polls, then the deposit
        let calls = Arc::new(AtomicUsize::new(0));
        let mut destination = hitbtc_destination(
            vec![dec!(0), dec!(0), dec!(0), dec!(0), dec!(0), dec!(1)],
            Arc::clone(&calls),
        );
        destination
            .expect_settle_deposit()
            .times(1)
            .returning(|_| Ok(()));

        let config = RebalanceConfig {
            alert_after_polls: 2,
            ..config()
        };

        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        let rebalancer = BalanceRebalancer::new(
            vec![Arc::new(origin), Arc::new(destination)],
            store,
            config,
            Duration::from_secs(5),
        );

        let (_tx, rx) = watch::channel(false);
        tokio_test::assert_ok!(rebalancer.rebalance_currency("BTC", rx).await);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_rebalances_both_currencies() {
        let hub = PaperHub::new().with_transfer_delay(Duration::from_secs(3));
        hub.set_balance("Kraken", "ZEC", dec!(20)).await;
        hub.set_balance("Poloniex", "ZEC", dec!(0)).await;
        hub.set_balance("Kraken", "BTC", dec!(1)).await;
        hub.set_balance("Poloniex", "BTC", dec!(1)).await;

        let adapters: Vec<Arc<dyn ExchangeAdapter>> =
            vec![Arc::new(hub.exchange("Kraken")), Arc::new(hub.exchange("Poloniex"))];
        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        let rebalancer = BalanceRebalancer::new(adapters, store, config(), Duration::from_secs(5));

        let (_tx, rx) = watch::channel(false);
        let (base, quote) = rebalancer
            .rebalance_pair(&Pair::parse("zec_btc").unwrap(), rx)
            .await;

        assert_eq!(base.unwrap(), vec![tx("Kraken", "Poloniex", dec!(10))]);
        assert!(quote.unwrap().is_empty());
        assert_eq!(hub.balance("Poloniex", "ZEC").await, dec!(10));
    }
}
