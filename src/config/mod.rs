//! Configuration management for the arbitrage trader.
//!
//! Loads settings from an optional config file and `ARB__SECTION__KEY`
//! environment variables, plus exchange credentials from a JSON file.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Trading loop parameters
    #[serde(default)]
    pub trading: TradingConfig,
    /// Balance rebalancing parameters
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    /// Trade reconciliation parameters
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// HTTP settings shared by every exchange adapter
    #[serde(default)]
    pub network: NetworkConfig,
    /// SQLite store location
    #[serde(default)]
    pub database: DatabaseConfig,
    /// JSON file holding exchange API keys
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Pair selector, e.g. `zec_btc`
    #[serde(default = "default_pair")]
    pub pair: String,
    /// Pause between two trading cycles
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Smallest spread (in percent) worth trading
    #[serde(default = "default_min_spread_percent")]
    pub min_spread_percent: Decimal,
    /// Smallest volume (in base currency) worth trading
    #[serde(default = "default_min_volume")]
    pub min_volume: Decimal,
    /// Fraction of the buy exchange's quote balance that may be spent
    #[serde(default = "default_buy_balance_margin")]
    pub buy_balance_margin: Decimal,
    /// Pause between executing an arbitrage and rebalancing
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Minimum share of a currency's total each exchange should hold (0.0-0.5)
    #[serde(default = "default_min_allocation")]
    pub min_allocation: Decimal,
    /// Share of the expected balance that counts as "arrived" (fees are deducted in flight)
    #[serde(default = "default_arrival_ratio")]
    pub arrival_ratio: Decimal,
    /// First delay between two balance polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Cap for the poll delay once backoff kicks in
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_secs: u64,
    /// Growth factor of the poll delay
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    /// Give up waiting for transfers after this long
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
    /// Log an escalation after this many unsuccessful polls
    #[serde(default = "default_alert_after_polls")]
    pub alert_after_polls: u32,
    /// Delay before the quote currency is rebalanced
    #[serde(default = "default_currency_stagger")]
    pub currency_stagger_secs: u64,
    /// Per-currency balance above which a destination is considered funded
    #[serde(default)]
    pub min_balances: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Pause between two reconciliation cycles
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
    /// Pause between two fill lookups (the trader shares the same API keys)
    #[serde(default = "default_reconcile_throttle")]
    pub throttle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Deadline for a single exchange call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

// Default value functions
fn default_pair() -> String {
    "zec_btc".to_string()
}

fn default_cycle_interval() -> u64 {
    20
}

fn default_min_spread_percent() -> Decimal {
    Decimal::new(8, 1) // 0.8%
}

fn default_min_volume() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_buy_balance_margin() -> Decimal {
    Decimal::new(95, 2) // 0.95
}

fn default_settle_delay() -> u64 {
    60
}

fn default_min_allocation() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_arrival_ratio() -> Decimal {
    Decimal::new(9, 1) // 0.9
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_poll_interval() -> u64 {
    120
}

fn default_backoff_multiplier() -> u32 {
    2
}

fn default_wait_timeout() -> u64 {
    3600
}

fn default_alert_after_polls() -> u32 {
    10
}

fn default_currency_stagger() -> u64 {
    10
}

fn default_reconcile_interval() -> u64 {
    600
}

fn default_reconcile_throttle() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_database_path() -> String {
    "data/arb_trader.db".to_string()
}

fn default_credentials_path() -> String {
    "secrets/trader.json".to_string()
}

impl Config {
    /// Load configuration from an optional config file and environment variables.
    ///
    /// Without an explicit `path`, a `config.{toml,json,yaml}` next to the
    /// binary is used when present.
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::default().separator("__").prefix("ARB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.trading.min_spread_percent >= Decimal::ZERO,
            "min_spread_percent must not be negative"
        );

        anyhow::ensure!(
            self.trading.min_volume >= Decimal::ZERO,
            "min_volume must not be negative"
        );

        anyhow::ensure!(
            self.trading.buy_balance_margin > Decimal::ZERO
                && self.trading.buy_balance_margin <= Decimal::ONE,
            "buy_balance_margin must be between 0 and 1"
        );

        anyhow::ensure!(
            self.rebalance.min_allocation >= Decimal::ZERO
                && self.rebalance.min_allocation < Decimal::new(5, 1),
            "min_allocation must be in [0, 0.5)"
        );

        anyhow::ensure!(
            self.rebalance.arrival_ratio > Decimal::ZERO
                && self.rebalance.arrival_ratio <= Decimal::ONE,
            "arrival_ratio must be between 0 and 1"
        );

        anyhow::ensure!(
            self.rebalance.poll_interval_secs > 0
                && self.rebalance.max_poll_interval_secs >= self.rebalance.poll_interval_secs,
            "poll intervals must be positive and max_poll_interval_secs >= poll_interval_secs"
        );

        anyhow::ensure!(
            self.rebalance.backoff_multiplier >= 1,
            "backoff_multiplier must be >= 1"
        );

        anyhow::ensure!(
            self.network.request_timeout_secs > 0,
            "request_timeout_secs must be positive"
        );

        anyhow::ensure!(
            self.reconcile.interval_secs > 0,
            "reconcile interval_secs must be positive"
        );

        Ok(())
    }
}

impl TradingConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

impl RebalanceConfig {
    pub fn currency_stagger(&self) -> Duration {
        Duration::from_secs(self.currency_stagger_secs)
    }

    /// Configured floor for `currency`, if any.
    pub fn min_balance(&self, currency: &str) -> Option<Decimal> {
        self.min_balances.get(currency).copied()
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trading: TradingConfig::default(),
            rebalance: RebalanceConfig::default(),
            reconcile: ReconcileConfig::default(),
            network: NetworkConfig::default(),
            database: DatabaseConfig::default(),
            credentials_path: default_credentials_path(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            pair: default_pair(),
            cycle_interval_secs: default_cycle_interval(),
            min_spread_percent: default_min_spread_percent(),
            min_volume: default_min_volume(),
            buy_balance_margin: default_buy_balance_margin(),
            settle_delay_secs: default_settle_delay(),
        }
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            min_allocation: default_min_allocation(),
            arrival_ratio: default_arrival_ratio(),
            poll_interval_secs: default_poll_interval(),
            max_poll_interval_secs: default_max_poll_interval(),
            backoff_multiplier: default_backoff_multiplier(),
            wait_timeout_secs: default_wait_timeout(),
            alert_after_polls: default_alert_after_polls(),
            currency_stagger_secs: default_currency_stagger(),
            min_balances: BTreeMap::new(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval(),
            throttle_secs: default_reconcile_throttle(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// API key pair of one exchange account.
#[derive(Clone, Deserialize)]
pub struct ApiCredential {
    pub key: String,
    pub secret: String,
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Credentials of every configured exchange, keyed by exchange name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Credentials(HashMap<String, ApiCredential>);

impl Credentials {
    /// Read the credentials JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("Failed to parse credentials file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let credentials: Self = serde_json::from_str(raw)?;
        for (exchange, credential) in &credentials.0 {
            anyhow::ensure!(
                !credential.key.is_empty() && !credential.secret.is_empty(),
                "empty API key or secret for {}",
                exchange
            );
        }
        Ok(credentials)
    }

    pub fn get(&self, exchange: &str) -> Option<&ApiCredential> {
        self.0.get(exchange)
    }

    /// Exchange names, sorted.
    pub fn exchanges(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.0.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trading.pair, "zec_btc");
        assert_eq!(config.trading.min_spread_percent, dec!(0.8));
        assert_eq!(config.rebalance.min_allocation, dec!(0.05));
        assert_eq!(config.reconcile.interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_validate_rejects_bad_allocation() {
        let mut config = Config::default();
        config.rebalance.min_allocation = dec!(0.5);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.trading.buy_balance_margin = dec!(1.2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"trading": {"pair": "eth_btc"}, "rebalance": {"min_balances": {"ZEC": "0.5"}}}"#)
                .unwrap();
        assert_eq!(config.trading.pair, "eth_btc");
        assert_eq!(config.trading.cycle_interval_secs, 20);
        assert_eq!(config.rebalance.min_balance("ZEC"), Some(dec!(0.5)));
        assert_eq!(config.rebalance.min_balance("BTC"), None);
    }

    #[test]
    fn test_credentials_from_json() {
        let credentials = Credentials::from_json(
            r#"{"Poloniex": {"key": "pk", "secret": "ps"}, "Kraken": {"key": "kk", "secret": "a3M="}}"#,
        )
        .unwrap();
        assert_eq!(credentials.exchanges(), vec!["Kraken", "Poloniex"]);
        assert_eq!(credentials.get("Poloniex").unwrap().key, "pk");
        assert!(credentials.get("Hitbtc").is_none());

        let debug = format!("{:?}", credentials.get("Poloniex").unwrap());
        assert!(!debug.contains("ps"));
    }

    #[test]
    fn test_credentials_reject_empty_secret() {
        assert!(Credentials::from_json(r#"{"Hitbtc": {"key": "k", "secret": ""}}"#).is_err());
        assert!(Credentials::from_json("not json").is_err());
    }
}
