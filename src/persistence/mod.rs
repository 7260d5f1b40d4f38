//! SQLite ledger of arbitrage activity.
//!
//! Persists everything the trader needs to survive restarts:
//! - Detected arbitrages (written once per execution attempt)
//! - Order acknowledgments, one row per exchange order id
//! - Trades reconciled from exchange fills
//! - Withdrawals issued by the rebalancer
//!
//! An order ack without trades is "pending" and is picked up by the
//! reconciler until fills show up.

use crate::exchange::{OrderAck, Pair, Side, Trade};
use crate::strategy::Arbitrage;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// A withdrawal issued while rebalancing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub currency: String,
    pub origin: String,
    pub destination: String,
    pub amount: Decimal,
    pub withdrawal_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Row counts of every table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub arbitrages: u64,
    pub order_acks: u64,
    pub pending_acks: u64,
    pub trades: u64,
    pub transfers: u64,
}

/// Trade totals of one exchange and side, used by the `status` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeVolume {
    pub exchanger: String,
    pub side: Side,
    pub trades: u64,
    pub quantity: Decimal,
}

/// SQLite-based persistence manager.
///
/// The connection sits behind a mutex so one manager can be shared by the
/// trader and the reconciler.
pub struct PersistenceManager {
    conn: Mutex<Connection>,
}

impl PersistenceManager {
    /// Open (or create) the database at `db_path` and initialize the schema.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if path != Path::new(":memory:") {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory {:?}", parent))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let manager = Self {
            conn: Mutex::new(conn),
        };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", path);
        Ok(manager)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS arbitrage (
                id TEXT PRIMARY KEY,
                buy_ex TEXT NOT NULL,
                sell_ex TEXT NOT NULL,
                pair TEXT NOT NULL,
                ts TEXT NOT NULL,
                buy_price TEXT NOT NULL,
                sell_price TEXT NOT NULL,
                vol TEXT NOT NULL,
                spread TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS order_ack (
                arbitrage_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                pair TEXT NOT NULL,
                exchanger TEXT NOT NULL,
                side TEXT NOT NULL,
                UNIQUE (exchanger, external_id)
            );
            CREATE INDEX IF NOT EXISTS idx_order_ack_arbitrage ON order_ack(arbitrage_id);

            CREATE TABLE IF NOT EXISTS trade (
                arbitrage_id TEXT NOT NULL,
                exchanger TEXT NOT NULL,
                external_id TEXT NOT NULL,
                trade_id TEXT NOT NULL,
                price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                pair TEXT NOT NULL,
                side TEXT NOT NULL,
                fee TEXT NOT NULL,
                fee_currency TEXT NOT NULL,
                UNIQUE (exchanger, trade_id)
            );
            CREATE INDEX IF NOT EXISTS idx_trade_order ON trade(exchanger, external_id);

            CREATE TABLE IF NOT EXISTS transfer (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                currency TEXT NOT NULL,
                origin TEXT NOT NULL,
                destination TEXT NOT NULL,
                amount TEXT NOT NULL,
                withdrawal_id TEXT NOT NULL,
                ts TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Store an arbitrage. Saving the same id twice is a no-op.
    pub fn save_arbitrage(&self, arb: &Arbitrage) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT OR IGNORE INTO arbitrage (id, buy_ex, sell_ex, pair, ts, buy_price, sell_price, vol, spread)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                arb.id,
                arb.buy_exchange(),
                arb.sell_exchange(),
                arb.pair.label,
                arb.timestamp.to_rfc3339(),
                arb.buy_price().to_string(),
                arb.sell_price().to_string(),
                arb.volume.to_string(),
                arb.spread_percent.to_string(),
            ],
        )?;

        debug!(id = %arb.id, "Arbitrage saved");
        Ok(())
    }

    /// Store order acknowledgments in one transaction.
    ///
    /// Returns the number of new rows; acks already present are ignored.
    pub fn save_order_acks(&self, acks: &[OrderAck]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;

        for ack in acks {
            inserted += tx.execute(
                r#"
                INSERT OR IGNORE INTO order_ack (arbitrage_id, external_id, pair, exchanger, side)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    ack.arbitrage_id,
                    ack.external_id,
                    ack.pair.label,
                    ack.exchanger,
                    ack.side.as_str(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Order acks that have no trade recorded yet.
    pub fn pending_order_acks(&self) -> Result<Vec<OrderAck>> {
        let rows: Vec<(String, String, String, String, String)> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                r#"
                SELECT a.arbitrage_id, a.external_id, a.pair, a.exchanger, a.side
                FROM order_ack a
                WHERE NOT EXISTS (
                    SELECT 1 FROM trade t
                    WHERE t.exchanger = a.exchanger AND t.external_id = a.external_id
                )
                ORDER BY a.rowid
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        rows.into_iter()
            .map(|(arbitrage_id, external_id, pair, exchanger, side)| {
                Ok(OrderAck {
                    arbitrage_id,
                    external_id,
                    pair: Pair::new(&pair).with_context(|| format!("Stored pair {:?} is invalid", pair))?,
                    exchanger,
                    side: Side::from_str(&side).with_context(|| format!("Stored side {:?} is invalid", side))?,
                })
            })
            .collect()
    }

    /// Store the trades of one order in a single transaction.
    ///
    /// Trades already known (same exchange and trade id) are skipped, so
    /// reconciling the same fills twice leaves the table unchanged. Returns
    /// the number of new rows.
    pub fn save_trades(&self, trades: &[Trade]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;

        for trade in trades {
            inserted += tx.execute(
                r#"
                INSERT OR IGNORE INTO trade (arbitrage_id, exchanger, external_id, trade_id, price,
                                             quantity, pair, side, fee, fee_currency)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    trade.arbitrage_id,
                    trade.exchanger,
                    trade.external_id,
                    trade.fill.trade_id,
                    trade.fill.price.to_string(),
                    trade.fill.quantity.to_string(),
                    trade.pair.label,
                    trade.side.as_str(),
                    trade.fill.fee.to_string(),
                    trade.fill.fee_currency,
                ],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Record a withdrawal issued by the rebalancer.
    pub fn record_transfer(&self, transfer: &TransferRecord) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO transfer (currency, origin, destination, amount, withdrawal_id, ts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                transfer.currency,
                transfer.origin,
                transfer.destination,
                transfer.amount.to_string(),
                transfer.withdrawal_id,
                transfer.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent transfers, newest first.
    pub fn recent_transfers(&self, limit: usize) -> Result<Vec<TransferRecord>> {
        let rows: Vec<(String, String, String, String, String, String)> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                r#"
                SELECT currency, origin, destination, amount, withdrawal_id, ts
                FROM transfer ORDER BY id DESC LIMIT ?1
                "#,
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        rows.into_iter()
            .map(|(currency, origin, destination, amount, withdrawal_id, ts)| {
                Ok(TransferRecord {
                    currency,
                    origin,
                    destination,
                    amount: Decimal::from_str(&amount)?,
                    withdrawal_id,
                    timestamp: DateTime::parse_from_rfc3339(&ts)?.with_timezone(&Utc),
                })
            })
            .collect()
    }

    /// Traded quantity per exchange and side.
    pub fn trade_volumes(&self) -> Result<Vec<TradeVolume>> {
        let rows: Vec<(String, String, String)> = {
            let conn = self.conn()?;
            let mut stmt =
                conn.prepare("SELECT exchanger, side, quantity FROM trade ORDER BY exchanger, side")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        // Quantities are stored as text, so they are summed here rather than in SQL.
        let mut volumes: Vec<TradeVolume> = Vec::new();
        for (exchanger, side, quantity) in rows {
            let side = Side::from_str(&side)?;
            let quantity = Decimal::from_str(&quantity)?;
            match volumes
                .iter_mut()
                .find(|v| v.exchanger == exchanger && v.side == side)
            {
                Some(entry) => {
                    entry.trades += 1;
                    entry.quantity += quantity;
                }
                None => volumes.push(TradeVolume {
                    exchanger,
                    side,
                    trades: 1,
                    quantity,
                }),
            }
        }
        Ok(volumes)
    }

    /// Row counts of every table.
    pub fn summary(&self) -> Result<StoreSummary> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };

        Ok(StoreSummary {
            arbitrages: count("SELECT COUNT(*) FROM arbitrage")?,
            order_acks: count("SELECT COUNT(*) FROM order_ack")?,
            pending_acks: count(
                r#"
                SELECT COUNT(*) FROM order_ack a
                WHERE NOT EXISTS (
                    SELECT 1 FROM trade t
                    WHERE t.exchanger = a.exchanger AND t.external_id = a.external_id
                )
                "#,
            )?,
            trades: count("SELECT COUNT(*) FROM trade")?,
            transfers: count("SELECT COUNT(*) FROM transfer")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Fill, Order, OrderBook};
    use crate::strategy::compute_arbitrage;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn arbitrage() -> Arbitrage {
        let pair = Pair::parse("zec_btc").unwrap();
        let buy = Arc::new(
            OrderBook::new(
                "Poloniex",
                vec![Order::new(dec!(0.0200), dec!(1))],
                vec![Order::new(dec!(0.0201), dec!(4))],
            )
            .unwrap(),
        );
        let sell = Arc::new(
            OrderBook::new(
                "Kraken",
                vec![Order::new(dec!(0.0210), dec!(3))],
                vec![Order::new(dec!(0.0211), dec!(1))],
            )
            .unwrap(),
        );
        compute_arbitrage(&pair, &buy, &sell, Utc::now()).unwrap()
    }

    fn ack(arb: &Arbitrage, exchanger: &str, external_id: &str, side: Side) -> OrderAck {
        OrderAck {
            arbitrage_id: arb.id.clone(),
            external_id: external_id.to_string(),
            exchanger: exchanger.to_string(),
            pair: arb.pair.clone(),
            side,
        }
    }

    fn fill(trade_id: &str) -> Fill {
        Fill {
            trade_id: trade_id.to_string(),
            price: dec!(0.0201),
            quantity: dec!(1.5),
            fee: dec!(0.003),
            fee_currency: "ZEC".to_string(),
        }
    }

    #[test]
    fn test_save_arbitrage_is_idempotent() {
        let store = PersistenceManager::in_memory().unwrap();
        let arb = arbitrage();

        store.save_arbitrage(&arb).unwrap();
        store.save_arbitrage(&arb).unwrap();

        assert_eq!(store.summary().unwrap().arbitrages, 1);
    }

    #[test]
    fn test_pending_acks_until_trades_arrive() {
        let store = PersistenceManager::in_memory().unwrap();
        let arb = arbitrage();
        let buy = ack(&arb, "Poloniex", "111", Side::Buy);
        let sell = ack(&arb, "Kraken", "OABC-DEF", Side::Sell);

        assert_eq!(store.save_order_acks(&[buy.clone(), sell.clone()]).unwrap(), 2);
        assert_eq!(store.save_order_acks(&[buy.clone()]).unwrap(), 0);
        assert_eq!(store.pending_order_acks().unwrap(), vec![buy.clone(), sell.clone()]);

        let trades = vec![Trade::from_fill(&buy, fill("t1")), Trade::from_fill(&buy, fill("t2"))];
        assert_eq!(store.save_trades(&trades).unwrap(), 2);

        assert_eq!(store.pending_order_acks().unwrap(), vec![sell]);
    }

    #[test]
    fn test_save_trades_twice_keeps_one_copy() {
        let store = PersistenceManager::in_memory().unwrap();
        let arb = arbitrage();
        let buy = ack(&arb, "Poloniex", "111", Side::Buy);
        store.save_order_acks(&[buy.clone()]).unwrap();

        let trades = vec![Trade::from_fill(&buy, fill("t1"))];
        assert_eq!(store.save_trades(&trades).unwrap(), 1);
        assert_eq!(store.save_trades(&trades).unwrap(), 0);

        let summary = store.summary().unwrap();
        assert_eq!(summary.trades, 1);
        assert_eq!(summary.pending_acks, 0);
    }

    #[test]
    fn test_same_external_id_on_two_exchanges() {
        let store = PersistenceManager::in_memory().unwrap();
        let arb = arbitrage();

        let inserted = store
            .save_order_acks(&[
                ack(&arb, "Poloniex", "42", Side::Buy),
                ack(&arb, "Hitbtc", "42", Side::Sell),
            ])
            .unwrap();
        assert_eq!(inserted, 2);
    }

    #[test]
    fn test_transfers_and_volumes() {
        let store = PersistenceManager::in_memory().unwrap();
        store
            .record_transfer(&TransferRecord {
                currency: "BTC".to_string(),
                origin: "Kraken".to_string(),
                destination: "Poloniex".to_string(),
                amount: dec!(0.25),
                withdrawal_id: "W1".to_string(),
                timestamp: Utc::now(),
            })
            .unwrap();

        let transfers = store.recent_transfers(10).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].amount, dec!(0.25));

        let arb = arbitrage();
        let buy = ack(&arb, "Poloniex", "111", Side::Buy);
        store
            .save_trades(&[Trade::from_fill(&buy, fill("t1")), Trade::from_fill(&buy, fill("t2"))])
            .unwrap();

        let volumes = store.trade_volumes().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].trades, 2);
        assert_eq!(volumes[0].quantity, dec!(3.0));
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = std::env::temp_dir().join(format!("arb-trader-test-{}", std::process::id()));
        let path = dir.join("nested").join("ledger.db");

        let store = PersistenceManager::new(&path).unwrap();
        assert_eq!(store.summary().unwrap(), StoreSummary::default());
        assert!(path.exists());

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
