use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::engine::ledger::{TradeOutcome, TradeRecord};
use crate::engine::regime::Regime;

pub mod models;
use models::*;

/// Trade log backed by a single SQLite connection behind a mutex
#[derive(Clone)]
pub struct TradeStore {
    conn: Arc<Mutex<Connection>>,
}

impl TradeStore {
    /// Open (or create) the SQLite database at the given path.
    /// `":memory:"` gives a throwaway store.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = TradeStore {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        debug!(path, "Trade store opened");
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("trade store connection mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Trades ───────────────────────────────────────────────────────────────

    /// Append a ledger record. Returns the SQLite row id.
    pub fn insert_trade(&self, trade: &TradeRecord) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO trades (
                trade_id, timestamp, asset, stake, outcome, profit,
                duration, regime, pattern, balance_after
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                trade.id as i64,
                trade.timestamp,
                trade.asset,
                trade.stake,
                outcome_str(trade.outcome),
                trade.profit,
                trade.duration,
                trade.regime.as_str(),
                trade.pattern,
                trade.balance_after,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent trades first (paginated)
    pub fn list_trades(&self, limit: i64, offset: i64) -> Result<Vec<TradeRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT trade_id, timestamp, asset, stake, outcome, profit,
                    duration, regime, pattern, balance_after
             FROM trades ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let trades = stmt
            .query_map(params![limit, offset], map_trade)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    /// Every trade in insertion order, ready for `PerformanceLedger::replay`.
    pub fn load_all_trades(&self) -> Result<Vec<TradeRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT trade_id, timestamp, asset, stake, outcome, profit,
                    duration, regime, pattern, balance_after
             FROM trades ORDER BY id ASC",
        )?;
        let trades = stmt
            .query_map([], map_trade)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    // ── Balance ──────────────────────────────────────────────────────────────

    pub fn record_balance(&self, balance: f64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO balance_history (balance, recorded_at) VALUES (?1, ?2)",
            params![balance, Utc::now()],
        )?;
        Ok(())
    }

    pub fn latest_balance(&self) -> Result<Option<f64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT balance FROM balance_history ORDER BY id DESC LIMIT 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Balance history for charting, newest first
    pub fn balance_history(&self, limit: i64) -> Result<Vec<BalanceSnapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT balance, recorded_at FROM balance_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(BalanceSnapshot {
                    balance: row.get(0)?,
                    recorded_at: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<Stats> {
        let (total_trades, winning_trades, total_pnl, total_staked) = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN outcome = 'win' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(profit), 0),
                        COALESCE(SUM(stake), 0)
                 FROM trades",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )?
        };
        Ok(Stats {
            total_trades,
            winning_trades,
            total_pnl,
            total_staked,
            current_balance: self.latest_balance()?.unwrap_or(0.0),
        })
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn outcome_str(outcome: TradeOutcome) -> &'static str {
    match outcome {
        TradeOutcome::Win => "win",
        TradeOutcome::Loss => "loss",
    }
}

fn map_trade(row: &rusqlite::Row) -> rusqlite::Result<TradeRecord> {
    let id: i64 = row.get(0)?;
    let outcome: String = row.get(4)?;
    let outcome = match outcome.as_str() {
        "win" => TradeOutcome::Win,
        "loss" => TradeOutcome::Loss,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown trade outcome '{other}'").into(),
            ))
        }
    };
    let regime: String = row.get(7)?;
    let regime = regime
        .parse::<Regime>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(TradeRecord {
        id: id as u64,
        timestamp: row.get(1)?,
        asset: row.get(2)?,
        stake: row.get(3)?,
        outcome,
        profit: row.get(5)?,
        duration: row.get(6)?,
        regime,
        pattern: row.get(8)?,
        balance_after: row.get(9)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS balance_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    balance     REAL    NOT NULL,
    recorded_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS trades (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id      INTEGER NOT NULL,
    timestamp     TEXT    NOT NULL,
    asset         TEXT    NOT NULL,
    stake         REAL    NOT NULL,
    outcome       TEXT    NOT NULL CHECK (outcome IN ('win', 'loss')),
    profit        REAL    NOT NULL,
    duration      REAL    NOT NULL,
    regime        TEXT    NOT NULL,
    pattern       TEXT,
    balance_after REAL    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trades_asset ON trades(asset);
CREATE INDEX IF NOT EXISTS idx_trades_regime ON trades(regime);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ledger::{PerformanceLedger, TradeInput};
    use approx::assert_relative_eq;

    fn input(asset: &str, outcome: TradeOutcome, profit: f64) -> TradeInput {
        TradeInput {
            asset: asset.to_string(),
            stake: 10.0,
            outcome,
            profit,
            duration: 3.0,
            regime: Regime::LowVolTrending,
            pattern: Some("p1".to_string()),
            timestamp: None,
        }
    }

    #[test]
    fn test_insert_and_list_trades() {
        let store = TradeStore::open(":memory:").unwrap();
        let mut ledger = PerformanceLedger::new(100.0).unwrap();
        let a = ledger.record_trade(input("R_10", TradeOutcome::Win, 5.0)).unwrap().clone();
        let b = ledger.record_trade(input("R_25", TradeOutcome::Loss, -10.0)).unwrap().clone();
        store.insert_trade(&a).unwrap();
        store.insert_trade(&b).unwrap();

        let listed = store.list_trades(10, 0).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], b);
        assert_eq!(listed[1], a);

        let page = store.list_trades(1, 1).unwrap();
        assert_eq!(page, vec![a]);
    }

    #[test]
    fn test_replay_from_store_matches_ledger() {
        let store = TradeStore::open(":memory:").unwrap();
        let mut ledger = PerformanceLedger::new(100.0).unwrap();
        for (outcome, profit) in [
            (TradeOutcome::Win, 4.0),
            (TradeOutcome::Loss, -10.0),
            (TradeOutcome::Win, 6.0),
        ] {
            let rec = ledger.record_trade(input("R_50", outcome, profit)).unwrap().clone();
            store.insert_trade(&rec).unwrap();
        }
        let replayed = PerformanceLedger::replay(100.0, &store.load_all_trades().unwrap()).unwrap();
        assert_relative_eq!(replayed.current_balance(), ledger.current_balance());
        assert_eq!(replayed.metrics().wins, 2);
        assert_relative_eq!(replayed.metrics().max_drawdown, 10.0);
    }

    #[test]
    fn test_stats_and_balance() {
        let store = TradeStore::open(":memory:").unwrap();
        assert_eq!(store.latest_balance().unwrap(), None);
        let empty = store.stats().unwrap();
        assert_eq!(empty.total_trades, 0);
        assert_eq!(empty.win_rate(), 0.0);

        let mut ledger = PerformanceLedger::new(100.0).unwrap();
        let a = ledger.record_trade(input("R_10", TradeOutcome::Win, 5.0)).unwrap().clone();
        let b = ledger.record_trade(input("R_10", TradeOutcome::Loss, -10.0)).unwrap().clone();
        store.insert_trade(&a).unwrap();
        store.insert_trade(&b).unwrap();
        store.record_balance(105.0).unwrap();
        store.record_balance(95.0).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.winning_trades, 1);
        assert_relative_eq!(stats.total_pnl, -5.0);
        assert_relative_eq!(stats.total_staked, 20.0);
        assert_relative_eq!(stats.current_balance, 95.0);
        assert_relative_eq!(stats.win_rate(), 0.5);

        let history = store.balance_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_relative_eq!(history[0].balance, 95.0);
    }
}
