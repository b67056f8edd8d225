use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregates computed straight from the persisted trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub total_trades: i64,
    pub winning_trades: i64,
    pub total_pnl: f64,
    pub total_staked: f64,
    /// Latest balance snapshot, 0 when none has been recorded.
    pub current_balance: f64,
}

impl Stats {
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.winning_trades as f64 / self.total_trades as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub balance: f64,
    pub recorded_at: DateTime<Utc>,
}
