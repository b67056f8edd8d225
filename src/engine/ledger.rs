//! Append-only trade ledger with running performance aggregates.
//!
//! Every aggregate (totals, streaks, peak/drawdown, per-asset/regime/hour
//! breakdowns) is updated incrementally inside [`PerformanceLedger::record_trade`];
//! nothing is recomputed from the full trade list.

use std::collections::BTreeMap;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::regime::Regime;
use super::stats::sharpe_ratio;
use crate::error::{ensure_finite, ensure_non_negative, EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    Win,
    Loss,
}

/// A resolved bet as reported by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeInput {
    pub asset: String,
    pub stake: f64,
    pub outcome: TradeOutcome,
    pub profit: f64,
    /// Ticks the contract stayed open.
    pub duration: f64,
    pub regime: Regime,
    pub pattern: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub stake: f64,
    pub outcome: TradeOutcome,
    pub profit: f64,
    pub duration: f64,
    pub regime: Regime,
    pub pattern: Option<String>,
    pub balance_after: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    /// Sum of winning profits.
    pub total_profit: f64,
    /// Sum of losing amounts, as a positive number.
    pub total_loss: f64,
    pub total_staked: f64,
    pub initial_balance: f64,
    pub current_balance: f64,
    pub peak_balance: f64,
    pub current_drawdown: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub current_streak: u32,
    pub current_streak_kind: Option<TradeOutcome>,
    pub longest_win_streak: u32,
    pub longest_loss_streak: u32,
}

impl PerformanceMetrics {
    fn new(initial_balance: f64) -> Self {
        Self {
            total_trades: 0,
            wins: 0,
            losses: 0,
            total_profit: 0.0,
            total_loss: 0.0,
            total_staked: 0.0,
            initial_balance,
            current_balance: initial_balance,
            peak_balance: initial_balance,
            current_drawdown: 0.0,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
            current_streak: 0,
            current_streak_kind: None,
            longest_win_streak: 0,
            longest_loss_streak: 0,
        }
    }
}

/// Trade counts and P&L for one bucket (asset, regime or hour).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Breakdown {
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub profit: f64,
    pub staked: f64,
    pub win_rate: f64,
}

impl Breakdown {
    fn add(&mut self, record: &TradeRecord) {
        self.trades += 1;
        match record.outcome {
            TradeOutcome::Win => self.wins += 1,
            TradeOutcome::Loss => self.losses += 1,
        }
        self.profit += record.profit;
        self.staked += record.stake;
        self.win_rate = self.wins as f64 / self.trades as f64;
    }
}

// ── Summary ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct OverviewSummary {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub net_profit: f64,
    pub roi: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialSummary {
    pub initial_balance: f64,
    pub current_balance: f64,
    pub peak_balance: f64,
    pub total_profit: f64,
    pub total_loss: f64,
    /// `f64::INFINITY` (serialized as `null`) when there are wins but no losses.
    pub profit_factor: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub expectancy: f64,
    pub total_staked: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub current_drawdown: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub current_streak: u32,
    pub current_streak_kind: Option<TradeOutcome>,
    pub longest_win_streak: u32,
    pub longest_loss_streak: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub duration_minutes: f64,
    pub trades_per_hour: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakdownSummary {
    pub by_asset: BTreeMap<String, Breakdown>,
    pub by_regime: BTreeMap<Regime, Breakdown>,
    /// Index is the UTC hour of day.
    pub by_hour: Vec<Breakdown>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSummary {
    pub overview: OverviewSummary,
    pub financial: FinancialSummary,
    pub risk: RiskSummary,
    pub session: SessionSummary,
    pub breakdown: BreakdownSummary,
}

// ── Ledger ───────────────────────────────────────────────────────────────────

pub struct PerformanceLedger {
    metrics: PerformanceMetrics,
    trades: Vec<TradeRecord>,
    /// Per-trade `profit / stake`, for the Sharpe ratio.
    returns: Vec<f64>,
    by_asset: BTreeMap<String, Breakdown>,
    by_regime: BTreeMap<Regime, Breakdown>,
    by_hour: [Breakdown; 24],
    started_at: DateTime<Utc>,
}

impl PerformanceLedger {
    pub fn new(initial_balance: f64) -> EngineResult<Self> {
        let initial_balance = ensure_non_negative("initial_balance", initial_balance)?;
        Ok(Self {
            metrics: PerformanceMetrics::new(initial_balance),
            trades: Vec::new(),
            returns: Vec::new(),
            by_asset: BTreeMap::new(),
            by_regime: BTreeMap::new(),
            by_hour: Default::default(),
            started_at: Utc::now(),
        })
    }

    /// Rebuild a ledger from previously exported records, in order.
    pub fn replay(initial_balance: f64, records: &[TradeRecord]) -> EngineResult<Self> {
        let mut ledger = Self::new(initial_balance)?;
        if let Some(first) = records.first() {
            ledger.started_at = first.timestamp;
        }
        for r in records {
            ledger.record_trade(TradeInput {
                asset: r.asset.clone(),
                stake: r.stake,
                outcome: r.outcome,
                profit: r.profit,
                duration: r.duration,
                regime: r.regime,
                pattern: r.pattern.clone(),
                timestamp: Some(r.timestamp),
            })?;
        }
        Ok(ledger)
    }

    pub fn record_trade(&mut self, input: TradeInput) -> EngineResult<&TradeRecord> {
        ensure_non_negative("stake", input.stake)?;
        ensure_finite("profit", input.profit)?;
        ensure_non_negative("duration", input.duration)?;
        match (input.outcome, input.profit) {
            (TradeOutcome::Win, p) if p < 0.0 => {
                return Err(EngineError::invalid("profit", "a win cannot lose money"));
            }
            (TradeOutcome::Loss, p) if p > 0.0 => {
                return Err(EngineError::invalid("profit", "a loss cannot make money"));
            }
            _ => {}
        }

        let m = &mut self.metrics;
        let balance_after = m.current_balance + input.profit;
        let record = TradeRecord {
            id: m.total_trades + 1,
            timestamp: input.timestamp.unwrap_or_else(Utc::now),
            asset: input.asset,
            stake: input.stake,
            outcome: input.outcome,
            profit: input.profit,
            duration: input.duration,
            regime: input.regime,
            pattern: input.pattern,
            balance_after,
        };

        // Totals
        m.total_trades += 1;
        m.total_staked += record.stake;
        match record.outcome {
            TradeOutcome::Win => {
                m.wins += 1;
                m.total_profit += record.profit;
            }
            TradeOutcome::Loss => {
                m.losses += 1;
                m.total_loss += record.profit.abs();
            }
        }
        m.current_balance = balance_after;

        // Streaks
        if m.current_streak_kind == Some(record.outcome) {
            m.current_streak += 1;
        } else {
            m.current_streak_kind = Some(record.outcome);
            m.current_streak = 1;
        }
        match record.outcome {
            TradeOutcome::Win => m.longest_win_streak = m.longest_win_streak.max(m.current_streak),
            TradeOutcome::Loss => m.longest_loss_streak = m.longest_loss_streak.max(m.current_streak),
        }

        // Peak and drawdown
        if balance_after > m.peak_balance {
            m.peak_balance = balance_after;
            m.current_drawdown = 0.0;
        } else {
            let dd = m.peak_balance - balance_after;
            let dd_pct = if m.peak_balance > 0.0 { dd / m.peak_balance } else { 0.0 };
            m.current_drawdown = dd;
            if dd > m.max_drawdown {
                m.max_drawdown = dd;
                warn!(
                    drawdown = format!("{:.2}", dd),
                    peak = format!("{:.2}", m.peak_balance),
                    "New maximum drawdown"
                );
            }
            m.max_drawdown_pct = m.max_drawdown_pct.max(dd_pct);
        }

        if record.stake > 0.0 {
            self.returns.push(record.profit / record.stake);
        }
        self.by_asset.entry(record.asset.clone()).or_default().add(&record);
        self.by_regime.entry(record.regime).or_default().add(&record);
        self.by_hour[record.timestamp.hour() as usize].add(&record);

        info!(
            id = record.id,
            asset = %record.asset,
            outcome = ?record.outcome,
            profit = format!("{:.2}", record.profit),
            balance = format!("{:.2}", record.balance_after),
            "Trade recorded"
        );

        self.trades.push(record);
        Ok(&self.trades[self.trades.len() - 1])
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    /// Most recent `n` trades, newest last.
    pub fn recent_trades(&self, n: usize) -> &[TradeRecord] {
        &self.trades[self.trades.len().saturating_sub(n)..]
    }

    pub fn current_balance(&self) -> f64 {
        self.metrics.current_balance
    }

    pub fn win_rate(&self) -> f64 {
        if self.metrics.total_trades == 0 {
            return 0.0;
        }
        self.metrics.wins as f64 / self.metrics.total_trades as f64
    }

    pub fn net_profit(&self) -> f64 {
        self.metrics.current_balance - self.metrics.initial_balance
    }

    /// `total_profit / total_loss`; infinite with wins and no losses, 1 with
    /// neither.
    pub fn profit_factor(&self) -> f64 {
        if self.metrics.total_loss == 0.0 {
            return if self.metrics.wins > 0 { f64::INFINITY } else { 1.0 };
        }
        self.metrics.total_profit / self.metrics.total_loss
    }

    pub fn sharpe_ratio(&self) -> f64 {
        sharpe_ratio(&self.returns, 0.0)
    }

    pub fn average_win(&self) -> f64 {
        if self.metrics.wins == 0 {
            return 0.0;
        }
        self.metrics.total_profit / self.metrics.wins as f64
    }

    /// Positive magnitude of the average losing trade.
    pub fn average_loss(&self) -> f64 {
        if self.metrics.losses == 0 {
            return 0.0;
        }
        self.metrics.total_loss / self.metrics.losses as f64
    }

    /// Expected profit per trade from win rate and average win/loss.
    pub fn expectancy(&self) -> f64 {
        let w = self.win_rate();
        w * self.average_win() - (1.0 - w) * self.average_loss()
    }

    pub fn by_asset(&self) -> &BTreeMap<String, Breakdown> {
        &self.by_asset
    }

    pub fn by_regime(&self) -> &BTreeMap<Regime, Breakdown> {
        &self.by_regime
    }

    pub fn by_hour(&self) -> &[Breakdown; 24] {
        &self.by_hour
    }

    pub fn summary(&self) -> LedgerSummary {
        let m = &self.metrics;
        let last_trade_at = self.trades.last().map(|t| t.timestamp);
        let end = last_trade_at.unwrap_or(self.started_at).max(self.started_at);
        let duration_minutes = (end - self.started_at).num_seconds() as f64 / 60.0;
        let hours = duration_minutes / 60.0;

        LedgerSummary {
            overview: OverviewSummary {
                total_trades: m.total_trades,
                wins: m.wins,
                losses: m.losses,
                win_rate: self.win_rate(),
                net_profit: self.net_profit(),
                roi: if m.initial_balance > 0.0 {
                    self.net_profit() / m.initial_balance
                } else {
                    0.0
                },
            },
            financial: FinancialSummary {
                initial_balance: m.initial_balance,
                current_balance: m.current_balance,
                peak_balance: m.peak_balance,
                total_profit: m.total_profit,
                total_loss: m.total_loss,
                profit_factor: self.profit_factor(),
                average_win: self.average_win(),
                average_loss: self.average_loss(),
                expectancy: self.expectancy(),
                total_staked: m.total_staked,
            },
            risk: RiskSummary {
                current_drawdown: m.current_drawdown,
                max_drawdown: m.max_drawdown,
                max_drawdown_pct: m.max_drawdown_pct,
                sharpe_ratio: self.sharpe_ratio(),
                current_streak: m.current_streak,
                current_streak_kind: m.current_streak_kind,
                longest_win_streak: m.longest_win_streak,
                longest_loss_streak: m.longest_loss_streak,
            },
            session: SessionSummary {
                started_at: self.started_at,
                last_trade_at,
                duration_minutes,
                trades_per_hour: if hours > 0.0 {
                    m.total_trades as f64 / hours
                } else {
                    0.0
                },
            },
            breakdown: BreakdownSummary {
                by_asset: self.by_asset.clone(),
                by_regime: self.by_regime.clone(),
                by_hour: self.by_hour.to_vec(),
            },
        }
    }

    /// JSON array of every trade record, oldest first.
    pub fn export_trades(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.trades)
    }
}
