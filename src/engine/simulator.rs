//! Monte Carlo outcome simulation.
//!
//! # Model
//!
//! For each draw:
//! 1. Sample win/loss from Bernoulli(`win_probability`).
//! 2. A loss returns `-stake`.
//! 3. A win survives `ticks = exp(ln(estimated_ticks) + volatility * 0.5 * Z)`
//!    ticks (Z standard normal, clamped to
//!    `[1, max_ticks]`) and pays `stake * ((1 + growth_rate)^ticks - 1)`.
//!
//! Reports whose statistics overflow are rejected rather than returned with
//! infinite or NaN fields.
//!
//! All draws come from one seeded `StdRng`, so a simulator built with the same
//! seed replays the same outcomes. Long runs can be bounded with a
//! [`SimulationBudget`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::stats::{conditional_var, mean, percentile_sorted, standard_deviation, value_at_risk};
use crate::error::{ensure_finite, ensure_non_negative, ensure_probability, EngineError, EngineResult};

/// Budget is checked once every this many draws.
const BUDGET_CHECK_INTERVAL: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub num_simulations: usize,
    pub confidence_level: f64,
    /// Outcomes below `-stake * ruin_threshold` count towards ruin.
    pub ruin_threshold: f64,
    pub max_ruin_probability: f64,
    /// VaR must stay below `stake * max_var_multiple`.
    pub max_var_multiple: f64,
    /// Upper bound on the simulated survival of a winning bet.
    pub max_ticks: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_simulations: 10_000,
            confidence_level: 0.95,
            ruin_threshold: 0.5,
            max_ruin_probability: 0.05,
            max_var_multiple: 2.0,
            max_ticks: 1000.0,
            seed: 0,
        }
    }
}

/// A single candidate bet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeParams {
    pub stake: f64,
    pub win_probability: f64,
    /// Per-tick compounding rate paid while the bet survives.
    pub growth_rate: f64,
    pub estimated_ticks: f64,
    pub volatility: f64,
}

impl TradeParams {
    pub fn validate(&self) -> EngineResult<()> {
        ensure_non_negative("stake", self.stake)?;
        ensure_probability("win_probability", self.win_probability)?;
        ensure_finite("growth_rate", self.growth_rate)?;
        if self.growth_rate <= -1.0 {
            return Err(EngineError::invalid("growth_rate", "must be greater than -1"));
        }
        ensure_finite("estimated_ticks", self.estimated_ticks)?;
        if self.estimated_ticks <= 0.0 {
            return Err(EngineError::invalid("estimated_ticks", "must be positive"));
        }
        ensure_non_negative("volatility", self.volatility)?;
        Ok(())
    }

    /// Profit of a win that lasts exactly `estimated_ticks`.
    pub fn nominal_payout(&self) -> f64 {
        self.stake * ((1.0 + self.growth_rate).powf(self.estimated_ticks.max(1.0)) - 1.0)
    }
}

/// Deadline and/or shared cancel flag for long simulations.
#[derive(Debug, Clone, Default)]
pub struct SimulationBudget {
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl SimulationBudget {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn is_exhausted(&self) -> bool {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return true;
            }
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Percentiles {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

impl Percentiles {
    fn from_sorted(sorted: &[f64]) -> Self {
        Self {
            p10: percentile_sorted(sorted, 10.0),
            p25: percentile_sorted(sorted, 25.0),
            p50: percentile_sorted(sorted, 50.0),
            p75: percentile_sorted(sorted, 75.0),
            p90: percentile_sorted(sorted, 90.0),
        }
    }
}

/// Risk report for one candidate bet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRisk {
    pub stake: f64,
    pub simulations: usize,
    pub expected_value: f64,
    pub std_dev: f64,
    pub win_rate: f64,
    pub var95: f64,
    pub cvar95: f64,
    pub probability_of_ruin: f64,
    pub percentiles: Percentiles,
    pub is_positive_ev: bool,
    pub is_acceptable_risk: bool,
}

/// Risk report for a sequence of bets applied to one bankroll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRisk {
    pub simulations: usize,
    pub initial_balance: f64,
    pub expected_final_balance: f64,
    pub expected_profit: f64,
    pub probability_of_profit: f64,
    pub var95: f64,
    pub cvar95: f64,
    /// Fractional drawdown from the running peak, averaged over runs.
    pub avg_max_drawdown: f64,
    pub worst_max_drawdown: f64,
    pub avg_trades_completed: f64,
    pub final_balance_percentiles: Percentiles,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeEvaluation {
    pub stake: f64,
    pub expected_value: f64,
    pub var95: f64,
    pub probability_of_ruin: f64,
    /// `expected_value / var95`, with a zero VaR treated as 1.
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeOptimization {
    pub best: StakeEvaluation,
    /// All evaluated stakes, best score first.
    pub ranked: Vec<StakeEvaluation>,
}

pub struct OutcomeSimulator {
    config: SimulationConfig,
    rng: StdRng,
}

impl Default for OutcomeSimulator {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl OutcomeSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Returns `(won, profit)`.
    fn draw(&mut self, params: &TradeParams) -> (bool, f64) {
        let won = self.rng.gen::<f64>() < params.win_probability;
        if !won {
            return (false, -params.stake);
        }
        let z: f64 = StandardNormal.sample(&mut self.rng);
        if params.stake == 0.0 {
            return (true, 0.0);
        }
        let ticks = (params.estimated_ticks.ln() + params.volatility * 0.5 * z)
            .exp()
            .clamp(1.0, self.config.max_ticks.max(1.0));
        (true, params.stake * ((1.0 + params.growth_rate).powf(ticks) - 1.0))
    }

    /// One Monte Carlo draw of the bet's profit.
    pub fn simulate_trade(&mut self, params: &TradeParams) -> EngineResult<f64> {
        params.validate()?;
        Ok(self.draw(params).1)
    }

    /// One draw reported as `(won, profit)`, for resolving paper trades.
    pub fn simulate_resolution(&mut self, params: &TradeParams) -> EngineResult<(bool, f64)> {
        params.validate()?;
        Ok(self.draw(params))
    }

    pub fn simulate_trade_outcomes(&mut self, params: &TradeParams) -> EngineResult<TradeRisk> {
        self.simulate_trade_outcomes_within(params, &SimulationBudget::unbounded())
    }

    pub fn simulate_trade_outcomes_within(
        &mut self,
        params: &TradeParams,
        budget: &SimulationBudget,
    ) -> EngineResult<TradeRisk> {
        params.validate()?;
        let n = self.config.num_simulations.max(1);
        let mut outcomes = Vec::with_capacity(n);
        let mut wins = 0usize;

        for i in 0..n {
            if i % BUDGET_CHECK_INTERVAL == 0 && budget.is_exhausted() {
                warn!(completed = i, requested = n, "Trade simulation cancelled");
                return Err(EngineError::Cancelled {
                    completed: i,
                    requested: n,
                });
            }
            let (won, outcome) = self.draw(params);
            if won {
                wins += 1;
            }
            outcomes.push(outcome);
        }

        let confidence = self.config.confidence_level;
        let expected_value = mean(&outcomes);
        let std_dev = standard_deviation(&outcomes);
        ensure_finite_report(expected_value, std_dev)?;
        let var95 = value_at_risk(&outcomes, confidence);
        let cvar95 = conditional_var(&outcomes, confidence);
        let ruin_line = -params.stake * self.config.ruin_threshold;
        let ruined = outcomes.iter().filter(|o| **o < ruin_line).count();
        let probability_of_ruin = ruined as f64 / n as f64;

        let mut sorted = outcomes.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let risk = TradeRisk {
            stake: params.stake,
            simulations: n,
            expected_value,
            std_dev,
            win_rate: wins as f64 / n as f64,
            var95,
            cvar95,
            probability_of_ruin,
            percentiles: Percentiles::from_sorted(&sorted),
            is_positive_ev: expected_value > 0.0,
            is_acceptable_risk: var95 < self.config.max_var_multiple * params.stake
                && probability_of_ruin < self.config.max_ruin_probability,
        };
        debug!(
            stake = params.stake,
            ev = format!("{:.4}", risk.expected_value),
            var95 = format!("{:.4}", risk.var95),
            ruin = format!("{:.4}", risk.probability_of_ruin),
            "Trade simulation complete"
        );
        Ok(risk)
    }

    pub fn simulate_portfolio(
        &mut self,
        trades: &[TradeParams],
        initial_balance: f64,
    ) -> EngineResult<PortfolioRisk> {
        self.simulate_portfolio_within(trades, initial_balance, &SimulationBudget::unbounded())
    }

    /// Run every trade in order against one bankroll per simulation, stopping
    /// a run early once the balance can no longer cover the next stake.
    pub fn simulate_portfolio_within(
        &mut self,
        trades: &[TradeParams],
        initial_balance: f64,
        budget: &SimulationBudget,
    ) -> EngineResult<PortfolioRisk> {
        ensure_non_negative("initial_balance", initial_balance)?;
        for t in trades {
            t.validate()?;
        }
        let n = self.config.num_simulations.max(1);
        let mut finals = Vec::with_capacity(n);
        let mut profits = Vec::with_capacity(n);
        let mut drawdowns = Vec::with_capacity(n);
        let mut completed_total = 0usize;

        for i in 0..n {
            if i % BUDGET_CHECK_INTERVAL == 0 && budget.is_exhausted() {
                warn!(completed = i, requested = n, "Portfolio simulation cancelled");
                return Err(EngineError::Cancelled {
                    completed: i,
                    requested: n,
                });
            }
            let mut balance = initial_balance;
            let mut peak = initial_balance;
            let mut max_dd = 0.0f64;
            for trade in trades {
                if balance < trade.stake {
                    break;
                }
                balance += self.draw(trade).1;
                completed_total += 1;
                if balance > peak {
                    peak = balance;
                } else if peak > 0.0 {
                    max_dd = max_dd.max((peak - balance) / peak);
                }
            }
            finals.push(balance);
            profits.push(balance - initial_balance);
            drawdowns.push(max_dd);
        }

        let expected_final_balance = mean(&finals);
        ensure_finite_report(expected_final_balance, standard_deviation(&finals))?;

        let confidence = self.config.confidence_level;
        let profitable = profits.iter().filter(|p| **p > 0.0).count();
        let mut sorted = finals.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Ok(PortfolioRisk {
            simulations: n,
            initial_balance,
            expected_final_balance,
            expected_profit: mean(&profits),
            probability_of_profit: profitable as f64 / n as f64,
            var95: value_at_risk(&profits, confidence),
            cvar95: conditional_var(&profits, confidence),
            avg_max_drawdown: mean(&drawdowns),
            worst_max_drawdown: drawdowns.iter().copied().fold(0.0, f64::max),
            avg_trades_completed: completed_total as f64 / n as f64,
            final_balance_percentiles: Percentiles::from_sorted(&sorted),
        })
    }

    /// Evaluate `steps + 1` evenly spaced stakes in `[min_stake, max_stake]`
    /// and rank them by `expected_value / var95`.
    pub fn optimize_stake_size(
        &mut self,
        params: &TradeParams,
        min_stake: f64,
        max_stake: f64,
        steps: usize,
    ) -> EngineResult<StakeOptimization> {
        ensure_non_negative("min_stake", min_stake)?;
        ensure_non_negative("max_stake", max_stake)?;
        if min_stake > max_stake {
            return Err(EngineError::invalid(
                "min_stake",
                format!("{min_stake} exceeds max_stake {max_stake}"),
            ));
        }

        let mut ranked = Vec::with_capacity(steps + 1);
        for i in 0..=steps {
            let stake = if steps == 0 {
                min_stake
            } else {
                min_stake + (max_stake - min_stake) * i as f64 / steps as f64
            };
            let candidate = TradeParams {
                stake,
                ..params.clone()
            };
            let risk = self.simulate_trade_outcomes(&candidate)?;
            let denom = if risk.var95 == 0.0 { 1.0 } else { risk.var95 };
            ranked.push(StakeEvaluation {
                stake,
                expected_value: risk.expected_value,
                var95: risk.var95,
                probability_of_ruin: risk.probability_of_ruin,
                score: risk.expected_value / denom,
            });
        }
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        let best = ranked[0].clone();
        Ok(StakeOptimization { best, ranked })
    }
}

fn ensure_finite_report(expected_value: f64, std_dev: f64) -> EngineResult<()> {
    if expected_value.is_finite() && std_dev.is_finite() {
        return Ok(());
    }
    Err(EngineError::invalid(
        "growth_rate",
        "simulated payouts overflow; lower growth_rate or max_ticks",
    ))
}
