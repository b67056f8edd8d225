use clap::Parser;

use crate::engine::bayes::EstimatorConfig;
use crate::engine::correlation::CorrelationConfig;
use crate::engine::regime::RegimeConfig;
use crate::engine::session::EngineConfig;
use crate::engine::simulator::SimulationConfig;

/// Paper-trading session driven by the tickedge decision engine
#[derive(Parser, Debug, Clone)]
#[command(name = "tickedge", version, about)]
pub struct Config {
    /// Seed for every random source (simulator, regime throttle, synthetic ticks)
    #[arg(long, env = "TICKEDGE_SEED", default_value = "42")]
    pub seed: u64,

    /// Starting bankroll (USD)
    #[arg(long, env = "INITIAL_BALANCE", default_value = "100.0")]
    pub initial_balance: f64,

    /// Smallest stake placed, also used for exploration bets
    #[arg(long, env = "MIN_STAKE", default_value = "1.0")]
    pub min_stake: f64,

    /// Largest stake placed
    #[arg(long, env = "MAX_STAKE", default_value = "10.0")]
    pub max_stake: f64,

    /// Monte Carlo draws per risk evaluation
    #[arg(long, env = "NUM_SIMULATIONS", default_value = "10000")]
    pub num_simulations: usize,

    /// Confidence level for VaR / CVaR (e.g. 0.95)
    #[arg(long, env = "CONFIDENCE_LEVEL", default_value = "0.95")]
    pub confidence_level: f64,

    /// Ticks kept per instrument for correlation
    #[arg(long, env = "CORRELATION_WINDOW", default_value = "500")]
    pub correlation_window: usize,

    /// Rebuild the correlation matrix every N ticks
    #[arg(long, env = "CORRELATION_UPDATE_FREQUENCY", default_value = "100")]
    pub correlation_update_frequency: u64,

    /// |rho| at or above which two instruments count as correlated
    #[arg(long, env = "CORRELATION_THRESHOLD", default_value = "0.7")]
    pub correlation_threshold: f64,

    /// Ticks required before a regime can be classified
    #[arg(long, env = "REGIME_LOOKBACK", default_value = "50")]
    pub regime_lookback: usize,

    /// Estimator confidence below which bets are exploratory
    #[arg(long, env = "MIN_CONFIDENCE", default_value = "0.3")]
    pub min_confidence: f64,

    /// Reject bets the simulator flags as unacceptable tail risk
    #[arg(long, env = "REQUIRE_ACCEPTABLE_RISK", default_value = "false")]
    pub require_acceptable_risk: bool,

    /// Comma-separated instruments to simulate
    #[arg(
        long,
        env = "INSTRUMENTS",
        value_delimiter = ',',
        default_value = "R_10,R_25,R_50,R_75,R_100"
    )]
    pub instruments: Vec<String>,

    /// Synthetic ticks generated per instrument
    #[arg(long, env = "SESSION_TICKS", default_value = "2000")]
    pub ticks: usize,

    /// Evaluate a bet every N ticks
    #[arg(long, env = "BET_EVERY", default_value = "20")]
    pub bet_every: usize,

    /// Expected survival of a winning contract, in ticks
    #[arg(long, env = "ESTIMATED_TICKS", default_value = "5.0")]
    pub estimated_ticks: f64,

    /// SQLite database for persisting trades (omit to keep the session in memory)
    #[arg(long, env = "DATABASE_PATH")]
    pub database_path: Option<String>,

    /// Skip the JSON ledger summary printed on exit
    #[arg(long, env = "NO_SUMMARY")]
    pub no_summary: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.initial_balance <= 0.0 {
            anyhow::bail!("initial_balance must be positive");
        }
        if self.min_stake <= 0.0 || self.min_stake > self.max_stake {
            anyhow::bail!("min_stake must be positive and no larger than max_stake");
        }
        if self.num_simulations == 0 {
            anyhow::bail!("num_simulations must be at least 1");
        }
        if !(0.5..1.0).contains(&self.confidence_level) {
            anyhow::bail!("confidence_level must be in [0.5, 1.0)");
        }
        if !(0.0..=1.0).contains(&self.correlation_threshold) {
            anyhow::bail!("correlation_threshold must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            anyhow::bail!("min_confidence must be between 0.0 and 1.0");
        }
        if self.correlation_window < 2 || self.correlation_update_frequency == 0 {
            anyhow::bail!("correlation_window must be >= 2 and update frequency >= 1");
        }
        if self.regime_lookback < 2 {
            anyhow::bail!("regime_lookback must be at least 2");
        }
        if self.regime_lookback > self.correlation_window {
            anyhow::bail!("regime_lookback cannot exceed correlation_window");
        }
        if self.instruments.is_empty() {
            anyhow::bail!("at least one instrument is required");
        }
        if self.bet_every == 0 {
            anyhow::bail!("bet_every must be at least 1");
        }
        if self.estimated_ticks <= 0.0 {
            anyhow::bail!("estimated_ticks must be positive");
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            estimator: EstimatorConfig::default(),
            regime: RegimeConfig {
                lookback_period: self.regime_lookback,
                seed: self.seed,
                ..RegimeConfig::default()
            },
            correlation: CorrelationConfig {
                correlation_window: self.correlation_window,
                update_frequency: self.correlation_update_frequency,
                threshold: self.correlation_threshold,
                ..CorrelationConfig::default()
            },
            simulation: SimulationConfig {
                num_simulations: self.num_simulations,
                confidence_level: self.confidence_level,
                seed: self.seed,
                ..SimulationConfig::default()
            },
            initial_balance: self.initial_balance,
            min_stake: self.min_stake,
            max_stake: self.max_stake,
            min_confidence: self.min_confidence,
            require_acceptable_risk: self.require_acceptable_risk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["tickedge"];
        argv.extend_from_slice(args);
        Config::parse_from(argv)
    }

    #[test]
    fn defaults_validate() {
        let cfg = parse(&[]);
        cfg.validate().unwrap();
        assert_eq!(cfg.instruments.len(), 5);
        let engine = cfg.engine_config();
        assert_eq!(engine.simulation.num_simulations, 10_000);
        assert_eq!(engine.correlation.correlation_window, 500);
        assert_eq!(engine.regime.lookback_period, 50);
    }

    #[test]
    fn instrument_list_is_comma_separated() {
        let cfg = parse(&["--instruments", "A,B"]);
        assert_eq!(cfg.instruments, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn summary_is_printed_unless_disabled() {
        assert!(!parse(&[]).no_summary);
        assert!(parse(&["--no-summary"]).no_summary);
    }

    #[test]
    fn rejects_inverted_stakes() {
        let cfg = parse(&["--min-stake", "20", "--max-stake", "10"]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_lookback_longer_than_window() {
        let cfg = parse(&["--regime-lookback", "600"]);
        assert!(cfg.validate().is_err());
    }
}
