//! The trading engine: one explicit instance per session.
//!
//! Owns one of each component and runs the decision flow:
//! ticks feed the correlation tracker and regime classifier; a bet request
//! is estimated, Kelly-sized under the regime's fraction, validated by Monte
//! Carlo simulation, then damped for correlated exposure. Resolved bets feed
//! back into the Bayesian priors and the ledger.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::bayes::{BayesianEstimator, EstimatorConfig, WinEstimate, WinQuery};
use super::correlation::{CorrelationConfig, CorrelationTracker};
use super::kelly::{edge, growth_odds, kelly_fraction};
use super::ledger::{PerformanceLedger, TradeInput, TradeOutcome, TradeRecord};
use super::regime::{Regime, RegimeClassifier, RegimeConfig, RegimeDetection};
use super::simulator::{OutcomeSimulator, SimulationConfig, TradeParams, TradeRisk};
use crate::error::{ensure_non_negative, EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub estimator: EstimatorConfig,
    pub regime: RegimeConfig,
    pub correlation: CorrelationConfig,
    pub simulation: SimulationConfig,
    pub initial_balance: f64,
    pub min_stake: f64,
    pub max_stake: f64,
    /// Below this estimator confidence a bet is an exploration bet at
    /// `min_stake`, skipping the edge and EV gates.
    pub min_confidence: f64,
    /// Reject bets the simulator flags as unacceptable tail risk.
    pub require_acceptable_risk: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            regime: RegimeConfig::default(),
            correlation: CorrelationConfig::default(),
            simulation: SimulationConfig::default(),
            initial_balance: 100.0,
            min_stake: 1.0,
            max_stake: 10.0,
            min_confidence: 0.3,
            require_acceptable_risk: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRequest {
    pub asset: String,
    pub pattern_id: Option<String>,
    /// Expected survival in ticks if the bet wins.
    pub estimated_ticks: f64,
    /// Overrides the regime's growth rate.
    pub growth_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BetDecision {
    pub asset: String,
    pub approved: bool,
    pub exploration: bool,
    /// Final stake after correlation damping (0 when rejected early).
    pub stake: f64,
    pub base_stake: f64,
    /// Expected return per unit staked, `p * b - (1 - p)`.
    pub edge: f64,
    pub kelly_fraction: f64,
    pub regime: RegimeDetection,
    pub estimate: WinEstimate,
    pub risk: Option<TradeRisk>,
    pub params: TradeParams,
    pub pattern_id: Option<String>,
    pub rejections: Vec<String>,
}

impl BetDecision {
    fn query(&self) -> WinQuery {
        WinQuery {
            asset: self.asset.clone(),
            growth_rate: self.params.growth_rate,
            pattern_id: self.pattern_id.clone(),
            regime: Some(self.regime.regime),
        }
    }
}

pub struct TradingEngine {
    config: EngineConfig,
    estimator: BayesianEstimator,
    regimes: RegimeClassifier,
    correlations: CorrelationTracker,
    simulator: OutcomeSimulator,
    ledger: PerformanceLedger,
    last_detection: HashMap<String, RegimeDetection>,
}

impl TradingEngine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        ensure_non_negative("min_stake", config.min_stake)?;
        ensure_non_negative("max_stake", config.max_stake)?;
        if config.min_stake > config.max_stake {
            return Err(EngineError::invalid("min_stake", "exceeds max_stake"));
        }
        let ledger = PerformanceLedger::new(config.initial_balance)?;
        Ok(Self {
            estimator: BayesianEstimator::new(config.estimator.clone()),
            regimes: RegimeClassifier::new(config.regime.clone()),
            correlations: CorrelationTracker::new(config.correlation.clone()),
            simulator: OutcomeSimulator::new(config.simulation.clone()),
            ledger,
            last_detection: HashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn estimator(&self) -> &BayesianEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut BayesianEstimator {
        &mut self.estimator
    }

    pub fn regimes(&self) -> &RegimeClassifier {
        &self.regimes
    }

    pub fn correlations(&self) -> &CorrelationTracker {
        &self.correlations
    }

    pub fn simulator_mut(&mut self) -> &mut OutcomeSimulator {
        &mut self.simulator
    }

    pub fn ledger(&self) -> &PerformanceLedger {
        &self.ledger
    }

    /// Feed one tick and reclassify the instrument's regime.
    pub fn on_tick(&mut self, instrument: &str, value: f64) -> EngineResult<RegimeDetection> {
        self.correlations.add_tick(instrument, value)?;
        let needed = self
            .config
            .regime
            .lookback_period
            .max(self.config.regime.trend_period + 1);
        let window: Vec<f64> = self
            .correlations
            .window(instrument)
            .map(|w| w.iter().skip(w.len().saturating_sub(needed)).copied().collect())
            .unwrap_or_default();
        let detection = self.regimes.detect_regime(&window, instrument);
        self.last_detection
            .insert(instrument.to_string(), detection.clone());
        Ok(detection)
    }

    fn detection_for(&self, asset: &str) -> RegimeDetection {
        self.last_detection
            .get(asset)
            .cloned()
            .unwrap_or_else(|| self.regimes.classify(&[]))
    }

    /// Estimate, size, simulate and damp a candidate bet.
    pub fn evaluate_bet<S: AsRef<str>>(
        &mut self,
        request: &BetRequest,
        active_instruments: &[S],
    ) -> EngineResult<BetDecision> {
        let detection = self.detection_for(&request.asset);
        let regime_params = detection.params;
        let growth_rate = request.growth_rate.unwrap_or(regime_params.growth_rate);

        let estimate = self.estimator.estimate_win_probability(&WinQuery {
            asset: request.asset.clone(),
            growth_rate,
            pattern_id: request.pattern_id.clone(),
            regime: Some(detection.regime),
        });

        let mut decision = BetDecision {
            asset: request.asset.clone(),
            approved: false,
            exploration: estimate.confidence < self.config.min_confidence,
            stake: 0.0,
            base_stake: 0.0,
            edge: 0.0,
            kelly_fraction: 0.0,
            estimate,
            risk: None,
            params: TradeParams {
                stake: 0.0,
                win_probability: estimate.combined,
                growth_rate,
                estimated_ticks: request.estimated_ticks,
                volatility: detection.volatility,
            },
            pattern_id: request.pattern_id.clone(),
            regime: detection,
            rejections: Vec::new(),
        };
        decision.params.validate()?;

        if !self.regimes.should_trade_in(decision.regime.regime) {
            decision
                .rejections
                .push(format!("{} throttle", decision.regime.regime));
            return Ok(decision);
        }

        let balance = self.ledger.current_balance();
        if balance < self.config.min_stake {
            decision
                .rejections
                .push(format!("balance {balance:.2} below minimum stake"));
            return Ok(decision);
        }

        let odds = growth_odds(growth_rate, request.estimated_ticks);
        decision.edge = edge(estimate.combined, odds);
        decision.kelly_fraction =
            kelly_fraction(estimate.combined, odds, regime_params.kelly_fraction);

        let base_stake = if decision.exploration {
            self.config.min_stake
        } else if decision.edge > 0.0 && decision.kelly_fraction > 0.0 {
            (balance * decision.kelly_fraction)
                .clamp(self.config.min_stake, self.config.max_stake)
                .min(balance)
        } else {
            decision.rejections.push("no edge".to_string());
            return Ok(decision);
        };
        decision.base_stake = base_stake;
        decision.params.stake = base_stake;

        let risk = self.simulator.simulate_trade_outcomes(&decision.params)?;
        if !decision.exploration && !risk.is_positive_ev {
            decision
                .rejections
                .push(format!("negative expected value {:.4}", risk.expected_value));
        }
        if self.config.require_acceptable_risk && !risk.is_acceptable_risk {
            warn!(
                asset = %request.asset,
                var95 = format!("{:.2}", risk.var95),
                ruin = format!("{:.3}", risk.probability_of_ruin),
                "Rejected: tail risk above limits"
            );
            decision.rejections.push("unacceptable tail risk".to_string());
        }
        decision.risk = Some(risk);

        if decision.rejections.is_empty() {
            let stake = self.correlations.adjust_position_for_correlation(
                base_stake,
                &request.asset,
                active_instruments,
            )?;
            decision.stake = stake;
            decision.params.stake = stake;
            decision.approved = true;
            info!(
                asset = %request.asset,
                regime = %decision.regime.regime,
                p_win = format!("{:.3}", estimate.combined),
                confidence = format!("{:.2}", estimate.confidence),
                stake = format!("{:.2}", stake),
                exploration = decision.exploration,
                "Bet approved"
            );
        } else {
            debug!(
                asset = %request.asset,
                reasons = ?decision.rejections,
                "Bet rejected"
            );
        }
        Ok(decision)
    }

    /// Feed a resolved bet back into the priors and the ledger. Only
    /// approved decisions can be recorded.
    pub fn record_result(
        &mut self,
        decision: &BetDecision,
        outcome: TradeOutcome,
        profit: f64,
        duration: f64,
    ) -> EngineResult<TradeRecord> {
        if !decision.approved {
            return Err(EngineError::invalid("decision", "bet was not approved"));
        }
        let record = self
            .ledger
            .record_trade(TradeInput {
                asset: decision.asset.clone(),
                stake: decision.stake,
                outcome,
                profit,
                duration,
                regime: decision.regime.regime,
                pattern: decision.pattern_id.clone(),
                timestamp: None,
            })?
            .clone();
        self.estimator
            .update_all(&decision.query(), outcome == TradeOutcome::Win);
        Ok(record)
    }

    pub fn current_regime(&self, asset: &str) -> Regime {
        self.regimes.regime_for(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> EngineConfig {
        EngineConfig {
            simulation: SimulationConfig {
                num_simulations: 500,
                seed: 3,
                ..SimulationConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn request(asset: &str) -> BetRequest {
        BetRequest {
            asset: asset.into(),
            pattern_id: Some("flat".into()),
            estimated_ticks: 5.0,
            growth_rate: None,
        }
    }

    fn feed_flat(engine: &mut TradingEngine, asset: &str, n: usize) {
        for _ in 0..n {
            engine.on_tick(asset, 100.0).unwrap();
        }
    }

    #[test]
    fn ticks_drive_regime_detection() {
        let mut engine = TradingEngine::new(config()).unwrap();
        feed_flat(&mut engine, "R_10", 49);
        assert_eq!(engine.current_regime("R_10"), Regime::Unknown);
        let d = engine.on_tick("R_10", 100.0).unwrap();
        assert_eq!(d.regime, Regime::LowVolRanging);
        assert_eq!(engine.current_regime("R_10"), Regime::LowVolRanging);
    }

    #[test]
    fn cold_start_places_exploration_bet_at_min_stake() {
        let mut engine = TradingEngine::new(config()).unwrap();
        feed_flat(&mut engine, "R_10", 60);
        let d = engine.evaluate_bet::<&str>(&request("R_10"), &[]).unwrap();
        assert!(d.approved, "{:?}", d.rejections);
        assert!(d.exploration);
        assert_relative_eq!(d.stake, 1.0);
        assert!(d.risk.is_some());
    }

    #[test]
    fn confident_losing_history_is_rejected() {
        let mut engine = TradingEngine::new(config()).unwrap();
        feed_flat(&mut engine, "R_10", 60);
        for _ in 0..40 {
            engine.estimator_mut().update_asset("R_10", false);
        }
        let d = engine.evaluate_bet::<&str>(&request("R_10"), &[]).unwrap();
        assert!(!d.exploration);
        assert!(!d.approved);
        assert!(d.edge < 0.0);
        assert_eq!(d.rejections, vec!["no edge".to_string()]);
    }

    #[test]
    fn confident_winning_history_is_kelly_sized() {
        let mut engine = TradingEngine::new(config()).unwrap();
        feed_flat(&mut engine, "R_10", 60);
        let q = WinQuery {
            asset: "R_10".into(),
            growth_rate: Regime::LowVolRanging.params().growth_rate,
            pattern_id: Some("flat".into()),
            regime: Some(Regime::LowVolRanging),
        };
        for _ in 0..200 {
            engine.estimator_mut().update_all(&q, true);
        }
        let d = engine.evaluate_bet::<&str>(&request("R_10"), &[]).unwrap();
        assert!(d.approved, "{:?}", d.rejections);
        assert!(!d.exploration);
        assert!(d.edge > 0.0);
        assert!(d.kelly_fraction > 0.0);
        assert!(d.stake >= 1.0 && d.stake <= 10.0);
    }

    #[test]
    fn results_update_priors_and_ledger() {
        let mut engine = TradingEngine::new(config()).unwrap();
        feed_flat(&mut engine, "R_10", 60);
        let d = engine.evaluate_bet::<&str>(&request("R_10"), &[]).unwrap();
        let record = engine
            .record_result(&d, TradeOutcome::Win, 0.5, 5.0)
            .unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(record.regime, Regime::LowVolRanging);
        assert_relative_eq!(engine.ledger().current_balance(), 100.5);
        let dist = engine.estimator().asset_distribution("R_10");
        assert_relative_eq!(dist.alpha(), 2.0);
        assert_relative_eq!(
            engine
                .estimator()
                .pattern_distribution("flat")
                .alpha(),
            2.0
        );
    }

    #[test]
    fn rejected_decision_cannot_be_recorded() {
        let mut engine = TradingEngine::new(config()).unwrap();
        feed_flat(&mut engine, "R_10", 60);
        for _ in 0..40 {
            engine.estimator_mut().update_asset("R_10", false);
        }
        let d = engine.evaluate_bet::<&str>(&request("R_10"), &[]).unwrap();
        assert!(!d.approved);
        let alpha_before = engine.estimator().asset_distribution("R_10").alpha();
        assert!(engine
            .record_result(&d, TradeOutcome::Loss, -1.0, 1.0)
            .is_err());
        assert_eq!(engine.ledger().metrics().total_trades, 0);
        assert_relative_eq!(engine.estimator().asset_distribution("R_10").alpha(), alpha_before);
    }

    #[test]
    fn correlated_active_instrument_damps_approved_stake() {
        let mut engine = TradingEngine::new(config()).unwrap();
        for i in 0..120 {
            let step = (i / 3) as f64;
            engine.on_tick("A", 100.0 + step).unwrap();
            engine.on_tick("B", 50.0 + step).unwrap();
        }
        assert_eq!(engine.current_regime("A"), Regime::LowVolTrending);
        assert!(engine.correlations().get_correlation("A", "B") > 0.99);

        let d = engine.evaluate_bet(&request("A"), &["B"]).unwrap();
        assert!(d.approved, "{:?}", d.rejections);
        assert_relative_eq!(d.base_stake, 1.0);
        assert!(d.stake < d.base_stake);
        assert_relative_eq!(d.stake, 1.0 / 2f64.sqrt(), epsilon = 1e-6);
        assert_relative_eq!(d.params.stake, d.stake);
    }

    #[test]
    fn tail_risk_gate_rejects_when_required() {
        let cfg = EngineConfig {
            require_acceptable_risk: true,
            ..config()
        };
        let mut engine = TradingEngine::new(cfg).unwrap();
        feed_flat(&mut engine, "R_10", 60);
        let d = engine.evaluate_bet::<&str>(&request("R_10"), &[]).unwrap();
        assert!(d.exploration);
        assert!(!d.approved);
        let risk = d.risk.as_ref().unwrap();
        assert!(!risk.is_acceptable_risk);
        assert_eq!(d.rejections, vec!["unacceptable tail risk".to_string()]);
        assert_eq!(d.stake, 0.0);
    }

    #[test]
    fn rejects_inverted_stake_bounds() {
        let cfg = EngineConfig {
            min_stake: 5.0,
            max_stake: 1.0,
            ..config()
        };
        assert!(TradingEngine::new(cfg).is_err());
    }
}
