//! Market-regime classification.
//!
//! A rolling window of ticks is bucketed into one of four regimes by two
//! measures:
//! - **Volatility**: the share of adjacent ticks whose value changed over the
//!   last `lookback_period` samples.
//! - **Trend strength**: a directional-index style ratio
//!   `|avg_up − avg_down| / (avg_up + avg_down)` over a short sub-window.
//!
//! Each regime carries a fixed parameter record used downstream for sizing.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    LowVolTrending,
    HighVolTrending,
    LowVolRanging,
    HighVolRanging,
    Unknown,
}

/// Fixed tuning record bound to each regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeParams {
    pub growth_rate: f64,
    pub survival_threshold: f64,
    pub kelly_fraction: f64,
    pub description: &'static str,
}

impl Regime {
    pub const ALL: [Regime; 5] = [
        Regime::LowVolTrending,
        Regime::HighVolTrending,
        Regime::LowVolRanging,
        Regime::HighVolRanging,
        Regime::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Regime::LowVolTrending => "LOW_VOL_TRENDING",
            Regime::HighVolTrending => "HIGH_VOL_TRENDING",
            Regime::LowVolRanging => "LOW_VOL_RANGING",
            Regime::HighVolRanging => "HIGH_VOL_RANGING",
            Regime::Unknown => "UNKNOWN",
        }
    }

    pub fn params(self) -> RegimeParams {
        match self {
            Regime::LowVolTrending => RegimeParams {
                growth_rate: 0.03,
                survival_threshold: 0.70,
                kelly_fraction: 0.25,
                description: "Calm directional market, best conditions for compounding",
            },
            Regime::HighVolTrending => RegimeParams {
                growth_rate: 0.02,
                survival_threshold: 0.75,
                kelly_fraction: 0.15,
                description: "Directional but noisy, smaller growth and stake",
            },
            Regime::LowVolRanging => RegimeParams {
                growth_rate: 0.03,
                survival_threshold: 0.65,
                kelly_fraction: 0.20,
                description: "Quiet sideways market, ticks rarely breach barriers",
            },
            Regime::HighVolRanging => RegimeParams {
                growth_rate: 0.01,
                survival_threshold: 0.85,
                kelly_fraction: 0.05,
                description: "Choppy market, worst conditions, trade sparingly",
            },
            Regime::Unknown => RegimeParams {
                growth_rate: 0.01,
                survival_threshold: 0.80,
                kelly_fraction: 0.10,
                description: "Not enough data to classify, conservative defaults",
            },
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Regime {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Regime::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EngineError::invalid("regime", format!("unknown regime '{s}'")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Samples required before a window can be classified.
    pub lookback_period: usize,
    /// Sub-window length for trend strength.
    pub trend_period: usize,
    /// Below this many samples volatility reads as zero.
    pub min_volatility_samples: usize,
    pub volatility_threshold: f64,
    pub trend_threshold: f64,
    pub history_capacity: usize,
    /// Chance of trading at all in `HIGH_VOL_RANGING`.
    pub high_vol_ranging_trade_probability: f64,
    pub seed: u64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            lookback_period: 50,
            trend_period: 14,
            min_volatility_samples: 10,
            volatility_threshold: 0.6,
            trend_threshold: 0.4,
            history_capacity: 1000,
            high_vol_ranging_trade_probability: 0.2,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegimeDetection {
    pub regime: Regime,
    pub volatility: f64,
    pub trend_strength: f64,
    pub params: RegimeParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegimeHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub regime: Regime,
    pub volatility: f64,
    pub trend_strength: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegimeShare {
    pub regime: Regime,
    pub count: usize,
    pub share: f64,
    pub avg_volatility: f64,
    pub avg_trend_strength: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegimeStatistics {
    pub current: Regime,
    pub observations: usize,
    pub regimes: Vec<RegimeShare>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiTimeframeAnalysis {
    pub consensus: Regime,
    /// Votes for the consensus over the number of timeframes.
    pub alignment: f64,
    pub should_trade: bool,
    pub timeframes: BTreeMap<String, RegimeDetection>,
}

pub struct RegimeClassifier {
    config: RegimeConfig,
    history: VecDeque<RegimeHistoryEntry>,
    current: Regime,
    by_asset: HashMap<String, Regime>,
    rng: StdRng,
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            history: VecDeque::with_capacity(config.history_capacity.min(1024)),
            current: Regime::Unknown,
            by_asset: HashMap::new(),
            rng,
            config,
        }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Share of adjacent-tick changes across the most recent
    /// `lookback_period` samples. Zero below `min_volatility_samples`.
    pub fn calculate_volatility(&self, window: &[f64]) -> f64 {
        if window.len() < self.config.min_volatility_samples.max(2) {
            return 0.0;
        }
        let start = window.len().saturating_sub(self.config.lookback_period);
        let recent = &window[start..];
        if recent.len() < 2 {
            return 0.0;
        }
        let changes = recent.windows(2).filter(|w| w[1] != w[0]).count();
        changes as f64 / (recent.len() - 1) as f64
    }

    /// Directional strength in [0, 1] over the last `trend_period` moves.
    pub fn calculate_trend_strength(&self, window: &[f64]) -> f64 {
        let period = self.config.trend_period.max(1);
        if window.len() < period + 1 {
            return 0.0;
        }
        let recent = &window[window.len() - (period + 1)..];
        let (mut ups, mut downs) = (0.0, 0.0);
        for w in recent.windows(2) {
            let diff = w[1] - w[0];
            if diff > 0.0 {
                ups += diff;
            } else {
                downs += -diff;
            }
        }
        let avg_up = ups / period as f64;
        let avg_down = downs / period as f64;
        let total = avg_up + avg_down;
        if total == 0.0 {
            return 0.0;
        }
        (avg_up - avg_down).abs() / total
    }

    /// Classify a window without touching history or current state.
    pub fn classify(&self, window: &[f64]) -> RegimeDetection {
        if window.len() < self.config.lookback_period {
            return RegimeDetection {
                regime: Regime::Unknown,
                volatility: 0.0,
                trend_strength: 0.0,
                params: Regime::Unknown.params(),
            };
        }
        let volatility = self.calculate_volatility(window);
        let trend_strength = self.calculate_trend_strength(window);
        let high_vol = volatility > self.config.volatility_threshold;
        let trending = trend_strength > self.config.trend_threshold;
        let regime = match (high_vol, trending) {
            (false, true) => Regime::LowVolTrending,
            (true, true) => Regime::HighVolTrending,
            (false, false) => Regime::LowVolRanging,
            (true, false) => Regime::HighVolRanging,
        };
        RegimeDetection {
            regime,
            volatility,
            trend_strength,
            params: regime.params(),
        }
    }

    /// Classify and, when enough data is available, record the result in
    /// the bounded history and as the current regime.
    pub fn detect_regime(&mut self, window: &[f64], asset: &str) -> RegimeDetection {
        let detection = self.classify(window);
        if detection.regime == Regime::Unknown {
            return detection;
        }

        if self.history.len() >= self.config.history_capacity.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(RegimeHistoryEntry {
            timestamp: Utc::now(),
            asset: asset.to_string(),
            regime: detection.regime,
            volatility: detection.volatility,
            trend_strength: detection.trend_strength,
        });

        let previous = self.by_asset.insert(asset.to_string(), detection.regime);
        if previous != Some(detection.regime) {
            info!(
                asset,
                from = previous.map(Regime::as_str).unwrap_or("NONE"),
                to = detection.regime.as_str(),
                volatility = format!("{:.3}", detection.volatility),
                trend = format!("{:.3}", detection.trend_strength),
                "Regime change"
            );
        }
        self.current = detection.regime;
        detection
    }

    pub fn current_regime(&self) -> Regime {
        self.current
    }

    pub fn regime_for(&self, asset: &str) -> Regime {
        self.by_asset.get(asset).copied().unwrap_or(Regime::Unknown)
    }

    /// Parameters for `regime`, or for the current regime when `None`.
    pub fn regime_params(&self, regime: Option<Regime>) -> RegimeParams {
        regime.unwrap_or(self.current).params()
    }

    /// Always true, except in `HIGH_VOL_RANGING` where a seeded draw lets
    /// only a fraction of opportunities through.
    pub fn should_trade_in_regime(&mut self) -> bool {
        self.should_trade_in(self.current)
    }

    pub fn should_trade_in(&mut self, regime: Regime) -> bool {
        if regime != Regime::HighVolRanging {
            return true;
        }
        self.rng.gen::<f64>() < self.config.high_vol_ranging_trade_probability
    }

    /// Classify every timeframe independently and take a plurality vote.
    /// Ties resolve to the regime listed first in [`Regime::ALL`].
    pub fn analyze_multi_timeframe(
        &self,
        timeframes: &BTreeMap<String, Vec<f64>>,
    ) -> MultiTimeframeAnalysis {
        let detections: BTreeMap<String, RegimeDetection> = timeframes
            .iter()
            .map(|(name, window)| (name.clone(), self.classify(window)))
            .collect();

        if detections.is_empty() {
            return MultiTimeframeAnalysis {
                consensus: Regime::Unknown,
                alignment: 0.0,
                should_trade: false,
                timeframes: detections,
            };
        }

        let mut votes = [0usize; 5];
        for d in detections.values() {
            votes[regime_index(d.regime)] += 1;
        }
        let mut best = 0;
        for i in 1..votes.len() {
            if votes[i] > votes[best] {
                best = i;
            }
        }
        let consensus = Regime::ALL[best];
        let alignment = votes[best] as f64 / detections.len() as f64;

        MultiTimeframeAnalysis {
            consensus,
            alignment,
            should_trade: alignment >= 0.5 && consensus != Regime::Unknown,
            timeframes: detections,
        }
    }

    pub fn regime_history(&self) -> impl Iterator<Item = &RegimeHistoryEntry> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn regime_statistics(&self) -> RegimeStatistics {
        let total = self.history.len();
        let regimes = Regime::ALL
            .iter()
            .filter(|r| **r != Regime::Unknown)
            .map(|&regime| {
                let entries: Vec<&RegimeHistoryEntry> =
                    self.history.iter().filter(|e| e.regime == regime).collect();
                let count = entries.len();
                let (avg_volatility, avg_trend_strength) = if count == 0 {
                    (0.0, 0.0)
                } else {
                    (
                        entries.iter().map(|e| e.volatility).sum::<f64>() / count as f64,
                        entries.iter().map(|e| e.trend_strength).sum::<f64>() / count as f64,
                    )
                };
                RegimeShare {
                    regime,
                    count,
                    share: if total == 0 { 0.0 } else { count as f64 / total as f64 },
                    avg_volatility,
                    avg_trend_strength,
                }
            })
            .collect();
        RegimeStatistics {
            current: self.current,
            observations: total,
            regimes,
        }
    }
}

fn regime_index(regime: Regime) -> usize {
    match regime {
        Regime::LowVolTrending => 0,
        Regime::HighVolTrending => 1,
        Regime::LowVolRanging => 2,
        Regime::HighVolRanging => 3,
        Regime::Unknown => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn constant(n: usize) -> Vec<f64> {
        vec![100.0; n]
    }

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    fn alternating(n: usize) -> Vec<f64> {
        (0..n).map(|i| (i % 2) as f64).collect()
    }

    /// Steps up once every three ticks: low change rate, pure uptrend.
    fn staircase(n: usize) -> Vec<f64> {
        (0..n).map(|i| (i / 3) as f64).collect()
    }

    #[test]
    fn regime_names_parse_back() {
        for r in Regime::ALL {
            assert_eq!(r.to_string().parse::<Regime>().unwrap(), r);
        }
        assert_eq!("low_vol_trending".parse::<Regime>().unwrap(), Regime::LowVolTrending);
        assert!("SIDEWAYS".parse::<Regime>().is_err());
    }

    #[test]
    fn constant_window_is_low_vol_ranging() {
        let mut c = RegimeClassifier::default();
        let d = c.detect_regime(&constant(60), "R_100");
        assert_eq!(d.regime, Regime::LowVolRanging);
        assert_eq!(d.volatility, 0.0);
        assert_eq!(d.trend_strength, 0.0);
        assert_eq!(c.current_regime(), Regime::LowVolRanging);
    }

    #[test]
    fn short_window_is_unknown_and_unrecorded() {
        let mut c = RegimeClassifier::default();
        let d = c.detect_regime(&constant(49), "R_100");
        assert_eq!(d.regime, Regime::Unknown);
        assert_eq!(c.history_len(), 0);
        assert_eq!(c.regime_for("R_100"), Regime::Unknown);
    }

    #[test]
    fn classifies_all_four_regimes() {
        let c = RegimeClassifier::default();
        assert_eq!(c.classify(&rising(60)).regime, Regime::HighVolTrending);
        assert_eq!(c.classify(&alternating(60)).regime, Regime::HighVolRanging);
        assert_eq!(c.classify(&staircase(60)).regime, Regime::LowVolTrending);
        assert_eq!(c.classify(&constant(60)).regime, Regime::LowVolRanging);
    }

    #[test]
    fn volatility_needs_minimum_samples() {
        let c = RegimeClassifier::default();
        assert_eq!(c.calculate_volatility(&rising(9)), 0.0);
        assert_relative_eq!(c.calculate_volatility(&rising(10)), 1.0);
    }

    #[test]
    fn trend_strength_is_symmetric_in_direction() {
        let c = RegimeClassifier::default();
        let up = rising(20);
        let down: Vec<f64> = up.iter().rev().copied().collect();
        assert_relative_eq!(c.calculate_trend_strength(&up), 1.0);
        assert_relative_eq!(c.calculate_trend_strength(&down), 1.0);
        assert_eq!(c.calculate_trend_strength(&rising(14)), 0.0);
    }

    #[test]
    fn history_is_a_bounded_ring() {
        let mut c = RegimeClassifier::new(RegimeConfig {
            history_capacity: 3,
            ..RegimeConfig::default()
        });
        for i in 0..5 {
            c.detect_regime(&constant(60), &format!("A{i}"));
        }
        assert_eq!(c.history_len(), 3);
        let first = c.regime_history().next().unwrap();
        assert_eq!(first.asset, "A2");
    }

    #[test]
    fn throttle_only_applies_to_high_vol_ranging() {
        let mut c = RegimeClassifier::default();
        for regime in [
            Regime::LowVolTrending,
            Regime::HighVolTrending,
            Regime::LowVolRanging,
            Regime::Unknown,
        ] {
            assert!((0..100).all(|_| c.should_trade_in(regime)));
        }
        let allowed = (0..2000)
            .filter(|_| c.should_trade_in(Regime::HighVolRanging))
            .count();
        let rate = allowed as f64 / 2000.0;
        assert!(rate > 0.15 && rate < 0.25, "rate {rate}");
    }

    #[test]
    fn throttle_is_reproducible_for_a_seed() {
        let cfg = RegimeConfig {
            seed: 42,
            ..RegimeConfig::default()
        };
        let mut a = RegimeClassifier::new(cfg.clone());
        let mut b = RegimeClassifier::new(cfg);
        let xs: Vec<bool> = (0..50).map(|_| a.should_trade_in(Regime::HighVolRanging)).collect();
        let ys: Vec<bool> = (0..50).map(|_| b.should_trade_in(Regime::HighVolRanging)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn params_follow_current_regime() {
        let mut c = RegimeClassifier::default();
        assert_eq!(c.regime_params(None), Regime::Unknown.params());
        c.detect_regime(&alternating(60), "A");
        assert_eq!(c.regime_params(None).kelly_fraction, 0.05);
        assert_eq!(
            c.regime_params(Some(Regime::LowVolTrending)),
            Regime::LowVolTrending.params()
        );
    }

    #[test]
    fn multi_timeframe_plurality_vote() {
        let c = RegimeClassifier::default();
        let mut frames = BTreeMap::new();
        frames.insert("1m".to_string(), constant(60));
        frames.insert("5m".to_string(), constant(60));
        frames.insert("15m".to_string(), rising(60));
        let a = c.analyze_multi_timeframe(&frames);
        assert_eq!(a.consensus, Regime::LowVolRanging);
        assert_relative_eq!(a.alignment, 2.0 / 3.0);
        assert!(a.should_trade);
        assert_eq!(c.history_len(), 0);
    }

    #[test]
    fn multi_timeframe_split_vote_below_half_does_not_trade() {
        let c = RegimeClassifier::default();
        let mut frames = BTreeMap::new();
        frames.insert("a".to_string(), constant(60));
        frames.insert("b".to_string(), rising(60));
        frames.insert("c".to_string(), alternating(60));
        let a = c.analyze_multi_timeframe(&frames);
        assert_relative_eq!(a.alignment, 1.0 / 3.0);
        assert!(!a.should_trade);
        assert!(!c.analyze_multi_timeframe(&BTreeMap::new()).should_trade);
    }

    #[test]
    fn statistics_report_shares() {
        let mut c = RegimeClassifier::default();
        c.detect_regime(&constant(60), "A");
        c.detect_regime(&constant(60), "A");
        c.detect_regime(&rising(60), "B");
        let stats = c.regime_statistics();
        assert_eq!(stats.observations, 3);
        let ranging = stats
            .regimes
            .iter()
            .find(|s| s.regime == Regime::LowVolRanging)
            .unwrap();
        assert_eq!(ranging.count, 2);
        assert_relative_eq!(ranging.share, 2.0 / 3.0);
        assert_eq!(stats.current, Regime::HighVolTrending);
    }
}
