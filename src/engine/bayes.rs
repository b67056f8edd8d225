//! Bayesian win-probability estimator.
//!
//! One Beta distribution is kept per tracked key in four independent key
//! spaces (asset, quantized growth rate, pattern id, regime). The combined
//! estimate is a fixed-weight blend of the four component means.
//!
//! Continuous growth-rate keys are quantized to three decimals, and the
//! open-ended key spaces live in an LRU store with a hard capacity so a
//! long-running session cannot grow them without bound.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::regime::Regime;
use super::stats::BetaDistribution;
use crate::error::EngineResult;

/// Blend weights for [`BayesianEstimator::estimate_win_probability`].
pub const WEIGHT_ASSET: f64 = 0.3;
pub const WEIGHT_GROWTH: f64 = 0.2;
pub const WEIGHT_PATTERN: f64 = 0.2;
pub const WEIGHT_REGIME: f64 = 0.3;

/// Probability assumed for a component that has no key (no pattern supplied).
const NEUTRAL_PROBABILITY: f64 = 0.5;

/// Sample size at which confidence saturates to 1.0.
const CONFIDENCE_SATURATION: f64 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub max_assets: usize,
    pub max_growth_buckets: usize,
    pub max_patterns: usize,
    /// Report the Beta mode instead of the mean where the mode is defined.
    pub use_mode: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_assets: 256,
            max_growth_buckets: 64,
            max_patterns: 512,
            use_mode: false,
        }
    }
}

/// Point estimate selector for single-key reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointEstimate {
    Mean,
    /// Falls back to the mean while the mode is undefined.
    Mode,
}

impl PointEstimate {
    fn of(self, dist: &BetaDistribution) -> f64 {
        match self {
            PointEstimate::Mean => dist.mean(),
            PointEstimate::Mode => dist.mode().unwrap_or_else(|| dist.mean()),
        }
    }
}

/// Quantize a growth rate to integer thousandths (3 decimals).
pub fn growth_bucket(growth_rate: f64) -> i64 {
    if !growth_rate.is_finite() {
        return 0;
    }
    (growth_rate * 1000.0).round() as i64
}

// ── Bounded prior store ──────────────────────────────────────────────────────

/// Key → Beta store with least-recently-used eviction once `capacity` keys
/// are held.
pub struct PriorStore<K: Hash + Eq> {
    entries: LruCache<K, BetaDistribution>,
    evictions: u64,
}

impl<K: Hash + Eq + Clone + std::fmt::Debug> PriorStore<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            evictions: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Read without creating the key or refreshing its recency.
    pub fn get<Q>(&self, key: &Q) -> Option<&BetaDistribution>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.peek(key)
    }

    /// Fetch the distribution for `key`, creating it from `prior` if absent,
    /// and mark it as most recently used.
    pub fn touch(&mut self, key: &K, prior: BetaDistribution) -> &mut BetaDistribution {
        if !self.entries.contains(key) {
            self.insert(key.clone(), prior);
        }
        self.entries.get_or_insert_mut(key.clone(), || prior)
    }

    /// Replace (or create) the distribution for `key`.
    pub fn seed(&mut self, key: &K, prior: BetaDistribution) {
        self.insert(key.clone(), prior);
    }

    /// Most recently used first.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &BetaDistribution)> {
        self.entries.iter()
    }

    fn insert(&mut self, key: K, prior: BetaDistribution) {
        if let Some((evicted, _)) = self.entries.push(key.clone(), prior) {
            if evicted != key {
                self.evictions += 1;
                debug!(
                    key = ?evicted,
                    capacity = self.capacity(),
                    "Evicted least-recently-used prior"
                );
            }
        }
    }
}

// ── Estimator ────────────────────────────────────────────────────────────────

/// Query for a combined win-probability estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinQuery {
    pub asset: String,
    pub growth_rate: f64,
    pub pattern_id: Option<String>,
    pub regime: Option<Regime>,
}

/// Combined estimate plus its components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WinEstimate {
    /// Weighted blend, always in [0, 1].
    pub combined: f64,
    /// `min(1, ln(n + 1) / ln(100))` over the asset's observed sample size.
    pub confidence: f64,
    pub asset: f64,
    pub growth: f64,
    pub pattern: f64,
    pub regime: f64,
    pub asset_samples: f64,
}

/// Per-key view used for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorSummary {
    pub key: String,
    pub mean: f64,
    pub samples: f64,
    pub interval_95: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorSnapshot {
    pub assets: Vec<PriorSummary>,
    pub growth_buckets: Vec<PriorSummary>,
    pub patterns: Vec<PriorSummary>,
    pub regimes: Vec<PriorSummary>,
}

pub struct BayesianEstimator {
    config: EstimatorConfig,
    assets: PriorStore<String>,
    growth: PriorStore<i64>,
    patterns: PriorStore<String>,
    regimes: HashMap<Regime, BetaDistribution>,
}

impl Default for BayesianEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

impl BayesianEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            assets: PriorStore::new(config.max_assets),
            growth: PriorStore::new(config.max_growth_buckets),
            patterns: PriorStore::new(config.max_patterns),
            regimes: HashMap::new(),
            config,
        }
    }

    fn point(&self) -> PointEstimate {
        if self.config.use_mode {
            PointEstimate::Mode
        } else {
            PointEstimate::Mean
        }
    }

    // ── Updates ──────────────────────────────────────────────────────────────

    pub fn update_asset(&mut self, asset: &str, won: bool) {
        self.assets
            .touch(&asset.to_string(), BetaDistribution::uniform())
            .update(won);
    }

    pub fn update_growth_rate(&mut self, growth_rate: f64, won: bool) {
        self.growth
            .touch(&growth_bucket(growth_rate), BetaDistribution::uniform())
            .update(won);
    }

    pub fn update_pattern(&mut self, pattern_id: &str, won: bool) {
        self.patterns
            .touch(&pattern_id.to_string(), BetaDistribution::uniform())
            .update(won);
    }

    pub fn update_regime(&mut self, regime: Regime, won: bool) {
        self.regimes.entry(regime).or_default().update(won);
    }

    /// Apply one resolved bet to every key space it touches.
    pub fn update_all(&mut self, query: &WinQuery, won: bool) {
        self.update_asset(&query.asset, won);
        self.update_growth_rate(query.growth_rate, won);
        if let Some(pattern) = &query.pattern_id {
            self.update_pattern(pattern, won);
        }
        if let Some(regime) = query.regime {
            self.update_regime(regime, won);
        }
    }

    // ── Custom priors ────────────────────────────────────────────────────────

    pub fn seed_asset(&mut self, asset: &str, alpha: f64, beta: f64) -> EngineResult<()> {
        let prior = BetaDistribution::new(alpha, beta)?;
        self.assets.seed(&asset.to_string(), prior);
        Ok(())
    }

    pub fn seed_growth_rate(&mut self, growth_rate: f64, alpha: f64, beta: f64) -> EngineResult<()> {
        let prior = BetaDistribution::new(alpha, beta)?;
        self.growth.seed(&growth_bucket(growth_rate), prior);
        Ok(())
    }

    pub fn seed_pattern(&mut self, pattern_id: &str, alpha: f64, beta: f64) -> EngineResult<()> {
        let prior = BetaDistribution::new(alpha, beta)?;
        self.patterns.seed(&pattern_id.to_string(), prior);
        Ok(())
    }

    pub fn seed_regime(&mut self, regime: Regime, alpha: f64, beta: f64) -> EngineResult<()> {
        let prior = BetaDistribution::new(alpha, beta)?;
        self.regimes.insert(regime, prior);
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────────
    //
    // Unknown keys read as the uniform prior without being materialized, so
    // queries alone never grow the stores.

    pub fn asset_distribution(&self, asset: &str) -> BetaDistribution {
        self.assets
            .get(asset)
            .copied()
            .unwrap_or_default()
    }

    pub fn growth_distribution(&self, growth_rate: f64) -> BetaDistribution {
        self.growth
            .get(&growth_bucket(growth_rate))
            .copied()
            .unwrap_or_default()
    }

    pub fn pattern_distribution(&self, pattern_id: &str) -> BetaDistribution {
        self.patterns
            .get(pattern_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn regime_distribution(&self, regime: Regime) -> BetaDistribution {
        self.regimes.get(&regime).copied().unwrap_or_default()
    }

    pub fn asset_prob(&self, asset: &str, point: PointEstimate) -> f64 {
        point.of(&self.asset_distribution(asset))
    }

    pub fn growth_prob(&self, growth_rate: f64, point: PointEstimate) -> f64 {
        point.of(&self.growth_distribution(growth_rate))
    }

    pub fn pattern_prob(&self, pattern_id: &str, point: PointEstimate) -> f64 {
        point.of(&self.pattern_distribution(pattern_id))
    }

    pub fn regime_prob(&self, regime: Regime, point: PointEstimate) -> f64 {
        point.of(&self.regime_distribution(regime))
    }

    /// Weighted blend of the four component probabilities.
    pub fn estimate_win_probability(&self, query: &WinQuery) -> WinEstimate {
        let point = self.point();
        let asset = self.asset_prob(&query.asset, point);
        let growth = self.growth_prob(query.growth_rate, point);
        let pattern = query
            .pattern_id
            .as_deref()
            .map(|p| self.pattern_prob(p, point))
            .unwrap_or(NEUTRAL_PROBABILITY);
        let regime = query
            .regime
            .map(|r| self.regime_prob(r, point))
            .unwrap_or(NEUTRAL_PROBABILITY);

        let combined = WEIGHT_ASSET * asset
            + WEIGHT_GROWTH * growth
            + WEIGHT_PATTERN * pattern
            + WEIGHT_REGIME * regime;

        let asset_samples = self.asset_distribution(&query.asset).sample_size();
        let confidence = if asset_samples <= 0.0 {
            0.0
        } else {
            ((asset_samples + 1.0).ln() / CONFIDENCE_SATURATION.ln()).min(1.0)
        };

        WinEstimate {
            combined: combined.clamp(0.0, 1.0),
            confidence,
            asset,
            growth,
            pattern,
            regime,
            asset_samples,
        }
    }

    pub fn tracked_keys(&self) -> (usize, usize, usize, usize) {
        (
            self.assets.len(),
            self.growth.len(),
            self.patterns.len(),
            self.regimes.len(),
        )
    }

    pub fn snapshot(&self) -> EstimatorSnapshot {
        fn summarize<'a>(
            items: impl Iterator<Item = (String, &'a BetaDistribution)>,
        ) -> Vec<PriorSummary> {
            let mut out: Vec<PriorSummary> = items
                .map(|(key, d)| PriorSummary {
                    key,
                    mean: d.mean(),
                    samples: d.sample_size(),
                    interval_95: d.credible_interval(0.95),
                })
                .collect();
            out.sort_by(|a, b| a.key.cmp(&b.key));
            out
        }

        EstimatorSnapshot {
            assets: summarize(self.assets.iter().map(|(k, d)| (k.clone(), d))),
            growth_buckets: summarize(
                self.growth
                    .iter()
                    .map(|(k, d)| (format!("{:.3}", *k as f64 / 1000.0), d)),
            ),
            patterns: summarize(self.patterns.iter().map(|(k, d)| (k.clone(), d))),
            regimes: summarize(self.regimes.iter().map(|(k, d)| (k.to_string(), d))),
        }
    }
}
