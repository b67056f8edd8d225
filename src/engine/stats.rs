//! Statistical primitives shared by every other engine component.
//!
//! All functions are pure and never fail: empty inputs, zero variance and
//! zero denominators degrade to a neutral sentinel (usually `0.0`) instead of
//! producing NaN.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{EngineError, EngineResult};

// ── Sequence statistics ──────────────────────────────────────────────────────

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (divides by `n`, not `n - 1`).
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn standard_deviation(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Pearson correlation coefficient in [-1, 1].
///
/// Returns `0.0` for empty or mismatched sequences and when either side has
/// zero variance.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.is_empty() || x.len() != y.len() {
        return 0.0;
    }
    let mx = mean(x);
    let my = mean(y);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}

/// Percentile with linear interpolation between the two bracketing ranks
/// (`index = p / 100 * (n - 1)`). `p` is clamped to [0, 100].
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, p)
}

/// Same as [`percentile`] for input that is already sorted ascending.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = p.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = index - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Historical Value-at-Risk: the negated lower-tail percentile at
/// `(1 - confidence) * 100`. Positive means a loss.
pub fn value_at_risk(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    -percentile(returns, (1.0 - confidence) * 100.0)
}

/// Conditional VaR (expected shortfall): mean loss magnitude among returns at
/// or below the VaR threshold. Falls back to VaR when nothing breaches it.
pub fn conditional_var(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let var = value_at_risk(returns, confidence);
    let threshold = -var;
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= threshold).collect();
    if tail.is_empty() {
        return var;
    }
    -mean(&tail)
}

/// Mean excess return over its (population) standard deviation.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let excess: Vec<f64> = returns.iter().map(|r| r - risk_free_rate).collect();
    let sd = standard_deviation(&excess);
    if sd == 0.0 {
        return 0.0;
    }
    mean(&excess) / sd
}

/// Exponential moving average series, seeded with the first value.
/// `alpha = 2 / (period + 1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period.max(1) as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            None => v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Last value of [`ema`], or `0.0` for an empty input.
pub fn ema_last(values: &[f64], period: usize) -> f64 {
    ema(values, period).last().copied().unwrap_or(0.0)
}

/// Two-sided standard-normal critical value for a confidence level.
pub fn z_score(confidence: f64) -> f64 {
    let c = confidence.clamp(1e-9, 1.0 - 1e-12);
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.inverse_cdf(1.0 - (1.0 - c) / 2.0),
        Err(_) => 0.0,
    }
}

// ── Beta distribution ────────────────────────────────────────────────────────

/// Belief about a Bernoulli success probability.
///
/// Both parameters stay `>= 1`; the only mutation is [`BetaDistribution::update`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaDistribution {
    alpha: f64,
    beta: f64,
}

impl Default for BetaDistribution {
    fn default() -> Self {
        Self::uniform()
    }
}

impl BetaDistribution {
    /// Uniform prior, Beta(1, 1).
    pub fn uniform() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }

    pub fn new(alpha: f64, beta: f64) -> EngineResult<Self> {
        if !alpha.is_finite() || alpha < 1.0 {
            return Err(EngineError::invalid("alpha", format!("{alpha} must be >= 1")));
        }
        if !beta.is_finite() || beta < 1.0 {
            return Err(EngineError::invalid("beta", format!("{beta} must be >= 1")));
        }
        Ok(Self { alpha, beta })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Bernoulli update: a success adds to alpha, a failure to beta.
    pub fn update(&mut self, success: bool) {
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Only defined when both parameters exceed 1.
    pub fn mode(&self) -> Option<f64> {
        if self.alpha > 1.0 && self.beta > 1.0 {
            Some((self.alpha - 1.0) / (self.alpha + self.beta - 2.0))
        } else {
            None
        }
    }

    pub fn variance(&self) -> f64 {
        let s = self.alpha + self.beta;
        (self.alpha * self.beta) / (s * s * (s + 1.0))
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Observations beyond the two uniform-prior pseudo-counts.
    pub fn sample_size(&self) -> f64 {
        (self.alpha + self.beta - 2.0).max(0.0)
    }

    /// Normal-approximation credible interval `mean ± z·σ`, clipped to [0, 1].
    ///
    /// This is not an exact Beta quantile and is loose for small samples or
    /// means close to 0 or 1.
    pub fn credible_interval(&self, confidence: f64) -> (f64, f64) {
        let z = z_score(confidence);
        let m = self.mean();
        let half = z * self.std_dev();
        ((m - half).max(0.0), (m + half).min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mean_and_population_std_dev() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(mean(&v), 5.0, epsilon = 1e-12);
        assert_relative_eq!(standard_deviation(&v), 2.0, epsilon = 1e-12);
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(standard_deviation(&[]), 0.0);
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        assert_relative_eq!(percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 50.0), 3.0);
        assert_relative_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 50.0), 2.5);
        assert_relative_eq!(percentile(&[4.0, 1.0, 3.0, 2.0], 0.0), 1.0);
        assert_relative_eq!(percentile(&[4.0, 1.0, 3.0, 2.0], 100.0), 4.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn pearson_detects_perfect_and_inverse_relationships() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        let z = [5.0, 4.0, 3.0, 2.0, 1.0];
        assert_relative_eq!(pearson_correlation(&x, &y), 1.0, epsilon = 1e-12);
        assert_relative_eq!(pearson_correlation(&x, &z), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn pearson_guards_zero_variance_and_bad_lengths() {
        assert_eq!(pearson_correlation(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(pearson_correlation(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(pearson_correlation(&[], &[]), 0.0);
    }

    #[test]
    fn var_is_positive_for_losses() {
        let returns: Vec<f64> = (-10..=9).map(|i| i as f64).collect();
        // 5th percentile of -10..9 is -9.05
        assert_relative_eq!(value_at_risk(&returns, 0.95), 9.05, epsilon = 1e-9);
    }

    #[test]
    fn cvar_averages_the_tail() {
        let returns: Vec<f64> = (-10..=9).map(|i| i as f64).collect();
        // Only -10 is at or below -9.05.
        assert_relative_eq!(conditional_var(&returns, 0.95), 10.0, epsilon = 1e-9);
        assert!(conditional_var(&returns, 0.95) >= value_at_risk(&returns, 0.95));
    }

    #[test]
    fn sharpe_is_zero_without_dispersion() {
        assert_eq!(sharpe_ratio(&[0.1, 0.1, 0.1], 0.0), 0.0);
        assert!(sharpe_ratio(&[0.1, 0.2, 0.3], 0.0) > 0.0);
        assert!(sharpe_ratio(&[0.1, 0.2, 0.3], 0.5) < 0.0);
    }

    #[test]
    fn ema_seeds_with_first_value() {
        let series = ema(&[10.0, 20.0], 3);
        assert_relative_eq!(series[0], 10.0);
        // alpha = 0.5
        assert_relative_eq!(series[1], 15.0);
        assert_eq!(ema_last(&[], 5), 0.0);
    }

    #[test]
    fn z_score_matches_normal_quantiles() {
        assert_relative_eq!(z_score(0.95), 1.959964, epsilon = 1e-5);
        assert_relative_eq!(z_score(0.99), 2.575829, epsilon = 1e-5);
        assert_relative_eq!(z_score(0.975), 2.241403, epsilon = 1e-5);
        assert!(z_score(0.0).abs() < 1e-6);
        assert!(z_score(1.0).is_finite());
    }

    #[test]
    fn beta_mean_after_k_successes_and_m_failures() {
        let mut beta = BetaDistribution::uniform();
        let (k, m) = (7, 3);
        for _ in 0..k {
            beta.update(true);
        }
        for _ in 0..m {
            beta.update(false);
        }
        assert_eq!(beta.mean(), (1.0 + k as f64) / (2.0 + (k + m) as f64));
        assert_relative_eq!(beta.sample_size(), 10.0);
    }

    #[test]
    fn beta_mode_requires_both_parameters_above_one() {
        let mut beta = BetaDistribution::uniform();
        assert_eq!(beta.mode(), None);
        beta.update(true);
        assert_eq!(beta.mode(), None);
        beta.update(false);
        assert_relative_eq!(beta.mode().unwrap(), 0.5);
    }

    #[test]
    fn beta_rejects_parameters_below_one() {
        assert!(BetaDistribution::new(0.5, 1.0).is_err());
        assert!(BetaDistribution::new(1.0, f64::NAN).is_err());
        assert!(BetaDistribution::new(3.0, 2.0).is_ok());
    }

    #[test]
    fn credible_interval_is_clipped() {
        let beta = BetaDistribution::new(2.0, 1.0).unwrap();
        let (lo, hi) = beta.credible_interval(0.95);
        assert!(lo >= 0.0);
        assert!(hi <= 1.0);
        assert!(lo < beta.mean() && beta.mean() < hi);

        let tight = BetaDistribution::new(501.0, 501.0).unwrap();
        let (lo, hi) = tight.credible_interval(0.95);
        assert!(hi - lo < 0.07);
    }
}
