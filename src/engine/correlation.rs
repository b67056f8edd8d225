//! Cross-instrument correlation tracking.
//!
//! Every instrument keeps a bounded FIFO window of recent ticks. The pairwise
//! Pearson matrix is rebuilt wholesale every `update_frequency` ticks (across
//! all instruments) and is used to damp stakes when several correlated
//! instruments are active at once.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::stats::pearson_correlation;
use crate::error::{ensure_finite, ensure_non_negative, EngineResult};

/// Stakes are never damped below this share of the base stake.
const MIN_STAKE_FRACTION: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub correlation_window: usize,
    pub update_frequency: u64,
    /// Both windows need at least this many samples for a non-zero value.
    pub min_samples: usize,
    pub threshold: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            correlation_window: 500,
            update_frequency: 100,
            min_samples: 50,
            threshold: 0.7,
        }
    }
}

pub struct CorrelationTracker {
    config: CorrelationConfig,
    windows: HashMap<String, VecDeque<f64>>,
    matrix: HashMap<String, HashMap<String, f64>>,
    tick_count: u64,
    rebuilds: u64,
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new(CorrelationConfig::default())
    }
}

impl CorrelationTracker {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
            matrix: HashMap::new(),
            tick_count: 0,
            rebuilds: 0,
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Append a tick to `instrument`'s window. Returns `true` when this tick
    /// triggered a matrix rebuild.
    pub fn add_tick(&mut self, instrument: &str, value: f64) -> EngineResult<bool> {
        let value = ensure_finite("tick", value)?;
        let cap = self.config.correlation_window.max(1);
        let window = self
            .windows
            .entry(instrument.to_string())
            .or_insert_with(|| VecDeque::with_capacity(cap));
        if window.len() >= cap {
            window.pop_front();
        }
        window.push_back(value);

        self.tick_count += 1;
        if self.tick_count % self.config.update_frequency.max(1) == 0 {
            self.update_correlations();
            return Ok(true);
        }
        Ok(false)
    }

    /// Rebuild the full matrix from the current windows. Each unordered pair
    /// is computed once and mirrored.
    pub fn update_correlations(&mut self) {
        let instruments = self.tracked_instruments();
        let mut matrix: HashMap<String, HashMap<String, f64>> = HashMap::new();

        for (i, a) in instruments.iter().enumerate() {
            matrix.entry(a.clone()).or_default().insert(a.clone(), 1.0);
            for b in &instruments[i + 1..] {
                let rho = self.pair_correlation(a, b);
                matrix.entry(a.clone()).or_default().insert(b.clone(), rho);
                matrix.entry(b.clone()).or_default().insert(a.clone(), rho);
            }
        }

        self.matrix = matrix;
        self.rebuilds += 1;
        debug!(
            instruments = instruments.len(),
            rebuild = self.rebuilds,
            "Correlation matrix rebuilt"
        );
    }

    /// Pearson correlation over the common trailing length of both windows.
    fn pair_correlation(&self, a: &str, b: &str) -> f64 {
        let (Some(wa), Some(wb)) = (self.windows.get(a), self.windows.get(b)) else {
            return 0.0;
        };
        let n = wa.len().min(wb.len());
        if n < self.config.min_samples {
            return 0.0;
        }
        let xa: Vec<f64> = wa.iter().skip(wa.len() - n).copied().collect();
        let xb: Vec<f64> = wb.iter().skip(wb.len() - n).copied().collect();
        pearson_correlation(&xa, &xb)
    }

    /// Last computed correlation; `1.0` on the diagonal, `0.0` when unknown.
    pub fn get_correlation(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        self.matrix
            .get(a)
            .and_then(|row| row.get(b))
            .copied()
            .unwrap_or(0.0)
    }

    /// Other instruments with `|rho| >= threshold`, strongest first.
    pub fn get_correlated_assets(&self, instrument: &str, threshold: Option<f64>) -> Vec<(String, f64)> {
        let threshold = threshold.unwrap_or(self.config.threshold);
        let Some(row) = self.matrix.get(instrument) else {
            return Vec::new();
        };
        let mut out: Vec<(String, f64)> = row
            .iter()
            .filter(|(other, rho)| other.as_str() != instrument && rho.abs() >= threshold)
            .map(|(other, rho)| (other.clone(), *rho))
            .collect();
        out.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// Damp `base_stake` by how many active instruments move with
    /// `instrument`: `base / sqrt(n * (0.5 + 0.5 * avg|rho|))`, floored at half
    /// the base stake.
    pub fn adjust_position_for_correlation<S: AsRef<str>>(
        &self,
        base_stake: f64,
        instrument: &str,
        active_instruments: &[S],
    ) -> EngineResult<f64> {
        let base_stake = ensure_non_negative("base_stake", base_stake)?;
        let correlated: Vec<f64> = active_instruments
            .iter()
            .map(|s| s.as_ref())
            .filter(|other| *other != instrument)
            .map(|other| self.get_correlation(instrument, other).abs())
            .filter(|rho| *rho >= self.config.threshold)
            .collect();

        if correlated.is_empty() {
            return Ok(base_stake);
        }

        let avg_correlation = correlated.iter().sum::<f64>() / correlated.len() as f64;
        let n = (correlated.len() + 1) as f64;
        let correlation_factor = 0.5 + 0.5 * avg_correlation;
        let adjusted = base_stake / (n * correlation_factor).sqrt();
        let floored = adjusted.max(base_stake * MIN_STAKE_FRACTION);

        debug!(
            instrument,
            correlated = correlated.len(),
            avg_correlation = format!("{:.3}", avg_correlation),
            base_stake,
            adjusted = floored,
            "Stake damped for correlation"
        );
        Ok(floored)
    }

    /// Grinold-style effective number of independent bets:
    /// `n / (1 + (n - 1) * avg_rho)`, with `avg_rho` floored at zero.
    pub fn calculate_effective_n_bets<S: AsRef<str>>(&self, instruments: &[S]) -> f64 {
        let n = instruments.len();
        if n <= 1 {
            return n as f64;
        }
        let mut sum = 0.0;
        let mut pairs = 0usize;
        for (i, a) in instruments.iter().enumerate() {
            for b in &instruments[i + 1..] {
                sum += self.get_correlation(a.as_ref(), b.as_ref());
                pairs += 1;
            }
        }
        let avg = (sum / pairs as f64).clamp(0.0, 1.0);
        let n = n as f64;
        n / (1.0 + (n - 1.0) * avg)
    }

    /// Candidate with the lowest mean absolute correlation to the active set,
    /// scored as `1 - mean|rho|`.
    pub fn find_uncorrelated_asset<A: AsRef<str>, C: AsRef<str>>(
        &self,
        active: &[A],
        candidates: &[C],
    ) -> Option<(String, f64)> {
        candidates
            .iter()
            .map(|candidate| {
                let candidate = candidate.as_ref();
                let score = if active.is_empty() {
                    1.0
                } else {
                    let total: f64 = active
                        .iter()
                        .map(|a| self.get_correlation(candidate, a.as_ref()).abs())
                        .sum();
                    1.0 - total / active.len() as f64
                };
                (candidate.to_string(), score)
            })
            .fold(None, |best: Option<(String, f64)>, item| match best {
                Some(b) if b.1 >= item.1 => Some(b),
                _ => Some(item),
            })
    }

    pub fn tracked_instruments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.windows.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn window(&self, instrument: &str) -> Option<&VecDeque<f64>> {
        self.windows.get(instrument)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Ordered copy of the current matrix.
    pub fn correlation_matrix(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        self.matrix
            .iter()
            .map(|(a, row)| {
                (
                    a.clone(),
                    row.iter().map(|(b, rho)| (b.clone(), *rho)).collect(),
                )
            })
            .collect()
    }

    #[cfg(test)]
    fn set_correlation(&mut self, a: &str, b: &str, rho: f64) {
        self.matrix.entry(a.into()).or_default().insert(b.into(), rho);
        self.matrix.entry(b.into()).or_default().insert(a.into(), rho);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Deterministic wiggle so series have non-zero variance.
    fn series(n: usize, phase: f64) -> Vec<f64> {
        (0..n).map(|i| ((i as f64) * 0.37 + phase).sin() * 10.0 + 100.0).collect()
    }

    fn feed(tracker: &mut CorrelationTracker, name: &str, values: &[f64]) {
        for v in values {
            tracker.add_tick(name, *v).unwrap();
        }
    }

    #[test]
    fn window_evicts_oldest_first() {
        let mut t = CorrelationTracker::new(CorrelationConfig {
            correlation_window: 5,
            ..CorrelationConfig::default()
        });
        feed(&mut t, "A", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let w: Vec<f64> = t.window("A").unwrap().iter().copied().collect();
        assert_eq!(w, vec![4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn rejects_non_finite_ticks() {
        let mut t = CorrelationTracker::default();
        assert!(t.add_tick("A", f64::NAN).is_err());
        assert_eq!(t.tick_count(), 0);
    }

    #[test]
    fn rebuild_fires_every_update_frequency_ticks() {
        let mut t = CorrelationTracker::new(CorrelationConfig {
            update_frequency: 10,
            ..CorrelationConfig::default()
        });
        let mut fired = 0;
        for i in 0..35 {
            if t.add_tick("A", i as f64).unwrap() {
                fired += 1;
            }
        }
        assert_eq!(fired, 3);
        assert_eq!(t.rebuilds(), 3);
    }

    #[test]
    fn matrix_is_symmetric_with_unit_diagonal() {
        let mut t = CorrelationTracker::default();
        let a = series(200, 0.0);
        let b = series(200, 0.4);
        let c: Vec<f64> = a.iter().map(|v| 200.0 - v).collect();
        for i in 0..200 {
            t.add_tick("A", a[i]).unwrap();
            t.add_tick("B", b[i]).unwrap();
            t.add_tick("C", c[i]).unwrap();
        }
        t.update_correlations();
        for x in ["A", "B", "C"] {
            assert_eq!(t.get_correlation(x, x), 1.0);
            for y in ["A", "B", "C"] {
                assert_eq!(t.get_correlation(x, y), t.get_correlation(y, x));
            }
        }
        assert_relative_eq!(t.get_correlation("A", "C"), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn short_windows_correlate_to_zero() {
        let mut t = CorrelationTracker::default();
        let a = series(49, 0.0);
        feed(&mut t, "A", &a);
        feed(&mut t, "B", &a);
        t.update_correlations();
        assert_eq!(t.get_correlation("A", "B"), 0.0);
    }

    #[test]
    fn uses_common_trailing_length() {
        let mut t = CorrelationTracker::default();
        let a = series(120, 0.0);
        // B only saw the last 60 ticks of the same signal.
        feed(&mut t, "A", &a);
        feed(&mut t, "B", &a[60..]);
        t.update_correlations();
        assert_relative_eq!(t.get_correlation("A", "B"), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn correlated_assets_sorted_by_strength() {
        let mut t = CorrelationTracker::default();
        t.set_correlation("A", "B", 0.75);
        t.set_correlation("A", "C", -0.95);
        t.set_correlation("A", "D", 0.2);
        let out = t.get_correlated_assets("A", None);
        let names: Vec<&str> = out.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["C", "B"]);
        assert_eq!(t.get_correlated_assets("A", Some(0.1)).len(), 3);
    }

    #[test]
    fn correlated_active_instrument_damps_stake() {
        let mut t = CorrelationTracker::default();
        t.set_correlation("A", "B", 0.9);
        let adjusted = t.adjust_position_for_correlation(100.0, "A", &["B"]).unwrap();
        assert!(adjusted > 50.0 && adjusted < 100.0, "adjusted {adjusted}");
        // 100 / sqrt(2 * 0.95)
        assert_relative_eq!(adjusted, 100.0 / 1.9f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn uncorrelated_active_set_leaves_stake_unchanged() {
        let mut t = CorrelationTracker::default();
        t.set_correlation("A", "B", 0.3);
        let adjusted = t.adjust_position_for_correlation(100.0, "A", &["B", "A"]).unwrap();
        assert_eq!(adjusted, 100.0);
        assert!(t.adjust_position_for_correlation(f64::NAN, "A", &["B"]).is_err());
    }

    #[test]
    fn damping_is_floored_at_half() {
        let mut t = CorrelationTracker::default();
        let others: Vec<String> = (0..20).map(|i| format!("X{i}")).collect();
        for o in &others {
            t.set_correlation("A", o, 1.0);
        }
        let adjusted = t.adjust_position_for_correlation(100.0, "A", &others).unwrap();
        assert_relative_eq!(adjusted, 50.0);
    }

    #[test]
    fn effective_bets_follow_grinold() {
        let mut t = CorrelationTracker::default();
        t.set_correlation("A", "B", 1.0);
        assert_relative_eq!(t.calculate_effective_n_bets(&["A", "B"]), 1.0);
        t.set_correlation("A", "B", 0.0);
        assert_relative_eq!(t.calculate_effective_n_bets(&["A", "B"]), 2.0);
        assert_eq!(t.calculate_effective_n_bets::<&str>(&[]), 0.0);
        assert_eq!(t.calculate_effective_n_bets(&["A"]), 1.0);
    }

    #[test]
    fn picks_least_correlated_candidate() {
        let mut t = CorrelationTracker::default();
        t.set_correlation("A", "X", 0.9);
        t.set_correlation("A", "Y", 0.1);
        t.set_correlation("A", "Z", -0.8);
        let (best, score) = t.find_uncorrelated_asset(&["A"], &["X", "Y", "Z"]).unwrap();
        assert_eq!(best, "Y");
        assert_relative_eq!(score, 0.9);
        assert!(t.find_uncorrelated_asset(&["A"], &Vec::<String>::new()).is_none());
    }
}
