//! Seeded synthetic tick feed for paper sessions.
//!
//! Every instrument is a cent-quantized random walk. A shared market factor
//! correlates the moves; a per-instrument stay probability controls how often
//! the price prints unchanged, which is what the regime classifier reads as
//! (low) volatility.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

const PATTERN_MOVES: usize = 3;

struct Instrument {
    name: String,
    price: f64,
    stay_probability: f64,
    /// Weight of the shared factor, in [0, 1).
    loading: f64,
    step_size: f64,
    recent: VecDeque<f64>,
}

pub struct SyntheticMarket {
    rng: StdRng,
    instruments: Vec<Instrument>,
}

impl SyntheticMarket {
    pub fn new(names: &[String], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let instruments = names
            .iter()
            .map(|name| Instrument {
                name: name.clone(),
                price: 100.0,
                stay_probability: rng.gen_range(0.15..0.75),
                loading: rng.gen_range(0.0..0.9),
                step_size: rng.gen_range(0.02..0.2),
                recent: VecDeque::with_capacity(PATTERN_MOVES + 1),
            })
            .collect();
        Self { rng, instruments }
    }

    /// Advance every instrument by one tick.
    pub fn step(&mut self) -> Vec<(String, f64)> {
        let common: f64 = StandardNormal.sample(&mut self.rng);
        let mut out = Vec::with_capacity(self.instruments.len());
        for inst in &mut self.instruments {
            if self.rng.gen::<f64>() >= inst.stay_probability {
                let own: f64 = StandardNormal.sample(&mut self.rng);
                let shock = inst.loading * common + (1.0 - inst.loading * inst.loading).sqrt() * own;
                let mut next = round_cents(inst.price + inst.step_size * shock);
                if next == inst.price {
                    next = round_cents(inst.price + if shock < 0.0 { -0.01 } else { 0.01 });
                }
                inst.price = next.max(0.01);
            }
            if inst.recent.len() > PATTERN_MOVES {
                inst.recent.pop_front();
            }
            inst.recent.push_back(inst.price);
            out.push((inst.name.clone(), inst.price));
        }
        out
    }

    /// Direction of the last three moves, e.g. `"UFD"` (up, flat, down).
    pub fn pattern(&self, name: &str) -> Option<String> {
        let inst = self.instrument(name)?;
        if inst.recent.len() <= PATTERN_MOVES {
            return None;
        }
        let ticks: Vec<f64> = inst.recent.iter().copied().collect();
        Some(
            ticks
                .windows(2)
                .map(|w| match w[1].partial_cmp(&w[0]) {
                    Some(std::cmp::Ordering::Greater) => 'U',
                    Some(std::cmp::Ordering::Less) => 'D',
                    _ => 'F',
                })
                .collect(),
        )
    }

    /// Ground-truth survival odds used to resolve paper bets.
    pub fn true_win_probability(&self, name: &str) -> f64 {
        self.instrument(name)
            .map(|inst| 0.82 + 0.12 * inst.stay_probability)
            .unwrap_or(0.5)
    }

    /// Ticks a losing contract lasted, uniform over `[1, estimated_ticks]`.
    pub fn loss_duration(&mut self, estimated_ticks: f64) -> f64 {
        if estimated_ticks <= 1.0 {
            return 1.0;
        }
        self.rng.gen_range(1.0..=estimated_ticks).floor()
    }

    fn instrument(&self, name: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.name == name)
    }
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
