/// Kelly Criterion stake sizing.
///
/// The Kelly formula sizes a bet to maximise the expected logarithm of wealth:
///   f* = (b·p − q) / b
/// where
///   b  = net odds (profit per unit staked on a win)
///   p  = estimated probability of winning
///   q  = 1 − p
///
/// Growth contracts pay `(1 + g)^ticks − 1` per unit staked, so `b` is derived
/// from the growth rate and the expected survival in ticks. The regime's
/// `kelly_fraction` is applied as a fractional multiplier on top.

/// Net odds of a growth contract that survives `ticks` ticks.
pub fn growth_odds(growth_rate: f64, ticks: f64) -> f64 {
    if !growth_rate.is_finite() || !ticks.is_finite() || ticks <= 0.0 {
        return 0.0;
    }
    ((1.0 + growth_rate).powf(ticks) - 1.0).max(0.0)
}

/// Fraction of bankroll to stake, in [0, 1].
///
/// # Arguments
/// * `win_prob`   – Estimated probability that the bet wins (0.0–1.0).
/// * `net_odds`   – Profit per unit staked on a win.
/// * `multiplier` – Fractional Kelly multiplier (0.0–1.0).
///
/// Returns `0.0` when there is no edge.
pub fn kelly_fraction(win_prob: f64, net_odds: f64, multiplier: f64) -> f64 {
    if net_odds <= 0.0 || !net_odds.is_finite() || !win_prob.is_finite() {
        return 0.0;
    }
    let p = win_prob.clamp(0.0, 1.0);
    let q = 1.0 - p;
    let f = (net_odds * p - q) / net_odds;
    if f <= 0.0 {
        return 0.0; // no edge
    }
    (f * multiplier.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Expected return per unit staked: `p·b − q`.
pub fn edge(win_prob: f64, net_odds: f64) -> f64 {
    if net_odds <= 0.0 || !net_odds.is_finite() {
        return -1.0;
    }
    let p = win_prob.clamp(0.0, 1.0);
    p * net_odds - (1.0 - p)
}
