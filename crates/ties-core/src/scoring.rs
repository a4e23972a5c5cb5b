//! Score arithmetic: decay toward baseline and saturating injection of raw
//! deltas. Everything here is pure.

use std::f64::consts::FRAC_PI_2;

use ties_events::edge::clamp_score;
use ties_events::{SCORE_MAX, SCORE_MIN, STRENGTH_BASELINE, TRUST_BASELINE};

use crate::config::ScoringConfig;

/// Pulls StrengthScore toward 0.
pub fn decay_strength(current: f64, factor: f64) -> f64 {
    clamp_score(STRENGTH_BASELINE + (current - STRENGTH_BASELINE) * factor)
}

/// Pulls TrustScore toward 50.
pub fn decay_trust(current: f64, factor: f64) -> f64 {
    clamp_score(TRUST_BASELINE + (current - TRUST_BASELINE) * factor)
}

/// Sign-preserving compression of a raw delta into (-1, 1).
pub fn compress(raw_delta: f64, factor: f64) -> f64 {
    (raw_delta * factor).atan() / FRAC_PI_2
}

/// Moves `base` toward the bound implied by the sign of `raw_delta`.
///
/// The step is the compressed delta times the remaining headroom, so large
/// deltas approach the bound with diminishing returns and never reach it in
/// one step. The result is clamped regardless.
pub fn scale(base: f64, raw_delta: f64, factor: f64) -> f64 {
    if raw_delta == 0.0 || raw_delta.is_nan() {
        return clamp_score(base);
    }
    let base = clamp_score(base);
    let impact = compress(raw_delta, factor);
    let next = if impact > 0.0 {
        base + impact * (SCORE_MAX - base)
    } else {
        base + impact * (base - SCORE_MIN)
    };
    clamp_score(next)
}

/// Prior state of an edge going into a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriorScores {
    /// No edge exists yet
    Absent,
    /// Current stored scores
    Existing { strength: f64, trust: f64 },
}

/// Computes the next `(strength, trust)` for a touched edge.
///
/// Existing edges are decayed first; absent edges start from the baselines.
/// Raw deltas are multiplied by `raw_multiplier` before scaling.
pub fn next_scores(
    prior: PriorScores,
    strength_raw: f64,
    trust_raw: f64,
    config: &ScoringConfig,
) -> (f64, f64) {
    let (base_strength, base_trust) = match prior {
        PriorScores::Absent => (STRENGTH_BASELINE, TRUST_BASELINE),
        PriorScores::Existing { strength, trust } => (
            decay_strength(strength, config.strength_decay),
            decay_trust(trust, config.trust_decay),
        ),
    };

    (
        scale(base_strength, strength_raw * config.raw_multiplier, config.scale_factor),
        scale(base_trust, trust_raw * config.raw_multiplier, config.scale_factor),
    )
}
