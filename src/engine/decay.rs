//! Exponential time decay.
//!
//! A contribution made at time `t` is weighted `exp(-λ·(now - t))` with
//! `λ = ln 2 / half_life`. Decay is applied lazily when a score is evaluated;
//! stored contributions keep their original timestamps.

use crate::domain::TimeMs;
use std::time::Duration;

/// Decay curve for one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfLife {
    lambda_per_ms: f64,
}

impl HalfLife {
    pub fn new(half_life: Duration) -> Self {
        let ms = half_life.as_millis().max(1) as f64;
        Self {
            lambda_per_ms: std::f64::consts::LN_2 / ms,
        }
    }

    /// Decay constant per millisecond.
    pub fn lambda(&self) -> f64 {
        self.lambda_per_ms
    }

    /// Weight of a contribution `age_ms` old. Future contributions weigh 1.
    pub fn weight_for_age(&self, age_ms: i64) -> f64 {
        if age_ms <= 0 {
            return 1.0;
        }
        (-self.lambda_per_ms * age_ms as f64).exp()
    }

    /// Weight at `now` of a contribution made at `at`.
    pub fn weight(&self, at: TimeMs, now: TimeMs) -> f64 {
        self.weight_for_age(now.as_ms() - at.as_ms())
    }

    /// Value of `initial` after `elapsed` with no further contributions.
    pub fn decayed(&self, initial: f64, elapsed_ms: i64) -> f64 {
        initial * self.weight_for_age(elapsed_ms)
    }
}
