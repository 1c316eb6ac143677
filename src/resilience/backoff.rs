//! Exponential backoff computation.
//!
//! Pure functions of the policy and the zero-based attempt index; nothing
//! here sleeps or reads the clock.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay after the first failed attempt.
    pub initial: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Whether to randomize delays.
    pub jitter: bool,
}

impl Backoff {
    /// Creates backoff parameters.
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: bool) -> Self {
        Self {
            initial,
            max,
            multiplier,
            jitter,
        }
    }

    /// Un-jittered delay: `min(max, initial * multiplier^attempt_index)`.
    pub fn raw_delay(&self, attempt_index: u32) -> Duration {
        Duration::from_micros(self.raw_micros(attempt_index).round() as u64)
    }

    /// Delay before the attempt following `attempt_index`, drawing jitter from `rng`.
    ///
    /// With jitter the delay is uniform in `[raw * 0.5, raw * 1.5)`, capped at `max`.
    pub fn delay_with<R: Rng>(&self, attempt_index: u32, rng: &mut R) -> Duration {
        let raw = self.raw_micros(attempt_index);
        if !self.jitter || raw <= 0.0 {
            return Duration::from_micros(raw.round() as u64);
        }

        let factor: f64 = rng.gen_range(0.5..1.5);
        let jittered = (raw * factor).floor().min(self.max_micros());
        Duration::from_micros(jittered as u64)
    }

    /// Delay before the attempt following `attempt_index`, using the thread RNG.
    pub fn delay(&self, attempt_index: u32) -> Duration {
        self.delay_with(attempt_index, &mut rand::thread_rng())
    }

    fn raw_micros(&self, attempt_index: u32) -> f64 {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let grown = self.initial.as_micros() as f64 * self.multiplier.powi(exponent);
        // powi overflows to infinity for large exponents; min() still caps it.
        grown.min(self.max_micros())
    }

    fn max_micros(&self) -> f64 {
        self.max.as_micros() as f64
    }
}
