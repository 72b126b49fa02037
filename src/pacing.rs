//! Pause computation between thread-index visits.
//!
//! Two bounds feed the pause. The *absolute* bound drops steeply as more new
//! replies show up in a cycle. The *recurrence* bound scales the previous
//! pause, shrinking it while the board is busy and growing it while idle.
//! The smaller of the two is then jittered so consecutive visits never land
//! on a regular period.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Tuning constants for the pause function. All durations are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Pause when nothing new was seen.
    pub idle_base: f64,
    /// Exponent applied to the new-reply count.
    pub decay_power: f64,
    /// More new replies than this counts as an active cycle.
    pub activity_threshold: u32,
    /// Applied to the previous pause on active cycles.
    pub small_multiplier: f64,
    /// Applied to the previous pause on quiet cycles.
    pub large_multiplier: f64,
    /// Bounds of the multiplicative jitter.
    pub jitter_scale: (f64, f64),
    /// Bounds of the additive jitter.
    pub jitter_offset: (f64, f64),
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            idle_base: 600.0,
            decay_power: 3.5,
            activity_threshold: 2,
            small_multiplier: 0.5,
            large_multiplier: 2.0,
            jitter_scale: (1.0, 1.2),
            jitter_offset: (0.6, 2.4),
        }
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, (low, high): (f64, f64)) -> f64 {
    if high > low {
        rng.gen_range(low..high)
    } else {
        low
    }
}

impl PacingConfig {
    /// Reject settings that could produce a zero or negative pause.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.idle_base > 0.0) {
            return Err(format!("idle_base must be positive, got {}", self.idle_base));
        }
        if self.decay_power <= 0.0 {
            return Err(format!("decay_power must be positive, got {}", self.decay_power));
        }
        if self.small_multiplier <= 0.0 || self.large_multiplier <= 0.0 {
            return Err("pause multipliers must be positive".to_string());
        }
        let (scale_lo, scale_hi) = self.jitter_scale;
        let (offset_lo, offset_hi) = self.jitter_offset;
        if scale_lo <= 0.0 || scale_hi < scale_lo {
            return Err(format!("invalid jitter_scale {:?}", self.jitter_scale));
        }
        if offset_lo <= 0.0 || offset_hi < offset_lo {
            return Err(format!("invalid jitter_offset {:?}", self.jitter_offset));
        }
        Ok(())
    }

    /// `idle_base / (n^decay_power + 1)`.
    pub fn absolute_pause(&self, new_replies: u32) -> f64 {
        self.idle_base / ((new_replies as f64).powf(self.decay_power) + 1.0)
    }

    pub fn recurrence_pause(&self, previous_pause: f64, new_replies: u32) -> f64 {
        if new_replies > self.activity_threshold {
            previous_pause * self.small_multiplier
        } else {
            previous_pause * self.large_multiplier
        }
    }

    /// The tighter of the two bounds.
    pub fn actual_pause(&self, previous_pause: f64, new_replies: u32) -> f64 {
        self.recurrence_pause(previous_pause, new_replies)
            .min(self.absolute_pause(new_replies))
    }

    /// Multiplicative-plus-additive jitter. Large pauses are dominated by the
    /// multiplier, small ones by the offset.
    pub fn fluctuate<R: Rng + ?Sized>(&self, pause: f64, rng: &mut R) -> f64 {
        pause * uniform(rng, self.jitter_scale) + uniform(rng, self.jitter_offset)
    }
}

/// Pause chosen for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PauseDecision {
    pub new_replies: u32,
    pub actual: f64,
    pub fluctuated: f64,
}

/// Pauses carried from one cycle to the next within a session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaceState {
    pub previous_pause: f64,
    pub previous_previous_pause: f64,
}

impl PaceState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Compute the next pause and shift the history.
    pub fn next<R: Rng + ?Sized>(
        &mut self,
        config: &PacingConfig,
        new_replies: u32,
        rng: &mut R,
    ) -> PauseDecision {
        let actual = config.actual_pause(self.previous_pause, new_replies);
        let fluctuated = config.fluctuate(actual, rng);

        self.previous_previous_pause = self.previous_pause;
        self.previous_pause = fluctuated;

        PauseDecision {
            new_replies,
            actual,
            fluctuated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_absolute_pause_at_zero_is_idle_base() {
        let config = PacingConfig::default();
        assert_eq!(config.absolute_pause(0), config.idle_base);
    }

    #[test]
    fn test_absolute_pause_strictly_decreasing() {
        let config = PacingConfig::default();
        let mut last = config.absolute_pause(0);
        for n in 1..200 {
            let next = config.absolute_pause(n);
            assert!(next < last, "absolute_pause({}) = {} >= {}", n, next, last);
            last = next;
        }
    }

    #[test]
    fn test_actual_pause_bounded_by_absolute() {
        let config = PacingConfig::default();
        for previous in [0.0, 0.5, 3.0, 90.0, 600.0, 5000.0] {
            for n in 0..50 {
                assert!(config.actual_pause(previous, n) <= config.absolute_pause(n));
            }
        }
    }

    #[test]
    fn test_recurrence_contracts_under_load() {
        let config = PacingConfig::default();
        assert_eq!(config.recurrence_pause(40.0, 10), 20.0);
        assert_eq!(config.recurrence_pause(40.0, 0), 80.0);
        assert_eq!(config.recurrence_pause(40.0, config.activity_threshold), 80.0);
    }

    #[test]
    fn test_fluctuated_pause_always_positive() {
        let config = PacingConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = PaceState::default();
        for n in [0, 0, 1, 5, 40, 0, 0, 300, 2, 0] {
            let decision = state.next(&config, n, &mut rng);
            assert!(decision.fluctuated > 0.0);
            assert!(decision.actual <= config.absolute_pause(n));
            assert!(decision.fluctuated >= decision.actual * config.jitter_scale.0 + config.jitter_offset.0);
        }
    }

    #[test]
    fn test_state_shifts_history() {
        let config = PacingConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = PaceState::default();

        let first = state.next(&config, 0, &mut rng);
        assert_eq!(state.previous_pause, first.fluctuated);
        assert_eq!(state.previous_previous_pause, 0.0);

        let second = state.next(&config, 0, &mut rng);
        assert_eq!(state.previous_pause, second.fluctuated);
        assert_eq!(state.previous_previous_pause, first.fluctuated);

        state.reset();
        assert_eq!(state, PaceState::default());
    }

    #[test]
    fn test_idle_pause_grows_toward_idle_base() {
        let config = PacingConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = PaceState::default();
        let mut last = 0.0;
        for _ in 0..20 {
            last = state.next(&config, 0, &mut rng).actual;
        }
        assert_eq!(last, config.idle_base);
    }

    #[test]
    fn test_validate() {
        assert!(PacingConfig::default().validate().is_ok());
        let bad = PacingConfig {
            jitter_offset: (0.0, 1.0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PacingConfig {
            idle_base: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
