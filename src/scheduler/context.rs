use std::collections::HashSet;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::CooldownKind;
use crate::pacing::PaceState;

/// Session length and cooldown settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub min_cycles: u32,
    pub max_cycles: u32,
    /// A session keeps going past its planned cycles while the chosen pause
    /// stays below this many seconds.
    pub hot_threshold_secs: f64,
    /// Cooldown ranges in seconds.
    pub short_cooldown_secs: (f64, f64),
    pub long_cooldown_secs: (f64, f64),
    pub longer_cooldown_secs: (f64, f64),
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_cycles: 100,
            max_cycles: 1000,
            hot_threshold_secs: 20.0,
            short_cooldown_secs: (3.0, 10.0),
            long_cooldown_secs: (300.0, 900.0),
            longer_cooldown_secs: (900.0, 1800.0),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_cycles == 0 || self.max_cycles < self.min_cycles {
            return Err(format!(
                "invalid session cycle range {}..={}",
                self.min_cycles, self.max_cycles
            ));
        }
        for (name, (low, high)) in [
            ("short_cooldown_secs", self.short_cooldown_secs),
            ("long_cooldown_secs", self.long_cooldown_secs),
            ("longer_cooldown_secs", self.longer_cooldown_secs),
        ] {
            if low < 0.0 || high < low {
                return Err(format!("invalid {} ({}, {})", name, low, high));
            }
        }
        Ok(())
    }

    fn cooldown_range(&self, kind: CooldownKind) -> (f64, f64) {
        match kind {
            CooldownKind::Short => self.short_cooldown_secs,
            CooldownKind::Long => self.long_cooldown_secs,
            CooldownKind::Longer => self.longer_cooldown_secs,
        }
    }
}

/// Per-browser-session flags; cleared on every restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub authenticated: bool,
    /// Threads whose badge reported a terminal state during this session.
    pub finished_thread_ids: HashSet<u64>,
}

impl SessionState {
    pub fn clear(&mut self) {
        self.authenticated = false;
        self.finished_thread_ids.clear();
    }
}

/// Mutable state threaded through the scheduler.
#[derive(Debug)]
pub struct SchedulerContext {
    pub pace: PaceState,
    pub session: SessionState,
    pub planned_cycles: u32,
    pub cycles_run: u32,
    pub rng: StdRng,
}

impl SchedulerContext {
    pub fn new(rng: StdRng) -> Self {
        Self {
            pace: PaceState::default(),
            session: SessionState::default(),
            planned_cycles: 0,
            cycles_run: 0,
            rng,
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Reset per-session state and draw this session's cycle count.
    pub fn begin_session(&mut self, config: &SessionConfig) {
        self.pace.reset();
        self.session.clear();
        self.cycles_run = 0;
        self.planned_cycles = self.rng.gen_range(config.min_cycles..=config.max_cycles);
    }

    /// Whether another cycle should run after one that chose `last_pause`.
    pub fn should_continue(&self, config: &SessionConfig, last_pause: f64) -> bool {
        self.cycles_run < self.planned_cycles || last_pause < config.hot_threshold_secs
    }

    pub fn cooldown(&mut self, config: &SessionConfig, kind: CooldownKind) -> Duration {
        let (low, high) = config.cooldown_range(kind);
        let secs = if high > low {
            self.rng.gen_range(low..high)
        } else {
            low
        };
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_session_resets_state() {
        let mut ctx = SchedulerContext::new(StdRng::seed_from_u64(7));
        ctx.pace.previous_pause = 40.0;
        ctx.session.authenticated = true;
        ctx.session.finished_thread_ids.insert(3);
        ctx.cycles_run = 12;

        let config = SessionConfig::default();
        ctx.begin_session(&config);

        assert_eq!(ctx.pace, PaceState::default());
        assert_eq!(ctx.session, SessionState::default());
        assert_eq!(ctx.cycles_run, 0);
        assert!((config.min_cycles..=config.max_cycles).contains(&ctx.planned_cycles));
    }

    #[test]
    fn test_hot_session_runs_past_plan() {
        let config = SessionConfig::default();
        let mut ctx = SchedulerContext::new(StdRng::seed_from_u64(1));
        ctx.planned_cycles = 2;
        ctx.cycles_run = 2;
        assert!(ctx.should_continue(&config, 5.0));
        assert!(!ctx.should_continue(&config, 120.0));
        ctx.cycles_run = 1;
        assert!(ctx.should_continue(&config, 120.0));
    }

    #[test]
    fn test_cooldowns_stay_in_range() {
        let config = SessionConfig::default();
        let mut ctx = SchedulerContext::new(StdRng::seed_from_u64(99));
        for _ in 0..50 {
            let short = ctx.cooldown(&config, CooldownKind::Short).as_secs_f64();
            assert!((3.0..10.0).contains(&short));
            let longer = ctx.cooldown(&config, CooldownKind::Longer).as_secs_f64();
            assert!((900.0..1800.0).contains(&longer));
        }
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let config = SessionConfig {
            min_cycles: 10,
            max_cycles: 5,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(SessionConfig::default().validate().is_ok());
    }
}
