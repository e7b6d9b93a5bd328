use std::time::Duration;

use tollgate_common::BreakerSettings;

/// Tuning for a circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the circuit from closed to open.
    pub failure_threshold: u32,

    /// How long the circuit stays open before probing recovery.
    pub cooldown: Duration,

    /// Probe attempts allowed through while half-open. Reaching this many
    /// consecutive successes closes the circuit.
    pub half_open_max_probes: u32,

    /// Rolling interval after which a closed breaker forgets stale failures
    /// even without a state change.
    pub failure_reset_interval: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            half_open_max_probes: 5,
            failure_reset_interval: Duration::from_secs(10),
        }
    }
}

impl BreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_half_open_max_probes(mut self, max: u32) -> Self {
        self.half_open_max_probes = max;
        self
    }

    pub fn with_failure_reset_interval(mut self, interval: Duration) -> Self {
        self.failure_reset_interval = interval;
        self
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            cooldown: settings.cooldown(),
            half_open_max_probes: settings.half_open_max_probes,
            failure_reset_interval: settings.failure_reset_interval(),
        }
    }
}
