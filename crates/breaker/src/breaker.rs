//! The breaker state machine.

use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::BreakerConfig;

/// Breaker state for a single service.
///
/// - **Closed**: attempts pass through; consecutive failures are counted.
/// - **Open**: attempts are rejected without touching the backend until the
///   cool-down elapses.
/// - **HalfOpen**: a bounded number of probes pass through; one failure
///   re-opens the circuit, a full run of successes closes it.
#[derive(Debug, Clone)]
enum State {
    Closed {
        failure_count: u32,
        window_started: Instant,
    },
    Open {
        until: Instant,
    },
    HalfOpen {
        probe_count: u32,
        success_count: u32,
    },
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Closed { .. } => "closed",
            Self::Open { .. } => "open",
            Self::HalfOpen { .. } => "half_open",
        }
    }
}

/// Whether a call attempt may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    Permitted,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The circuit is open (or all half-open probe slots are taken).
    Open,
    /// No such service is registered.
    NotConfigured,
}

/// Read-only view of a breaker, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: &'static str,
    pub consecutive_failures: u32,
    pub half_open_probes: u32,
}

/// One breaker cell. All accounting happens under a single mutex, held only
/// for the few instructions of a state transition.
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            state: Mutex::new(State::Closed {
                failure_count: 0,
                window_started: Instant::now(),
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Ask permission for one call attempt.
    ///
    /// Every `Permitted` must be matched by exactly one
    /// [`report`](Self::report); a dropped report corrupts the failure and
    /// probe accounting.
    pub fn attempt(&self) -> Permission {
        let mut state = self.lock();
        let now = Instant::now();

        match &*state {
            State::Closed {
                failure_count,
                window_started,
            } => {
                // Rolling interval: forget stale failures even without a
                // state change, so a slow trickle of old errors can never
                // accumulate into a trip.
                if *failure_count > 0
                    && now.duration_since(*window_started) >= self.config.failure_reset_interval
                {
                    *state = State::Closed {
                        failure_count: 0,
                        window_started: now,
                    };
                }
                Permission::Permitted
            }

            State::Open { until } => {
                if now >= *until {
                    self.log_transition("open", "half_open");
                    // This attempt is the first probe.
                    *state = State::HalfOpen {
                        probe_count: 1,
                        success_count: 0,
                    };
                    Permission::Permitted
                } else {
                    Permission::Rejected(RejectReason::Open)
                }
            }

            State::HalfOpen {
                probe_count,
                success_count,
            } => {
                if *probe_count < self.config.half_open_max_probes {
                    *state = State::HalfOpen {
                        probe_count: probe_count + 1,
                        success_count: *success_count,
                    };
                    Permission::Permitted
                } else {
                    Permission::Rejected(RejectReason::Open)
                }
            }
        }
    }

    /// Record the outcome of a permitted attempt.
    pub fn report(&self, success: bool) {
        let mut state = self.lock();
        let now = Instant::now();

        match (&*state, success) {
            (State::Closed { .. }, true) => {
                // Any success resets the consecutive-failure count.
                *state = State::Closed {
                    failure_count: 0,
                    window_started: now,
                };
            }

            (
                State::Closed {
                    failure_count,
                    window_started,
                },
                false,
            ) => {
                let (count, started) =
                    if now.duration_since(*window_started) >= self.config.failure_reset_interval {
                        (0, now)
                    } else {
                        (*failure_count, *window_started)
                    };
                let count = count + 1;
                if count >= self.config.failure_threshold {
                    self.log_transition("closed", "open");
                    *state = State::Open {
                        until: now + self.config.cooldown,
                    };
                } else {
                    *state = State::Closed {
                        failure_count: count,
                        window_started: started,
                    };
                }
            }

            (State::HalfOpen { .. }, false) => {
                // One failed probe is enough; back to open with a fresh
                // cool-down.
                self.log_transition("half_open", "open");
                *state = State::Open {
                    until: now + self.config.cooldown,
                };
            }

            (
                State::HalfOpen {
                    probe_count,
                    success_count,
                },
                true,
            ) => {
                let successes = success_count + 1;
                if successes >= self.config.half_open_max_probes {
                    self.log_transition("half_open", "closed");
                    *state = State::Closed {
                        failure_count: 0,
                        window_started: now,
                    };
                } else {
                    *state = State::HalfOpen {
                        probe_count: *probe_count,
                        success_count: successes,
                    };
                }
            }

            (State::Open { .. }, _) => {
                // A probe's report raced a re-open from another probe; the
                // circuit has already made its decision.
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        let (failures, probes) = match &*state {
            State::Closed { failure_count, .. } => (*failure_count, 0),
            State::Open { .. } => (0, 0),
            State::HalfOpen { probe_count, .. } => (0, *probe_count),
        };
        BreakerSnapshot {
            service: self.service.clone(),
            state: state.name(),
            consecutive_failures: failures,
            half_open_probes: probes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log_transition(&self, from: &'static str, to: &'static str) {
        info!(service = %self.service, from, to, "circuit breaker state changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn quick_config() -> BreakerConfig {
        // Short cool-down so tests can wait it out; reset interval long
        // enough that it cannot fire mid-test on a slow machine.
        BreakerConfig::new()
            .with_cooldown(Duration::from_millis(20))
            .with_failure_reset_interval(Duration::from_secs(60))
    }

    fn permitted(breaker: &CircuitBreaker) -> bool {
        breaker.attempt() == Permission::Permitted
    }

    /// Drive one permitted attempt to its reported outcome.
    fn round(breaker: &CircuitBreaker, success: bool) {
        assert!(permitted(breaker), "attempt should be permitted");
        breaker.report(success);
    }

    #[test]
    fn five_consecutive_failures_open_the_circuit() {
        let breaker = CircuitBreaker::new("transaction-service", quick_config());

        for _ in 0..4 {
            round(&breaker, false);
            assert_eq!(breaker.snapshot().state, "closed");
        }
        round(&breaker, false);

        assert_eq!(breaker.snapshot().state, "open");
        assert_eq!(breaker.attempt(), Permission::Rejected(RejectReason::Open));
    }

    #[test]
    fn intervening_success_resets_the_failure_count() {
        let breaker = CircuitBreaker::new("svc", quick_config());

        for _ in 0..4 {
            round(&breaker, false);
        }
        round(&breaker, true);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);

        // Four more failures still do not trip it.
        for _ in 0..4 {
            round(&breaker, false);
        }
        assert_eq!(breaker.snapshot().state, "closed");

        round(&breaker, false);
        assert_eq!(breaker.snapshot().state, "open");
    }

    #[test]
    fn open_rejects_until_cooldown_then_half_opens() {
        let breaker = CircuitBreaker::new("svc", quick_config());
        for _ in 0..5 {
            round(&breaker, false);
        }

        assert_eq!(breaker.attempt(), Permission::Rejected(RejectReason::Open));

        thread::sleep(Duration::from_millis(30));

        // First attempt after the cool-down is permitted as probe #1.
        assert!(permitted(&breaker));
        assert_eq!(breaker.snapshot().state, "half_open");
        assert_eq!(breaker.snapshot().half_open_probes, 1);
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_cooldown() {
        let breaker = CircuitBreaker::new("svc", quick_config());
        for _ in 0..5 {
            round(&breaker, false);
        }
        thread::sleep(Duration::from_millis(30));

        assert!(permitted(&breaker));
        breaker.report(false);

        assert_eq!(breaker.snapshot().state, "open");
        assert_eq!(breaker.attempt(), Permission::Rejected(RejectReason::Open));
    }

    #[test]
    fn half_open_closes_after_full_probe_run() {
        let breaker = CircuitBreaker::new("svc", quick_config());
        for _ in 0..5 {
            round(&breaker, false);
        }
        thread::sleep(Duration::from_millis(30));

        for _ in 0..5 {
            assert!(permitted(&breaker));
            breaker.report(true);
        }

        assert_eq!(breaker.snapshot().state, "closed");
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn half_open_probe_slots_are_bounded() {
        let breaker = CircuitBreaker::new("svc", quick_config());
        for _ in 0..5 {
            round(&breaker, false);
        }
        thread::sleep(Duration::from_millis(30));

        // Five probes may be in flight before any outcome lands.
        for _ in 0..5 {
            assert!(permitted(&breaker));
        }
        assert_eq!(breaker.attempt(), Permission::Rejected(RejectReason::Open));

        // An outcome frees no extra slot: the run is five probes total.
        breaker.report(true);
        assert_eq!(breaker.attempt(), Permission::Rejected(RejectReason::Open));
    }

    #[test]
    fn probe_slots_do_not_oversubscribe_under_concurrency() {
        let breaker = CircuitBreaker::new("svc", quick_config());
        for _ in 0..5 {
            round(&breaker, false);
        }
        thread::sleep(Duration::from_millis(30));

        let permitted_count = std::sync::atomic::AtomicU32::new(0);
        thread::scope(|s| {
            for _ in 0..20 {
                s.spawn(|| {
                    if breaker.attempt() == Permission::Permitted {
                        permitted_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(
            permitted_count.load(std::sync::atomic::Ordering::SeqCst),
            5,
            "exactly the probe limit may pass"
        );
    }

    #[test]
    fn rolling_interval_forgets_stale_failures() {
        let breaker = CircuitBreaker::new(
            "svc",
            quick_config().with_failure_reset_interval(Duration::from_millis(10)),
        );

        for _ in 0..4 {
            round(&breaker, false);
        }
        thread::sleep(Duration::from_millis(15));

        // The stale failures have aged out; this one starts a new count.
        round(&breaker, false);
        assert_eq!(breaker.snapshot().state, "closed");
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn late_report_after_reopen_is_ignored() {
        let breaker = CircuitBreaker::new("svc", quick_config());
        for _ in 0..5 {
            round(&breaker, false);
        }
        thread::sleep(Duration::from_millis(30));

        // Two probes in flight; the first fails and re-opens the circuit.
        assert!(permitted(&breaker));
        assert!(permitted(&breaker));
        breaker.report(false);
        assert_eq!(breaker.snapshot().state, "open");

        // The second probe's success arrives too late to matter.
        breaker.report(true);
        assert_eq!(breaker.snapshot().state, "open");
    }
}
