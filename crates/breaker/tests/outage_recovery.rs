use std::thread;
use std::time::Duration;

use tollgate_breaker::{BreakerConfig, BreakerRegistry, Permission, RejectReason};
use tollgate_common::ServiceConfig;

fn transaction_service() -> Vec<ServiceConfig> {
    vec![ServiceConfig {
        name: "transaction-service".into(),
        url: "http://127.0.0.1:9002".into(),
        timeout_secs: 10,
        circuit_breaker: true,
    }]
}

/// Full outage lifecycle: repeated transport failures trip the breaker, the
/// open circuit sheds load without touching the backend, and a clean probe
/// run after the cool-down closes it again.
#[test]
fn backend_outage_trips_then_recovers() {
    let config = BreakerConfig::default()
        .with_cooldown(Duration::from_millis(30))
        .with_failure_reset_interval(Duration::from_secs(60));
    let registry = BreakerRegistry::from_services(&transaction_service(), config);

    // Backend unreachable five times in a row.
    for _ in 0..5 {
        assert_eq!(
            registry.attempt("transaction-service"),
            Permission::Permitted
        );
        registry.report("transaction-service", false);
    }

    // The sixth attempt is rejected outright; no outbound call happens.
    assert_eq!(
        registry.attempt("transaction-service"),
        Permission::Rejected(RejectReason::Open)
    );

    // Still rejected until the cool-down elapses.
    thread::sleep(Duration::from_millis(10));
    assert_eq!(
        registry.attempt("transaction-service"),
        Permission::Rejected(RejectReason::Open)
    );

    thread::sleep(Duration::from_millis(40));

    // Backend recovered: the probe run admits exactly the configured number
    // of trial requests, and a full run of successes closes the circuit.
    for _ in 0..5 {
        assert_eq!(
            registry.attempt("transaction-service"),
            Permission::Permitted
        );
        registry.report("transaction-service", true);
    }

    let snapshot = registry.snapshot();
    assert_eq!(snapshot[0].state, "closed");
    assert_eq!(
        registry.attempt("transaction-service"),
        Permission::Permitted
    );
}

/// A flapping backend: the first probe after recovery fails and the circuit
/// re-opens with a fresh cool-down.
#[test]
fn failed_probe_reopens_the_circuit() {
    let config = BreakerConfig::default().with_cooldown(Duration::from_millis(20));
    let registry = BreakerRegistry::from_services(&transaction_service(), config);

    for _ in 0..5 {
        registry.attempt("transaction-service");
        registry.report("transaction-service", false);
    }
    thread::sleep(Duration::from_millis(30));

    assert_eq!(
        registry.attempt("transaction-service"),
        Permission::Permitted
    );
    registry.report("transaction-service", false);

    assert_eq!(
        registry.attempt("transaction-service"),
        Permission::Rejected(RejectReason::Open)
    );
}
