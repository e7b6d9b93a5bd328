//! Startup-built registry of breaker cells.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tollgate_common::ServiceConfig;
use tracing::info;

use crate::breaker::{BreakerSnapshot, CircuitBreaker, Permission, RejectReason};
use crate::config::BreakerConfig;

/// One breaker per breaker-enabled service, looked up from an immutable map
/// built once at startup. Services without a breaker always permit attempts;
/// names that were never configured are rejected outright.
pub struct BreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    known: HashSet<String>,
}

impl BreakerRegistry {
    pub fn from_services(services: &[ServiceConfig], config: BreakerConfig) -> Self {
        let mut breakers = HashMap::new();
        let mut known = HashSet::new();

        for service in services {
            known.insert(service.name.clone());
            if service.circuit_breaker {
                info!(service = %service.name, "circuit breaker enabled");
                breakers.insert(
                    service.name.clone(),
                    Arc::new(CircuitBreaker::new(service.name.clone(), config.clone())),
                );
            }
        }

        Self { breakers, known }
    }

    /// Gate one call attempt against `service`.
    pub fn attempt(&self, service: &str) -> Permission {
        match self.breakers.get(service) {
            Some(breaker) => breaker.attempt(),
            None if self.known.contains(service) => Permission::Permitted,
            None => Permission::Rejected(RejectReason::NotConfigured),
        }
    }

    /// Record the outcome of a permitted attempt. Exactly one report must
    /// arrive per permitted attempt on a gated service; reports for ungated
    /// services are no-ops.
    pub fn report(&self, service: &str, success: bool) {
        if let Some(breaker) = self.breakers.get(service) {
            breaker.report(success);
        }
    }

    /// Whether outcomes for `service` need to be reported back.
    pub fn is_gated(&self, service: &str) -> bool {
        self.breakers.contains_key(service)
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }
}
