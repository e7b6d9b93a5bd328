//! Per-service circuit breaking for the gateway.
//!
//! One breaker guards each breaker-enabled backend. The breaker monitors
//! consecutive transport failures and stops calling a failing backend for a
//! cool-down period instead of amplifying its outage, then cautiously probes
//! recovery with a bounded number of trial requests.
//!
//! The registry is built once at startup and never mutated afterwards; each
//! breaker is its own independently-synchronized cell, so concurrent
//! requests to unrelated services never contend on a shared lock.

pub mod breaker;
pub mod config;
pub mod registry;

pub use breaker::{BreakerSnapshot, CircuitBreaker, Permission, RejectReason};
pub use config::BreakerConfig;
pub use registry::BreakerRegistry;
