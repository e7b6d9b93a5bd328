use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub security: SecurityConfig,
    pub services: Vec<ServiceConfig>,
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub breaker: BreakerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: Vec<String>,
    /// Path prefix stripped from every request before it is forwarded.
    #[serde(default = "default_routing_prefix")]
    pub routing_prefix: String,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listen")]
    pub listen: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen: default_admin_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    /// What to do when the revocation blacklist cannot be consulted.
    #[serde(default = "default_dependency_policy")]
    pub blacklist_check: DependencyPolicy,
}

/// A logical backend service the gateway forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_service_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub circuit_breaker: bool,
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A route group: which checks apply to requests under a path prefix, and
/// which backend receives them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub path_prefix: String,
    pub service: String,
    #[serde(default = "default_true")]
    pub auth: bool,
    #[serde(default)]
    pub rate_limit: Option<RouteLimitConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteLimitConfig {
    #[serde(default = "default_limit_scope")]
    pub scope: LimitScope,
    pub quota: u32,
    pub window_secs: u64,
    #[serde(default = "default_dependency_policy")]
    pub on_store_error: DependencyPolicy,
}

impl RouteLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// How a rate-limit key is scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    /// Keyed by client network address. Used for public endpoints.
    Ip,
    /// Keyed by authenticated subject, falling back to the client address
    /// when no identity is attached.
    Identity,
}

/// Behavior of a check when the dependency backing it is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    FailOpen,
    FailClosed,
}

impl DependencyPolicy {
    pub fn allows(&self) -> bool {
        matches!(self, Self::FailOpen)
    }
}

/// Circuit breaker tuning, shared by every breaker-enabled service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_probes")]
    pub half_open_max_probes: u32,
    #[serde(default = "default_reset_interval")]
    pub failure_reset_interval_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
            half_open_max_probes: default_max_probes(),
            failure_reset_interval_secs: default_reset_interval(),
        }
    }
}

impl BreakerSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn failure_reset_interval(&self) -> Duration {
        Duration::from_secs(self.failure_reset_interval_secs)
    }
}

// Default value helpers
fn default_routing_prefix() -> String {
    "/api".to_string()
}
fn default_admin_listen() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_key_prefix() -> String {
    "tollgate".to_string()
}
fn default_service_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_limit_scope() -> LimitScope {
    LimitScope::Identity
}
fn default_dependency_policy() -> DependencyPolicy {
    DependencyPolicy::FailOpen
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown() -> u64 {
    30
}
fn default_max_probes() -> u32 {
    5
}
fn default_reset_interval() -> u64 {
    10
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> GatewayResult<Self> {
        tracing::info!(path = path, "loading configuration");
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.server.listen.is_empty() {
            return Err(GatewayError::Config(
                "server.listen must have at least one address".into(),
            ));
        }

        for (i, service) in self.services.iter().enumerate() {
            if self.services[..i].iter().any(|s| s.name == service.name) {
                return Err(GatewayError::Config(format!(
                    "duplicate service name '{}'",
                    service.name
                )));
            }
            let uri: http::Uri = service.url.parse().map_err(|_| {
                GatewayError::Config(format!(
                    "service '{}' has an unparseable url '{}'",
                    service.name, service.url
                ))
            })?;
            if uri.host().is_none() {
                return Err(GatewayError::Config(format!(
                    "service '{}' url '{}' has no host",
                    service.name, service.url
                )));
            }
            if service.timeout_secs == 0 {
                return Err(GatewayError::Config(format!(
                    "service '{}' timeout must be non-zero",
                    service.name
                )));
            }
        }

        for route in &self.routes {
            let service_exists = self.services.iter().any(|s| s.name == route.service);
            if !service_exists {
                return Err(GatewayError::Config(format!(
                    "route '{}' references unknown service '{}'",
                    route.path_prefix, route.service
                )));
            }
            if let Some(ref limit) = route.rate_limit {
                if limit.quota == 0 || limit.window_secs == 0 {
                    return Err(GatewayError::Config(format!(
                        "route '{}' rate limit quota and window must be non-zero",
                        route.path_prefix
                    )));
                }
            }
        }

        if self.routes.iter().any(|r| r.auth) && self.security.jwt_secret.is_empty() {
            return Err(GatewayError::Config(
                "security.jwt_secret must be set when any route requires auth".into(),
            ));
        }

        if self.breaker.failure_threshold == 0 || self.breaker.half_open_max_probes == 0 {
            return Err(GatewayError::Config(
                "breaker thresholds must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
server:
  listen: ["0.0.0.0:8080"]
security:
  jwt_secret: "test-secret"
services:
  - name: auth-service
    url: http://127.0.0.1:9001
  - name: transaction-service
    url: http://127.0.0.1:9002
    timeout_secs: 5
    circuit_breaker: true
routes:
  - path_prefix: /api/auth
    service: auth-service
    auth: false
    rate_limit:
      scope: ip
      quota: 5
      window_secs: 60
  - path_prefix: /api/transfers
    service: transaction-service
    rate_limit:
      quota: 100
      window_secs: 3600
"#;

    #[test]
    fn parses_sample_config() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.routing_prefix, "/api");
        assert_eq!(config.services.len(), 2);
        assert!(config.services[1].circuit_breaker);
        assert_eq!(config.services[1].timeout(), Duration::from_secs(5));

        let auth_route = &config.routes[0];
        assert!(!auth_route.auth);
        let limit = auth_route.rate_limit.as_ref().unwrap();
        assert_eq!(limit.scope, LimitScope::Ip);
        assert_eq!(limit.quota, 5);

        // Defaults: identity scope, auth on, fail-open.
        let transfer_route = &config.routes[1];
        assert!(transfer_route.auth);
        let limit = transfer_route.rate_limit.as_ref().unwrap();
        assert_eq!(limit.scope, LimitScope::Identity);
        assert_eq!(limit.on_store_error, DependencyPolicy::FailOpen);
    }

    #[test]
    fn rejects_unknown_service_reference() {
        let mut config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.routes[0].service = "missing-service".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown service"));
    }

    #[test]
    fn rejects_zero_quota() {
        let mut config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.routes[0].rate_limit.as_mut().unwrap().quota = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_jwt_secret() {
        let mut config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.security.jwt_secret = String::new();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("jwt_secret"));
    }

    #[test]
    fn rejects_unparseable_service_url() {
        let mut config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.services[0].url = "not a url".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn breaker_defaults() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown(), Duration::from_secs(30));
        assert_eq!(config.breaker.half_open_max_probes, 5);
        assert_eq!(
            config.breaker.failure_reset_interval(),
            Duration::from_secs(10)
        );
    }
}
