use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tollgate_common::{GatewayError, ServiceConfig};

/// Connection establishment bound, independent of the per-service forward
/// timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an idle pooled connection to a backend may linger before it is
/// torn down.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// A resolved backend target, built once at startup from [`ServiceConfig`]
/// and read-only afterwards.
pub struct ServiceTarget {
    pub name: String,
    /// `host:port` the connector dials.
    pub addr: String,
    pub tls: bool,
    /// SNI for TLS targets.
    pub sni: String,
    /// Host header presented to the backend.
    pub host_header: String,
    /// Bound on the forwarded exchange (read/write phases).
    pub timeout: Duration,
    pub breaker_enabled: bool,
}

impl ServiceTarget {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, GatewayError> {
        let uri: http::Uri = config.url.parse().map_err(|_| {
            GatewayError::Config(format!(
                "service '{}' has an unparseable url '{}'",
                config.name, config.url
            ))
        })?;
        let host = uri.host().ok_or_else(|| {
            GatewayError::Config(format!(
                "service '{}' url '{}' has no host",
                config.name, config.url
            ))
        })?;

        let tls = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
        let host_header = match uri.port_u16() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            name: config.name.clone(),
            addr: format!("{}:{}", host, port),
            tls,
            sni: host.to_string(),
            host_header,
            timeout: config.timeout(),
            breaker_enabled: config.circuit_breaker,
        })
    }
}

/// Immutable lookup of logical service name to backend target.
pub struct TargetRegistry {
    targets: HashMap<String, Arc<ServiceTarget>>,
}

impl TargetRegistry {
    pub fn from_services(services: &[ServiceConfig]) -> Result<Self, GatewayError> {
        let mut targets = HashMap::new();
        for service in services {
            let target = ServiceTarget::from_config(service)?;
            targets.insert(service.name.clone(), Arc::new(target));
        }
        Ok(Self { targets })
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceTarget>> {
        self.targets.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, url: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.into(),
            url: url.into(),
            timeout_secs: 5,
            circuit_breaker: true,
        }
    }

    #[test]
    fn resolves_http_target_with_explicit_port() {
        let target =
            ServiceTarget::from_config(&service("users", "http://127.0.0.1:9003")).unwrap();

        assert_eq!(target.addr, "127.0.0.1:9003");
        assert!(!target.tls);
        assert_eq!(target.host_header, "127.0.0.1:9003");
        assert_eq!(target.timeout, Duration::from_secs(5));
        assert!(target.breaker_enabled);
    }

    #[test]
    fn default_ports_follow_the_scheme() {
        let plain = ServiceTarget::from_config(&service("a", "http://backend.internal")).unwrap();
        assert_eq!(plain.addr, "backend.internal:80");
        assert_eq!(plain.host_header, "backend.internal");

        let tls = ServiceTarget::from_config(&service("b", "https://backend.internal")).unwrap();
        assert_eq!(tls.addr, "backend.internal:443");
        assert!(tls.tls);
        assert_eq!(tls.sni, "backend.internal");
    }

    #[test]
    fn rejects_url_without_host() {
        let err = ServiceTarget::from_config(&service("broken", "/just/a/path")).unwrap_err();
        assert!(err.to_string().contains("no host"));
    }

    #[test]
    fn registry_lookup_by_logical_name() {
        let registry = TargetRegistry::from_services(&[
            service("auth-service", "http://127.0.0.1:9001"),
            service("user-service", "http://127.0.0.1:9003"),
        ])
        .unwrap();

        assert!(registry.get("auth-service").is_some());
        assert!(registry.get("user-service").is_some());
        assert!(registry.get("reporting-service").is_none());
    }
}
