use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use pingora_core::prelude::*;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{FailToProxy, ProxyHttp, Session};
use serde_json::json;
use std::sync::Arc;
use tollgate_admin::SharedStateType;
use tollgate_auth::TokenVerifier;
use tollgate_breaker::{BreakerConfig, BreakerRegistry, Permission, RejectReason};
use tollgate_common::{AppConfig, LimitScope, RouteConfig};
use tollgate_counter::{CountingStore, RedisStore};
use tollgate_rate_limit::{Decision, FixedWindowLimiter, LimitKey, LimitPolicy};
use tracing::{debug, error, warn};

use crate::context::{BlockReason, RequestContext};
use crate::rewrite::rewrite_path;
use crate::upstream::{TargetRegistry, CONNECT_TIMEOUT, IDLE_TIMEOUT};

/// The admission-and-forwarding pipeline.
///
/// Checks run strictly in order for every request: auth gate, rate limiter,
/// circuit breaker, forward. A deny at any stage writes that stage's
/// response and short-circuits the rest; no backend call happens unless both
/// the limiter and the breaker permit it.
pub struct TollgateProxy {
    pub state: SharedStateType,
    pub targets: TargetRegistry,
    pub limiter: FixedWindowLimiter,
    pub verifier: TokenVerifier,
}

impl TollgateProxy {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn CountingStore> = Arc::new(RedisStore::new(&config.redis)?);

        let limiter = FixedWindowLimiter::new(store.clone());
        let verifier = TokenVerifier::new(
            &config.security.jwt_secret,
            store,
            config.security.blacklist_check,
        );
        let breakers = Arc::new(BreakerRegistry::from_services(
            &config.services,
            BreakerConfig::from(&config.breaker),
        ));
        let targets = TargetRegistry::from_services(&config.services)?;
        let state = tollgate_admin::new_shared_state(config, breakers);

        Ok(Self {
            state,
            targets,
            limiter,
            verifier,
        })
    }

    fn find_route(&self, path: &str) -> Option<usize> {
        self.state
            .config
            .routes
            .iter()
            .position(|route| path.starts_with(&route.path_prefix))
    }

    fn route(&self, index: usize) -> &RouteConfig {
        &self.state.config.routes[index]
    }
}

/// Write a JSON response and end the exchange.
async fn respond_json(
    session: &mut Session,
    code: StatusCode,
    body: serde_json::Value,
    headers: &[(&'static str, String)],
) -> Result<()> {
    let mut resp = ResponseHeader::build(code, Some(4)).unwrap();
    resp.insert_header("content-type", "application/json").unwrap();
    for (name, value) in headers {
        resp.insert_header(*name, value.as_str()).unwrap();
    }
    session.set_keepalive(None);
    session.write_response_header(Box::new(resp), false).await?;
    session
        .write_response_body(Some(Bytes::from(body.to_string())), true)
        .await?;
    Ok(())
}

#[async_trait]
impl ProxyHttp for TollgateProxy {
    type CTX = RequestContext;

    fn new_ctx(&self) -> Self::CTX {
        RequestContext::new()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        self.state.metrics.requests_total.inc();

        let header = session.req_header();
        ctx.method = header.method.as_str().to_string();
        ctx.path = header.uri.path().to_string();

        // Client IP from X-Forwarded-For or the socket address.
        ctx.client_ip = header
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| {
                session
                    .client_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_default()
            });
        if let Some((ip, _port)) = ctx.client_ip.rsplit_once(':') {
            if !ctx.client_ip.starts_with('[') && ctx.client_ip.contains('.') {
                ctx.client_ip = ip.to_string();
            }
        }

        // Liveness probe, before and independent of the pipeline.
        if ctx.method == "GET" && ctx.path == "/health" {
            ctx.response_status = 200;
            respond_json(session, StatusCode::OK, json!({"status": "UP"}), &[]).await?;
            return Ok(true);
        }

        let path = ctx.path.clone();
        let Some(route_index) = self.find_route(&path) else {
            ctx.block_reason = Some(BlockReason::NoRoute);
            ctx.response_status = 404;
            respond_json(
                session,
                StatusCode::NOT_FOUND,
                json!({"error": "Route not found"}),
                &[],
            )
            .await?;
            return Ok(true);
        };
        ctx.route_index = Some(route_index);

        // 1. Authentication gate
        if self.route(route_index).auth {
            let authorization = session
                .req_header()
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            match self.verifier.verify(authorization.as_deref()).await {
                Ok(identity) => ctx.identity = Some(identity),
                Err(e) => {
                    warn!(client_ip = %ctx.client_ip, path = %path, error = %e, "request rejected by auth gate");
                    ctx.block_reason = Some(BlockReason::Unauthorized);
                    ctx.response_status = 401;
                    self.state.metrics.requests_unauthorized.inc();
                    respond_json(
                        session,
                        StatusCode::UNAUTHORIZED,
                        json!({"error": e.to_string()}),
                        &[],
                    )
                    .await?;
                    return Ok(true);
                }
            }
        }

        // 2. Rate limiting
        if let Some(limit_config) = self.route(route_index).rate_limit.clone() {
            // Identity scoping falls back to the client address when no
            // identity is attached (public routes, or auth disabled).
            let value = match limit_config.scope {
                LimitScope::Ip => ctx.client_ip.clone(),
                LimitScope::Identity => ctx
                    .identity
                    .as_ref()
                    .map(|id| id.subject.clone())
                    .unwrap_or_else(|| ctx.client_ip.clone()),
            };
            let key = LimitKey::new(
                limit_config.scope,
                &value,
                &self.route(route_index).path_prefix,
            );
            let policy = LimitPolicy::new(limit_config.quota, limit_config.window());

            let decision = self.limiter.check(&key, &policy).await;
            let denial = match decision {
                Decision::Allow { limit, remaining } => {
                    ctx.rate_limit = Some((limit, remaining));
                    None
                }
                Decision::Deny { limit, retry_after } => Some((limit, retry_after)),
                Decision::StoreUnavailable => {
                    if limit_config.on_store_error.allows() {
                        // Fail open: quota enforcement degrades, the request
                        // proceeds. The store error is already logged.
                        None
                    } else {
                        Some((limit_config.quota, limit_config.window()))
                    }
                }
            };

            if let Some((limit, retry_after)) = denial {
                ctx.block_reason = Some(BlockReason::RateLimited);
                ctx.response_status = 429;
                self.state.metrics.requests_rate_limited.inc();
                let retry_secs = retry_after.as_secs().max(1);
                respond_json(
                    session,
                    StatusCode::TOO_MANY_REQUESTS,
                    json!({"error": "Rate limit exceeded", "retry_after": retry_secs}),
                    &[
                        ("x-ratelimit-limit", limit.to_string()),
                        ("x-ratelimit-remaining", "0".to_string()),
                        ("retry-after", retry_secs.to_string()),
                    ],
                )
                .await?;
                return Ok(true);
            }
        }

        // 3. Backend target and circuit breaker
        let service = self.route(route_index).service.clone();
        let Some(target) = self.targets.get(&service) else {
            // Fails closed immediately, without consulting any breaker.
            error!(service = %service, "service configuration not found");
            ctx.block_reason = Some(BlockReason::NotConfigured);
            ctx.response_status = 503;
            respond_json(
                session,
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": "Service not configured"}),
                &ctx.rate_limit_headers(),
            )
            .await?;
            return Ok(true);
        };
        ctx.target = Some(target);

        match self.state.breakers.attempt(&service) {
            Permission::Permitted => {
                if self.state.breakers.is_gated(&service) {
                    ctx.breaker_permit = Some(service);
                }
            }
            Permission::Rejected(reason) => {
                warn!(service = %service, reason = ?reason, "circuit breaker rejected attempt");
                ctx.block_reason = Some(BlockReason::BreakerOpen);
                ctx.response_status = 503;
                self.state.metrics.requests_breaker_rejected.inc();
                let body = match reason {
                    RejectReason::Open => {
                        json!({"error": "Service temporarily unavailable", "service": service})
                    }
                    RejectReason::NotConfigured => json!({"error": "Service not configured"}),
                };
                respond_json(
                    session,
                    StatusCode::SERVICE_UNAVAILABLE,
                    body,
                    &ctx.rate_limit_headers(),
                )
                .await?;
                return Ok(true);
            }
        }

        Ok(false) // continue to upstream
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let target = ctx
            .target
            .clone()
            .ok_or_else(|| Error::new(ErrorType::ConnectProxyFailure))?;

        debug!(service = %target.name, addr = %target.addr, "selected upstream peer");

        let mut peer = HttpPeer::new(target.addr.as_str(), target.tls, target.sni.clone());
        peer.options.connection_timeout = Some(CONNECT_TIMEOUT);
        peer.options.total_connection_timeout = Some(target.timeout);
        peer.options.read_timeout = Some(target.timeout);
        peer.options.write_timeout = Some(target.timeout);
        peer.options.idle_timeout = Some(IDLE_TIMEOUT);
        Ok(Box::new(peer))
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        // Strip the routing prefix. An inbound X-Request-ID rides through
        // untouched with the rest of the headers.
        let original = upstream_request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();
        let rewritten = rewrite_path(&original, &self.state.config.server.routing_prefix);
        if rewritten != original {
            if let Ok(uri) = rewritten.parse::<http::Uri>() {
                upstream_request.set_uri(uri);
            }
        }

        if let Some(ref target) = ctx.target {
            upstream_request
                .insert_header("host", target.host_header.as_str())
                .unwrap();
        }

        // Trust boundary: the backend receives the verified subject, never
        // the raw token mechanics.
        if let Some(ref identity) = ctx.identity {
            if upstream_request
                .insert_header("x-user-id", identity.subject.as_str())
                .is_err()
            {
                warn!(subject = %identity.subject, "identity subject not header-safe, dropped");
            }
        }

        Ok(())
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()>
    where
        Self::CTX: Send + Sync,
    {
        ctx.response_status = upstream_response.status.as_u16();

        if let Some((limit, remaining)) = ctx.rate_limit {
            upstream_response
                .insert_header("x-ratelimit-limit", limit.to_string())
                .unwrap();
            upstream_response
                .insert_header("x-ratelimit-remaining", remaining.to_string())
                .unwrap();
        }

        Ok(())
    }

    async fn fail_to_proxy(
        &self,
        session: &mut Session,
        e: &Error,
        ctx: &mut Self::CTX,
    ) -> FailToProxy
    where
        Self::CTX: Send + Sync,
    {
        // Transport-level failure talking to the backend: connection refused,
        // timeout, DNS, TLS. The caller gets one uniform shape with the
        // logical name only; the raw error stays in the logs.
        let service = ctx
            .target
            .as_ref()
            .map(|t| t.name.clone())
            .unwrap_or_default();

        let code = match e.etype() {
            ErrorType::HTTPStatus(code) => *code,
            // Everything else that survives admission and still fails is a
            // transport-level problem talking to the backend.
            _ => 503,
        };
        error!(service = %service, error = %e, "proxy forwarding error");
        ctx.response_status = code;

        let body = if code == 503 && !service.is_empty() {
            self.state.metrics.upstream_failures.inc();
            json!({"error": "Service temporarily unavailable", "service": service})
        } else {
            json!({"error": "Service Unavailable"})
        };

        if let Ok(status) = StatusCode::from_u16(code) {
            let _ = respond_json(session, status, body, &ctx.rate_limit_headers()).await;
        }

        FailToProxy {
            error_code: code,
            can_reuse_downstream: false,
        }
    }

    async fn logging(
        &self,
        _session: &mut Session,
        error: Option<&pingora_core::Error>,
        ctx: &mut Self::CTX,
    ) {
        // The single report point for a permitted breaker attempt: exactly
        // one outcome per permit. Any HTTP status from the backend is a
        // business response and counts as success; an error recorded for the
        // exchange means the backend was never reached or broke mid-flight.
        if let Some(service) = ctx.breaker_permit.take() {
            self.state.breakers.report(&service, error.is_none());
        }

        let duration = ctx.request_start.elapsed();
        let service_label = ctx
            .target
            .as_ref()
            .map(|t| t.name.as_str())
            .unwrap_or("unknown");
        self.state
            .metrics
            .request_duration
            .with_label_values(&[service_label])
            .observe(duration.as_secs_f64());

        let blocked = ctx.block_reason.is_some();
        tracing::info!(
            client_ip = %ctx.client_ip,
            method = %ctx.method,
            uri = %ctx.path,
            status = ctx.response_status,
            duration_ms = duration.as_millis() as u64,
            blocked,
            block_reason = ?ctx.block_reason,
            "request completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_common::{
        AdminConfig, BreakerSettings, DependencyPolicy, RedisConfig, RouteLimitConfig,
        SecurityConfig, ServerConfig, ServiceConfig,
    };

    fn test_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                listen: vec!["127.0.0.1:8080".into()],
                routing_prefix: "/api".into(),
                admin: AdminConfig::default(),
            },
            redis: RedisConfig::default(),
            security: SecurityConfig {
                jwt_secret: "secret".into(),
                blacklist_check: DependencyPolicy::FailOpen,
            },
            services: vec![
                ServiceConfig {
                    name: "auth-service".into(),
                    url: "http://127.0.0.1:9001".into(),
                    timeout_secs: 10,
                    circuit_breaker: false,
                },
                ServiceConfig {
                    name: "transaction-service".into(),
                    url: "http://127.0.0.1:9002".into(),
                    timeout_secs: 10,
                    circuit_breaker: true,
                },
            ],
            routes: vec![
                RouteConfig {
                    path_prefix: "/api/auth".into(),
                    service: "auth-service".into(),
                    auth: false,
                    rate_limit: Some(RouteLimitConfig {
                        scope: LimitScope::Ip,
                        quota: 5,
                        window_secs: 60,
                        on_store_error: DependencyPolicy::FailOpen,
                    }),
                },
                RouteConfig {
                    path_prefix: "/api/transfers".into(),
                    service: "transaction-service".into(),
                    auth: true,
                    rate_limit: None,
                },
            ],
            breaker: BreakerSettings::default(),
        }
    }

    #[test]
    fn route_matching_is_first_match_by_prefix() {
        let proxy = TollgateProxy::new(test_config()).unwrap();

        assert_eq!(proxy.find_route("/api/auth/login"), Some(0));
        assert_eq!(proxy.find_route("/api/transfers/123"), Some(1));
        assert_eq!(proxy.find_route("/api/unknown"), None);
        assert_eq!(proxy.find_route("/other"), None);
    }

    #[test]
    fn targets_resolve_for_every_route() {
        let proxy = TollgateProxy::new(test_config()).unwrap();

        for route in &proxy.state.config.routes {
            assert!(
                proxy.targets.get(&route.service).is_some(),
                "route '{}' must resolve its target",
                route.path_prefix
            );
        }
    }

    #[test]
    fn breaker_gates_only_enabled_services() {
        let proxy = TollgateProxy::new(test_config()).unwrap();

        assert!(proxy.state.breakers.is_gated("transaction-service"));
        assert!(!proxy.state.breakers.is_gated("auth-service"));
    }
}
