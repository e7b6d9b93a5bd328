pub mod config;
pub mod error;

pub use config::{
    AdminConfig, AppConfig, BreakerSettings, DependencyPolicy, LimitScope, RedisConfig,
    RouteConfig, RouteLimitConfig, SecurityConfig, ServerConfig, ServiceConfig,
};
pub use error::{GatewayError, GatewayResult};
