mod context;
mod rewrite;
mod service;
mod upstream;

use anyhow::Result;
use pingora_core::server::Server;
use pingora_proxy::http_proxy_service;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use tollgate_common::AppConfig;

use crate::service::TollgateProxy;

fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    // Parse command-line args for config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/tollgate.yaml".to_string());

    info!(config_path = %config_path, "starting tollgate API gateway");

    // Load configuration
    let config = AppConfig::load(&config_path)?;

    // Create Pingora server
    let mut server = Server::new(None)?;
    server.bootstrap();

    // Create the gateway proxy service. Redis connects lazily on first use,
    // so an unavailable counting store degrades checks instead of failing
    // startup.
    let proxy = TollgateProxy::new(config.clone())?;
    let admin_state = proxy.state.clone();

    let mut proxy_service = http_proxy_service(&server.configuration, proxy);

    // Add listeners from config
    for listen_addr in &config.server.listen {
        info!(addr = %listen_addr, "adding listener");
        proxy_service.add_tcp(listen_addr);
    }

    server.add_service(proxy_service);

    // Launch admin API in background
    let admin_listen = config.server.admin.listen.clone();

    server.add_service(pingora_core::services::background::background_service(
        "admin API",
        AdminBackgroundService {
            listen_addr: admin_listen,
            state: admin_state,
        },
    ));

    info!("tollgate started successfully");
    server.run_forever();
}

/// Background service to run the admin API alongside Pingora.
struct AdminBackgroundService {
    listen_addr: String,
    state: tollgate_admin::SharedStateType,
}

#[async_trait::async_trait]
impl pingora_core::services::background::BackgroundService for AdminBackgroundService {
    async fn start(&self, mut shutdown: pingora_core::server::ShutdownWatch) {
        info!(addr = %self.listen_addr, "starting admin API");

        tokio::select! {
            result = tollgate_admin::run_admin_server(self.state.clone(), &self.listen_addr) => {
                if let Err(e) = result {
                    error!(error = %e, "admin API server error");
                }
            }
            _ = shutdown.changed() => {
                info!("admin API shutting down");
            }
        }
    }
}
