//! Pairing Service - Entry point.

use pairing_service::{
    api::{create_router_with_rate_limit, ApiOptions, AppState, RateLimitState},
    config::Config,
    link::{GatewayClient, LinkClient},
    pairing::PairingOrchestrator,
    session::SessionRegistry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let json = config.log.format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Pairing Service");

    // Initialize protocol gateway client
    let gateway = match GatewayClient::new(
        &config.gateway.url,
        config.gateway.timeout,
        config.gateway.poll_interval,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create gateway client: {}", e);
            std::process::exit(1);
        }
    };

    if !gateway.health_check().await {
        warn!(url = %config.gateway.url, "Protocol gateway is not healthy yet");
    }

    let link: Arc<dyn LinkClient> = Arc::new(gateway);

    // Create registry and orchestrator
    let registry = SessionRegistry::new(link.clone(), config.registry_settings());
    let orchestrator =
        PairingOrchestrator::new(registry.clone(), link, config.pairing_settings());

    if config.admin.key.is_none() {
        info!("ADMIN__KEY not set, admin endpoints are disabled");
    }

    let options = ApiOptions {
        trust_proxy: config.server.trust_proxy,
        expose_errors: config.server.expose_errors,
    };
    let state = AppState::new(orchestrator, config.admin.key.clone(), options);

    // Create rate limiter from config
    let rate_limit = RateLimitState::new(
        config.rate_limit.per_source_per_minute,
        config.server.trust_proxy,
    );

    // Create router with rate limiting
    let app = create_router_with_rate_limit(state, rate_limit);

    // Bind to address
    let addr = match config.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Listening on {} (session timeout {:?}, {} sessions per source)",
        addr, config.session.timeout, config.session.max_per_source
    );

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    // Run server
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    let cleaned = registry.shutdown().await;
    info!("Cleaned up {} live sessions on shutdown", cleaned);

    if let Err(e) = served {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
