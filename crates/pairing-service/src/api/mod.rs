//! HTTP API for the pairing service.

mod handlers;
mod middleware;
mod types;

pub use handlers::*;
pub use middleware::{
    logging_middleware, rate_limit_middleware, request_id_middleware, source_address,
    RateLimitState, RequestId, SourceAddress,
};
pub use types::*;

use crate::pairing::PairingOrchestrator;
use crate::session::SessionRegistry;
use axum::{
    http::Method,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Request handling options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiOptions {
    /// Take the source address from X-Forwarded-For
    pub trust_proxy: bool,
    /// Include internal error details in responses
    pub expose_errors: bool,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Live session registry
    pub registry: SessionRegistry,
    /// Pairing flow driver
    pub orchestrator: Arc<PairingOrchestrator>,
    /// SHA-256 of the admin key, if admin access is enabled
    admin_key_digest: Option<[u8; 32]>,
    /// Process start, for uptime
    pub started_at: Instant,
    pub options: ApiOptions,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        orchestrator: PairingOrchestrator,
        admin_key: Option<SecretString>,
        options: ApiOptions,
    ) -> Self {
        Self {
            registry: orchestrator.registry().clone(),
            orchestrator: Arc::new(orchestrator),
            admin_key_digest: admin_key.map(|key| digest(key.expose_secret())),
            started_at: Instant::now(),
            options,
        }
    }

    /// Check a caller-supplied admin key.
    pub fn authorize(&self, key: Option<&str>) -> bool {
        match (&self.admin_key_digest, key) {
            (Some(expected), Some(provided)) => *expected == digest(provided),
            _ => false,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

fn digest(value: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(value.as_bytes()));
    out
}

/// Create the API router with the default rate limit.
pub fn create_router(state: AppState) -> Router {
    let rate_limit = RateLimitState::new(10, state.options.trust_proxy);
    create_router_with_rate_limit(state, rate_limit)
}

/// Create the API router with a custom rate limit.
pub fn create_router_with_rate_limit(state: AppState, rate_limit: RateLimitState) -> Router {
    let pairing = Router::new()
        .route("/pair", get(handlers::pair))
        .route_layer(axum_middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        // Health check (no rate limiting)
        .route("/health", get(handlers::health))
        // Admin endpoints (shared-secret gated)
        .route("/pair/stats", get(handlers::stats))
        .route("/pair/cleanup", post(handlers::cleanup))
        .merge(pairing)
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
