//! Rate limiting, request correlation and logging middleware.

use super::AppState;
use crate::error::{ApiError, PairError};
use crate::ids::new_request_id;
use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::{num::NonZeroU32, sync::Arc};
use tracing::{debug, warn};

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Address used when the caller's address is unknown.
const UNKNOWN_SOURCE: &str = "unknown";

/// Per-source rate limiter.
pub type SourceLimiter = DefaultKeyedRateLimiter<String>;

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    /// Limiter keyed by source address
    pub per_source: Arc<SourceLimiter>,
    /// Take the source address from X-Forwarded-For
    pub trust_proxy: bool,
}

impl RateLimitState {
    /// Create a new rate limit state with the specified limit.
    pub fn new(requests_per_minute: u32, trust_proxy: bool) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            per_source: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            trust_proxy,
        }
    }

    /// Create a permissive rate limiter for testing.
    pub fn permissive(trust_proxy: bool) -> Self {
        Self::new(1000, trust_proxy)
    }
}

/// Correlation id of the current request.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Assign every request an id, exposed to handlers and echoed in a header.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = new_request_id();
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Resolve the caller's address.
///
/// With `trust_proxy` the first `X-Forwarded-For` hop wins; otherwise the
/// peer address of the connection is used.
pub fn source_address(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy: bool,
) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());

        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }

    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
}

/// Extractor for the caller's address.
#[derive(Debug, Clone)]
pub struct SourceAddress(pub String);

#[async_trait]
impl FromRequestParts<AppState> for SourceAddress {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let connect_info = parts.extensions.get::<ConnectInfo<SocketAddr>>();
        Ok(SourceAddress(source_address(
            &parts.headers,
            connect_info,
            state.options.trust_proxy,
        )))
    }
}

/// Rate limiting middleware.
///
/// Checks the per-source limit and returns 429 Too Many Requests if exceeded.
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let source = source_address(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
        rate_limit.trust_proxy,
    );

    if rate_limit.per_source.check_key(&source).is_err() {
        warn!(%source, "Rate limit exceeded");
        let error = PairError::RateLimitExceeded(
            "Too many pairing requests, please try again later".to_string(),
        );
        return match request.extensions().get::<RequestId>() {
            Some(RequestId(id)) => ApiError::new(id.clone(), error).into_response(),
            None => error.into_response(),
        };
    }

    debug!(%source, "Rate limit check passed");
    next.run(request).await
}

/// Logging middleware for requests.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    // Query strings carry phone numbers and admin keys
    let path = request.uri().path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|RequestId(id)| id.clone())
        .unwrap_or_default();
    let start = std::time::Instant::now();

    debug!(%method, %path, %request_id, "Request started");

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_success() {
        debug!(%method, %path, %request_id, %status, ?duration, "Request completed");
    } else {
        warn!(%method, %path, %request_id, %status, ?duration, "Request failed");
    }

    response
}
