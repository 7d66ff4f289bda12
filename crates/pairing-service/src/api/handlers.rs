//! HTTP request handlers.

use super::middleware::{RequestId, SourceAddress};
use super::types::{
    AdminQuery, CleanupRequest, CleanupResponse, HealthResponse, MemoryStats, PairQuery,
    PairResponse, StatsResponse,
};
use super::AppState;
use crate::error::{ApiError, PairError};
use crate::ids::{hash_for_logging, new_session_id};
use crate::pairing::PairingOutcome;
use crate::phone;
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use tracing::{info, warn};

/// Page size assumed when converting resident pages to bytes.
const PAGE_SIZE: u64 = 4096;

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Issue a pairing code for a phone number.
pub async fn pair(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    SourceAddress(source): SourceAddress,
    Query(query): Query<PairQuery>,
) -> Result<Json<PairResponse>, ApiError> {
    let fail = |error: PairError| {
        ApiError::new(request_id.clone(), error).exposing_internal(state.options.expose_errors)
    };

    let phone = phone::validate(query.number.as_deref().unwrap_or_default()).map_err(|e| {
        warn!(%request_id, %source, error = %e, "Rejected phone number");
        fail(e.into())
    })?;
    let phone_digest = hash_for_logging(phone.as_str());

    info!(%request_id, %source, phone = %phone_digest, "Pairing request received");

    let session = state
        .registry
        .create(new_session_id(), phone.clone(), source.clone())
        .await
        .map_err(|e| {
            warn!(%request_id, %source, error = %e, "Session not created");
            fail(e.into())
        })?;

    match state
        .orchestrator
        .start(&phone, &session.id, &request_id)
        .await
    {
        PairingOutcome::Success { code } => {
            info!(%request_id, session_id = %session.id, phone = %phone_digest, "Pairing code returned");

            Ok(Json(PairResponse {
                request_id: request_id.clone(),
                success: true,
                message: "Pairing code generated. Enter it on your phone to link this device."
                    .to_string(),
                session_id: session.id,
                expires_in: state.registry.settings().timeout.as_secs(),
                instructions: instructions(&code),
                code,
            }))
        }
        PairingOutcome::Failure { error } => {
            warn!(%request_id, session_id = %session.id, %error, "Pairing failed");
            Err(fail(PairError::PairingFailed(error)))
        }
    }
}

fn instructions(code: &str) -> Vec<String> {
    vec![
        "Open the chat app on your phone".to_string(),
        "Go to Settings > Linked Devices".to_string(),
        "Tap \"Link a Device\"".to_string(),
        "Choose \"Link with phone number instead\"".to_string(),
        format!("Enter the code {}", code),
    ]
}

/// Session statistics for operators.
pub async fn stats(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<AdminQuery>,
) -> Result<Json<StatsResponse>, ApiError> {
    if !state.authorize(query.key.as_deref()) {
        warn!(%request_id, "Stats request with invalid admin key");
        return Err(ApiError::new(request_id, PairError::Forbidden));
    }

    Ok(Json(StatsResponse {
        uptime: state.uptime_secs(),
        memory: MemoryStats {
            rss_bytes: resident_memory_bytes().await,
        },
        sessions: state.registry.stats().await,
        request_id,
    }))
}

/// Manually clean up a session.
pub async fn cleanup(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<AdminQuery>,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<CleanupResponse>, ApiError> {
    if !state.authorize(query.key.as_deref()) {
        warn!(%request_id, "Cleanup request with invalid admin key");
        return Err(ApiError::new(request_id, PairError::Forbidden));
    }

    let request = body.map(|Json(request)| request).unwrap_or_default();
    let Some(session_id) = request.session_id.filter(|id| !id.is_empty()) else {
        return Ok(Json(CleanupResponse {
            request_id,
            success: false,
            session_id: None,
            cleaned: false,
            message: "Provide {\"sessionId\": \"...\"} in the request body".to_string(),
        }));
    };

    let cleaned = state.registry.cleanup(&session_id).await;
    info!(%request_id, %session_id, cleaned, "Manual cleanup");

    let message = if cleaned {
        "Session cleaned up".to_string()
    } else {
        "No live session with that id".to_string()
    };

    Ok(Json(CleanupResponse {
        request_id,
        success: true,
        session_id: Some(session_id),
        cleaned,
        message,
    }))
}

/// Resident set size from /proc, where available.
async fn resident_memory_bytes() -> Option<u64> {
    let statm = tokio::fs::read_to_string("/proc/self/statm").await.ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * PAGE_SIZE)
}
