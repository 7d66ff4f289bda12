//! API request and response types.

use crate::session::RegistryStats;
use serde::{Deserialize, Serialize};

/// Query of a pairing request.
#[derive(Debug, Deserialize)]
pub struct PairQuery {
    /// Phone number in any common formatting
    pub number: Option<String>,
}

/// Response after a pairing code was issued.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairResponse {
    pub request_id: String,
    pub success: bool,
    pub code: String,
    pub message: String,
    pub session_id: String,
    /// Seconds until the session expires
    pub expires_in: u64,
    pub instructions: Vec<String>,
}

/// Admin key query parameter.
#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    pub key: Option<String>,
}

/// Process memory usage.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Resident set size, where the platform reports it
    pub rss_bytes: Option<u64>,
}

/// Admin stats response. Contains no raw phone numbers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub request_id: String,
    /// Uptime in seconds
    pub uptime: u64,
    pub memory: MemoryStats,
    pub sessions: RegistryStats,
}

/// Manual cleanup request body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    pub session_id: Option<String>,
}

/// Manual cleanup response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub request_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Whether a live session was reclaimed by this call
    pub cleaned: bool,
    pub message: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// Uptime in seconds
    pub uptime: u64,
    pub timestamp: String,
}
