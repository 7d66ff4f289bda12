//! Link client errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Gateway error ({status}): {message}")]
    Gateway { status: u16, message: String },

    #[error("Connection closed")]
    Closed,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl LinkError {
    /// Whether the gateway no longer knows the session.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LinkError::Gateway { status: 404, .. })
    }
}
