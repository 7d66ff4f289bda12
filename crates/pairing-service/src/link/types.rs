//! Protocol gateway wire types.

use super::ConnectionEvent;
use serde::{Deserialize, Serialize};

/// Response to a storage allocation.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageResponse {
    #[serde(default)]
    pub registered: bool,
}

/// Connection request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest<'a> {
    pub headless: bool,
    pub print_qr: bool,
    pub browser: &'a [String],
}

/// Pairing code request body.
#[derive(Debug, Clone, Serialize)]
pub struct PairingCodeRequest<'a> {
    pub number: &'a str,
}

/// Pairing code response.
#[derive(Debug, Clone, Deserialize)]
pub struct PairingCodeResponse {
    pub code: String,
}

/// Outgoing text message.
#[derive(Debug, Clone, Serialize)]
pub struct SendTextRequest<'a> {
    pub to: &'a str,
    pub text: &'a str,
}

/// Identity of the linked account.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityResponse {
    pub id: Option<String>,
}

/// Event as reported by the gateway's event endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GatewayEvent {
    Credentials,
    Connecting,
    Open,
    Close {
        #[serde(default, rename = "statusCode")]
        status_code: Option<u16>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl GatewayEvent {
    /// Convert to a connection event. Progress-only events map to `None`.
    pub fn into_connection_event(self) -> Option<ConnectionEvent> {
        match self {
            GatewayEvent::Credentials => Some(ConnectionEvent::CredentialsChanged),
            GatewayEvent::Connecting => None,
            GatewayEvent::Open => Some(ConnectionEvent::Open),
            GatewayEvent::Close { status_code, error } => {
                Some(ConnectionEvent::Closed { status_code, error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_event_parsing() {
        let events: Vec<GatewayEvent> = serde_json::from_str(
            r#"[
                {"type": "connecting"},
                {"type": "credentials"},
                {"type": "open"},
                {"type": "close", "statusCode": 401, "error": "logged out"}
            ]"#,
        )
        .unwrap();

        let converted: Vec<_> = events
            .into_iter()
            .filter_map(GatewayEvent::into_connection_event)
            .collect();

        assert_eq!(
            converted,
            vec![
                ConnectionEvent::CredentialsChanged,
                ConnectionEvent::Open,
                ConnectionEvent::Closed {
                    status_code: Some(401),
                    error: Some("logged out".into()),
                },
            ]
        );
    }

    #[test]
    fn test_close_without_details() {
        let event: GatewayEvent = serde_json::from_str(r#"{"type": "close"}"#).unwrap();
        assert_eq!(
            event,
            GatewayEvent::Close {
                status_code: None,
                error: None
            }
        );
    }

    #[test]
    fn test_connect_request_serialization() {
        let browser = vec!["Ubuntu".to_string(), "Chrome".to_string()];
        let json = serde_json::to_value(ConnectRequest {
            headless: true,
            print_qr: false,
            browser: &browser,
        })
        .unwrap();

        assert_eq!(json["printQr"], false);
        assert_eq!(json["browser"][1], "Chrome");
    }
}
