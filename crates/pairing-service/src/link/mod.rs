//! Boundary with the external chat protocol client.
//!
//! The protocol client owns the network handshake, message encoding and the
//! credential files of each session. This module only describes the
//! capabilities the pairing flow needs from it, plus [`GatewayClient`], an
//! implementation that drives a sidecar protocol gateway over HTTP.

mod error;
mod events;
mod gateway;
mod types;

pub use error::LinkError;
pub use events::EventPoller;
pub use gateway::{GatewayClient, GatewaySocket};
pub use types::*;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Close status code the chat network reports for a logged-out device.
pub const LOGGED_OUT_STATUS: u16 = 401;

/// Typed connection events, delivered in the order the client emits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Credential material changed and should be persisted.
    CredentialsChanged,
    /// The linked device finished the handshake.
    Open,
    /// The transport closed.
    Closed {
        status_code: Option<u16>,
        error: Option<String>,
    },
}

impl ConnectionEvent {
    /// Whether this is a close caused by the device being logged out.
    pub fn is_logged_out(&self) -> bool {
        matches!(
            self,
            ConnectionEvent::Closed {
                status_code: Some(LOGGED_OUT_STATUS),
                ..
            }
        )
    }
}

/// Credential state of a session's temporary storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialState {
    /// The stored identity is already registered with the network.
    pub registered: bool,
}

/// Options for opening a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Never prompt interactively.
    pub headless: bool,
    /// Print a QR code for linking. Always false for the pairing-code flow.
    pub print_qr: bool,
    /// Browser triple the linked device is announced as.
    pub browser: Vec<String>,
}

impl ConnectOptions {
    /// Options for the headless pairing-code flow.
    pub fn pairing_code(browser: Vec<String>) -> Self {
        Self {
            headless: true,
            print_qr: false,
            browser,
        }
    }
}

/// A live connection to the chat network.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkSocket: Send + Sync {
    /// Ask the network for a pairing code for `phone`.
    async fn request_pairing_code(&self, phone: &str) -> Result<String, LinkError>;

    /// Send a text message.
    async fn send_text(&self, to: &str, text: &str) -> Result<(), LinkError>;

    /// Persist the current credential material.
    async fn save_credentials(&self) -> Result<(), LinkError>;

    /// Identity of the linked account, once known.
    async fn own_identity(&self) -> Option<String>;

    /// Request closure of the transport.
    async fn close(&self);
}

/// An opened connection and its event stream.
pub struct LinkConnection {
    pub socket: Arc<dyn LinkSocket>,
    pub events: mpsc::Receiver<ConnectionEvent>,
}

/// The external protocol client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkClient: Send + Sync {
    /// Allocate session-scoped credential storage.
    async fn open_storage(&self, session_id: &str) -> Result<CredentialState, LinkError>;

    /// Open a connection using the session's credential storage.
    async fn connect(
        &self,
        session_id: &str,
        options: &ConnectOptions,
    ) -> Result<LinkConnection, LinkError>;

    /// Discard the session's credential storage.
    async fn remove_storage(&self, session_id: &str) -> Result<(), LinkError>;
}

/// Opaque reference to a live connection, stored on a session.
///
/// Only closure can be requested through it.
#[derive(Clone)]
pub struct ConnectionHandle(Arc<dyn LinkSocket>);

impl ConnectionHandle {
    pub fn new(socket: Arc<dyn LinkSocket>) -> Self {
        Self(socket)
    }

    pub async fn close(&self) {
        self.0.close().await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectionHandle")
    }
}
