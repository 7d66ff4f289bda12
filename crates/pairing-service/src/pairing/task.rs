//! Per-session connection event handling.

use super::PairingSettings;
use crate::link::{ConnectionEvent, LinkSocket};
use crate::phone::ValidatedPhone;
use crate::session::{SessionRegistry, SessionStatus, SessionUpdate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Consumes one session's connection events in emission order and applies
/// them to the registry.
pub(crate) struct SessionTask {
    pub session_id: String,
    pub phone: ValidatedPhone,
    pub socket: Arc<dyn LinkSocket>,
    pub registry: SessionRegistry,
    pub settings: PairingSettings,
    /// Set once the session reached a terminal status through a close event
    pub terminated: watch::Sender<bool>,
}

impl SessionTask {
    pub async fn run(self, mut events: mpsc::Receiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::CredentialsChanged => self.save_credentials().await,
                ConnectionEvent::Open => {
                    self.complete_link(&mut events).await;
                    break;
                }
                closed @ ConnectionEvent::Closed { .. } => {
                    self.handle_close(closed).await;
                    break;
                }
            }
        }

        debug!(session_id = %self.session_id, "Session task finished");
    }

    async fn save_credentials(&self) {
        if let Err(e) = self.socket.save_credentials().await {
            warn!(session_id = %self.session_id, error = %e, "Failed to persist credentials");
            self.registry
                .update(
                    &self.session_id,
                    SessionUpdate::default().with_error(format!("Credential save failed: {}", e)),
                )
                .await;
        }
    }

    /// Linked: confirm to the account, close the transport, clean up.
    async fn complete_link(&self, events: &mut mpsc::Receiver<ConnectionEvent>) {
        self.registry
            .update(&self.session_id, SessionUpdate::status(SessionStatus::Connected))
            .await;
        info!(session_id = %self.session_id, "Device linked");

        if let Err(closed) = self.pause(events, self.settings.confirm_delay).await {
            self.handle_close(closed).await;
            return;
        }

        let recipient = match self.socket.own_identity().await {
            Some(identity) => identity,
            None => self.phone.to_string(),
        };
        match self
            .socket
            .send_text(&recipient, &self.settings.confirmation_message)
            .await
        {
            Ok(()) => debug!(session_id = %self.session_id, "Confirmation sent"),
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Failed to send confirmation");
                self.registry
                    .update(
                        &self.session_id,
                        SessionUpdate::default().with_error(format!("Confirmation failed: {}", e)),
                    )
                    .await;
            }
        }

        if let Err(closed) = self.pause(events, self.settings.close_delay).await {
            self.handle_close(closed).await;
            return;
        }

        self.socket.close().await;

        // The close we just requested comes back as a close event
        if let Err(closed) = self
            .pause(events, self.settings.post_success_cleanup_delay)
            .await
        {
            debug!(session_id = %self.session_id, ?closed, "Transport closed after linking");
        }

        self.registry.cleanup(&self.session_id).await;
    }

    /// Record a close and tear the session down. No reconnect is attempted.
    async fn handle_close(&self, event: ConnectionEvent) {
        let logged_out = event.is_logged_out();
        let ConnectionEvent::Closed { status_code, error } = event else {
            return;
        };

        let (status, reason) = if logged_out {
            (
                SessionStatus::LoggedOut,
                error.unwrap_or_else(|| "Logged out".to_string()),
            )
        } else {
            let reason = match (error, status_code) {
                (Some(error), _) => error,
                (None, Some(code)) => format!("Connection closed (status {})", code),
                (None, None) => "Connection closed".to_string(),
            };
            (SessionStatus::Disconnected, reason)
        };

        info!(
            session_id = %self.session_id,
            status = %status,
            status_code = ?status_code,
            reason = %reason,
            "Connection closed"
        );

        self.registry
            .update(
                &self.session_id,
                SessionUpdate::status(status).with_error(reason),
            )
            .await;
        self.terminated.send_replace(true);
        self.registry.cleanup(&self.session_id).await;
    }

    /// Wait `duration` while still persisting credential updates.
    ///
    /// Returns the close event if one arrives first.
    async fn pause(
        &self,
        events: &mut mpsc::Receiver<ConnectionEvent>,
        duration: Duration,
    ) -> Result<(), ConnectionEvent> {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                event = events.recv() => match event {
                    Some(ConnectionEvent::CredentialsChanged) => self.save_credentials().await,
                    Some(ConnectionEvent::Open) => {}
                    Some(closed @ ConnectionEvent::Closed { .. }) => return Err(closed),
                    None => {
                        (&mut sleep).await;
                        return Ok(());
                    }
                },
            }
        }
    }
}
