//! Pairing orchestration.
//!
//! [`PairingOrchestrator::start`] allocates credential storage, opens a
//! headless connection, hands the connection's events to a per-session task
//! and requests a pairing code. It returns as soon as a code is issued or the
//! attempt definitively failed; linking, confirmation and teardown continue in
//! the session task.

mod task;

use crate::ids::hash_for_logging;
use crate::link::{ConnectOptions, ConnectionHandle, LinkClient, LinkConnection, LinkError};
use crate::phone::ValidatedPhone;
use crate::session::{SessionRegistry, SessionStatus, SessionUpdate};
use std::sync::Arc;
use std::time::Duration;
use task::SessionTask;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// Error reported when the stored identity is already linked.
pub const ALREADY_REGISTERED: &str = "already registered";

/// Timings and fixed content of the pairing flow.
#[derive(Debug, Clone)]
pub struct PairingSettings {
    /// Wait between opening the connection and requesting the code
    pub code_request_delay: Duration,
    /// Upper bound on the code request
    pub code_request_timeout: Duration,
    /// Settle time after the device linked
    pub confirm_delay: Duration,
    /// Wait after the confirmation before closing the transport
    pub close_delay: Duration,
    /// Wait after closing before the final cleanup
    pub post_success_cleanup_delay: Duration,
    /// Text sent to the linked account once pairing completes
    pub confirmation_message: String,
    /// Browser triple announced to the network
    pub browser: Vec<String>,
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            code_request_delay: Duration::from_secs(2),
            code_request_timeout: Duration::from_secs(30),
            confirm_delay: Duration::from_secs(3),
            close_delay: Duration::from_secs(2),
            post_success_cleanup_delay: Duration::from_secs(5),
            confirmation_message: default_confirmation_message(),
            browser: vec!["Ubuntu".into(), "Chrome".into(), "20.0.04".into()],
        }
    }
}

pub fn default_confirmation_message() -> String {
    "Your device has been linked successfully. You can close the pairing page.".into()
}

/// Result of a pairing attempt as seen by the HTTP caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Success { code: String },
    Failure { error: String },
}

impl PairingOutcome {
    fn failure(error: impl Into<String>) -> Self {
        PairingOutcome::Failure {
            error: error.into(),
        }
    }
}

enum CodeAttempt {
    Issued(String),
    Failed { summary: String, detail: String },
    Terminated,
}

/// Drives sessions from creation to a terminal status.
pub struct PairingOrchestrator {
    registry: SessionRegistry,
    link: Arc<dyn LinkClient>,
    settings: PairingSettings,
}

impl PairingOrchestrator {
    pub fn new(
        registry: SessionRegistry,
        link: Arc<dyn LinkClient>,
        settings: PairingSettings,
    ) -> Self {
        Self {
            registry,
            link,
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Run the pairing flow for a session created in the registry.
    ///
    /// Never returns an error: every failure is recorded on the session and
    /// reported as [`PairingOutcome::Failure`].
    #[instrument(skip(self, phone), fields(phone = %hash_for_logging(phone.as_str())))]
    pub async fn start(
        &self,
        phone: &ValidatedPhone,
        session_id: &str,
        request_id: &str,
    ) -> PairingOutcome {
        let credentials = match self.link.open_storage(session_id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                return self
                    .abort(session_id, "Credential storage unavailable", e)
                    .await
            }
        };

        if self
            .registry
            .update(session_id, SessionUpdate::status(SessionStatus::Connecting))
            .await
            .is_none()
        {
            self.discard_storage(session_id).await;
            return PairingOutcome::failure("Session ended before pairing started");
        }

        let options = ConnectOptions::pairing_code(self.settings.browser.clone());
        let LinkConnection { socket, events } = match self.link.connect(session_id, &options).await
        {
            Ok(connection) => connection,
            Err(e) => {
                return self
                    .abort(session_id, "Connection could not be opened", e)
                    .await
            }
        };

        let handle = ConnectionHandle::new(socket.clone());
        if self
            .registry
            .update(session_id, SessionUpdate::connection(handle))
            .await
            .is_none()
        {
            socket.close().await;
            self.discard_storage(session_id).await;
            return PairingOutcome::failure("Session ended before pairing started");
        }

        if credentials.registered {
            warn!(session_id, "Credential storage already holds a registered identity");
            self.registry
                .update(
                    session_id,
                    SessionUpdate::status(SessionStatus::Failed).with_error(ALREADY_REGISTERED),
                )
                .await;
            self.registry.cleanup(session_id).await;
            return PairingOutcome::failure(ALREADY_REGISTERED);
        }

        let (terminated_tx, terminated_rx) = watch::channel(false);
        let session_task = SessionTask {
            session_id: session_id.to_string(),
            phone: phone.clone(),
            socket: socket.clone(),
            registry: self.registry.clone(),
            settings: self.settings.clone(),
            terminated: terminated_tx,
        };
        tokio::spawn(session_task.run(events));

        let request = async {
            tokio::time::sleep(self.settings.code_request_delay).await;
            match tokio::time::timeout(
                self.settings.code_request_timeout,
                socket.request_pairing_code(phone.as_str()),
            )
            .await
            {
                Ok(Ok(code)) => CodeAttempt::Issued(code),
                Ok(Err(e)) => CodeAttempt::Failed {
                    summary: "Pairing code request failed".into(),
                    detail: e.to_string(),
                },
                Err(_) => CodeAttempt::Failed {
                    summary: "Pairing code request timed out".into(),
                    detail: format!(
                        "No pairing code after {:?}",
                        self.settings.code_request_timeout
                    ),
                },
            }
        };

        let attempt = tokio::select! {
            attempt = request => attempt,
            _ = wait_terminated(terminated_rx) => CodeAttempt::Terminated,
        };

        match attempt {
            CodeAttempt::Issued(code) => self.issue(session_id, request_id, &code).await,
            CodeAttempt::Failed { summary, detail } => {
                self.abort(session_id, &summary, LinkError::Other(detail))
                    .await
            }
            CodeAttempt::Terminated => {
                let error = self.termination_reason(session_id).await;
                warn!(session_id, %error, "Connection closed before pairing code was issued");
                PairingOutcome::failure(error)
            }
        }
    }

    async fn issue(&self, session_id: &str, request_id: &str, code: &str) -> PairingOutcome {
        let code = format_pairing_code(code);
        let session = self
            .registry
            .update(
                session_id,
                SessionUpdate::status(SessionStatus::CodeIssued).with_code(code.clone()),
            )
            .await;

        match session {
            Some(session) if !session.status.is_terminal() => {
                info!(session_id, request_id, "Pairing code issued");
                PairingOutcome::Success { code }
            }
            Some(session) => PairingOutcome::failure(session.last_error.unwrap_or_else(|| {
                format!("Session {} before pairing code was issued", session.status)
            })),
            None => {
                let error = self.termination_reason(session_id).await;
                PairingOutcome::failure(error)
            }
        }
    }

    /// Record a failure, clean up, and report it.
    async fn abort(&self, session_id: &str, summary: &str, cause: LinkError) -> PairingOutcome {
        error!(session_id, error = %cause, "{}", summary);

        self.registry
            .update(
                session_id,
                SessionUpdate::status(SessionStatus::Failed)
                    .with_error(format!("{}: {}", summary, cause)),
            )
            .await;

        if !self.registry.cleanup(session_id).await {
            self.discard_storage(session_id).await;
        }

        PairingOutcome::failure(summary)
    }

    /// Remove storage for a session the registry no longer tracks.
    async fn discard_storage(&self, session_id: &str) {
        if let Err(e) = self.link.remove_storage(session_id).await {
            warn!(session_id, error = %e, "Failed to remove credential storage");
        }
    }

    async fn termination_reason(&self, session_id: &str) -> String {
        if let Some(session) = self.registry.get(session_id).await {
            if let Some(error) = session.last_error {
                return error;
            }
        }
        if let Some(record) = self.registry.archived(session_id).await {
            if let Some(error) = record.error {
                return error;
            }
        }
        "Connection closed before pairing code was issued".into()
    }
}

/// Resolves once the session task reports a terminal close.
async fn wait_terminated(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|terminated| *terminated).await.is_err() {
        // Task finished without a terminal close
        std::future::pending::<()>().await;
    }
}

/// Group a bare eight-character code as `XXXX-XXXX`; anything else is kept.
pub fn format_pairing_code(code: &str) -> String {
    let code = code.trim();
    if code.len() == 8 && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        format!("{}-{}", &code[..4], &code[4..])
    } else {
        code.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{ConnectionEvent, CredentialState, MockLinkClient, MockLinkSocket};
    use crate::phone::validate;
    use crate::session::{ArchiveRecord, RegistrySettings};
    use tokio::sync::mpsc;

    fn instant_settings() -> PairingSettings {
        PairingSettings {
            code_request_delay: Duration::ZERO,
            code_request_timeout: Duration::from_secs(5),
            confirm_delay: Duration::ZERO,
            close_delay: Duration::ZERO,
            post_success_cleanup_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    async fn setup(link: MockLinkClient) -> (PairingOrchestrator, ValidatedPhone) {
        let link: Arc<dyn LinkClient> = Arc::new(link);
        let registry = SessionRegistry::new(link.clone(), RegistrySettings::default());
        let phone = validate("923123456789").unwrap();
        registry
            .create("s1".into(), phone.clone(), "10.0.0.1".into())
            .await
            .unwrap();
        (
            PairingOrchestrator::new(registry, link, instant_settings()),
            phone,
        )
    }

    fn connecting_link(
        socket: MockLinkSocket,
        registered: bool,
    ) -> (MockLinkClient, mpsc::Sender<ConnectionEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let mut link = MockLinkClient::new();
        link.expect_open_storage()
            .returning(move |_| Ok(CredentialState { registered }));
        link.expect_connect().return_once(move |_, _| {
            Ok(LinkConnection {
                socket: Arc::new(socket),
                events: rx,
            })
        });
        link.expect_remove_storage().returning(|_| Ok(()));
        (link, tx)
    }

    async fn wait_for_archive(registry: &SessionRegistry, id: &str) -> ArchiveRecord {
        for _ in 0..100 {
            if let Some(record) = registry.archived(id).await {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {} was never archived", id);
    }

    #[test]
    fn test_format_pairing_code() {
        assert_eq!(format_pairing_code("ABCD1234"), "ABCD-1234");
        assert_eq!(format_pairing_code("123-456"), "123-456");
        assert_eq!(format_pairing_code(" WXYZ9876 "), "WXYZ-9876");
        assert_eq!(format_pairing_code("12345"), "12345");
    }

    #[tokio::test]
    async fn test_storage_failure_is_contained() {
        let mut link = MockLinkClient::new();
        link.expect_open_storage()
            .returning(|_| Err(LinkError::Other("read-only filesystem".into())));
        link.expect_connect().never();
        link.expect_remove_storage().times(1).returning(|_| Ok(()));
        let (orchestrator, phone) = setup(link).await;

        let outcome = orchestrator.start(&phone, "s1", "r1").await;

        assert_eq!(
            outcome,
            PairingOutcome::failure("Credential storage unavailable")
        );
        let record = orchestrator.registry().archived("s1").await.unwrap();
        assert_eq!(record.final_status, SessionStatus::Failed);
        assert!(record.error.unwrap().contains("read-only filesystem"));
    }

    #[tokio::test]
    async fn test_connect_failure_removes_storage() {
        let mut link = MockLinkClient::new();
        link.expect_open_storage()
            .returning(|_| Ok(CredentialState::default()));
        link.expect_connect()
            .returning(|_, _| Err(LinkError::Other("handshake failed".into())));
        link.expect_remove_storage().times(1).returning(|_| Ok(()));
        let (orchestrator, phone) = setup(link).await;

        let outcome = orchestrator.start(&phone, "s1", "r1").await;

        assert_eq!(
            outcome,
            PairingOutcome::failure("Connection could not be opened")
        );
        assert!(orchestrator.registry().get("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_connect_is_headless() {
        let mut link = MockLinkClient::new();
        link.expect_open_storage()
            .returning(|_| Ok(CredentialState::default()));
        link.expect_connect()
            .withf(|_, options| options.headless && !options.print_qr)
            .returning(|_, _| Err(LinkError::Closed));
        link.expect_remove_storage().returning(|_| Ok(()));
        let (orchestrator, phone) = setup(link).await;

        orchestrator.start(&phone, "s1", "r1").await;
    }

    #[tokio::test]
    async fn test_already_registered_does_not_request_code() {
        let mut socket = MockLinkSocket::new();
        socket.expect_request_pairing_code().never();
        socket.expect_close().returning(|| ());
        let (link, _events) = connecting_link(socket, true);
        let (orchestrator, phone) = setup(link).await;

        let outcome = orchestrator.start(&phone, "s1", "r1").await;

        assert_eq!(outcome, PairingOutcome::failure(ALREADY_REGISTERED));
        let record = orchestrator.registry().archived("s1").await.unwrap();
        assert_eq!(record.final_status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_code_issued() {
        let mut socket = MockLinkSocket::new();
        socket
            .expect_request_pairing_code()
            .withf(|phone| phone == "923123456789")
            .returning(|_| Ok("ABCD1234".into()));
        socket.expect_close().returning(|| ());
        let (link, _events) = connecting_link(socket, false);
        let (orchestrator, phone) = setup(link).await;

        let outcome = orchestrator.start(&phone, "s1", "r1").await;

        assert_eq!(
            outcome,
            PairingOutcome::Success {
                code: "ABCD-1234".into()
            }
        );
        let session = orchestrator.registry().get("s1").await.unwrap();
        assert_eq!(session.status, SessionStatus::CodeIssued);
        assert_eq!(session.pairing_code.as_deref(), Some("ABCD-1234"));
        assert!(session.connection.is_some());
    }

    #[tokio::test]
    async fn test_code_request_failure_marks_failed() {
        let mut socket = MockLinkSocket::new();
        socket
            .expect_request_pairing_code()
            .returning(|_| Err(LinkError::Closed));
        socket.expect_close().times(1).returning(|| ());
        let (link, _events) = connecting_link(socket, false);
        let (orchestrator, phone) = setup(link).await;

        let outcome = orchestrator.start(&phone, "s1", "r1").await;

        assert_eq!(outcome, PairingOutcome::failure("Pairing code request failed"));
        let record = orchestrator.registry().archived("s1").await.unwrap();
        assert_eq!(record.final_status, SessionStatus::Failed);
        assert!(!record.pairing_code_issued);
    }

    #[tokio::test]
    async fn test_logged_out_before_code() {
        let mut socket = MockLinkSocket::new();
        socket.expect_close().returning(|| ());
        socket.expect_request_pairing_code().never();
        let (link, events) = connecting_link(socket, false);
        let (mut orchestrator, phone) = setup(link).await;
        orchestrator.settings.code_request_delay = Duration::from_secs(60);

        events
            .send(ConnectionEvent::Closed {
                status_code: Some(crate::link::LOGGED_OUT_STATUS),
                error: Some("Connection Failure".into()),
            })
            .await
            .unwrap();

        let outcome = orchestrator.start(&phone, "s1", "r1").await;

        assert_eq!(outcome, PairingOutcome::failure("Connection Failure"));
        let record = wait_for_archive(orchestrator.registry(), "s1").await;
        assert_eq!(record.final_status, SessionStatus::LoggedOut);
    }
}
