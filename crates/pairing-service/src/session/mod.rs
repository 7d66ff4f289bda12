//! Pairing sessions and their registry.

mod archive;
mod registry;

pub use archive::{Archive, ArchiveRecord};
pub use registry::{RegistryError, RegistrySettings, RegistryStats, SessionRegistry, SessionSummary};

use crate::link::ConnectionHandle;
use crate::phone::ValidatedPhone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a pairing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, nothing allocated yet
    Initializing,
    /// Credential storage allocated, connection opening
    Connecting,
    /// Pairing code handed to the caller
    CodeIssued,
    /// Device linked
    Connected,
    /// Transport closed for a reason other than logout
    Disconnected,
    /// Device was logged out
    LoggedOut,
    /// Storage, connection or code request failed
    Failed,
    /// Timed out before reaching a terminal status
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Connecting => "connecting",
            SessionStatus::CodeIssued => "code_issued",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::LoggedOut => "logged_out",
            SessionStatus::Failed => "failed",
            SessionStatus::Expired => "expired",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Disconnected
                | SessionStatus::LoggedOut
                | SessionStatus::Failed
                | SessionStatus::Expired
        )
    }

    fn rank(&self) -> u8 {
        match self {
            SessionStatus::Initializing => 0,
            SessionStatus::Connecting => 1,
            SessionStatus::CodeIssued => 2,
            SessionStatus::Connected => 3,
            _ => 4,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Non-terminal statuses only move forward; any non-terminal status may
    /// end in any terminal one.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.rank() > self.rank()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-flight attempt to link a phone number.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub source_address: String,
    pub phone: ValidatedPhone,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub pairing_code: Option<String>,
    pub last_error: Option<String>,
    pub connection: Option<ConnectionHandle>,
}

impl Session {
    pub fn new(id: String, phone: ValidatedPhone, source_address: String) -> Self {
        Self {
            id,
            source_address,
            phone,
            status: SessionStatus::Initializing,
            started_at: Utc::now(),
            pairing_code: None,
            last_error: None,
            connection: None,
        }
    }

    /// Merge an update. Returns the status change that was refused, if any.
    fn apply(&mut self, update: SessionUpdate) -> Option<SessionStatus> {
        let mut refused = None;
        let was_terminal = self.status.is_terminal();

        if let Some(status) = update.status {
            if status != self.status {
                if self.status.can_transition_to(status) {
                    self.status = status;
                } else {
                    refused = Some(status);
                }
            }
        }

        // A finished session keeps the code and reason it ended with
        if self.pairing_code.is_none() && !was_terminal {
            self.pairing_code = update.pairing_code;
        }

        if let Some(error) = update.last_error {
            if !was_terminal || self.last_error.is_none() {
                self.last_error = Some(error);
            }
        }

        if let Some(connection) = update.connection {
            self.connection = Some(connection);
        }

        refused
    }
}

/// Partial set of session fields to merge.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub pairing_code: Option<String>,
    pub last_error: Option<String>,
    pub connection: Option<ConnectionHandle>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.pairing_code = Some(code.into());
        self
    }

    pub fn connection(connection: ConnectionHandle) -> Self {
        Self {
            connection: Some(connection),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phone::validate;

    fn session() -> Session {
        Session::new(
            "s1".into(),
            validate("923123456789").unwrap(),
            "10.0.0.1".into(),
        )
    }

    #[test]
    fn test_forward_transitions() {
        use SessionStatus::*;
        assert!(Initializing.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(CodeIssued));
        assert!(CodeIssued.can_transition_to(Connected));
        assert!(Initializing.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Expired));
        assert!(!Connected.can_transition_to(CodeIssued));
        assert!(!CodeIssued.can_transition_to(Connecting));
    }

    #[test]
    fn test_terminal_statuses_are_final() {
        use SessionStatus::*;
        for terminal in [Disconnected, LoggedOut, Failed, Expired] {
            assert!(terminal.is_terminal());
            for next in [Initializing, Connecting, CodeIssued, Connected, Failed, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_pairing_code_is_immutable() {
        let mut session = session();
        session.apply(SessionUpdate::status(SessionStatus::CodeIssued).with_code("1111-2222"));
        session.apply(SessionUpdate::default().with_code("3333-4444"));
        assert_eq!(session.pairing_code.as_deref(), Some("1111-2222"));
    }

    #[test]
    fn test_refused_transition_keeps_terminal_fields() {
        let mut session = session();
        session.apply(SessionUpdate::status(SessionStatus::LoggedOut).with_error("logged out"));

        let refused = session.apply(
            SessionUpdate::status(SessionStatus::CodeIssued)
                .with_code("ABCD-1234")
                .with_error("late"),
        );

        assert_eq!(refused, Some(SessionStatus::CodeIssued));
        assert_eq!(session.status, SessionStatus::LoggedOut);
        assert_eq!(session.pairing_code, None);
        assert_eq!(session.last_error.as_deref(), Some("logged out"));
    }

    #[test]
    fn test_terminal_session_without_reason_records_first_error() {
        let mut session = session();
        session.apply(SessionUpdate::status(SessionStatus::Disconnected));

        session.apply(SessionUpdate::default().with_error("Connection closed"));
        session.apply(SessionUpdate::default().with_error("second"));

        assert_eq!(session.last_error.as_deref(), Some("Connection closed"));
    }

    #[test]
    fn test_live_session_error_is_overwritten() {
        let mut session = session();
        session.apply(SessionUpdate::default().with_error("Credential save failed"));
        session.apply(SessionUpdate::status(SessionStatus::LoggedOut).with_error("logged out"));

        assert_eq!(session.last_error.as_deref(), Some("logged out"));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SessionStatus::CodeIssued).unwrap();
        assert_eq!(json, "\"code_issued\"");
        assert_eq!(SessionStatus::LoggedOut.to_string(), "logged_out");
    }
}
