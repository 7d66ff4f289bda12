//! Common test utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use pairing_service::api::{create_router_with_rate_limit, ApiOptions, AppState, RateLimitState};
use pairing_service::link::{
    ConnectOptions, ConnectionEvent, CredentialState, LinkClient, LinkConnection, LinkError,
    LinkSocket,
};
use pairing_service::pairing::{PairingOrchestrator, PairingSettings};
use pairing_service::session::{ArchiveRecord, RegistrySettings, SessionRegistry};
use secrecy::SecretString;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const ADMIN_KEY: &str = "test-admin-key";

/// How the fake answers pairing code requests.
#[derive(Debug, Clone)]
pub enum CodeReply {
    Code(String),
    Error(String),
    Hang,
}

#[derive(Debug)]
struct FakeState {
    registered: bool,
    code_reply: CodeReply,
    fail_storage: bool,
    identity: Option<String>,
    events_on_connect: Vec<ConnectionEvent>,
    storages: HashSet<String>,
    removed: Vec<String>,
    closed: Vec<String>,
    sent: Vec<(String, String, String)>,
    saved_credentials: usize,
    senders: HashMap<String, mpsc::Sender<ConnectionEvent>>,
}

/// Scripted in-memory protocol client.
#[derive(Clone)]
pub struct FakeLink {
    state: Arc<Mutex<FakeState>>,
}

impl FakeLink {
    pub fn with_code(code: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                registered: false,
                code_reply: CodeReply::Code(code.to_string()),
                fail_storage: false,
                identity: Some("923123456789:1@s.whatsapp.net".to_string()),
                events_on_connect: Vec::new(),
                storages: HashSet::new(),
                removed: Vec::new(),
                closed: Vec::new(),
                sent: Vec::new(),
                saved_credentials: 0,
                senders: HashMap::new(),
            })),
        }
    }

    pub fn code_reply(self, reply: CodeReply) -> Self {
        self.state.lock().unwrap().code_reply = reply;
        self
    }

    pub fn registered(self) -> Self {
        self.state.lock().unwrap().registered = true;
        self
    }

    pub fn failing_storage(self) -> Self {
        self.state.lock().unwrap().fail_storage = true;
        self
    }

    pub fn events_on_connect(self, events: Vec<ConnectionEvent>) -> Self {
        self.state.lock().unwrap().events_on_connect = events;
        self
    }

    /// Emit an event on a session's connection.
    pub async fn emit(&self, session_id: &str, event: ConnectionEvent) {
        let sender = self.state.lock().unwrap().senders.get(session_id).cloned();
        sender
            .expect("no connection for session")
            .send(event)
            .await
            .expect("session task gone");
    }

    pub fn has_storage(&self, session_id: &str) -> bool {
        self.state.lock().unwrap().storages.contains(session_id)
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    /// Wait for the first storage removal and return its session id.
    pub async fn wait_removed(&self) -> String {
        for _ in 0..200 {
            if let Some(id) = self.removed().first() {
                return id.clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no credential storage was removed");
    }

    pub fn closed(&self) -> Vec<String> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn saved_credentials(&self) -> usize {
        self.state.lock().unwrap().saved_credentials
    }
}

#[async_trait]
impl LinkClient for FakeLink {
    async fn open_storage(&self, session_id: &str) -> Result<CredentialState, LinkError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_storage {
            return Err(LinkError::Other("storage unavailable".into()));
        }
        state.storages.insert(session_id.to_string());
        Ok(CredentialState {
            registered: state.registered,
        })
    }

    async fn connect(
        &self,
        session_id: &str,
        _options: &ConnectOptions,
    ) -> Result<LinkConnection, LinkError> {
        let (tx, rx) = mpsc::channel(16);
        let initial = {
            let mut state = self.state.lock().unwrap();
            state.senders.insert(session_id.to_string(), tx.clone());
            state.events_on_connect.clone()
        };
        for event in initial {
            tx.send(event).await.map_err(|_| LinkError::Closed)?;
        }

        Ok(LinkConnection {
            socket: Arc::new(FakeSocket {
                session_id: session_id.to_string(),
                state: self.state.clone(),
            }),
            events: rx,
        })
    }

    async fn remove_storage(&self, session_id: &str) -> Result<(), LinkError> {
        let mut state = self.state.lock().unwrap();
        state.storages.remove(session_id);
        state.removed.push(session_id.to_string());
        Ok(())
    }
}

struct FakeSocket {
    session_id: String,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl LinkSocket for FakeSocket {
    async fn request_pairing_code(&self, _phone: &str) -> Result<String, LinkError> {
        let reply = self.state.lock().unwrap().code_reply.clone();
        match reply {
            CodeReply::Code(code) => Ok(code),
            CodeReply::Error(message) => Err(LinkError::Other(message)),
            CodeReply::Hang => std::future::pending().await,
        }
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<(), LinkError> {
        self.state.lock().unwrap().sent.push((
            self.session_id.clone(),
            to.to_string(),
            text.to_string(),
        ));
        Ok(())
    }

    async fn save_credentials(&self) -> Result<(), LinkError> {
        self.state.lock().unwrap().saved_credentials += 1;
        Ok(())
    }

    async fn own_identity(&self) -> Option<String> {
        self.state.lock().unwrap().identity.clone()
    }

    async fn close(&self) {
        self.state
            .lock()
            .unwrap()
            .closed
            .push(self.session_id.clone());
    }
}

/// Pairing settings with no waits.
pub fn instant_pairing() -> PairingSettings {
    PairingSettings {
        code_request_delay: Duration::ZERO,
        code_request_timeout: Duration::from_secs(5),
        confirm_delay: Duration::ZERO,
        close_delay: Duration::ZERO,
        post_success_cleanup_delay: Duration::ZERO,
        ..Default::default()
    }
}

/// Build an app around a fake protocol client.
pub fn test_app(
    link: &FakeLink,
    registry_settings: RegistrySettings,
    pairing_settings: PairingSettings,
) -> (axum::Router, AppState) {
    let link: Arc<dyn LinkClient> = Arc::new(link.clone());
    let registry = SessionRegistry::new(link.clone(), registry_settings);
    let orchestrator = PairingOrchestrator::new(registry, link, pairing_settings);
    let state = AppState::new(
        orchestrator,
        Some(SecretString::new(ADMIN_KEY.to_string())),
        ApiOptions {
            trust_proxy: true,
            expose_errors: false,
        },
    );
    let app = create_router_with_rate_limit(state.clone(), RateLimitState::permissive(true));
    (app, state)
}

pub fn get(uri: &str, source: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", source)
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Wait until a session has been archived.
pub async fn wait_for_archive(registry: &SessionRegistry, session_id: &str) -> ArchiveRecord {
    for _ in 0..200 {
        if let Some(record) = registry.archived(session_id).await {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} was never archived", session_id);
}
