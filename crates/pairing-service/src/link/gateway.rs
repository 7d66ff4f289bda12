//! HTTP client for the protocol gateway sidecar.
//!
//! The gateway holds the actual chat network connection and the credential
//! files for each session. Sessions are addressed by their session id.

use super::events::EventPoller;
use super::types::{
    ConnectRequest, IdentityResponse, PairingCodeRequest, PairingCodeResponse, SendTextRequest,
    StorageResponse,
};
use super::{
    ConnectOptions, ConnectionEvent, CredentialState, LinkClient, LinkConnection, LinkError,
    LinkSocket,
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, instrument, warn};
use urlencoding::encode;

/// Capacity of each session's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Protocol gateway client.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    poll_interval: Duration,
}

impl GatewayClient {
    /// Create a new gateway client.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, LinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LinkError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval,
        })
    }

    /// Check if the gateway is healthy.
    pub async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/v1/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn session_url(&self, session_id: &str, resource: &str) -> String {
        format!(
            "{}/v1/sessions/{}/{}",
            self.base_url,
            encode(session_id),
            resource
        )
    }

    /// Fetch the events queued for a session since the last poll.
    pub async fn fetch_events(
        &self,
        session_id: &str,
    ) -> Result<Vec<super::GatewayEvent>, LinkError> {
        let response = self
            .client
            .get(self.session_url(session_id, "events"))
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }
}

/// Turn a non-success response into a gateway error.
async fn check(response: Response) -> Result<Response, LinkError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(LinkError::Gateway { status, message })
}

#[async_trait]
impl LinkClient for GatewayClient {
    #[instrument(skip(self))]
    async fn open_storage(&self, session_id: &str) -> Result<CredentialState, LinkError> {
        let response = self
            .client
            .post(self.session_url(session_id, "storage"))
            .send()
            .await?;
        let storage: StorageResponse = check(response).await?.json().await?;

        debug!(registered = storage.registered, "Credential storage allocated");
        Ok(CredentialState {
            registered: storage.registered,
        })
    }

    #[instrument(skip(self, options))]
    async fn connect(
        &self,
        session_id: &str,
        options: &ConnectOptions,
    ) -> Result<LinkConnection, LinkError> {
        let body = ConnectRequest {
            headless: options.headless,
            print_qr: options.print_qr,
            browser: &options.browser,
        };

        let response = self
            .client
            .post(self.session_url(session_id, "connect"))
            .json(&body)
            .send()
            .await?;
        check(response).await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let poller = EventPoller::new(self.clone(), session_id.to_string(), self.poll_interval);
        tokio::spawn(forward_events(poller, tx));

        debug!("Connection opened");
        Ok(LinkConnection {
            socket: Arc::new(GatewaySocket {
                gateway: self.clone(),
                session_id: session_id.to_string(),
            }),
            events: rx,
        })
    }

    #[instrument(skip(self))]
    async fn remove_storage(&self, session_id: &str) -> Result<(), LinkError> {
        let response = self
            .client
            .delete(self.session_url(session_id, "storage"))
            .send()
            .await?;

        match check(response).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Credential storage already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Pump polled events into the session's channel until the receiver goes away.
async fn forward_events(poller: EventPoller, tx: mpsc::Sender<ConnectionEvent>) {
    let stream = poller.stream();
    tokio::pin!(stream);

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            next = stream.next() => match next {
                Some(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

/// A session's connection, addressed through the gateway.
pub struct GatewaySocket {
    gateway: GatewayClient,
    session_id: String,
}

#[async_trait]
impl LinkSocket for GatewaySocket {
    #[instrument(skip(self, phone), fields(session_id = %self.session_id))]
    async fn request_pairing_code(&self, phone: &str) -> Result<String, LinkError> {
        let response = self
            .gateway
            .client
            .post(self.gateway.session_url(&self.session_id, "pairing-code"))
            .json(&PairingCodeRequest { number: phone })
            .send()
            .await?;
        let body: PairingCodeResponse = check(response).await?.json().await?;
        Ok(body.code)
    }

    #[instrument(skip(self, to, text), fields(session_id = %self.session_id))]
    async fn send_text(&self, to: &str, text: &str) -> Result<(), LinkError> {
        let response = self
            .gateway
            .client
            .post(self.gateway.session_url(&self.session_id, "messages"))
            .json(&SendTextRequest { to, text })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %self.session_id))]
    async fn save_credentials(&self) -> Result<(), LinkError> {
        let response = self
            .gateway
            .client
            .post(self.gateway.session_url(&self.session_id, "credentials"))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn own_identity(&self) -> Option<String> {
        let response = self
            .gateway
            .client
            .get(self.gateway.session_url(&self.session_id, "me"))
            .send()
            .await
            .ok()?;
        let identity: IdentityResponse = check(response).await.ok()?.json().await.ok()?;
        identity.id
    }

    async fn close(&self) {
        let result = self
            .gateway
            .client
            .delete(self.gateway.session_url(&self.session_id, "connection"))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(session_id = %self.session_id, "Connection closed");
            }
            Ok(response) => {
                warn!(session_id = %self.session_id, status = %response.status(), "Gateway refused close");
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Failed to close connection");
            }
        }
    }
}
