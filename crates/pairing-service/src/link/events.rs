//! Connection event polling.

use super::{ConnectionEvent, GatewayClient, GatewayEvent};
use std::time::Duration;
use tokio::time::sleep;
use tokio_stream::Stream;
use tracing::{debug, error};

/// Delay before polling again after a failed poll.
const ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Polls the gateway for a session's connection events.
pub struct EventPoller {
    gateway: GatewayClient,
    session_id: String,
    poll_interval: Duration,
}

impl EventPoller {
    /// Create a new event poller.
    pub fn new(gateway: GatewayClient, session_id: String, poll_interval: Duration) -> Self {
        Self {
            gateway,
            session_id,
            poll_interval,
        }
    }

    /// Poll as an async stream. The stream ends after the first close event.
    pub fn stream(self) -> impl Stream<Item = ConnectionEvent> {
        async_stream::stream! {
            loop {
                match self.gateway.fetch_events(&self.session_id).await {
                    Ok(events) => {
                        for event in events.into_iter().filter_map(GatewayEvent::into_connection_event) {
                            let closed = matches!(event, ConnectionEvent::Closed { .. });
                            debug!(session_id = %self.session_id, ?event, "Connection event");
                            yield event;
                            if closed {
                                return;
                            }
                        }
                    }
                    Err(e) if e.is_not_found() => {
                        yield ConnectionEvent::Closed {
                            status_code: None,
                            error: Some("Gateway session no longer exists".to_string()),
                        };
                        return;
                    }
                    Err(e) => {
                        error!(session_id = %self.session_id, "Event poll error: {}", e);
                        sleep(ERROR_BACKOFF).await;
                        continue;
                    }
                }

                sleep(self.poll_interval).await;
            }
        }
    }
}
