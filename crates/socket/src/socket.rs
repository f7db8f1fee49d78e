use std::{sync::Arc, time::Duration};

use anyhow::Result;
use slackwire_core::config::SocketConfig;
use tracing::{debug, info, warn};

use crate::connection::{SocketConnection, SocketTransport, TransportError};
use crate::envelope::{EnvelopeType, SocketModeMessage};
use crate::router::SocketModeRouter;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl From<&SocketConfig> for ReconnectPolicy {
    fn from(config: &SocketConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// How one connected session ended without a transport failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    StreamClosed,
    DisconnectRequested { reason: Option<String> },
}

/// Owns the connect / pump / reconnect loop around a router.
pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    router: Arc<SocketModeRouter>,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        router: Arc<SocketModeRouter>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, router, reconnect_policy }
    }

    pub fn router(&self) -> &Arc<SocketModeRouter> {
        &self.router
    }

    /// Runs until the server closes the stream or retries are exhausted.
    /// A `disconnect` frame reconnects immediately and resets the retry count.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0;

        loop {
            match self.connect_and_pump(attempt).await {
                Ok(SessionEnd::StreamClosed) => return Ok(()),
                Ok(SessionEnd::DisconnectRequested { reason }) => {
                    info!(
                        attempt,
                        reason = reason.as_deref().unwrap_or("unspecified"),
                        "socket mode server requested disconnect; reconnecting"
                    );
                    attempt = 0;
                }
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket mode transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<SessionEnd, TransportError> {
        info!(attempt, "opening socket mode transport connection");
        self.transport.connect().await?;
        let connection = Arc::new(SocketConnection::new(self.transport.clone()));
        info!(attempt, connection_id = connection.id(), "socket mode transport connected");

        let session = self.pump(&connection).await;
        connection.close();

        let disconnected = self.transport.disconnect().await;
        match (session, disconnected) {
            (Ok(end), Ok(())) => Ok(end),
            (Ok(_), Err(error)) => Err(error),
            (Err(error), Err(disconnect_error)) => {
                debug!(error = %disconnect_error, "disconnect after transport failure also failed");
                Err(error)
            }
            (Err(error), Ok(())) => Err(error),
        }
    }

    async fn pump(&self, connection: &Arc<SocketConnection>) -> Result<SessionEnd, TransportError> {
        loop {
            let Some(raw) = self.transport.next_message().await? else {
                info!(connection_id = connection.id(), "socket mode transport stream closed");
                return Ok(SessionEnd::StreamClosed);
            };

            let message = match SocketModeMessage::parse(raw.as_str()) {
                Ok(message) => message,
                Err(_) => {
                    self.router.dispatch(connection.clone(), raw).await;
                    continue;
                }
            };

            let disconnect = (message.envelope_type == EnvelopeType::Disconnect)
                .then(|| SessionEnd::DisconnectRequested { reason: message.reason.clone() });
            self.router.dispatch_message(connection.clone(), message).await;

            if let Some(end) = disconnect {
                return Ok(end);
            }
        }
    }
}
