use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::connection::{SocketConnection, TransportError};

#[derive(Debug, Error)]
pub enum AckError {
    #[error("envelope `{envelope_id}` was already acknowledged")]
    AlreadyAcknowledged { envelope_id: String },
    #[error("connection closed before envelope `{envelope_id}` was acknowledged")]
    ConnectionClosed { envelope_id: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("ack payload could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Who sent the single wire ack for an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckSource {
    Handler,
    HandlersCompleted,
    Deadline,
    DecodeFailure,
    NoHandlers,
}

impl AckSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handler => "handler",
            Self::HandlersCompleted => "handlers_completed",
            Self::Deadline => "deadline",
            Self::DecodeFailure => "decode_failure",
            Self::NoHandlers => "no_handlers",
        }
    }
}

impl fmt::Display for AckSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-envelope handle handlers use to acknowledge. Clones share the same
/// single-assignment ack slot.
#[derive(Clone)]
pub struct AckContext {
    inner: Arc<AckState>,
}

struct AckState {
    envelope_id: String,
    accepts_response_payload: bool,
    connection: Arc<SocketConnection>,
    claimed: OnceLock<AckSource>,
    delivery: OnceLock<Option<String>>,
    acked: Notify,
}

impl AckContext {
    pub fn new(
        envelope_id: impl Into<String>,
        accepts_response_payload: bool,
        connection: Arc<SocketConnection>,
    ) -> Self {
        Self {
            inner: Arc::new(AckState {
                envelope_id: envelope_id.into(),
                accepts_response_payload,
                connection,
                claimed: OnceLock::new(),
                delivery: OnceLock::new(),
                acked: Notify::new(),
            }),
        }
    }

    pub fn envelope_id(&self) -> &str {
        &self.inner.envelope_id
    }

    /// Whether the platform will use a response body sent with the ack.
    pub fn accepts_response_payload(&self) -> bool {
        self.inner.accepts_response_payload
    }

    pub fn is_acknowledged(&self) -> bool {
        self.inner.claimed.get().is_some()
    }

    pub fn ack_source(&self) -> Option<AckSource> {
        self.inner.claimed.get().copied()
    }

    pub async fn ack(&self, payload: Option<Value>) -> Result<(), AckError> {
        self.send(AckSource::Handler, payload.as_ref()).await
    }

    pub async fn ack_with<T>(&self, payload: &T) -> Result<(), AckError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        self.ack(Some(payload)).await
    }

    pub(crate) async fn send(
        &self,
        source: AckSource,
        payload: Option<&Value>,
    ) -> Result<(), AckError> {
        let state = &self.inner;
        if !state.connection.is_open() {
            return Err(AckError::ConnectionClosed { envelope_id: state.envelope_id.clone() });
        }
        if state.claimed.set(source).is_err() {
            debug!(
                envelope_id = %state.envelope_id,
                attempted_by = %source,
                "duplicate acknowledgment suppressed"
            );
            return Err(AckError::AlreadyAcknowledged { envelope_id: state.envelope_id.clone() });
        }

        let result = state.connection.send_ack(&state.envelope_id, payload).await;
        match &result {
            Ok(()) => {
                debug!(
                    event_name = "ingress.socket.ack_sent",
                    envelope_id = %state.envelope_id,
                    correlation_id = %state.envelope_id,
                    ack_source = %source,
                    with_payload = payload.is_some(),
                    "acknowledged socket envelope"
                );
            }
            Err(error) => {
                warn!(
                    event_name = "ingress.socket.ack_sent",
                    envelope_id = %state.envelope_id,
                    correlation_id = %state.envelope_id,
                    ack_source = %source,
                    error = %error,
                    "failed to acknowledge socket envelope"
                );
            }
        }
        let _ = state.delivery.set(result.as_ref().err().map(ToString::to_string));
        if source == AckSource::Handler {
            state.acked.notify_one();
        }
        result
    }

    /// Resolves once a handler ack has been written or has failed to write.
    /// Only one handler ack is ever attempted, so a single waiter sees it.
    pub(crate) async fn handler_acked(&self) {
        self.inner.acked.notified().await;
    }

    /// Whether a clone is still held outside the router, e.g. by a task a
    /// handler spawned to ack later.
    pub(crate) fn is_held_elsewhere(&self) -> bool {
        Arc::strong_count(&self.inner) > 1
    }

    /// Error text of the wire send, once the claimed ack has been attempted.
    pub(crate) fn delivery_error(&self) -> Option<String> {
        self.inner.delivery.get().cloned().flatten()
    }
}

impl fmt::Debug for AckContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckContext")
            .field("envelope_id", &self.inner.envelope_id)
            .field("accepts_response_payload", &self.inner.accepts_response_payload)
            .field("ack_source", &self.inner.claimed.get())
            .finish()
    }
}
