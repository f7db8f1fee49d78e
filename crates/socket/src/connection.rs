use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ack::AckError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

/// Raw text duplex carrying socket mode frames. Connection establishment
/// and TLS live behind this seam.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the server closed the stream.
    async fn next_message(&self) -> Result<Option<String>, TransportError>;
    async fn send(&self, text: String) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Reply frame for one envelope.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AckEnvelope<'a> {
    pub envelope_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<&'a Value>,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One connected transport session. Every ack goes through here, one
/// writer at a time; once closed, sends fail with `ConnectionClosed`.
pub struct SocketConnection {
    id: u64,
    transport: Arc<dyn SocketTransport>,
    write_lock: Mutex<()>,
    open: AtomicBool,
}

impl SocketConnection {
    pub fn new(transport: Arc<dyn SocketTransport>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            write_lock: Mutex::new(()),
            open: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(connection_id = self.id, "socket connection closed");
        }
    }

    pub async fn send_ack(
        &self,
        envelope_id: &str,
        payload: Option<&Value>,
    ) -> Result<(), AckError> {
        let text = serde_json::to_string(&AckEnvelope { envelope_id, payload })?;

        let _writer = self.write_lock.lock().await;
        if !self.is_open() {
            return Err(AckError::ConnectionClosed { envelope_id: envelope_id.to_owned() });
        }
        self.transport.send(text).await?;
        Ok(())
    }
}

impl std::fmt::Debug for SocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketConnection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
