use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use slackwire_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use slackwire_core::{EventsApiPayload, InteractivePayload, SlashCommandPayload};
use slackwire_socket::{
    AckContext, DispatchError, DispatchOutcome, HandlerError, RouterConfig, SocketConnection,
    SocketModeMessage, SocketModeRouter, SocketTransport, TransportError,
};
use tokio::sync::Mutex;
use tracing::info;

use crate::commands::CommandResult;

const COMMAND: &str = "replay";

/// Transport that plays back captured frames and records what gets sent.
#[derive(Default)]
pub struct ReplayTransport {
    frames: Mutex<VecDeque<String>>,
    sent: Mutex<Vec<String>>,
}

impl ReplayTransport {
    pub fn from_capture(capture: &str) -> Self {
        let frames = capture
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_owned)
            .collect();
        Self { frames: Mutex::new(frames), sent: Mutex::default() }
    }

    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SocketTransport for ReplayTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_message(&self) -> Result<Option<String>, TransportError> {
        Ok(self.frames.lock().await.pop_front())
    }

    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.sent.lock().await.push(text);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    envelopes: usize,
    outcomes: Vec<DispatchOutcome>,
    acks: Vec<Value>,
    errors: Vec<String>,
}

pub fn run(path: &Path, ack_timeout_ms: Option<u64>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions {
        overrides: ConfigOverrides { ack_timeout_ms, ..ConfigOverrides::default() },
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
        }
    };

    let capture = match fs::read_to_string(path) {
        Ok(capture) => capture,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "io",
                format!("could not read `{}`: {error}", path.display()),
                2,
            )
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure(COMMAND, "runtime", error.to_string(), 1),
    };

    let report = runtime.block_on(replay(&config, &capture));
    let message = format!(
        "replayed {} envelopes ({} acks sent, {} errors)",
        report.envelopes,
        report.acks.len(),
        report.errors.len()
    );
    match serde_json::to_value(&report) {
        Ok(details) => CommandResult::success(COMMAND, message, Some(details)),
        Err(error) => CommandResult::failure(COMMAND, "serialization", error.to_string(), 1),
    }
}

async fn replay(config: &AppConfig, capture: &str) -> ReplayReport {
    let transport = Arc::new(ReplayTransport::from_capture(capture));
    let connection = Arc::new(SocketConnection::new(transport.clone()));
    let router = SocketModeRouter::new(RouterConfig::from(&config.socket));
    let errors = Arc::new(StdMutex::new(Vec::new()));
    register_logging_handlers(&router, errors.clone());

    let mut handles = Vec::new();
    while let Ok(Some(frame)) = transport.next_message().await {
        handles.push(router.dispatch(connection.clone(), frame).await);
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Some(outcome) = handle.outcome().await {
            outcomes.push(outcome);
        }
    }
    connection.close();

    let acks = transport
        .sent()
        .await
        .iter()
        .map(|text| serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone())))
        .collect();
    let errors = errors.lock().unwrap_or_else(PoisonError::into_inner).clone();

    ReplayReport { envelopes: outcomes.len(), outcomes, acks, errors }
}

/// Handlers that only log; the router supplies the bare acks.
fn register_logging_handlers(router: &SocketModeRouter, errors: Arc<StdMutex<Vec<String>>>) {
    router.on_socket_mode_message(|message: Arc<SocketModeMessage>| async move {
        info!(
            event_name = "replay.socket_mode_message",
            envelope_type = %message.envelope_type,
            envelope_id = message.envelope_id.as_deref().unwrap_or("none"),
            "replayed socket mode frame"
        );
        Ok::<(), HandlerError>(())
    });

    router.on_interactive(|ctx: AckContext, payload: Arc<InteractivePayload>| async move {
        info!(
            event_name = "replay.interactive",
            envelope_id = ctx.envelope_id(),
            payload_type = payload.payload_type(),
            callback_id = payload.callback_id().unwrap_or("none"),
            "replayed interactive payload"
        );
        Ok::<(), HandlerError>(())
    });

    router.on_slash_command(|ctx: AckContext, command: Arc<SlashCommandPayload>| async move {
        info!(
            event_name = "replay.slash_command",
            envelope_id = ctx.envelope_id(),
            command = %command.command,
            "replayed slash command"
        );
        Ok::<(), HandlerError>(())
    });

    router.on_events_api(|ctx: AckContext, callback: Arc<EventsApiPayload>| async move {
        info!(
            event_name = "replay.events_api",
            envelope_id = ctx.envelope_id(),
            event_type = callback.event_type().unwrap_or("none"),
            "replayed events api callback"
        );
        Ok::<(), HandlerError>(())
    });

    router.on_error(move |error: &DispatchError| {
        errors.lock().unwrap_or_else(PoisonError::into_inner).push(error.to_string());
    });
}
