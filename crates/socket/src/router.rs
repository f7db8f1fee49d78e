use std::fmt;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use slackwire_core::config::SocketConfig;
use slackwire_core::decode::DecodeError;
use slackwire_core::{EventsApiPayload, InteractivePayload, SlashCommandPayload};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ack::{AckContext, AckError, AckSource};
use crate::connection::SocketConnection;
use crate::envelope::{salvage_envelope_id, EnvelopeType, SocketModeMessage};

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(2_500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    /// How long handlers get before the router sends a bare ack itself.
    pub ack_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { ack_timeout: DEFAULT_ACK_TIMEOUT }
    }
}

impl From<&SocketConfig> for RouterConfig {
    fn from(config: &SocketConfig) -> Self {
        Self { ack_timeout: Duration::from_millis(config.ack_timeout_ms) }
    }
}

/// Ack deadline for one envelope, counted from when it was received.
#[derive(Clone, Copy, Debug)]
struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    fn starting_at(received: Instant, timeout: Duration) -> Self {
        Self { at: received + timeout, timeout }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    SocketModeMessage,
    Interactive,
    SlashCommands,
    EventsApi,
}

impl HandlerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SocketModeMessage => "socket_mode_message",
            Self::Interactive => "interactive",
            Self::SlashCommands => "slash_commands",
            Self::EventsApi => "events_api",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Received,
    Decoded,
    HandlersInvoked,
    Acknowledged,
    AcknowledgedAfterError,
    /// Control frame handed to observers; nothing to acknowledge.
    Delivered,
    /// Unparseable text with no envelope id to acknowledge.
    Discarded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub envelope_id: Option<String>,
    pub kind: Option<HandlerKind>,
    pub state: DispatchState,
    pub ack_source: Option<AckSource>,
    pub ack_error: Option<String>,
    pub handler_failures: usize,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Ack(#[from] AckError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Everything the router reports to `on_error` hooks.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("envelope `{}` could not be decoded: {source}", .envelope_id.as_deref().unwrap_or("<none>"))]
    Decode {
        envelope_id: Option<String>,
        #[source]
        source: DecodeError,
    },
    #[error("{kind} handler failed for envelope `{}`: {source}", .envelope_id.as_deref().unwrap_or("<none>"))]
    Handler {
        envelope_id: Option<String>,
        kind: HandlerKind,
        #[source]
        source: HandlerError,
    },
    #[error("no handler acknowledged envelope `{envelope_id}` within {timeout:?}")]
    AckTimeout { envelope_id: String, timeout: Duration },
    #[error("acknowledgment for envelope `{envelope_id}` failed: {source}")]
    Ack {
        envelope_id: String,
        #[source]
        source: AckError,
    },
}

/// Observes every parsed frame routed to it: control frames and envelope
/// kinds without a typed model.
#[async_trait]
pub trait SocketModeMessageHandler: Send + Sync {
    async fn handle(&self, message: Arc<SocketModeMessage>) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> SocketModeMessageHandler for F
where
    F: Fn(Arc<SocketModeMessage>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: Arc<SocketModeMessage>) -> Result<(), HandlerError> {
        (self)(message).await
    }
}

/// Handles a decoded payload that must be acknowledged through `context`.
#[async_trait]
pub trait AckHandler<P>: Send + Sync
where
    P: Send + Sync + 'static,
{
    async fn handle(&self, context: AckContext, payload: Arc<P>) -> Result<(), HandlerError>;
}

#[async_trait]
impl<P, F, Fut> AckHandler<P> for F
where
    P: Send + Sync + 'static,
    F: Fn(AckContext, Arc<P>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, context: AckContext, payload: Arc<P>) -> Result<(), HandlerError> {
        (self)(context, payload).await
    }
}

type ErrorHook = Arc<dyn Fn(&DispatchError) + Send + Sync>;

#[derive(Clone, Default)]
struct ErrorHooks(Vec<ErrorHook>);

impl ErrorHooks {
    fn report(&self, error: &DispatchError) {
        warn!(event_name = "ingress.socket.dispatch_error", error = %error, "socket dispatch error");
        for hook in &self.0 {
            hook(error);
        }
    }
}

#[derive(Clone, Default)]
struct HandlerRegistry {
    socket_mode: Vec<Arc<dyn SocketModeMessageHandler>>,
    interactive: Vec<Arc<dyn AckHandler<InteractivePayload>>>,
    slash_commands: Vec<Arc<dyn AckHandler<SlashCommandPayload>>>,
    events_api: Vec<Arc<dyn AckHandler<EventsApiPayload>>>,
    error_hooks: ErrorHooks,
}

/// Awaitable result of one `dispatch` call.
#[derive(Debug)]
pub struct DispatchHandle {
    envelope_id: Option<String>,
    receiver: oneshot::Receiver<DispatchOutcome>,
}

impl DispatchHandle {
    fn ready(outcome: DispatchOutcome) -> Self {
        let (sender, receiver) = oneshot::channel();
        let envelope_id = outcome.envelope_id.clone();
        let _ = sender.send(outcome);
        Self { envelope_id, receiver }
    }

    pub fn envelope_id(&self) -> Option<&str> {
        self.envelope_id.as_deref()
    }

    /// Resolves once the envelope's handlers have finished and its ack has
    /// settled. `None` if the runtime dropped the supervising task.
    pub async fn outcome(self) -> Option<DispatchOutcome> {
        self.receiver.await.ok()
    }
}

/// Routes inbound socket mode frames to registered handlers and guarantees a
/// single acknowledgment per envelope.
#[derive(Default)]
pub struct SocketModeRouter {
    registry: RwLock<HandlerRegistry>,
    config: RouterConfig,
}

impl SocketModeRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { registry: RwLock::default(), config }
    }

    pub fn config(&self) -> RouterConfig {
        self.config
    }

    pub fn on_socket_mode_message<H>(&self, handler: H)
    where
        H: SocketModeMessageHandler + 'static,
    {
        self.register(|registry| registry.socket_mode.push(Arc::new(handler)));
    }

    pub fn on_interactive<H>(&self, handler: H)
    where
        H: AckHandler<InteractivePayload> + 'static,
    {
        self.register(|registry| registry.interactive.push(Arc::new(handler)));
    }

    pub fn on_slash_command<H>(&self, handler: H)
    where
        H: AckHandler<SlashCommandPayload> + 'static,
    {
        self.register(|registry| registry.slash_commands.push(Arc::new(handler)));
    }

    pub fn on_events_api<H>(&self, handler: H)
    where
        H: AckHandler<EventsApiPayload> + 'static,
    {
        self.register(|registry| registry.events_api.push(Arc::new(handler)));
    }

    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&DispatchError) + Send + Sync + 'static,
    {
        self.register(|registry| registry.error_hooks.0.push(Arc::new(hook)));
    }

    fn register(&self, apply: impl FnOnce(&mut HandlerRegistry)) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut registry);
    }

    fn snapshot(&self) -> HandlerRegistry {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Routes one raw frame. Returns once handler invocation for it has been
    /// started, so successive calls keep arrival order.
    pub async fn dispatch(
        &self,
        connection: Arc<SocketConnection>,
        raw: impl Into<String>,
    ) -> DispatchHandle {
        let raw = raw.into();
        match SocketModeMessage::parse(raw.as_str()) {
            Ok(message) => self.dispatch_message(connection, message).await,
            Err(source) => reject(self.snapshot().error_hooks, connection, &raw, source).await,
        }
    }

    /// Same as `dispatch` for a frame the caller has already parsed.
    pub async fn dispatch_message(
        &self,
        connection: Arc<SocketConnection>,
        message: SocketModeMessage,
    ) -> DispatchHandle {
        let received = Instant::now();
        let registry = self.snapshot();
        let message = Arc::new(message);

        info!(
            event_name = "ingress.socket.envelope_received",
            envelope_id = message.envelope_id.as_deref().unwrap_or("none"),
            correlation_id = message.envelope_id.as_deref().unwrap_or("none"),
            envelope_type = %message.envelope_type,
            retry_attempt = message.retry_attempt.unwrap_or(0),
            "received socket envelope"
        );

        let envelope_id = match &message.envelope_id {
            Some(envelope_id) if !message.envelope_type.is_control() => envelope_id.clone(),
            _ => return deliver(registry, message).await,
        };
        let context = AckContext::new(envelope_id, message.accepts_response_payload, connection);
        let deadline = Deadline::starting_at(received, self.config.ack_timeout);

        let hooks = registry.error_hooks.clone();
        match &message.envelope_type {
            EnvelopeType::Interactive => {
                let decoded = message.payload_object().and_then(InteractivePayload::from_object);
                let kind = HandlerKind::Interactive;
                route(registry.interactive, hooks, kind, context, decoded, deadline).await
            }
            EnvelopeType::SlashCommands => {
                let decoded = decode_payload(&message, "slash_commands");
                let kind = HandlerKind::SlashCommands;
                route(registry.slash_commands, hooks, kind, context, decoded, deadline).await
            }
            EnvelopeType::EventsApi => {
                let decoded = decode_payload(&message, "events_api");
                let kind = HandlerKind::EventsApi;
                route(registry.events_api, hooks, kind, context, decoded, deadline).await
            }
            EnvelopeType::Hello | EnvelopeType::Disconnect | EnvelopeType::Other(_) => {
                observe_then_ack(registry, context, message, deadline).await
            }
        }
    }
}

fn decode_payload<P>(message: &SocketModeMessage, variant: &str) -> Result<P, DecodeError>
where
    P: DeserializeOwned,
{
    let object = message.payload_object()?;
    serde_json::from_value(Value::Object(object))
        .map_err(|source| DecodeError::Malformed { variant: variant.to_owned(), source })
}

fn trace_state(envelope_id: &str, kind: HandlerKind, state: DispatchState) {
    debug!(envelope_id, kind = %kind, dispatch_state = ?state, "socket envelope state changed");
}

async fn reject(
    hooks: ErrorHooks,
    connection: Arc<SocketConnection>,
    raw: &str,
    source: DecodeError,
) -> DispatchHandle {
    let envelope_id = salvage_envelope_id(raw);
    hooks.report(&DispatchError::Decode { envelope_id: envelope_id.clone(), source });

    let Some(envelope_id) = envelope_id else {
        return DispatchHandle::ready(DispatchOutcome {
            envelope_id: None,
            kind: None,
            state: DispatchState::Discarded,
            ack_source: None,
            ack_error: None,
            handler_failures: 0,
        });
    };

    let context = AckContext::new(envelope_id, false, connection);
    bare_ack(context, None, AckSource::DecodeFailure, hooks).await
}

/// Acks inline without running handlers: decode failures and kinds nobody
/// handles.
async fn bare_ack(
    context: AckContext,
    kind: Option<HandlerKind>,
    source: AckSource,
    hooks: ErrorHooks,
) -> DispatchHandle {
    let ack_error = fallback_ack(&context, source, &hooks).await;
    let failed = source == AckSource::DecodeFailure || ack_error.is_some();
    let outcome = DispatchOutcome {
        envelope_id: Some(context.envelope_id().to_owned()),
        kind,
        state: if failed {
            DispatchState::AcknowledgedAfterError
        } else {
            DispatchState::Acknowledged
        },
        ack_source: context.ack_source(),
        ack_error,
        handler_failures: 0,
    };
    debug!(
        event_name = "ingress.socket.dispatch_completed",
        envelope_id = context.envelope_id(),
        dispatch_state = ?outcome.state,
        ack_source = %source,
        "socket envelope settled without handlers"
    );
    DispatchHandle::ready(outcome)
}

async fn route<P>(
    handlers: Vec<Arc<dyn AckHandler<P>>>,
    hooks: ErrorHooks,
    kind: HandlerKind,
    context: AckContext,
    decoded: Result<P, DecodeError>,
    deadline: Deadline,
) -> DispatchHandle
where
    P: Send + Sync + 'static,
{
    let payload = match decoded {
        Ok(payload) => Arc::new(payload),
        Err(source) => {
            hooks.report(&DispatchError::Decode {
                envelope_id: Some(context.envelope_id().to_owned()),
                source,
            });
            return bare_ack(context, Some(kind), AckSource::DecodeFailure, hooks).await;
        }
    };
    trace_state(context.envelope_id(), kind, DispatchState::Decoded);

    if handlers.is_empty() {
        return bare_ack(context, Some(kind), AckSource::NoHandlers, hooks).await;
    }

    let (started, invoked) = oneshot::channel();
    let invocation = tokio::spawn(invoke_ack_handlers(
        handlers,
        context.clone(),
        payload,
        kind,
        hooks.clone(),
        started,
    ));
    let _ = invoked.await;
    trace_state(context.envelope_id(), kind, DispatchState::HandlersInvoked);

    supervise(context, kind, invocation, deadline, hooks)
}

async fn observe_then_ack(
    registry: HandlerRegistry,
    context: AckContext,
    message: Arc<SocketModeMessage>,
    deadline: Deadline,
) -> DispatchHandle {
    let kind = HandlerKind::SocketModeMessage;
    if registry.socket_mode.is_empty() {
        return bare_ack(context, Some(kind), AckSource::NoHandlers, registry.error_hooks).await;
    }

    let (started, invoked) = oneshot::channel();
    let invocation = tokio::spawn(invoke_observers(
        registry.socket_mode,
        message,
        registry.error_hooks.clone(),
        started,
    ));
    let _ = invoked.await;
    trace_state(context.envelope_id(), kind, DispatchState::HandlersInvoked);

    supervise(context, kind, invocation, deadline, registry.error_hooks)
}

async fn deliver(registry: HandlerRegistry, message: Arc<SocketModeMessage>) -> DispatchHandle {
    let envelope_id = message.envelope_id.clone();
    let (started, invoked) = oneshot::channel();
    let invocation = tokio::spawn(invoke_observers(
        registry.socket_mode,
        message,
        registry.error_hooks.clone(),
        started,
    ));
    let _ = invoked.await;

    let (sender, receiver) = oneshot::channel();
    let outcome_id = envelope_id.clone();
    tokio::spawn(async move {
        let handler_failures = joined_failures(
            invocation.await,
            outcome_id.as_deref(),
            HandlerKind::SocketModeMessage,
            &registry.error_hooks,
        );
        complete(
            DispatchOutcome {
                envelope_id: outcome_id,
                kind: Some(HandlerKind::SocketModeMessage),
                state: DispatchState::Delivered,
                ack_source: None,
                ack_error: None,
                handler_failures,
            },
            sender,
        );
    });

    DispatchHandle { envelope_id, receiver }
}

async fn invoke_ack_handlers<P>(
    handlers: Vec<Arc<dyn AckHandler<P>>>,
    context: AckContext,
    payload: Arc<P>,
    kind: HandlerKind,
    hooks: ErrorHooks,
    started: oneshot::Sender<()>,
) -> usize
where
    P: Send + Sync + 'static,
{
    let mut started = Some(started);
    let mut failures = 0;

    for handler in handlers {
        let call = handler.handle(context.clone(), payload.clone());
        if let Err(source) = run_handler(call, &mut started).await {
            failures += 1;
            hooks.report(&DispatchError::Handler {
                envelope_id: Some(context.envelope_id().to_owned()),
                kind,
                source,
            });
        }
    }

    failures
}

async fn invoke_observers(
    handlers: Vec<Arc<dyn SocketModeMessageHandler>>,
    message: Arc<SocketModeMessage>,
    hooks: ErrorHooks,
    started: oneshot::Sender<()>,
) -> usize {
    let mut started = Some(started);
    let mut failures = 0;

    for handler in handlers {
        let call = handler.handle(message.clone());
        if let Err(source) = run_handler(call, &mut started).await {
            failures += 1;
            hooks.report(&DispatchError::Handler {
                envelope_id: message.envelope_id.clone(),
                kind: HandlerKind::SocketModeMessage,
                source,
            });
        }
    }

    failures
}

type HandlerCall<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// Drives one handler call. The first call is polled once before `started`
/// fires, so the next envelope's handlers cannot overtake it.
async fn run_handler(
    mut call: HandlerCall<'_>,
    started: &mut Option<oneshot::Sender<()>>,
) -> Result<(), HandlerError> {
    let Some(signal) = started.take() else {
        return call.await;
    };

    let first = poll_fn(|cx| Poll::Ready(call.as_mut().poll(cx))).await;
    let _ = signal.send(());
    match first {
        Poll::Ready(result) => result,
        Poll::Pending => call.await,
    }
}

/// Races the first handler ack against handler completion and the deadline,
/// then waits for the handlers to finish before reporting the outcome.
///
/// Handlers returning without an ack get the bare ack straight away, unless a
/// clone of the context outlived them; that clone keeps its chance to ack
/// until the deadline.
fn supervise(
    context: AckContext,
    kind: HandlerKind,
    mut invocation: JoinHandle<usize>,
    deadline: Deadline,
    hooks: ErrorHooks,
) -> DispatchHandle {
    let (sender, receiver) = oneshot::channel();
    let envelope_id = context.envelope_id().to_owned();

    tokio::spawn(async move {
        let mut handler_failures = None;
        let mut handler_ack_settled = false;

        let ack_error = tokio::select! {
            biased;
            _ = context.handler_acked() => {
                handler_ack_settled = true;
                None
            }
            joined = &mut invocation => {
                let envelope_id = Some(context.envelope_id());
                handler_failures = Some(joined_failures(joined, envelope_id, kind, &hooks));
                if context.is_held_elsewhere() {
                    tokio::select! {
                        biased;
                        _ = context.handler_acked() => {
                            handler_ack_settled = true;
                            None
                        }
                        _ = tokio::time::sleep_until(deadline.at) => {
                            deadline_ack(&context, deadline, &hooks).await
                        }
                    }
                } else {
                    fallback_ack(&context, AckSource::HandlersCompleted, &hooks).await
                }
            }
            _ = tokio::time::sleep_until(deadline.at) => {
                deadline_ack(&context, deadline, &hooks).await
            }
        };

        // A handler claimed the slot while the router was settling; wait for
        // its write so the outcome reflects what reached the wire.
        if !handler_ack_settled && context.ack_source() == Some(AckSource::Handler) {
            context.handler_acked().await;
        }

        let handler_failures = match handler_failures {
            Some(failures) => failures,
            None => joined_failures(invocation.await, Some(context.envelope_id()), kind, &hooks),
        };
        let ack_error = ack_error.or_else(|| context.delivery_error());
        let state = if handler_failures > 0 || ack_error.is_some() {
            DispatchState::AcknowledgedAfterError
        } else {
            DispatchState::Acknowledged
        };

        complete(
            DispatchOutcome {
                envelope_id: Some(context.envelope_id().to_owned()),
                kind: Some(kind),
                state,
                ack_source: context.ack_source(),
                ack_error,
                handler_failures,
            },
            sender,
        );
    });

    DispatchHandle { envelope_id: Some(envelope_id), receiver }
}

async fn deadline_ack(
    context: &AckContext,
    deadline: Deadline,
    hooks: &ErrorHooks,
) -> Option<String> {
    if !context.is_acknowledged() {
        hooks.report(&DispatchError::AckTimeout {
            envelope_id: context.envelope_id().to_owned(),
            timeout: deadline.timeout,
        });
    }
    fallback_ack(context, AckSource::Deadline, hooks).await
}

/// Sends the router's own bare ack unless a handler got there first.
/// Returns the failure text when the ack could not be delivered.
async fn fallback_ack(
    context: &AckContext,
    source: AckSource,
    hooks: &ErrorHooks,
) -> Option<String> {
    match context.send(source, None).await {
        Ok(()) => None,
        Err(AckError::AlreadyAcknowledged { .. }) => None,
        Err(error) => {
            let message = error.to_string();
            hooks.report(&DispatchError::Ack {
                envelope_id: context.envelope_id().to_owned(),
                source: error,
            });
            Some(message)
        }
    }
}

fn joined_failures(
    joined: Result<usize, JoinError>,
    envelope_id: Option<&str>,
    kind: HandlerKind,
    hooks: &ErrorHooks,
) -> usize {
    match joined {
        Ok(failures) => failures,
        Err(error) => {
            hooks.report(&DispatchError::Handler {
                envelope_id: envelope_id.map(str::to_owned),
                kind,
                source: HandlerError::failed(format!("handler task aborted: {error}")),
            });
            1
        }
    }
}

fn complete(outcome: DispatchOutcome, sender: oneshot::Sender<DispatchOutcome>) {
    debug!(
        event_name = "ingress.socket.dispatch_completed",
        envelope_id = outcome.envelope_id.as_deref().unwrap_or("none"),
        dispatch_state = ?outcome.state,
        ack_source = outcome.ack_source.map(AckSource::as_str).unwrap_or("none"),
        handler_failures = outcome.handler_failures,
        "socket envelope settled"
    );
    let _ = sender.send(outcome);
}
