use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use slackwire_core::{InteractivePayload, SlashCommandPayload};
use slackwire_socket::{
    AckContext, AckError, AckSource, DispatchError, DispatchState, HandlerError, HandlerKind,
    RouterConfig, SocketConnection, SocketModeMessage, SocketModeRouter, SocketTransport,
    TransportError,
};
use tokio::sync::{oneshot, Mutex, Notify};

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<String>>,
}

impl RecordingTransport {
    async fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|text| serde_json::from_str(text).expect("ack frames are json"))
            .collect()
    }
}

#[async_trait]
impl SocketTransport for RecordingTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_message(&self) -> Result<Option<String>, TransportError> {
        Ok(None)
    }

    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.sent.lock().await.push(text);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

type Log = Arc<StdMutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(StdMutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().expect("log lock").clone()
}

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().expect("log lock").push(entry.into());
}

fn harness() -> (SocketModeRouter, Arc<RecordingTransport>, Arc<SocketConnection>, Log) {
    let router = SocketModeRouter::new(RouterConfig::default());
    let transport = Arc::new(RecordingTransport::default());
    let connection = Arc::new(SocketConnection::new(transport.clone()));
    let errors = log();

    let sink = errors.clone();
    router.on_error(move |error: &DispatchError| {
        let label = match error {
            DispatchError::Decode { .. } => "decode",
            DispatchError::Handler { .. } => "handler",
            DispatchError::AckTimeout { .. } => "ack_timeout",
            DispatchError::Ack { .. } => "ack",
        };
        push(&sink, label);
    });

    (router, transport, connection, errors)
}

fn block_actions_envelope(envelope_id: &str) -> String {
    json!({
        "type": "interactive",
        "envelope_id": envelope_id,
        "accepts_response_payload": false,
        "payload": {
            "type": "block_actions",
            "trigger_id": "13345224609.738474920.8088930838d88f008e0",
            "user": { "id": "U123", "username": "ada" },
            "team": { "id": "T123", "domain": "acme" },
            "container": { "type": "message", "message_ts": "1771366531.000100", "channel_id": "C123" },
            "api_app_id": "A123",
            "actions": [{ "type": "button", "action_id": "approve", "value": "Q-1" }]
        }
    })
    .to_string()
}

#[tokio::test]
async fn handler_ack_is_sent_once_with_its_body() {
    let (router, transport, connection, errors) = harness();
    let second_ack = log();

    let record = second_ack.clone();
    router.on_interactive(move |ctx: AckContext, _payload: Arc<InteractivePayload>| {
        let record = record.clone();
        async move {
            ctx.ack(Some(json!({ "text": "on it" }))).await?;
            match ctx.ack(None).await {
                Err(AckError::AlreadyAcknowledged { .. }) => push(&record, "already_acknowledged"),
                other => push(&record, format!("unexpected: {other:?}")),
            }
            Ok::<(), HandlerError>(())
        }
    });

    let outcome = router
        .dispatch(connection, block_actions_envelope("env-1"))
        .await
        .outcome()
        .await
        .expect("dispatch settles");

    assert_eq!(outcome.state, DispatchState::Acknowledged);
    assert_eq!(outcome.kind, Some(HandlerKind::Interactive));
    assert_eq!(outcome.ack_source, Some(AckSource::Handler));
    assert_eq!(entries(&second_ack), vec!["already_acknowledged"]);
    assert!(entries(&errors).is_empty());
    assert_eq!(
        transport.sent().await,
        vec![json!({ "envelope_id": "env-1", "payload": { "text": "on it" } })]
    );
}

#[tokio::test(start_paused = true)]
async fn router_acks_bare_when_the_deadline_passes() {
    let (router, transport, connection, errors) = harness();
    let late_ack = log();

    let record = late_ack.clone();
    router.on_interactive(move |ctx: AckContext, _payload: Arc<InteractivePayload>| {
        let record = record.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            if let Err(error) = ctx.ack(None).await {
                push(&record, error.to_string());
            }
            Ok::<(), HandlerError>(())
        }
    });

    let outcome = router
        .dispatch(connection, block_actions_envelope("env-slow"))
        .await
        .outcome()
        .await
        .expect("dispatch settles");

    assert_eq!(outcome.ack_source, Some(AckSource::Deadline));
    assert_eq!(outcome.state, DispatchState::Acknowledged);
    assert_eq!(entries(&errors), vec!["ack_timeout"]);
    assert_eq!(entries(&late_ack), vec!["envelope `env-slow` was already acknowledged"]);
    assert_eq!(transport.sent().await, vec![json!({ "envelope_id": "env-slow" })]);
}

#[tokio::test(start_paused = true)]
async fn context_handed_to_a_task_can_still_ack_with_a_body() {
    let (router, transport, connection, errors) = harness();
    let late_ack = log();

    let record = late_ack.clone();
    router.on_interactive(move |ctx: AckContext, _payload: Arc<InteractivePayload>| {
        let record = record.clone();
        async move {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                match ctx.ack(Some(json!({ "response_action": "update" }))).await {
                    Ok(()) => push(&record, "acked"),
                    Err(error) => push(&record, error.to_string()),
                }
            });
            Ok::<(), HandlerError>(())
        }
    });

    let outcome = router
        .dispatch(connection, block_actions_envelope("env-handoff"))
        .await
        .outcome()
        .await
        .expect("dispatch settles");

    assert_eq!(outcome.ack_source, Some(AckSource::Handler));
    assert_eq!(outcome.state, DispatchState::Acknowledged);
    assert_eq!(entries(&late_ack), vec!["acked"]);
    assert!(entries(&errors).is_empty());
    assert_eq!(
        transport.sent().await,
        vec![json!({ "envelope_id": "env-handoff", "payload": { "response_action": "update" } })]
    );
}

#[tokio::test(start_paused = true)]
async fn handed_off_context_that_never_acks_falls_back_to_the_deadline() {
    let (router, transport, connection, errors) = harness();
    router.on_interactive(|ctx: AckContext, _payload: Arc<InteractivePayload>| async move {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(ctx);
        });
        Ok::<(), HandlerError>(())
    });

    let started = tokio::time::Instant::now();
    let outcome = router
        .dispatch(connection, block_actions_envelope("env-orphan"))
        .await
        .outcome()
        .await
        .expect("dispatch settles");

    assert_eq!(outcome.ack_source, Some(AckSource::Deadline));
    assert!(started.elapsed() >= RouterConfig::default().ack_timeout);
    assert_eq!(entries(&errors), vec!["ack_timeout"]);
    assert_eq!(transport.sent().await, vec![json!({ "envelope_id": "env-orphan" })]);
}

#[tokio::test]
async fn deadline_counts_from_arrival_not_from_the_first_handler_poll() {
    let router = SocketModeRouter::new(RouterConfig { ack_timeout: Duration::from_millis(400) });
    let transport = Arc::new(RecordingTransport::default());
    let connection = Arc::new(SocketConnection::new(transport.clone()));
    let fired_after = Arc::new(StdMutex::new(None));

    let arrived = std::time::Instant::now();
    let record = fired_after.clone();
    router.on_error(move |error: &DispatchError| {
        if matches!(error, DispatchError::AckTimeout { .. }) {
            *record.lock().expect("lock") = Some(arrived.elapsed());
        }
    });
    router.on_interactive(|_ctx: AckContext, _payload: Arc<InteractivePayload>| async move {
        std::thread::sleep(Duration::from_millis(300));
        tokio::time::sleep(Duration::from_millis(600)).await;
        Ok::<(), HandlerError>(())
    });

    let outcome = router
        .dispatch(connection, block_actions_envelope("env-busy"))
        .await
        .outcome()
        .await
        .expect("dispatch settles");

    let fired_after = fired_after.lock().expect("lock").expect("deadline fired");
    assert_eq!(outcome.ack_source, Some(AckSource::Deadline));
    assert!(fired_after < Duration::from_millis(650), "deadline fired after {fired_after:?}");
    assert_eq!(transport.sent().await, vec![json!({ "envelope_id": "env-busy" })]);
}

#[tokio::test(start_paused = true)]
async fn handlers_that_never_ack_get_an_immediate_bare_ack() {
    let (router, transport, connection, errors) = harness();
    router.on_interactive(|_ctx: AckContext, _payload: Arc<InteractivePayload>| async {
        Ok::<(), HandlerError>(())
    });

    let started = tokio::time::Instant::now();
    let outcome = router
        .dispatch(connection, block_actions_envelope("env-quiet"))
        .await
        .outcome()
        .await
        .expect("dispatch settles");

    assert_eq!(outcome.ack_source, Some(AckSource::HandlersCompleted));
    assert!(started.elapsed() < RouterConfig::default().ack_timeout);
    assert!(entries(&errors).is_empty());
    assert_eq!(transport.sent().await, vec![json!({ "envelope_id": "env-quiet" })]);
}

#[tokio::test]
async fn decode_failure_is_reported_and_still_acked() {
    let (router, transport, connection, errors) = harness();
    let calls = log();

    let record = calls.clone();
    router.on_interactive(move |_ctx: AckContext, _payload: Arc<InteractivePayload>| {
        let record = record.clone();
        async move {
            push(&record, "called");
            Ok::<(), HandlerError>(())
        }
    });

    let raw = json!({
        "type": "interactive",
        "envelope_id": "env-bad",
        "payload": { "user": { "id": "U1" } }
    })
    .to_string();
    let outcome =
        router.dispatch(connection, raw).await.outcome().await.expect("dispatch settles");

    assert_eq!(outcome.state, DispatchState::AcknowledgedAfterError);
    assert_eq!(outcome.ack_source, Some(AckSource::DecodeFailure));
    assert_eq!(entries(&errors), vec!["decode"]);
    assert!(entries(&calls).is_empty());
    assert_eq!(transport.sent().await, vec![json!({ "envelope_id": "env-bad" })]);
}

#[tokio::test]
async fn malformed_frame_with_an_envelope_id_is_still_acked() {
    let (router, transport, connection, errors) = harness();

    let outcome = router
        .dispatch(connection, r#"{"envelope_id":"env-untyped","payload":{}}"#)
        .await
        .outcome()
        .await
        .expect("dispatch settles");

    assert_eq!(outcome.kind, None);
    assert_eq!(outcome.state, DispatchState::AcknowledgedAfterError);
    assert_eq!(entries(&errors), vec!["decode"]);
    assert_eq!(transport.sent().await, vec![json!({ "envelope_id": "env-untyped" })]);
}

#[tokio::test]
async fn unparseable_text_is_discarded() {
    let (router, transport, connection, errors) = harness();

    let outcome = router
        .dispatch(connection, "not json at all")
        .await
        .outcome()
        .await
        .expect("dispatch settles");

    assert_eq!(outcome.state, DispatchState::Discarded);
    assert_eq!(outcome.envelope_id, None);
    assert_eq!(entries(&errors), vec!["decode"]);
    assert!(transport.sent().await.is_empty());
}

#[tokio::test]
async fn control_frames_reach_socket_mode_handlers_without_an_ack() {
    let (router, transport, connection, _errors) = harness();
    let seen = log();

    let record = seen.clone();
    router.on_socket_mode_message(move |message: Arc<SocketModeMessage>| {
        let record = record.clone();
        async move {
            push(&record, message.envelope_type.to_string());
            Ok::<(), HandlerError>(())
        }
    });

    let hello = router.dispatch(connection.clone(), r#"{"type":"hello"}"#).await;
    let disconnect =
        router.dispatch(connection, r#"{"type":"disconnect","reason":"warning"}"#).await;

    assert_eq!(hello.outcome().await.map(|o| o.state), Some(DispatchState::Delivered));
    assert_eq!(disconnect.outcome().await.map(|o| o.state), Some(DispatchState::Delivered));
    assert_eq!(entries(&seen), vec!["hello", "disconnect"]);
    assert!(transport.sent().await.is_empty());
}

#[tokio::test]
async fn unrecognised_kinds_are_observed_then_acked() {
    let (router, transport, connection, _errors) = harness();
    let seen = log();

    let record = seen.clone();
    router.on_socket_mode_message(move |message: Arc<SocketModeMessage>| {
        let record = record.clone();
        async move {
            push(&record, message.envelope_type.to_string());
            Ok::<(), HandlerError>(())
        }
    });

    let outcome = router
        .dispatch(connection, r#"{"type":"workflow_step","envelope_id":"env-new","payload":{}}"#)
        .await
        .outcome()
        .await
        .expect("dispatch settles");

    assert_eq!(outcome.kind, Some(HandlerKind::SocketModeMessage));
    assert_eq!(outcome.ack_source, Some(AckSource::HandlersCompleted));
    assert_eq!(entries(&seen), vec!["workflow_step"]);
    assert_eq!(transport.sent().await, vec![json!({ "envelope_id": "env-new" })]);
}

#[tokio::test]
async fn failing_handler_does_not_stop_the_next_one() {
    let (router, transport, connection, errors) = harness();
    let calls = log();

    let first = calls.clone();
    router.on_interactive(move |_ctx: AckContext, _payload: Arc<InteractivePayload>| {
        let first = first.clone();
        async move {
            push(&first, "first");
            Err::<(), HandlerError>(HandlerError::failed("quote service unavailable"))
        }
    });
    let second = calls.clone();
    router.on_interactive(move |ctx: AckContext, _payload: Arc<InteractivePayload>| {
        let second = second.clone();
        async move {
            push(&second, "second");
            ctx.ack(None).await?;
            Ok::<(), HandlerError>(())
        }
    });

    let outcome = router
        .dispatch(connection, block_actions_envelope("env-err"))
        .await
        .outcome()
        .await
        .expect("dispatch settles");

    assert_eq!(entries(&calls), vec!["first", "second"]);
    assert_eq!(outcome.state, DispatchState::AcknowledgedAfterError);
    assert_eq!(outcome.handler_failures, 1);
    assert_eq!(outcome.ack_source, Some(AckSource::Handler));
    assert_eq!(entries(&errors), vec!["handler"]);
    assert_eq!(transport.sent().await.len(), 1);
}

#[tokio::test]
async fn ack_after_connection_drop_fails_with_connection_closed() {
    let (router, transport, connection, errors) = harness();
    let (release, released) = oneshot::channel::<()>();
    let released = Arc::new(Mutex::new(Some(released)));
    let results = log();

    let record = results.clone();
    router.on_interactive(move |ctx: AckContext, _payload: Arc<InteractivePayload>| {
        let record = record.clone();
        let released = released.clone();
        async move {
            if let Some(released) = released.lock().await.take() {
                let _ = released.await;
            }
            match ctx.ack(None).await {
                Err(AckError::ConnectionClosed { .. }) => push(&record, "connection_closed"),
                other => push(&record, format!("unexpected: {other:?}")),
            }
            Ok::<(), HandlerError>(())
        }
    });

    let handle = router.dispatch(connection.clone(), block_actions_envelope("env-drop")).await;
    connection.close();
    let _ = release.send(());
    let outcome = handle.outcome().await.expect("dispatch settles");

    assert_eq!(entries(&results), vec!["connection_closed"]);
    assert_eq!(outcome.state, DispatchState::AcknowledgedAfterError);
    assert_eq!(outcome.ack_source, None);
    assert!(outcome.ack_error.is_some());
    assert_eq!(entries(&errors), vec!["ack"]);
    assert!(transport.sent().await.is_empty());
}

#[tokio::test]
async fn late_registration_only_affects_later_envelopes() {
    let (router, _transport, connection, _errors) = harness();
    let seen = log();

    let first = router.dispatch(connection.clone(), block_actions_envelope("env-early")).await;
    first.outcome().await.expect("dispatch settles");

    let record = seen.clone();
    router.on_interactive(move |ctx: AckContext, _payload: Arc<InteractivePayload>| {
        let record = record.clone();
        async move {
            push(&record, ctx.envelope_id());
            Ok::<(), HandlerError>(())
        }
    });

    let second = router.dispatch(connection, block_actions_envelope("env-late")).await;
    second.outcome().await.expect("dispatch settles");

    assert_eq!(entries(&seen), vec!["env-late"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_invocation_follows_arrival_order() {
    let (router, _transport, connection, _errors) = harness();
    let started = log();

    let record = started.clone();
    router.on_interactive(move |ctx: AckContext, _payload: Arc<InteractivePayload>| {
        let record = record.clone();
        async move {
            push(&record, ctx.envelope_id());
            ctx.ack(None).await?;
            Ok::<(), HandlerError>(())
        }
    });

    let mut handles = Vec::new();
    for index in 0..20 {
        let raw = block_actions_envelope(&format!("env-{index}"));
        handles.push(router.dispatch(connection.clone(), raw).await);
    }
    for handle in handles {
        handle.outcome().await.expect("dispatch settles");
    }

    let expected: Vec<String> = (0..20).map(|index| format!("env-{index}")).collect();
    assert_eq!(entries(&started), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn next_envelope_handlers_run_while_earlier_ones_are_pending() {
    let (router, transport, connection, errors) = harness();
    let gate = Arc::new(Notify::new());

    router.on_interactive(move |ctx: AckContext, _payload: Arc<InteractivePayload>| {
        let gate = gate.clone();
        async move {
            if ctx.envelope_id() == "env-0" {
                gate.notified().await;
            } else {
                gate.notify_one();
            }
            ctx.ack(None).await?;
            Ok::<(), HandlerError>(())
        }
    });

    let first = router.dispatch(connection.clone(), block_actions_envelope("env-0")).await;
    let second = router.dispatch(connection, block_actions_envelope("env-1")).await;

    let settle = Duration::from_secs(5);
    let first = tokio::time::timeout(settle, first.outcome())
        .await
        .expect("env-0 settles once env-1 releases it")
        .expect("dispatch settles");
    let second = tokio::time::timeout(settle, second.outcome())
        .await
        .expect("env-1 settles")
        .expect("dispatch settles");

    assert_eq!(first.ack_source, Some(AckSource::Handler));
    assert_eq!(second.ack_source, Some(AckSource::Handler));
    assert!(entries(&errors).is_empty());
    assert_eq!(transport.sent().await.len(), 2);
}

#[tokio::test]
async fn unsupported_interactive_subtypes_still_reach_handlers() {
    let (router, _transport, connection, errors) = harness();
    let seen = log();

    let record = seen.clone();
    router.on_interactive(move |ctx: AckContext, payload: Arc<InteractivePayload>| {
        let record = record.clone();
        async move {
            push(&record, payload.payload_type());
            ctx.ack(None).await?;
            Ok::<(), HandlerError>(())
        }
    });

    let raw = json!({
        "type": "interactive",
        "envelope_id": "env-shortcut",
        "payload": { "type": "shortcut", "callback_id": "open_quote" }
    })
    .to_string();
    let outcome =
        router.dispatch(connection, raw).await.outcome().await.expect("dispatch settles");

    assert_eq!(entries(&seen), vec!["shortcut"]);
    assert_eq!(outcome.state, DispatchState::Acknowledged);
    assert!(entries(&errors).is_empty());
}

#[tokio::test]
async fn slash_commands_use_the_same_ack_mechanism() {
    let (router, transport, connection, _errors) = harness();

    router.on_slash_command(|ctx: AckContext, command: Arc<SlashCommandPayload>| async move {
        ctx.ack(Some(json!({ "text": format!("running {}", command.text) }))).await?;
        Ok::<(), HandlerError>(())
    });

    let raw = json!({
        "type": "slash_commands",
        "envelope_id": "env-cmd",
        "accepts_response_payload": true,
        "payload": {
            "command": "/deploy",
            "text": "staging",
            "channel_id": "C1",
            "user_id": "U1"
        }
    })
    .to_string();
    let outcome =
        router.dispatch(connection, raw).await.outcome().await.expect("dispatch settles");

    assert_eq!(outcome.kind, Some(HandlerKind::SlashCommands));
    assert_eq!(outcome.ack_source, Some(AckSource::Handler));
    assert_eq!(
        transport.sent().await,
        vec![json!({ "envelope_id": "env-cmd", "payload": { "text": "running staging" } })]
    );
}

#[tokio::test]
async fn envelopes_without_handlers_are_acked_immediately() {
    let (router, transport, connection, _errors) = harness();

    let raw = json!({
        "type": "events_api",
        "envelope_id": "env-event",
        "payload": { "type": "event_callback", "event": { "type": "app_mention" } }
    })
    .to_string();
    let handle = router.dispatch(connection, raw).await;

    assert_eq!(transport.sent().await, vec![json!({ "envelope_id": "env-event" })]);
    let outcome = handle.outcome().await.expect("dispatch settles");
    assert_eq!(outcome.ack_source, Some(AckSource::NoHandlers));
    assert_eq!(outcome.state, DispatchState::Acknowledged);
}
