use std::fs;
use std::path::Path;

use serde::Serialize;
use slackwire_core::decode::decode_interactive;
use slackwire_core::InteractivePayload;

use crate::commands::CommandResult;

const COMMAND: &str = "decode";

#[derive(Debug, Serialize)]
struct PayloadSummary<'a> {
    payload_type: &'a str,
    supported: bool,
    container_type: Option<&'a str>,
    view_id: Option<&'a str>,
    callback_id: Option<&'a str>,
    user_id: Option<&'a str>,
    team_id: Option<&'a str>,
    action_ids: Vec<&'a str>,
}

pub fn run(path: &Path) -> CommandResult {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "io",
                format!("could not read `{}`: {error}", path.display()),
                2,
            )
        }
    };

    let payload = match decode_interactive(&raw) {
        Ok(payload) => payload,
        Err(error) => return CommandResult::failure(COMMAND, "decode", error.to_string(), 3),
    };

    let summary = summarize(&payload);
    let message = format!("decoded `{}` payload", summary.payload_type);
    match serde_json::to_value(&summary) {
        Ok(details) => CommandResult::success(COMMAND, message, Some(details)),
        Err(error) => CommandResult::failure(COMMAND, "serialization", error.to_string(), 1),
    }
}

fn summarize(payload: &InteractivePayload) -> PayloadSummary<'_> {
    let container = payload.container();
    let action_ids = match payload {
        InteractivePayload::BlockActions(block_actions) => {
            block_actions.actions().iter().filter_map(|action| action.action_id()).collect()
        }
        _ => Vec::new(),
    };

    PayloadSummary {
        payload_type: payload.payload_type(),
        supported: payload.is_supported(),
        container_type: container.map(|container| container.container_type()),
        view_id: container
            .and_then(|container| container.view_id())
            .or_else(|| payload.view().and_then(|view| view.id.as_deref())),
        callback_id: payload.callback_id(),
        user_id: payload.user().map(|user| user.id.as_str()),
        team_id: payload.team().map(|team| team.id.as_str()),
        action_ids,
    }
}
