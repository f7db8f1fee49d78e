use std::env;
use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use slackwire_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

struct Field<'a> {
    key_path: &'a str,
    env_keys: &'a [&'a str],
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = [
        Field {
            key_path: "slack.app_token",
            env_keys: &["SLACKWIRE_SLACK_APP_TOKEN"],
            value: redact_token(config.slack.app_token.expose_secret()),
        },
        Field {
            key_path: "socket.ack_timeout_ms",
            env_keys: &["SLACKWIRE_SOCKET_ACK_TIMEOUT_MS"],
            value: config.socket.ack_timeout_ms.to_string(),
        },
        Field {
            key_path: "socket.max_retries",
            env_keys: &["SLACKWIRE_SOCKET_MAX_RETRIES"],
            value: config.socket.max_retries.to_string(),
        },
        Field {
            key_path: "socket.base_delay_ms",
            env_keys: &["SLACKWIRE_SOCKET_BASE_DELAY_MS"],
            value: config.socket.base_delay_ms.to_string(),
        },
        Field {
            key_path: "socket.max_delay_ms",
            env_keys: &["SLACKWIRE_SOCKET_MAX_DELAY_MS"],
            value: config.socket.max_delay_ms.to_string(),
        },
        Field {
            key_path: "logging.level",
            env_keys: &["SLACKWIRE_LOGGING_LEVEL", "SLACKWIRE_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key_path: "logging.format",
            env_keys: &["SLACKWIRE_LOGGING_FORMAT", "SLACKWIRE_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format),
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|field| {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        render_line(field.key_path, &field.value, source)
    }));

    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
