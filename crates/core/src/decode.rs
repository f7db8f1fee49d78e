use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::container::Container;
use crate::model::interactive::InteractivePayload;

pub const DISCRIMINATOR: &str = "type";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, found {found}")]
    NotAnObject { found: &'static str },
    #[error("missing `type` discriminator")]
    MissingDiscriminator,
    #[error("`type` discriminator must be a string, found {found}")]
    InvalidDiscriminator { found: &'static str },
    #[error("malformed `{variant}` payload: {source}")]
    Malformed {
        variant: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn decode_container(raw: &str) -> Result<Container, DecodeError> {
    Container::from_object(parse_object(raw)?)
}

pub fn encode_container(container: &Container) -> Result<String, DecodeError> {
    Ok(serde_json::to_string(&container.to_object()?)?)
}

pub fn decode_interactive(raw: &str) -> Result<InteractivePayload, DecodeError> {
    InteractivePayload::from_object(parse_object(raw)?)
}

/// Parses raw text that must hold a single JSON object.
pub fn parse_object(raw: &str) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(object) => Ok(object),
        other => Err(DecodeError::NotAnObject { found: json_kind(&other) }),
    }
}

/// Accepts a nested payload that is either an object or a string holding an
/// encoded object, and returns the object.
pub fn nested_object(value: Value) -> Result<Map<String, Value>, DecodeError> {
    match value {
        Value::Object(object) => Ok(object),
        Value::String(encoded) => parse_object(&encoded),
        other => Err(DecodeError::NotAnObject { found: json_kind(&other) }),
    }
}

/// Reads the `type` discriminator without consuming the object.
pub fn discriminator(object: &Map<String, Value>) -> Result<&str, DecodeError> {
    match object.get(DISCRIMINATOR) {
        None => Err(DecodeError::MissingDiscriminator),
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(other) => Err(DecodeError::InvalidDiscriminator { found: json_kind(other) }),
    }
}

pub(crate) fn decode_variant<T>(variant: &str, object: Map<String, Value>) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
{
    serde_json::from_value(Value::Object(object))
        .map_err(|source| DecodeError::Malformed { variant: variant.to_owned(), source })
}

/// Serializes a known variant body and stamps the discriminator onto it.
pub(crate) fn tagged_object<T>(
    discriminator: &str,
    body: &T,
) -> Result<Map<String, Value>, serde_json::Error>
where
    T: Serialize,
{
    let mut object = match serde_json::to_value(body)? {
        Value::Object(object) => object,
        other => {
            return Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "`{discriminator}` body serialized to {} instead of an object",
                json_kind(&other)
            )))
        }
    };
    object.insert(DISCRIMINATOR.to_owned(), Value::String(discriminator.to_owned()));
    Ok(object)
}

/// Rebuilds an opaque variant: the stored object with the discriminator
/// overwritten by the stored type.
pub(crate) fn merged_object(discriminator: &str, payload: &Map<String, Value>) -> Map<String, Value> {
    let mut object = payload.clone();
    object.insert(DISCRIMINATOR.to_owned(), Value::String(discriminator.to_owned()));
    object
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
