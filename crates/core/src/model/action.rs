use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::decode::{decode_variant, discriminator, merged_object, tagged_object, DecodeError};
use crate::model::objects::{OptionObject, TextObject};

pub const BUTTON: &str = "button";
pub const STATIC_SELECT: &str = "static_select";
pub const OVERFLOW: &str = "overflow";
pub const DATEPICKER: &str = "datepicker";
pub const CHECKBOXES: &str = "checkboxes";
pub const PLAIN_TEXT_INPUT: &str = "plain_text_input";

/// One entry of a `block_actions` payload's `actions` list, keyed by the
/// element `type`. Element types this crate does not model are kept verbatim.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionElement {
    Button(ButtonAction),
    StaticSelect(SelectAction),
    Overflow(SelectAction),
    Datepicker(DatepickerAction),
    Checkboxes(CheckboxesAction),
    PlainTextInput(PlainTextInputAction),
    Unknown { element_type: String, payload: Map<String, Value> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonAction {
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_ts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectAction {
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<OptionObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<TextObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_ts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatepickerAction {
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_ts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckboxesAction {
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(default)]
    pub selected_options: Vec<OptionObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_ts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainTextInputAction {
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_ts: Option<String>,
}

impl ActionElement {
    pub fn from_object(mut object: Map<String, Value>) -> Result<Self, DecodeError> {
        let element_type = discriminator(&object)?.to_owned();

        match element_type.as_str() {
            BUTTON => decode_variant(BUTTON, object).map(Self::Button),
            STATIC_SELECT => decode_variant(STATIC_SELECT, object).map(Self::StaticSelect),
            OVERFLOW => decode_variant(OVERFLOW, object).map(Self::Overflow),
            DATEPICKER => decode_variant(DATEPICKER, object).map(Self::Datepicker),
            CHECKBOXES => decode_variant(CHECKBOXES, object).map(Self::Checkboxes),
            PLAIN_TEXT_INPUT => decode_variant(PLAIN_TEXT_INPUT, object).map(Self::PlainTextInput),
            _ => {
                object.remove(crate::decode::DISCRIMINATOR);
                Ok(Self::Unknown { element_type, payload: object })
            }
        }
    }

    pub fn to_object(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match self {
            Self::Button(value) => tagged_object(BUTTON, value),
            Self::StaticSelect(value) => tagged_object(STATIC_SELECT, value),
            Self::Overflow(value) => tagged_object(OVERFLOW, value),
            Self::Datepicker(value) => tagged_object(DATEPICKER, value),
            Self::Checkboxes(value) => tagged_object(CHECKBOXES, value),
            Self::PlainTextInput(value) => tagged_object(PLAIN_TEXT_INPUT, value),
            Self::Unknown { element_type, payload } => Ok(merged_object(element_type, payload)),
        }
    }

    pub fn element_type(&self) -> &str {
        match self {
            Self::Button(_) => BUTTON,
            Self::StaticSelect(_) => STATIC_SELECT,
            Self::Overflow(_) => OVERFLOW,
            Self::Datepicker(_) => DATEPICKER,
            Self::Checkboxes(_) => CHECKBOXES,
            Self::PlainTextInput(_) => PLAIN_TEXT_INPUT,
            Self::Unknown { element_type, .. } => element_type.as_str(),
        }
    }

    pub fn action_id(&self) -> Option<&str> {
        match self {
            Self::Button(value) => Some(value.action_id.as_str()),
            Self::StaticSelect(value) | Self::Overflow(value) => Some(value.action_id.as_str()),
            Self::Datepicker(value) => Some(value.action_id.as_str()),
            Self::Checkboxes(value) => Some(value.action_id.as_str()),
            Self::PlainTextInput(value) => Some(value.action_id.as_str()),
            Self::Unknown { payload, .. } => opaque_str(payload, "action_id"),
        }
    }

    pub fn block_id(&self) -> Option<&str> {
        match self {
            Self::Button(value) => value.block_id.as_deref(),
            Self::StaticSelect(value) | Self::Overflow(value) => value.block_id.as_deref(),
            Self::Datepicker(value) => value.block_id.as_deref(),
            Self::Checkboxes(value) => value.block_id.as_deref(),
            Self::PlainTextInput(value) => value.block_id.as_deref(),
            Self::Unknown { payload, .. } => opaque_str(payload, "block_id"),
        }
    }

    pub fn action_ts(&self) -> Option<&str> {
        match self {
            Self::Button(value) => value.action_ts.as_deref(),
            Self::StaticSelect(value) | Self::Overflow(value) => value.action_ts.as_deref(),
            Self::Datepicker(value) => value.action_ts.as_deref(),
            Self::Checkboxes(value) => value.action_ts.as_deref(),
            Self::PlainTextInput(value) => value.action_ts.as_deref(),
            Self::Unknown { payload, .. } => opaque_str(payload, "action_ts"),
        }
    }
}

fn opaque_str<'a>(payload: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

impl<'de> Deserialize<'de> for ActionElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_object(object).map_err(D::Error::custom)
    }
}

impl Serialize for ActionElement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_object().map_err(S::Error::custom)?.serialize(serializer)
    }
}
