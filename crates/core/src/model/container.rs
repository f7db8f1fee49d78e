use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::decode::{decode_variant, discriminator, merged_object, tagged_object, DecodeError};

pub const MESSAGE: &str = "message";
pub const MESSAGE_ATTACHMENT: &str = "message_attachment";
pub const VIEW: &str = "view";

/// The surface an interaction happened in.
///
/// Unrecognised container types decode into [`Container::Unknown`], which keeps
/// the discriminator in `container_type` and every other key in `payload`, so
/// re-encoding reproduces the object the platform sent.
#[derive(Clone, Debug, PartialEq)]
pub enum Container {
    Message(MessageContainer),
    MessageAttachment(MessageAttachmentContainer),
    View(ViewContainer),
    Unknown { container_type: String, payload: Map<String, Value> },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageContainer {
    pub message_ts: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ephemeral: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageAttachmentContainer {
    pub message_ts: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ephemeral: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_app_unfurl: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_unfurl_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewContainer {
    pub view_id: String,
}

impl Container {
    pub fn view(view_id: impl Into<String>) -> Self {
        Self::View(ViewContainer { view_id: view_id.into() })
    }

    pub fn from_object(mut object: Map<String, Value>) -> Result<Self, DecodeError> {
        let container_type = discriminator(&object)?.to_owned();

        match container_type.as_str() {
            MESSAGE => decode_variant(MESSAGE, object).map(Self::Message),
            MESSAGE_ATTACHMENT => {
                decode_variant(MESSAGE_ATTACHMENT, object).map(Self::MessageAttachment)
            }
            VIEW => decode_variant(VIEW, object).map(Self::View),
            _ => {
                object.remove(crate::decode::DISCRIMINATOR);
                Ok(Self::Unknown { container_type, payload: object })
            }
        }
    }

    pub fn to_object(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match self {
            Self::Message(value) => tagged_object(MESSAGE, value),
            Self::MessageAttachment(value) => tagged_object(MESSAGE_ATTACHMENT, value),
            Self::View(value) => tagged_object(VIEW, value),
            Self::Unknown { container_type, payload } => {
                Ok(merged_object(container_type, payload))
            }
        }
    }

    pub fn container_type(&self) -> &str {
        match self {
            Self::Message(_) => MESSAGE,
            Self::MessageAttachment(_) => MESSAGE_ATTACHMENT,
            Self::View(_) => VIEW,
            Self::Unknown { container_type, .. } => container_type.as_str(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }

    pub fn view_id(&self) -> Option<&str> {
        match self {
            Self::View(value) => Some(value.view_id.as_str()),
            _ => None,
        }
    }

    pub fn message_ts(&self) -> Option<&str> {
        match self {
            Self::Message(value) => Some(value.message_ts.as_str()),
            Self::MessageAttachment(value) => Some(value.message_ts.as_str()),
            Self::View(_) | Self::Unknown { .. } => None,
        }
    }

    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::Message(value) => Some(value.channel_id.as_str()),
            Self::MessageAttachment(value) => Some(value.channel_id.as_str()),
            Self::View(_) | Self::Unknown { .. } => None,
        }
    }

    pub fn attachment_id(&self) -> Option<i64> {
        match self {
            Self::MessageAttachment(value) => value.attachment_id,
            _ => None,
        }
    }

    pub fn is_ephemeral(&self) -> Option<bool> {
        match self {
            Self::Message(value) => value.is_ephemeral,
            Self::MessageAttachment(value) => value.is_ephemeral,
            Self::View(_) | Self::Unknown { .. } => None,
        }
    }
}

impl<'de> Deserialize<'de> for Container {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_object(object).map_err(D::Error::custom)
    }
}

impl Serialize for Container {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_object().map_err(S::Error::custom)?.serialize(serializer)
    }
}
