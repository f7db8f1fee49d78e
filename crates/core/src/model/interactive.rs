use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::decode::{decode_variant, discriminator, DecodeError, DISCRIMINATOR};
use crate::model::action::ActionElement;
use crate::model::container::Container;
use crate::model::objects::{Channel, Enterprise, Message, StateValues, Team, User, View};

pub const BLOCK_ACTIONS: &str = "block_actions";
pub const VIEW_SUBMISSION: &str = "view_submission";
pub const VIEW_CLOSED: &str = "view_closed";

/// Decoded body of an `interactive` envelope.
///
/// Subtypes without a model here become [`InteractivePayload::Unsupported`],
/// which keeps only the raw subtype string.
#[derive(Clone, Debug, PartialEq)]
pub enum InteractivePayload {
    BlockActions(Box<BlockActionsPayload>),
    ViewSubmission(Box<ViewSubmissionPayload>),
    ViewClosed(Box<ViewClosedPayload>),
    Unsupported { payload_type: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockActionsPayload {
    #[serde(rename = "type")]
    pub payload_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    pub user: User,
    pub team: Team,
    pub container: Container,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<ActionElement>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise: Option<Enterprise>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<View>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_url: Option<String>,
}

impl BlockActionsPayload {
    pub fn callback_id(&self) -> Option<&str> {
        self.view.as_ref()?.callback_id.as_deref()
    }

    pub fn actions(&self) -> &[ActionElement] {
        self.actions.as_deref().unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewSubmissionPayload {
    #[serde(rename = "type")]
    pub payload_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
    pub user: User,
    pub view: View,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise: Option<Enterprise>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_urls: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewClosedPayload {
    #[serde(rename = "type")]
    pub payload_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
    pub user: User,
    pub view: View,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_cleared: Option<bool>,
}

impl InteractivePayload {
    pub fn from_object(object: Map<String, Value>) -> Result<Self, DecodeError> {
        let payload_type = discriminator(&object)?.to_owned();

        match payload_type.as_str() {
            BLOCK_ACTIONS => {
                decode_variant(BLOCK_ACTIONS, object).map(|p| Self::BlockActions(Box::new(p)))
            }
            VIEW_SUBMISSION => decode_variant(VIEW_SUBMISSION, object)
                .map(|p| Self::ViewSubmission(Box::new(p))),
            VIEW_CLOSED => {
                decode_variant(VIEW_CLOSED, object).map(|p| Self::ViewClosed(Box::new(p)))
            }
            _ => Ok(Self::Unsupported { payload_type }),
        }
    }

    pub fn payload_type(&self) -> &str {
        match self {
            Self::BlockActions(payload) => payload.payload_type.as_str(),
            Self::ViewSubmission(payload) => payload.payload_type.as_str(),
            Self::ViewClosed(payload) => payload.payload_type.as_str(),
            Self::Unsupported { payload_type } => payload_type.as_str(),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported { .. })
    }

    pub fn callback_id(&self) -> Option<&str> {
        self.view()?.callback_id.as_deref()
    }

    pub fn view(&self) -> Option<&View> {
        match self {
            Self::BlockActions(payload) => payload.view.as_ref(),
            Self::ViewSubmission(payload) => Some(&payload.view),
            Self::ViewClosed(payload) => Some(&payload.view),
            Self::Unsupported { .. } => None,
        }
    }

    pub fn container(&self) -> Option<&Container> {
        match self {
            Self::BlockActions(payload) => Some(&payload.container),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Self::BlockActions(payload) => Some(&payload.user),
            Self::ViewSubmission(payload) => Some(&payload.user),
            Self::ViewClosed(payload) => Some(&payload.user),
            Self::Unsupported { .. } => None,
        }
    }

    pub fn team(&self) -> Option<&Team> {
        match self {
            Self::BlockActions(payload) => Some(&payload.team),
            Self::ViewSubmission(payload) => payload.team.as_ref(),
            Self::ViewClosed(payload) => payload.team.as_ref(),
            Self::Unsupported { .. } => None,
        }
    }
}

impl<'de> Deserialize<'de> for InteractivePayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_object(object).map_err(D::Error::custom)
    }
}

impl Serialize for InteractivePayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::BlockActions(payload) => payload.serialize(serializer),
            Self::ViewSubmission(payload) => payload.serialize(serializer),
            Self::ViewClosed(payload) => payload.serialize(serializer),
            Self::Unsupported { payload_type } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(DISCRIMINATOR, payload_type)?;
                map.end()
            }
        }
    }
}
