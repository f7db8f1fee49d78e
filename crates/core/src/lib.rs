pub mod config;
pub mod decode;
pub mod model;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use decode::{decode_container, decode_interactive, encode_container, DecodeError};
pub use model::action::ActionElement;
pub use model::command::{EventsApiPayload, SlashCommandPayload};
pub use model::container::Container;
pub use model::interactive::{
    BlockActionsPayload, InteractivePayload, ViewClosedPayload, ViewSubmissionPayload,
};
pub use model::objects::{Channel, Enterprise, Message, StateValue, StateValues, Team, User, View};
