pub mod ack;
pub mod connection;
pub mod envelope;
pub mod router;
pub mod socket;

pub use ack::{AckContext, AckError, AckSource};
pub use connection::{SocketConnection, SocketTransport, TransportError};
pub use envelope::{EnvelopeType, SocketModeMessage};
pub use router::{
    AckHandler, DispatchError, DispatchHandle, DispatchOutcome, DispatchState, HandlerError,
    HandlerKind, RouterConfig, SocketModeMessageHandler, SocketModeRouter,
};
pub use socket::{ReconnectPolicy, SessionEnd, SocketModeRunner};
