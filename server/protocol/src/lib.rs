//! Binary wire protocol: the closed message-type enumeration, envelope
//! framing, and the codec that moves between bytes and typed messages.
//! Everything above the byte level (stanza-id assignment, replay,
//! dispatch) lives in `ac-conversation`.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod message_type;
pub mod messages;
pub mod wire_io;

pub use codec::Codec;
pub use envelope::{Envelope, Meta};
pub use error::{ProtocolError, ProtocolResult};
pub use message_type::MessageType;
pub use messages::*;
