use thiserror::Error;

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by the codec. These never cross the wire themselves — a
/// conversation-level `ErrorMessage` is built from them by the dispatcher.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed data: {0}")]
    MalformedData(&'static str),

    #[error("unknown message type tag: {0}")]
    UnknownType(u8),

    #[error("encoding failed: {0}")]
    EncodingFailed(&'static str),

    #[error("nil body for message type {0:?}")]
    NilBody(crate::message_type::MessageType),
}
