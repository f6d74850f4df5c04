use ac_types::{ErrorCode, Severity};
use thiserror::Error;

pub type ConversationResult<T> = Result<T, ConversationError>;

/// Errors raised by the conversation core. Most are surfaced to the client
/// as an `ErrorMessage`; the mapping lives in [`ConversationError::to_wire`].
#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("conversation not found")]
    ConversationNotFound,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("work queue overflow: depth {depth} capacity {capacity}")]
    QueueOverflow { depth: usize, capacity: usize },

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Protocol(#[from] ac_protocol::ProtocolError),
}

impl ConversationError {
    /// The `(code, severity, recoverable)` triple used to build the
    /// `ErrorMessage` sent to the client. Internal errors are recoverable —
    /// the conversation survives; only a reconnection gap past the
    /// configured bound is fatal, and that case is raised directly by
    /// [`crate::protocol_handler::ProtocolHandler::handle_configuration`]
    /// rather than through this mapping.
    pub fn to_wire(&self) -> (ErrorCode, Severity, bool) {
        match self {
            ConversationError::ConversationNotFound => {
                (ErrorCode::ConversationNotFound, Severity::Error, true)
            }
            ConversationError::InvalidState(_) => (ErrorCode::InvalidState, Severity::Error, true),
            ConversationError::Internal(_) => (ErrorCode::InternalError, Severity::Error, true),
            ConversationError::QueueOverflow { .. } => {
                (ErrorCode::QueueOverflow, Severity::Warning, true)
            }
            ConversationError::Malformed(_) => (ErrorCode::MalformedData, Severity::Error, true),
            ConversationError::ServiceUnavailable(_) => {
                (ErrorCode::ServiceUnavailable, Severity::Warning, true)
            }
            ConversationError::Protocol(_) => (ErrorCode::MalformedData, Severity::Error, true),
        }
    }
}
