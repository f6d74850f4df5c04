use serde::{Deserialize, Serialize};

/// Stable integer-backed error codes carried on `ErrorMessage` envelopes.
///
/// Values are part of the wire contract: once assigned, a tag is never
/// reused for a different meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    MalformedData = 1,
    ConversationNotFound = 2,
    InvalidState = 3,
    InternalError = 4,
    QueueOverflow = 5,
    ServiceUnavailable = 6,
}

impl ErrorCode {
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => ErrorCode::MalformedData,
            2 => ErrorCode::ConversationNotFound,
            3 => ErrorCode::InvalidState,
            4 => ErrorCode::InternalError,
            5 => ErrorCode::QueueOverflow,
            6 => ErrorCode::ServiceUnavailable,
            _ => return None,
        })
    }
}

/// Severity of an `ErrorMessage`, independent of whether it is recoverable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Info = 0,
    Warning = 1,
    Error = 2,
    Critical = 3,
}

impl Severity {
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Severity::Info,
            1 => Severity::Warning,
            2 => Severity::Error,
            3 => Severity::Critical,
            _ => return None,
        })
    }
}
