use std::fmt;

use serde::{Deserialize, Serialize};

/// A signed, per-direction sequence number on the wire.
///
/// Positive = client→server, negative = server→client, zero = control
/// (acknowledgement/error) and does not participate in ack tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StanzaId(pub i32);

impl StanzaId {
    pub const CONTROL: StanzaId = StanzaId(0);

    pub fn is_control(self) -> bool {
        self.0 == 0
    }

    pub fn is_client_originated(self) -> bool {
        self.0 > 0
    }

    pub fn is_server_originated(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for StanzaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(ConversationId);
string_id!(MessageId);
string_id!(ToolUseId);
