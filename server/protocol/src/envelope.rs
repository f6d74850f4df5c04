//! The envelope every stanza is wrapped in: a type tag, a direction-signed
//! stanza id, the conversation it belongs to, an optional flat metadata map,
//! and a typed body. Framing is binary and self-describing — a reader never
//! needs anything beyond the bytes themselves to know how much to consume.

use std::collections::BTreeMap;

use ac_types::{ConversationId, StanzaId};
use serde_json::Value as Json;

use crate::message_type::MessageType;
use crate::messages::TypedMessage;

/// A flat string-keyed map of arbitrary JSON values, carried alongside a
/// body for out-of-band annotations (tracing ids, client build info, retry
/// counters) that don't belong in any one body's field list.
pub type Meta = BTreeMap<String, Json>;

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub stanza_id: StanzaId,
    pub conversation_id: ConversationId,
    pub meta: Option<Meta>,
    pub body: TypedMessage,
}

impl Envelope {
    pub fn new(stanza_id: StanzaId, conversation_id: ConversationId, body: TypedMessage) -> Self {
        Self { stanza_id, conversation_id, meta: None, body }
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    /// `Acknowledgement` and `ErrorMessage` always travel on the control
    /// stanza id regardless of what produced them.
    pub fn is_control(&self) -> bool {
        self.stanza_id.is_control()
    }
}
