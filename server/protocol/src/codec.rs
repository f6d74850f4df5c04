//! Wire codec: turns an [`Envelope`] into a length-prefixed binary frame and
//! back. Framing mirrors the teacher's `frame.rs` (a `u32` big-endian length
//! prefix ahead of the payload) so a transport loop can peek the prefix,
//! wait for that many bytes, then hand the payload to [`Codec::decode`]
//! without needing to understand the payload itself.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use ac_types::{ConversationId, StanzaId};

use crate::envelope::Envelope;
use crate::error::{ProtocolError, ProtocolResult};
use crate::message_type::MessageType;
use crate::messages::TypedMessage;
use crate::wire_io::*;

/// Maximum payload size accepted by [`Codec::decode`]. Guards against a
/// corrupt or hostile length prefix driving an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub struct Codec;

impl Codec {
    /// Encodes a full frame: `[u32 len BE][payload]`. `len` covers only the
    /// payload, not itself.
    pub fn encode_frame(envelope: &Envelope) -> ProtocolResult<Bytes> {
        let payload = Self::encode_payload(envelope)?;
        let mut framed = BytesMut::with_capacity(payload.len() + 4);
        framed.put_u32(payload.len() as u32);
        framed.extend_from_slice(&payload);
        Ok(framed.freeze())
    }

    /// Attempts to pull one complete frame off the front of `buf`. Returns
    /// `Ok(None)` when fewer bytes than the declared length are buffered yet
    /// (the caller should read more and retry); never consumes partial data.
    pub fn decode_frame(buf: &mut BytesMut) -> ProtocolResult<Option<Envelope>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::MalformedData("frame exceeds maximum length"));
        }
        let total = 4 + len as usize;
        if buf.len() < total {
            return Ok(None);
        }
        buf.advance(4);
        let mut payload = buf.split_to(len as usize).freeze();
        Self::decode_payload(&mut payload).map(Some)
    }

    /// Encodes just the payload (type tag, stanza id, conversation id, meta,
    /// body) without the length prefix. Used by transports that already
    /// frame messages themselves (e.g. WebSocket messages).
    pub fn encode_payload(envelope: &Envelope) -> ProtocolResult<Bytes> {
        let mut out = BytesMut::new();
        out.put_u8(envelope.message_type().tag());
        out.put_i32(envelope.stanza_id.0);
        put_string(&mut out, envelope.conversation_id.as_str());
        match &envelope.meta {
            Some(meta) => {
                put_bool(&mut out, true);
                put_varint_u64(&mut out, meta.len() as u64);
                for (k, v) in meta {
                    put_string(&mut out, k);
                    put_json(&mut out, v)?;
                }
            }
            None => put_bool(&mut out, false),
        }
        envelope.body.encode_body(&mut out)?;
        Ok(out.freeze())
    }

    pub fn decode_payload(buf: &mut Bytes) -> ProtocolResult<Envelope> {
        if !buf.has_remaining() {
            return Err(ProtocolError::MalformedData("empty payload"));
        }
        let tag = buf.get_u8();
        let message_type = MessageType::from_u8(tag).ok_or(ProtocolError::UnknownType(tag))?;

        if buf.remaining() < 4 {
            return Err(ProtocolError::MalformedData("truncated stanza id"));
        }
        let stanza_id = StanzaId(buf.get_i32());

        let conversation_id = ConversationId::new(get_string(buf)?);

        let meta = if get_bool(buf)? {
            let count = get_varint_u64(buf)? as usize;
            let mut map = std::collections::BTreeMap::new();
            for _ in 0..count {
                let key = get_string(buf)?;
                let value = get_json(buf)?;
                map.insert(key, value);
            }
            Some(map)
        } else {
            None
        };

        let body = TypedMessage::decode_body(message_type, buf)?;

        Ok(Envelope { stanza_id, conversation_id, meta, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_types::{ErrorCode, Severity};

    fn sample_envelope() -> Envelope {
        Envelope::new(
            StanzaId(42),
            ConversationId::new("conv-1"),
            TypedMessage::UserMessage(crate::messages::UserMessage {
                id: "msg-1".into(),
                previous_id: None,
                content: "hello".into(),
            }),
        )
    }

    #[test]
    fn round_trips_payload_without_meta() {
        let envelope = sample_envelope();
        let encoded = Codec::encode_payload(&envelope).unwrap();
        let mut buf = encoded;
        let decoded = Codec::decode_payload(&mut buf).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn round_trips_payload_with_meta() {
        let mut meta = std::collections::BTreeMap::new();
        meta.insert("trace_id".to_string(), serde_json::json!("abc-123"));
        meta.insert("retry".to_string(), serde_json::json!(2));
        let envelope = sample_envelope().with_meta(meta);
        let encoded = Codec::encode_payload(&envelope).unwrap();
        let mut buf = encoded;
        let decoded = Codec::decode_payload(&mut buf).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn round_trips_framed() {
        let envelope = sample_envelope();
        let framed = Codec::encode_frame(&envelope).unwrap();
        let mut buf = BytesMut::from(&framed[..]);
        let decoded = Codec::decode_frame(&mut buf).unwrap().expect("complete frame");
        assert_eq!(decoded, envelope);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_frame_waits_for_more_bytes() {
        let envelope = sample_envelope();
        let framed = Codec::encode_frame(&envelope).unwrap();
        let mut partial = BytesMut::from(&framed[..framed.len() - 1]);
        assert!(Codec::decode_frame(&mut partial).unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_LEN + 1);
        let err = Codec::decode_frame(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedData(_)));
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let mut out = BytesMut::new();
        out.put_u8(255);
        out.put_i32(0);
        put_string(&mut out, "conv-1");
        put_bool(&mut out, false);
        let mut buf = out.freeze();
        let err = Codec::decode_payload(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(255)));
    }

    #[test]
    fn control_stanza_carries_acknowledgement() {
        let envelope = Envelope::new(
            StanzaId::CONTROL,
            ConversationId::new("conv-1"),
            TypedMessage::Acknowledgement(crate::messages::Acknowledgement {
                acked_stanza_id: 7,
                success: true,
            }),
        );
        assert!(envelope.is_control());
        let encoded = Codec::encode_payload(&envelope).unwrap();
        let mut buf = encoded;
        let decoded = Codec::decode_payload(&mut buf).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn error_message_round_trips_codes_and_severity() {
        let envelope = Envelope::new(
            StanzaId::CONTROL,
            ConversationId::new("conv-1"),
            TypedMessage::ErrorMessage(crate::messages::ErrorMessage {
                code: ErrorCode::QueueOverflow,
                message: "queue full".into(),
                severity: Severity::Warning,
                recoverable: true,
            }),
        );
        let encoded = Codec::encode_payload(&envelope).unwrap();
        let mut buf = encoded;
        let decoded = Codec::decode_payload(&mut buf).unwrap();
        assert_eq!(decoded, envelope);
    }
}
