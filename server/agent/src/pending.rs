//! The pending-ack table: outbound server messages retained for retransmit
//! until the client acknowledges them or the retry budget is exhausted.

use std::time::Instant;

use bytes::Bytes;

/// One outbound server message awaiting acknowledgement. `payload` is the
/// already-encoded frame, retained verbatim so a retry republishes bytes
/// identical to the original send.
#[derive(Clone)]
pub struct PendingMessage {
    pub stanza_id: i32,
    pub payload: Bytes,
    pub sent_at: Instant,
    pub retry_count: u32,
}

impl PendingMessage {
    pub fn new(stanza_id: i32, payload: Bytes) -> Self {
        Self { stanza_id, payload, sent_at: Instant::now(), retry_count: 0 }
    }
}
