//! Boundary between the agent and the SFU SDK. The concrete room/session
//! implementation is out of scope; these traits are what `Agent` and
//! `Worker` program against.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AgentResult;

/// One participant's media room.
#[async_trait]
pub trait Room: Send + Sync {
    /// Publishes a reliable datagram to every participant.
    async fn publish_data(&self, bytes: Bytes) -> AgentResult<()>;

    async fn create_audio_track(&self) -> AgentResult<std::sync::Arc<dyn AudioTrack>>;

    async fn disconnect(&self);

    /// Non-agent participants currently present, used by the worker's
    /// teardown sweep.
    async fn non_agent_participant_count(&self) -> usize;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait AudioTrack: Send + Sync {
    /// Publishes one pre-encoded 20ms Opus frame.
    async fn publish_opus_frame(&self, frame: Bytes) -> AgentResult<()>;
}

/// One inbound event fanned in from the SFU. `Agent` turns these into work
/// items for its bounded worker pool.
#[derive(Clone, Debug)]
pub enum RoomEvent {
    DataReceived(Bytes),
    AudioFrame { track_id: String, rtp_payload: Bytes },
    ParticipantJoined(String),
    ParticipantLeft(String),
}

/// Encodes 48 kHz stereo PCM into 20ms Opus frames, and the reverse for
/// inbound audio tracks when no voice pipeline is attached.
pub trait OpusEncoder: Send + Sync {
    fn encode_20ms(&self, pcm_48k_stereo: &[i16]) -> AgentResult<Bytes>;
}

/// Decodes one inbound Opus frame at the SFU's native 48 kHz stereo rate,
/// used to feed the VAD processor. Kept distinct from `ac_voice::OpusDecoder`
/// (which decodes straight to whatever rate the ASR path wants) so the two
/// consumers of the same frame stay decoupled.
pub trait RawOpusDecoder: Send + Sync {
    fn decode_48k_stereo(&self, frame: &[u8]) -> AgentResult<Vec<i16>>;
}

/// Discovers and connects to SFU rooms. Implemented by the production SFU
/// client; out of scope here beyond this trait boundary.
#[async_trait]
pub trait RoomConnector: Send + Sync {
    async fn connect(
        &self,
        room_name: &str,
    ) -> AgentResult<(std::sync::Arc<dyn Room>, tokio::sync::mpsc::Receiver<RoomEvent>)>;

    /// Lists currently known room names, used by the worker's discovery
    /// sweep.
    async fn list_rooms(&self) -> AgentResult<Vec<RoomDescriptor>>;
}

#[derive(Clone, Debug)]
pub struct RoomDescriptor {
    pub name: String,
    pub non_agent_participant_count: usize,
    pub has_agent: bool,
}

/// Application-level handling of events fanned in from the SFU, executed on
/// the Agent's worker pool rather than on the SFU's own callback thread.
/// [`crate::router::Router`] is the production implementation, binding these
/// back to the conversation [`ac_conversation::Dispatcher`] and the voice
/// pipeline.
#[async_trait]
pub trait AgentCallbacks: Send + Sync {
    /// One reliable-channel envelope, already known to not be an
    /// Acknowledgement (those are consumed by the Agent itself) and already
    /// decoded — the work queue carries typed bodies, never raw bytes.
    async fn on_data(&self, envelope: ac_protocol::Envelope);

    /// One RTP payload from a subscribed inbound audio track.
    async fn on_audio_frame(&self, track_id: &str, rtp_payload: Bytes);

    async fn on_participant_joined(&self, identity: &str);

    async fn on_participant_left(&self, identity: &str);
}
