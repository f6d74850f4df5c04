//! In-memory fakes for the SFU-facing ports, good enough to drive `Agent`,
//! `Router`, and `Worker` in tests without a real SFU client.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{AgentError, AgentResult};
use crate::ports::*;

/// A single room shared by a [`FakeRoomConnector`] and the test that wants
/// to push events into it or inspect what got published.
pub struct FakeRoom {
    pub name: std::sync::OnceLock<String>,
    pub published: Mutex<Vec<Bytes>>,
    pub audio_frames: Arc<Mutex<Vec<Bytes>>>,
    pub non_agent_participants: Mutex<usize>,
    pub disconnected: Mutex<bool>,
    pub fail_publish: Mutex<bool>,
}

impl Default for FakeRoom {
    fn default() -> Self {
        Self {
            name: std::sync::OnceLock::new(),
            published: Mutex::new(Vec::new()),
            audio_frames: Arc::new(Mutex::new(Vec::new())),
            non_agent_participants: Mutex::new(0),
            disconnected: Mutex::new(false),
            fail_publish: Mutex::new(false),
        }
    }
}

#[async_trait]
impl Room for FakeRoom {
    async fn publish_data(&self, bytes: Bytes) -> AgentResult<()> {
        if *self.fail_publish.lock() {
            return Err(AgentError::PublishFailed("fake room rejected publish".into()));
        }
        self.published.lock().push(bytes);
        Ok(())
    }

    async fn create_audio_track(&self) -> AgentResult<Arc<dyn AudioTrack>> {
        Ok(Arc::new(FakeAudioTrack { frames: self.audio_frames.clone() }))
    }

    async fn disconnect(&self) {
        *self.disconnected.lock() = true;
    }

    async fn non_agent_participant_count(&self) -> usize {
        *self.non_agent_participants.lock()
    }

    fn name(&self) -> &str {
        self.name.get().map(String::as_str).unwrap_or("")
    }
}

pub struct FakeAudioTrack {
    pub frames: Arc<Mutex<Vec<Bytes>>>,
}

#[async_trait]
impl AudioTrack for FakeAudioTrack {
    async fn publish_opus_frame(&self, frame: Bytes) -> AgentResult<()> {
        self.frames.lock().push(frame);
        Ok(())
    }
}

/// Hands out one fixed room plus a channel the test can push [`RoomEvent`]s
/// into, regardless of the requested room name.
pub struct FakeRoomConnector {
    pub room: Arc<FakeRoom>,
    pub events_rx: Mutex<Option<mpsc::Receiver<RoomEvent>>>,
    pub rooms: Vec<RoomDescriptor>,
}

impl FakeRoomConnector {
    pub fn new(room: Arc<FakeRoom>, events_rx: mpsc::Receiver<RoomEvent>) -> Self {
        Self { room, events_rx: Mutex::new(Some(events_rx)), rooms: Vec::new() }
    }
}

#[async_trait]
impl RoomConnector for FakeRoomConnector {
    async fn connect(
        &self,
        room_name: &str,
    ) -> AgentResult<(Arc<dyn Room>, mpsc::Receiver<RoomEvent>)> {
        let _ = self.room.name.set(room_name.to_string());
        let rx = self.events_rx.lock().take().ok_or(AgentError::ConnectFailed(
            "fake room connector only supports one connect() call".into(),
        ))?;
        Ok((self.room.clone(), rx))
    }

    async fn list_rooms(&self) -> AgentResult<Vec<RoomDescriptor>> {
        Ok(self.rooms.clone())
    }
}

/// Encodes by tagging every frame with its sample count; good enough to
/// assert chunk boundaries without a real Opus codec.
#[derive(Default)]
pub struct FakeOpusEncoder;

impl OpusEncoder for FakeOpusEncoder {
    fn encode_20ms(&self, pcm_48k_stereo: &[i16]) -> AgentResult<Bytes> {
        Ok(Bytes::from(pcm_48k_stereo.len().to_le_bytes().to_vec()))
    }
}

#[derive(Default)]
pub struct FakeRawOpusDecoder;

impl RawOpusDecoder for FakeRawOpusDecoder {
    fn decode_48k_stereo(&self, frame: &[u8]) -> AgentResult<Vec<i16>> {
        Ok(vec![0i16; frame.len()])
    }
}

/// Records every callback invocation in arrival order, for tests that only
/// care "did the work queue deliver this".
#[derive(Default)]
pub struct RecordingCallbacks {
    pub data: Mutex<Vec<ac_protocol::Envelope>>,
    pub audio_frames: Mutex<Vec<(String, Bytes)>>,
    pub joined: Mutex<Vec<String>>,
    pub left: Mutex<Vec<String>>,
}

#[async_trait]
impl AgentCallbacks for RecordingCallbacks {
    async fn on_data(&self, envelope: ac_protocol::Envelope) {
        self.data.lock().push(envelope);
    }

    async fn on_audio_frame(&self, track_id: &str, rtp_payload: Bytes) {
        self.audio_frames.lock().push((track_id.to_string(), rtp_payload));
    }

    async fn on_participant_joined(&self, identity: &str) {
        self.joined.lock().push(identity.to_string());
    }

    async fn on_participant_left(&self, identity: &str) {
        self.left.lock().push(identity.to_string());
    }
}
