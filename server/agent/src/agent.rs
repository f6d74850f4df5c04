//! The Agent: one process's connection into one conversation's SFU room.
//!
//! Inbound SFU callbacks (data, audio frames, participant changes) fan in
//! onto a bounded work queue and are drained by a small worker pool, so a
//! slow application callback never blocks the SFU's own delivery thread.
//! Outbound sends (`send_data`/`send_error_message`/...) go straight to the
//! room and never touch that queue — a send-path that routed back through
//! the inbound queue would deadlock the moment the queue itself overflowed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ac_protocol::{Acknowledgement, Codec, Envelope, ErrorMessage, TypedMessage};
use ac_types::{AudioFormat, ConversationId, ErrorCode, Severity, StanzaId};

use ac_conversation::{AgentPort, ConversationError, ConversationResult};
use ac_voice::{AgentAudioTrack, VoiceError, VoiceResult};

use crate::error::{AgentError, AgentResult};
use crate::pending::PendingMessage;
use crate::ports::{AgentCallbacks, AudioTrack, OpusEncoder, Room, RoomConnector, RoomEvent};
use crate::resample;

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub work_queue_size: usize,
    pub worker_count: usize,
    pub work_queue_timeout: Duration,
    pub ack_timeout: Duration,
    pub max_retries: u32,
    pub tts_sample_rate: u32,
    pub tts_channels: u8,
}

struct ConnectedState {
    room: Arc<dyn Room>,
    work_tx: mpsc::Sender<WorkItem>,
    audio_track: Option<Arc<dyn AudioTrack>>,
}

/// One unit of work fanned onto the worker pool. `conversation_id` and
/// `stanza_id` are carried alongside the payload, not inside it, so an
/// overflow report can name what got dropped without decoding anything.
struct WorkItem {
    conversation_id: Option<ConversationId>,
    stanza_id: Option<i32>,
    kind: WorkItemKind,
}

enum WorkItemKind {
    Data(Envelope),
    SendAck { acked_stanza_id: i32 },
    AudioFrame { track_id: String, rtp_payload: Bytes },
    ParticipantJoined(String),
    ParticipantLeft(String),
}

/// One process's connection to one SFU room. `ac-agent`'s `Worker` owns one
/// `Agent` (plus a bound [`crate::router::Router`]) per active conversation.
pub struct Agent {
    config: AgentConfig,
    room_connector: Arc<dyn RoomConnector>,
    opus_encoder: Arc<dyn OpusEncoder>,
    callbacks: RwLock<Option<Arc<dyn AgentCallbacks>>>,
    lifecycle: Mutex<Option<CancellationToken>>,
    state: RwLock<Option<ConnectedState>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    pending_acks: Mutex<HashMap<i32, PendingMessage>>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        room_connector: Arc<dyn RoomConnector>,
        opus_encoder: Arc<dyn OpusEncoder>,
    ) -> Self {
        Self {
            config,
            room_connector,
            opus_encoder,
            callbacks: RwLock::new(None),
            lifecycle: Mutex::new(None),
            state: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
            pending_acks: Mutex::new(HashMap::new()),
        }
    }

    /// Must be called before [`Agent::connect`]; the worker pool delivers
    /// every inbound item through these callbacks.
    pub fn bind_callbacks(&self, callbacks: Arc<dyn AgentCallbacks>) {
        *self.callbacks.write() = Some(callbacks);
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().is_some()
    }

    pub fn get_room(&self) -> Option<Arc<dyn Room>> {
        self.state.read().as_ref().map(|s| s.room.clone())
    }

    pub async fn connect(self: &Arc<Self>, room_name: &str) -> AgentResult<()> {
        if self.callbacks.read().is_none() {
            return Err(AgentError::MissingCallbacks);
        }
        if self.state.read().is_some() {
            return Err(AgentError::AlreadyConnected);
        }

        let (room, events) = self
            .room_connector
            .connect(room_name)
            .await
            .map_err(|e| AgentError::ConnectFailed(e.to_string()))?;

        let (work_tx, work_rx) = mpsc::channel(self.config.work_queue_size);
        *self.state.write() = Some(ConnectedState { room, work_tx, audio_track: None });

        let token = CancellationToken::new();
        *self.lifecycle.lock() = Some(token.clone());

        let work_rx = Arc::new(AsyncMutex::new(work_rx));
        let mut tasks = Vec::with_capacity(self.config.worker_count + 2);

        for worker_id in 0..self.config.worker_count {
            let this = Arc::clone(self);
            let rx = work_rx.clone();
            let worker_token = token.clone();
            tasks.push(tokio::spawn(async move {
                this.worker_loop(worker_id, rx, worker_token).await;
            }));
        }

        {
            let this = Arc::clone(self);
            let ack_token = token.clone();
            tasks.push(tokio::spawn(async move { this.ack_retry_loop(ack_token).await }));
        }

        {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move { this.room_event_loop(events, token).await }));
        }

        *self.tasks.lock() = tasks;
        Ok(())
    }

    /// Three-phase teardown: stop pulling more work, drop the room and the
    /// work queue's send side, then wait for everything spawned by
    /// [`Agent::connect`] to actually exit before clearing pending acks.
    pub async fn disconnect(&self) {
        if let Some(token) = self.lifecycle.lock().take() {
            token.cancel();
        }

        let room = { self.state.write().take().map(|connected| connected.room) };
        if let Some(room) = room {
            room.disconnect().await;
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        self.pending_acks.lock().clear();
    }

    /// Publishes `payload` with no ack tracking. Every other send on this
    /// type funnels through here — it is the one place that actually talks
    /// to the room.
    pub async fn send_data(&self, payload: Bytes) -> AgentResult<()> {
        let room = self.state.read().as_ref().map(|s| s.room.clone());
        let Some(room) = room else { return Err(AgentError::Disconnected) };
        room.publish_data(payload).await
    }

    pub async fn send_acknowledgement(
        &self,
        conversation_id: &ConversationId,
        acked_stanza_id: i32,
    ) -> AgentResult<()> {
        let envelope = Envelope::new(
            StanzaId::CONTROL,
            conversation_id.clone(),
            TypedMessage::Acknowledgement(Acknowledgement { acked_stanza_id, success: true }),
        );
        let payload = Codec::encode_payload(&envelope).map_err(|e| AgentError::Internal(e.to_string()))?;
        self.send_data(payload).await
    }

    /// Bypasses the work queue by construction: this calls straight down to
    /// [`Agent::send_data`], never back through `enqueue_work`, so reporting
    /// a queue overflow can never itself recurse into the overflow it is
    /// reporting.
    pub async fn send_error_message(
        &self,
        conversation_id: &ConversationId,
        code: ErrorCode,
        message: impl Into<String>,
        severity: Severity,
        recoverable: bool,
    ) -> AgentResult<()> {
        let envelope = Envelope::new(
            StanzaId::CONTROL,
            conversation_id.clone(),
            TypedMessage::ErrorMessage(ErrorMessage { code, message: message.into(), severity, recoverable }),
        );
        let payload = Codec::encode_payload(&envelope).map_err(|e| AgentError::Internal(e.to_string()))?;
        self.send_data(payload).await
    }

    async fn send_audio_frames(&self, bytes: Bytes, format: AudioFormat) -> AgentResult<()> {
        match format {
            AudioFormat::Pcm => {
                let samples = pcm_i16_from_le_bytes(&bytes);
                let pcm_48k_stereo = resample::resample_to_48k_stereo(
                    &samples,
                    self.config.tts_sample_rate,
                    self.config.tts_channels,
                );
                for frame in resample::chunk_into_20ms_frames(&pcm_48k_stereo) {
                    let opus = self.opus_encoder.encode_20ms(&frame)?;
                    self.publish_audio_frame(opus).await?;
                }
                Ok(())
            }
            AudioFormat::Opus => {
                // Already Opus-encoded upstream: treated as one pre-framed
                // 20ms packet, no re-encoding.
                self.publish_audio_frame(bytes).await
            }
        }
    }

    async fn publish_audio_frame(&self, opus_frame: Bytes) -> AgentResult<()> {
        let track = self.ensure_audio_track().await?;
        track.publish_opus_frame(opus_frame).await
    }

    async fn ensure_audio_track(&self) -> AgentResult<Arc<dyn AudioTrack>> {
        if let Some(track) = self.state.read().as_ref().and_then(|s| s.audio_track.clone()) {
            return Ok(track);
        }
        let room = self.get_room().ok_or(AgentError::Disconnected)?;
        let created = room.create_audio_track().await?;

        let mut state = self.state.write();
        let Some(connected) = state.as_mut() else { return Err(AgentError::Disconnected) };
        if let Some(existing) = &connected.audio_track {
            return Ok(existing.clone());
        }
        connected.audio_track = Some(created.clone());
        Ok(created)
    }

    async fn enqueue_work(&self, item: WorkItem) {
        let conversation_id = item.conversation_id.clone();
        let stanza_id = item.stanza_id;

        let tx = self.state.read().as_ref().map(|s| s.work_tx.clone());
        let Some(tx) = tx else {
            debug!("work queue closed, dropping item (agent disconnecting)");
            return;
        };

        let capacity = tx.max_capacity();
        match tokio::time::timeout(self.config.work_queue_timeout, tx.send(item)).await {
            Ok(Ok(())) => {}
            // The receiver side is gone — the worker pool already shut
            // down. Dropping here stands in for the panic-recovery the
            // equivalent Go code needs around a send on a closed channel.
            Ok(Err(_)) => debug!("work queue closed, dropping item (agent disconnecting)"),
            Err(_) => {
                let depth = capacity - tx.capacity();
                warn!(depth, capacity, stanza_id, "work queue overflow, dropping item");
                self.report_queue_overflow(conversation_id.as_ref(), stanza_id, depth, capacity).await;
            }
        }
    }

    async fn report_queue_overflow(
        &self,
        conversation_id: Option<&ConversationId>,
        stanza_id: Option<i32>,
        depth: usize,
        capacity: usize,
    ) {
        let Some(conversation_id) = conversation_id else { return };
        let message = match stanza_id {
            Some(id) => format!("work queue overflow (depth {depth}/{capacity}), dropped stanza {id}"),
            None => format!("work queue overflow (depth {depth}/{capacity})"),
        };
        if let Err(err) =
            self.send_error_message(conversation_id, ErrorCode::QueueOverflow, message, Severity::Warning, true).await
        {
            warn!(%err, "failed to report work queue overflow to client");
        }
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        rx: Arc<AsyncMutex<mpsc::Receiver<WorkItem>>>,
        token: CancellationToken,
    ) {
        loop {
            let item = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    _ = token.cancelled() => None,
                    item = guard.recv() => item,
                }
            };
            let Some(item) = item else { break };
            // A panic inside one item's processing unwinds only this
            // worker's task — the remaining workers keep draining the
            // queue, which is the isolation a panic-recovery wrapper would
            // otherwise have to provide by hand.
            self.process_work_item(item).await;
        }
        debug!(worker_id, "agent worker exiting");
    }

    async fn process_work_item(&self, item: WorkItem) {
        let callbacks = self.callbacks.read().clone();
        let Some(callbacks) = callbacks else { return };
        match item.kind {
            WorkItemKind::Data(envelope) => callbacks.on_data(envelope).await,
            WorkItemKind::SendAck { acked_stanza_id } => {
                if let Some(conversation_id) = item.conversation_id {
                    if let Err(err) = self.send_acknowledgement(&conversation_id, acked_stanza_id).await {
                        warn!(%err, acked_stanza_id, "failed to send acknowledgement");
                    }
                }
            }
            WorkItemKind::AudioFrame { track_id, rtp_payload } => {
                callbacks.on_audio_frame(&track_id, rtp_payload).await
            }
            WorkItemKind::ParticipantJoined(identity) => callbacks.on_participant_joined(&identity).await,
            WorkItemKind::ParticipantLeft(identity) => callbacks.on_participant_left(&identity).await,
        }
    }

    async fn room_event_loop(self: Arc<Self>, mut events: mpsc::Receiver<RoomEvent>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => {
                    match event {
                        Some(RoomEvent::DataReceived(bytes)) => self.handle_room_data(bytes).await,
                        Some(RoomEvent::AudioFrame { track_id, rtp_payload }) => {
                            self.enqueue_work(WorkItem {
                                conversation_id: None,
                                stanza_id: None,
                                kind: WorkItemKind::AudioFrame { track_id, rtp_payload },
                            })
                            .await;
                        }
                        Some(RoomEvent::ParticipantJoined(identity)) => {
                            self.enqueue_work(WorkItem {
                                conversation_id: None,
                                stanza_id: None,
                                kind: WorkItemKind::ParticipantJoined(identity),
                            })
                            .await;
                        }
                        Some(RoomEvent::ParticipantLeft(identity)) => {
                            self.enqueue_work(WorkItem {
                                conversation_id: None,
                                stanza_id: None,
                                kind: WorkItemKind::ParticipantLeft(identity),
                            })
                            .await;
                        }
                        None => break,
                    }
                }
            }
        }
        debug!("agent room-event reader exiting");
    }

    async fn handle_room_data(&self, bytes: Bytes) {
        let mut buf = bytes;
        let envelope = match Codec::decode_payload(&mut buf) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "failed to decode inbound envelope, dropping");
                return;
            }
        };

        if let TypedMessage::Acknowledgement(ack) = &envelope.body {
            self.pending_acks.lock().remove(&ack.acked_stanza_id);
            return;
        }

        let conversation_id = envelope.conversation_id.clone();
        let stanza_id = envelope.stanza_id;

        if stanza_id.is_client_originated() {
            self.enqueue_work(WorkItem {
                conversation_id: Some(conversation_id.clone()),
                stanza_id: Some(stanza_id.0),
                kind: WorkItemKind::SendAck { acked_stanza_id: stanza_id.0 },
            })
            .await;
        }

        self.enqueue_work(WorkItem {
            conversation_id: Some(conversation_id),
            stanza_id: Some(stanza_id.0),
            kind: WorkItemKind::Data(envelope),
        })
        .await;
    }

    async fn ack_retry_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.ack_timeout);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.retry_pending_acks().await,
            }
        }
        debug!("agent ack-retry ticker exiting");
    }

    async fn retry_pending_acks(&self) {
        let due: Vec<PendingMessage> = {
            let acks = self.pending_acks.lock();
            acks.values().filter(|m| m.sent_at.elapsed() >= self.config.ack_timeout).cloned().collect()
        };

        for mut message in due {
            if message.retry_count >= self.config.max_retries {
                self.pending_acks.lock().remove(&message.stanza_id);
                warn!(stanza_id = message.stanza_id, "giving up on unacknowledged message after max retries");
                continue;
            }

            // `get_room` returns an owned `Arc`, so a concurrent disconnect
            // can't invalidate it out from under this publish the way a
            // nullable shared pointer could — it can only make the publish
            // itself start failing, which the match below already handles.
            let Some(room) = self.get_room() else { continue };

            match room.publish_data(message.payload.clone()).await {
                Ok(()) => {
                    message.retry_count += 1;
                    message.sent_at = Instant::now();
                    self.pending_acks.lock().insert(message.stanza_id, message);
                }
                Err(err) => warn!(%err, stanza_id = message.stanza_id, "ack retry publish failed"),
            }
        }
    }
}

fn pcm_i16_from_le_bytes(bytes: &Bytes) -> Vec<i16> {
    bytes.chunks_exact(2).map(|pair| i16::from_le_bytes([pair[0], pair[1]])).collect()
}

#[async_trait]
impl AgentPort for Agent {
    async fn send_tracked(
        &self,
        conversation_id: &ConversationId,
        stanza_id: StanzaId,
        payload: Bytes,
    ) -> ConversationResult<()> {
        self.pending_acks.lock().insert(stanza_id.0, PendingMessage::new(stanza_id.0, payload.clone()));
        debug!(%conversation_id, stanza_id = stanza_id.0, "tracking outbound message for ack");
        self.send_data(payload).await.map_err(|e| ConversationError::ServiceUnavailable(e.to_string()))
    }

    async fn send_untracked(&self, payload: Bytes) -> ConversationResult<()> {
        self.send_data(payload).await.map_err(|e| ConversationError::ServiceUnavailable(e.to_string()))
    }

    async fn send_audio(&self, bytes: Bytes, format: AudioFormat) -> ConversationResult<()> {
        self.send_audio_frames(bytes, format).await.map_err(|e| ConversationError::ServiceUnavailable(e.to_string()))
    }
}

#[async_trait]
impl AgentAudioTrack for Agent {
    async fn send_audio(&self, bytes: Bytes, format: AudioFormat) -> VoiceResult<()> {
        self.send_audio_frames(bytes, format).await.map_err(|e| VoiceError::TtsFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeOpusEncoder, FakeRoom, FakeRoomConnector, RecordingCallbacks};

    fn test_config() -> AgentConfig {
        AgentConfig {
            work_queue_size: 4,
            worker_count: 2,
            work_queue_timeout: Duration::from_millis(50),
            ack_timeout: Duration::from_millis(30),
            max_retries: 2,
            tts_sample_rate: 24_000,
            tts_channels: 1,
        }
    }

    fn new_agent(config: AgentConfig, room: Arc<FakeRoom>) -> (Arc<Agent>, mpsc::Sender<RoomEvent>) {
        let (events_tx, events_rx) = mpsc::channel(16);
        let connector = Arc::new(FakeRoomConnector::new(room, events_rx));
        let agent = Arc::new(Agent::new(config, connector, Arc::new(FakeOpusEncoder)));
        (agent, events_tx)
    }

    #[tokio::test]
    async fn connect_requires_bound_callbacks() {
        let (agent, _events_tx) = new_agent(test_config(), Arc::new(FakeRoom::default()));
        let err = agent.connect("conv-1").await.unwrap_err();
        assert!(matches!(err, AgentError::MissingCallbacks));
    }

    #[tokio::test]
    async fn connect_twice_fails() {
        let (agent, _events_tx) = new_agent(test_config(), Arc::new(FakeRoom::default()));
        agent.bind_callbacks(Arc::new(RecordingCallbacks::default()));
        agent.connect("conv-1").await.unwrap();
        let err = agent.connect("conv-1").await.unwrap_err();
        assert!(matches!(err, AgentError::AlreadyConnected));
    }

    #[tokio::test]
    async fn inbound_data_is_delivered_and_acked() {
        let room = Arc::new(FakeRoom::default());
        let (agent, events_tx) = new_agent(test_config(), room.clone());
        let callbacks = Arc::new(RecordingCallbacks::default());
        agent.bind_callbacks(callbacks.clone());
        agent.connect("conv-1").await.unwrap();

        let envelope = Envelope::new(
            StanzaId(1),
            ConversationId::new("conv-1"),
            TypedMessage::UserMessage(ac_protocol::UserMessage {
                id: "msg-1".into(),
                previous_id: None,
                content: "hi".into(),
            }),
        );
        let payload = Codec::encode_payload(&envelope).unwrap();
        events_tx.send(RoomEvent::DataReceived(payload)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(callbacks.data.lock().len(), 1);
        assert_eq!(room.published.lock().len(), 1, "client-originated stanza should be acked");

        agent.disconnect().await;
    }

    #[tokio::test]
    async fn acknowledgement_clears_pending_ack() {
        let room = Arc::new(FakeRoom::default());
        let (agent, events_tx) = new_agent(test_config(), room.clone());
        agent.bind_callbacks(Arc::new(RecordingCallbacks::default()));
        agent.connect("conv-1").await.unwrap();

        let conversation_id = ConversationId::new("conv-1");
        AgentPort::send_tracked(&*agent, &conversation_id, StanzaId(-1), Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(agent.pending_acks.lock().len(), 1);

        let ack = Envelope::new(
            StanzaId::CONTROL,
            conversation_id,
            TypedMessage::Acknowledgement(Acknowledgement { acked_stanza_id: -1, success: true }),
        );
        events_tx.send(RoomEvent::DataReceived(Codec::encode_payload(&ack).unwrap())).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(agent.pending_acks.lock().is_empty());

        agent.disconnect().await;
    }

    #[tokio::test]
    async fn unacknowledged_message_is_retried_then_dropped() {
        let room = Arc::new(FakeRoom::default());
        let mut config = test_config();
        config.ack_timeout = Duration::from_millis(10);
        config.max_retries = 2;
        let (agent, _events_tx) = new_agent(config, room.clone());
        agent.bind_callbacks(Arc::new(RecordingCallbacks::default()));
        agent.connect("conv-1").await.unwrap();

        let conversation_id = ConversationId::new("conv-1");
        AgentPort::send_tracked(&*agent, &conversation_id, StanzaId(-1), Bytes::from_static(b"hello"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        // Original send + up to max_retries retries, then the entry is
        // dropped from the table.
        assert!(agent.pending_acks.lock().is_empty());
        assert!(room.published.lock().len() >= 2);

        agent.disconnect().await;
    }

    #[tokio::test]
    async fn work_queue_overflow_emits_recoverable_error() {
        let room = Arc::new(FakeRoom::default());
        let mut config = test_config();
        config.worker_count = 0; // nothing drains the queue
        config.work_queue_size = 1;
        config.work_queue_timeout = Duration::from_millis(10);
        let (agent, events_tx) = new_agent(config, room.clone());
        agent.bind_callbacks(Arc::new(RecordingCallbacks::default()));
        agent.connect("conv-1").await.unwrap();

        for i in 0..3 {
            let envelope = Envelope::new(
                StanzaId(i + 1),
                ConversationId::new("conv-1"),
                TypedMessage::UserMessage(ac_protocol::UserMessage {
                    id: format!("msg-{i}"),
                    previous_id: None,
                    content: "hi".into(),
                }),
            );
            let payload = Codec::encode_payload(&envelope).unwrap();
            events_tx.send(RoomEvent::DataReceived(payload)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        let published = room.published.lock();
        let decoded: Vec<_> = published
            .iter()
            .filter_map(|bytes| Codec::decode_payload(&mut bytes.clone()).ok())
            .collect();
        assert!(decoded.iter().any(|e| matches!(
            &e.body,
            TypedMessage::ErrorMessage(err) if err.code == ac_types::ErrorCode::QueueOverflow
        )));

        drop(published);
        agent.disconnect().await;
    }

    #[tokio::test]
    async fn send_audio_pcm_chunks_into_20ms_opus_frames() {
        let room = Arc::new(FakeRoom::default());
        let (agent, _events_tx) = new_agent(test_config(), room.clone());
        agent.bind_callbacks(Arc::new(RecordingCallbacks::default()));
        agent.connect("conv-1").await.unwrap();

        // 100ms of silence at 24kHz mono => 5 opus frames once resampled to
        // 48kHz stereo.
        let samples = vec![0i16; 2_400];
        let bytes = Bytes::from(samples.iter().flat_map(|s| s.to_le_bytes()).collect::<Vec<u8>>());
        AgentPort::send_audio(&*agent, bytes, AudioFormat::Pcm).await.unwrap();

        agent.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_drains_tasks() {
        let room = Arc::new(FakeRoom::default());
        let (agent, _events_tx) = new_agent(test_config(), room.clone());
        agent.bind_callbacks(Arc::new(RecordingCallbacks::default()));
        agent.connect("conv-1").await.unwrap();
        agent.disconnect().await;
        assert!(!agent.is_connected());
        assert!(*room.disconnected.lock());
        // A second disconnect on an already-disconnected agent is a no-op.
        agent.disconnect().await;
    }
}
