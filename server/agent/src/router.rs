//! Binds the Agent's SFU-facing callbacks to the conversation core and the
//! voice pipeline. This is the one place in the crate that knows about all
//! three: inbound envelopes go to [`Dispatcher`], inbound audio goes to both
//! [`VadProcessor`] (turn detection) and [`VoicePipeline`] (ASR hand-off),
//! and a detected turn boundary or finalized transcription routes back into
//! the conversation core the same way a client-originated envelope would.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use ac_conversation::{Dispatcher, GenerationManager};
use ac_protocol::{Envelope, Transcription, TypedMessage};
use ac_types::{ConversationId, StanzaId};
use ac_voice::{AsrService, TranscriptionSink, TurnSink, VadProcessor, VoiceActivityModel, VoicePipeline};

use crate::ports::{AgentCallbacks, RawOpusDecoder};

/// Minimal canonical WAV wrapper for the no-`VoicePipeline` fallback path.
/// Duplicated in miniature from `ac_voice::voice_pipeline` rather than
/// exposed there: this is a degraded, unbuffered path with no business being
/// anything but a last resort.
fn wrap_wav_mono16(pcm: &[i16], sample_rate: u32) -> Bytes {
    let data_len = (pcm.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + pcm.len() * 2);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in pcm {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(out)
}

/// Per-conversation glue. One `Router` is bound to one [`crate::agent::Agent`]
/// for the lifetime of its connection.
pub struct Router {
    conversation_id: ConversationId,
    dispatcher: Arc<Dispatcher>,
    generation_manager: Arc<GenerationManager>,
    // Set once after construction: building a `VoicePipeline` needs this
    // `Router` as its `TranscriptionSink`, so the pipeline can't exist yet
    // when the router itself is built. See `bind_voice_pipeline`.
    voice_pipeline: std::sync::OnceLock<Arc<VoicePipeline>>,
    vad: Option<AsyncMutex<VadProcessor<Box<dyn VoiceActivityModel>>>>,
    raw_opus_decoder: Option<Arc<dyn RawOpusDecoder>>,
    // Audio from a track this agent does not expect (multi-track rooms,
    // the agent's own echoed publish) is dropped rather than misrouted.
    expected_track_id: SyncMutex<Option<String>>,
    // Only consulted once per connection: the first audio frame logs the
    // degraded-mode warning, later frames stay quiet.
    fallback_asr: Option<Arc<dyn AsrService>>,
    fallback_warned: std::sync::atomic::AtomicBool,
}

impl Router {
    pub fn new(
        conversation_id: ConversationId,
        dispatcher: Arc<Dispatcher>,
        generation_manager: Arc<GenerationManager>,
        vad: Option<VadProcessor<Box<dyn VoiceActivityModel>>>,
        raw_opus_decoder: Option<Arc<dyn RawOpusDecoder>>,
    ) -> Self {
        Self::with_fallback_asr(conversation_id, dispatcher, generation_manager, vad, raw_opus_decoder, None)
    }

    /// `fallback_asr` is only ever consulted when no [`VoicePipeline`] has
    /// been bound via [`Router::bind_voice_pipeline`] — the degraded
    /// direct-to-ASR path called out in the routing design: no buffering, no
    /// silence-timeout gating, one transcription call per inbound frame.
    pub fn with_fallback_asr(
        conversation_id: ConversationId,
        dispatcher: Arc<Dispatcher>,
        generation_manager: Arc<GenerationManager>,
        vad: Option<VadProcessor<Box<dyn VoiceActivityModel>>>,
        raw_opus_decoder: Option<Arc<dyn RawOpusDecoder>>,
        fallback_asr: Option<Arc<dyn AsrService>>,
    ) -> Self {
        Self {
            conversation_id,
            dispatcher,
            generation_manager,
            voice_pipeline: std::sync::OnceLock::new(),
            vad: vad.map(AsyncMutex::new),
            raw_opus_decoder,
            expected_track_id: SyncMutex::new(None),
            fallback_asr,
            fallback_warned: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Attaches the voice pipeline once it has been built with this router
    /// as its transcription sink. A no-op if called more than once.
    pub fn bind_voice_pipeline(&self, pipeline: Arc<VoicePipeline>) {
        let _ = self.voice_pipeline.set(pipeline);
    }

    pub fn set_expected_track(&self, track_id: impl Into<String>) {
        *self.expected_track_id.lock() = Some(track_id.into());
    }

    fn accepts(&self, track_id: &str) -> bool {
        match &*self.expected_track_id.lock() {
            Some(expected) => expected == track_id,
            None => true,
        }
    }

    /// No `VoicePipeline` bound: transcribe each frame directly with no
    /// buffering or silence gating. Exists so a misconfigured or
    /// not-yet-ready agent still produces transcriptions instead of
    /// silently dropping audio, at the cost of per-frame ASR calls.
    async fn fallback_direct_asr(&self, rtp_payload: &Bytes) {
        let Some(asr) = &self.fallback_asr else { return };
        let Some(decoder) = &self.raw_opus_decoder else { return };

        if !self.fallback_warned.swap(true, std::sync::atomic::Ordering::Relaxed) {
            warn!(
                conversation_id = %self.conversation_id,
                "no voice pipeline bound, falling back to direct per-frame ASR (degraded mode)"
            );
        }

        let stereo_48k = match decoder.decode_48k_stereo(rtp_payload) {
            Ok(samples) => samples,
            Err(err) => {
                warn!(%err, conversation_id = %self.conversation_id, "fallback ASR decode failed");
                return;
            }
        };
        let mono: Vec<i16> =
            stereo_48k.chunks_exact(2).map(|pair| (((pair[0] as i32) + (pair[1] as i32)) / 2) as i16).collect();
        let wav = wrap_wav_mono16(&mono, 48_000);

        match asr.transcribe(wav).await {
            Ok(result) => {
                self.on_transcription(result.text, true, result.confidence, result.language).await;
            }
            Err(err) => warn!(%err, conversation_id = %self.conversation_id, "fallback ASR transcription failed"),
        }
    }
}

#[async_trait]
impl AgentCallbacks for Router {
    async fn on_data(&self, envelope: Envelope) {
        if let Err(err) = self.dispatcher.dispatch(envelope).await {
            warn!(%err, conversation_id = %self.conversation_id, "dispatch failed");
        }
    }

    async fn on_audio_frame(&self, track_id: &str, rtp_payload: Bytes) {
        if !self.accepts(track_id) {
            return;
        }

        if let Some(pipeline) = self.voice_pipeline.get() {
            if let Err(err) = pipeline.process_audio_frame(&rtp_payload).await {
                warn!(%err, conversation_id = %self.conversation_id, "voice pipeline frame processing failed");
            }
        } else {
            self.fallback_direct_asr(&rtp_payload).await;
        }

        if let (Some(vad), Some(decoder)) = (&self.vad, &self.raw_opus_decoder) {
            match decoder.decode_48k_stereo(&rtp_payload) {
                Ok(stereo_48k) => {
                    let mut vad = vad.lock().await;
                    if let Err(err) = vad.process_frame(&stereo_48k, self).await {
                        warn!(%err, conversation_id = %self.conversation_id, "vad frame processing failed");
                    }
                }
                Err(err) => warn!(%err, conversation_id = %self.conversation_id, "raw opus decode failed"),
            }
        }
    }

    async fn on_participant_joined(&self, identity: &str) {
        tracing::debug!(conversation_id = %self.conversation_id, identity, "participant joined");
    }

    async fn on_participant_left(&self, identity: &str) {
        tracing::debug!(conversation_id = %self.conversation_id, identity, "participant left");
    }
}

/// Turn-start is the barge-in signal: cancel whatever generation or TTS is
/// in flight before the user's new utterance even finishes.
#[async_trait]
impl TurnSink for Router {
    async fn on_turn_start(&self) {
        self.generation_manager.cancel_all();
    }

    async fn on_turn_end(&self, duration_ms: u64) {
        tracing::debug!(conversation_id = %self.conversation_id, duration_ms, "turn ended");
    }
}

/// Wires a finalized transcription back into the dispatcher as though it
/// were a client-originated envelope. The stanza id is synthetic — this
/// never traveled the wire — so it rides the control id rather than
/// claiming a position in either direction's sequence.
#[async_trait]
impl TranscriptionSink for Router {
    async fn on_transcription(&self, text: String, is_final: bool, confidence: f32, language: Option<String>) {
        let envelope = Envelope::new(
            StanzaId::CONTROL,
            self.conversation_id.clone(),
            TypedMessage::Transcription(Transcription { text, is_final, confidence, language }),
        );
        if let Err(err) = self.dispatcher.dispatch(envelope).await {
            warn!(%err, conversation_id = %self.conversation_id, "failed to dispatch transcription");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_conversation::testing::*;
    use ac_conversation::{ProtocolHandler, ProtocolHandlerConfig};

    fn test_router() -> (Router, Arc<RecordingAgent>) {
        let conversation_id = ConversationId::new("conv-1");
        let agent_port = Arc::new(RecordingAgent::default());
        let protocol_handler = Arc::new(ProtocolHandler::new(
            conversation_id.clone(),
            agent_port.clone(),
            Arc::new(InMemoryConversationRepo::default()),
            Arc::new(InMemoryMessageRepo::default()),
            ProtocolHandlerConfig::default(),
        ));
        let generation_manager = Arc::new(GenerationManager::new());
        let dispatcher = Arc::new(Dispatcher::new(
            conversation_id.clone(),
            protocol_handler,
            generation_manager.clone(),
            Arc::new(InMemoryMessageRepo::default()),
            Arc::new(InMemoryToolUseRepo::default()),
            Arc::new(SequentialIdGenerator::new("msg")),
            Arc::new(ScriptedGenerationUseCase { sentences: vec![("hi".into(), true)] }),
            None,
            None,
            None,
        ));
        let router = Router::new(conversation_id, dispatcher, generation_manager, None, None);
        (router, agent_port)
    }

    #[tokio::test]
    async fn on_data_routes_through_dispatcher() {
        let (router, agent_port) = test_router();
        let envelope = Envelope::new(
            ac_types::StanzaId(1),
            ConversationId::new("conv-1"),
            TypedMessage::UserMessage(ac_protocol::UserMessage {
                id: "m1".into(),
                previous_id: None,
                content: "hello".into(),
            }),
        );
        router.on_data(envelope).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!agent_port.tracked.lock().is_empty() || !agent_port.untracked.lock().is_empty());
    }

    #[tokio::test]
    async fn turn_start_cancels_all_generations() {
        let (router, _agent_port) = test_router();
        let (_handle, rx) = router.generation_manager.register_generation("gen-1");
        router.on_turn_start().await;
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn transcription_dispatches_as_synthetic_envelope() {
        let (router, agent_port) = test_router();
        ac_voice::TranscriptionSink::on_transcription(&router, "hello there".into(), true, 0.9, None).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!agent_port.tracked.lock().is_empty());
    }

    struct FixedAsr;
    #[async_trait]
    impl AsrService for FixedAsr {
        async fn transcribe(&self, _wav: Bytes) -> ac_voice::VoiceResult<ac_voice::TranscriptionResult> {
            Ok(ac_voice::TranscriptionResult { text: "fallback".into(), confidence: 0.9, language: None })
        }
    }

    struct PassthroughRawDecoder;
    impl RawOpusDecoder for PassthroughRawDecoder {
        fn decode_48k_stereo(&self, frame: &[u8]) -> crate::error::AgentResult<Vec<i16>> {
            Ok(frame.iter().map(|&b| b as i16).collect())
        }
    }

    #[tokio::test]
    async fn no_voice_pipeline_falls_back_to_direct_asr() {
        let conversation_id = ConversationId::new("conv-1");
        let agent_port = Arc::new(RecordingAgent::default());
        let protocol_handler = Arc::new(ProtocolHandler::new(
            conversation_id.clone(),
            agent_port.clone(),
            Arc::new(InMemoryConversationRepo::default()),
            Arc::new(InMemoryMessageRepo::default()),
            ProtocolHandlerConfig::default(),
        ));
        let generation_manager = Arc::new(GenerationManager::new());
        let dispatcher = Arc::new(Dispatcher::new(
            conversation_id.clone(),
            protocol_handler,
            generation_manager.clone(),
            Arc::new(InMemoryMessageRepo::default()),
            Arc::new(InMemoryToolUseRepo::default()),
            Arc::new(SequentialIdGenerator::new("msg")),
            Arc::new(ScriptedGenerationUseCase { sentences: vec![("hi".into(), true)] }),
            None,
            None,
            None,
        ));
        let router = Router::with_fallback_asr(
            conversation_id,
            dispatcher,
            generation_manager,
            None,
            Some(Arc::new(PassthroughRawDecoder)),
            Some(Arc::new(FixedAsr)),
        );

        router.on_audio_frame("track-1", Bytes::from_static(&[1, 2, 3, 4])).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!agent_port.tracked.lock().is_empty(), "fallback transcription should dispatch a generation");
    }
}
