//! Collaborators the voice pipeline invokes but does not implement: the
//! Opus codec, ASR/TTS backends, and the callbacks fired on transcription
//! finalization / audio output.

use async_trait::async_trait;
use bytes::Bytes;

use ac_types::AudioFormat;

use crate::error::VoiceResult;

/// Thin wrapper around the Opus codec. Decoding is CPU-bound and fast
/// enough to stay synchronous.
pub trait OpusDecoder: Send + Sync {
    fn decode(&self, frame: &[u8]) -> VoiceResult<Vec<i16>>;
}

#[derive(Clone, Debug)]
pub struct TranscriptionResult {
    pub text: String,
    pub confidence: f32,
    pub language: Option<String>,
}

#[async_trait]
pub trait AsrService: Send + Sync {
    async fn transcribe(&self, wav: Bytes) -> VoiceResult<TranscriptionResult>;
}

#[async_trait]
pub trait TtsService: Send + Sync {
    async fn synthesize(&self, text: &str) -> VoiceResult<(Bytes, AudioFormat)>;
}

/// Fired once a buffered utterance clears confidence and duration gates.
#[async_trait]
pub trait TranscriptionSink: Send + Sync {
    async fn on_transcription(
        &self,
        text: String,
        is_final: bool,
        confidence: f32,
        language: Option<String>,
    );
}

/// Fired whenever synthesized audio is pushed out, independent of the
/// outbound audio track itself.
#[async_trait]
pub trait AudioOutputSink: Send + Sync {
    async fn on_audio_output(&self, bytes: Bytes, format: AudioFormat);
}

/// The agent's outbound audio track, as seen by the voice pipeline.
#[async_trait]
pub trait AgentAudioTrack: Send + Sync {
    async fn send_audio(&self, bytes: Bytes, format: AudioFormat) -> VoiceResult<()>;
}
