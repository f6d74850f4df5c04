pub mod audio_buffer;
pub mod error;
pub mod ports;
pub mod vad;
pub mod voice_pipeline;

pub use audio_buffer::AudioBuffer;
pub use error::{VoiceError, VoiceResult};
pub use ports::{
    AgentAudioTrack, AsrService, AudioOutputSink, OpusDecoder, TranscriptionResult, TranscriptionSink, TtsService,
};
pub use vad::{TurnSink, VadProcessor, VadProcessorConfig, VoiceActivityModel};
pub use voice_pipeline::{VoicePipeline, VoicePipelineConfig};
