//! Single-conversation audio pipeline: Opus decode, silence gating, and a
//! buffered hand-off to ASR on turn end.
//!
//! The tricky part is the silence timer. A timer can fire and block on the
//! pipeline lock at the exact moment a fresh frame of speech arrives and
//! arms a replacement timer. Both races are resolved with a generation
//! counter: every timer arm/cancel bumps it, and a fired timer first checks
//! that the generation it captured when armed still matches before doing
//! anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use ac_types::{AudioFormat, ConversationId};

use crate::audio_buffer::AudioBuffer;
use crate::error::{VoiceError, VoiceResult};
use crate::ports::{AgentAudioTrack, AsrService, AudioOutputSink, OpusDecoder, TranscriptionSink, TtsService};

#[derive(Clone, Debug)]
pub struct VoicePipelineConfig {
    pub sample_rate: u32,
    pub max_buffer_duration: Duration,
    /// Threshold on the mean of squares of the PCM samples, not RMS,
    /// despite the name inherited from the source configuration option.
    pub silence_threshold: f64,
    pub silence_timeout: Duration,
    pub min_speech_duration: Duration,
    pub min_confidence: f32,
    pub asr_timeout: Duration,
}

impl Default for VoicePipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            max_buffer_duration: Duration::from_secs(30),
            silence_threshold: 4_000_000.0,
            silence_timeout: Duration::from_millis(800),
            min_speech_duration: Duration::from_millis(250),
            min_confidence: 0.5,
            asr_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    buffer: AudioBuffer,
    generation: u64,
    timer_active: bool,
    processing_audio: bool,
}

pub struct VoicePipeline {
    conversation_id: ConversationId,
    config: VoicePipelineConfig,
    cancelled: AtomicBool,
    inner: Mutex<Inner>,
    decoder: Arc<dyn OpusDecoder>,
    asr: Arc<dyn AsrService>,
    tts: Arc<dyn TtsService>,
    transcription_sink: Arc<dyn TranscriptionSink>,
    audio_output_sink: Option<Arc<dyn AudioOutputSink>>,
    audio_track: Arc<dyn AgentAudioTrack>,
}

impl VoicePipeline {
    pub fn new(
        conversation_id: ConversationId,
        config: VoicePipelineConfig,
        decoder: Arc<dyn OpusDecoder>,
        asr: Arc<dyn AsrService>,
        tts: Arc<dyn TtsService>,
        transcription_sink: Arc<dyn TranscriptionSink>,
        audio_output_sink: Option<Arc<dyn AudioOutputSink>>,
        audio_track: Arc<dyn AgentAudioTrack>,
    ) -> Self {
        let buffer = AudioBuffer::new(config.sample_rate, config.max_buffer_duration);
        Self {
            conversation_id,
            config,
            cancelled: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                buffer,
                generation: 0,
                timer_active: false,
                processing_audio: false,
            }),
            decoder,
            asr,
            tts,
            transcription_sink,
            audio_output_sink,
            audio_track,
        }
    }

    pub async fn process_audio_frame(self: &Arc<Self>, frame: &[u8]) -> VoiceResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(VoiceError::Stopped);
        }

        let pcm = self.decoder.decode(frame)?;

        let armed = {
            let mut inner = self.inner.lock();
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(VoiceError::Stopped);
            }
            inner.buffer.push(&pcm);

            let mean_square = mean_square(&pcm);
            let is_speech = mean_square >= self.config.silence_threshold;

            if is_speech {
                inner.timer_active = false;
                inner.generation += 1;
                None
            } else if !inner.buffer.is_empty() && !inner.timer_active {
                inner.timer_active = true;
                Some(inner.generation)
            } else {
                None
            }
        };

        if let Some(generation) = armed {
            let pipeline = Arc::clone(self);
            tokio::spawn(async move {
                pipeline.on_silence_timer(generation).await;
            });
        }

        Ok(())
    }

    async fn on_silence_timer(self: Arc<Self>, captured_generation: u64) {
        tokio::time::sleep(self.config.silence_timeout).await;

        let samples = {
            let mut inner = self.inner.lock();
            if captured_generation != inner.generation {
                debug!(
                    conversation_id = %self.conversation_id,
                    "stale silence timer, dropping"
                );
                return;
            }
            inner.timer_active = false;
            inner.generation += 1;

            if self.cancelled.load(Ordering::SeqCst) || inner.processing_audio || inner.buffer.is_empty() {
                return;
            }
            if inner.buffer.duration() < self.config.min_speech_duration {
                inner.buffer.clear();
                return;
            }

            inner.processing_audio = true;
            inner.buffer.take()
        };

        self.finalize_utterance(samples).await;

        let mut inner = self.inner.lock();
        inner.processing_audio = false;
    }

    async fn finalize_utterance(&self, samples: Vec<i16>) {
        let wav = wrap_wav(&samples, self.config.sample_rate);
        let transcribed = tokio::time::timeout(self.config.asr_timeout, self.asr.transcribe(wav)).await;

        let result = match transcribed {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(conversation_id = %self.conversation_id, error = %err, "asr failed");
                return;
            }
            Err(_) => {
                warn!(conversation_id = %self.conversation_id, "asr timed out");
                return;
            }
        };

        if result.confidence < self.config.min_confidence {
            debug!(
                conversation_id = %self.conversation_id,
                confidence = result.confidence,
                "transcription below confidence floor, dropping"
            );
            return;
        }

        self.transcription_sink
            .on_transcription(result.text, true, result.confidence, result.language)
            .await;
    }

    pub async fn synthesize_speech(&self, text: &str) -> VoiceResult<()> {
        let (bytes, format) = self.tts.synthesize(text).await?;
        self.audio_track.send_audio(bytes.clone(), format).await?;
        if let Some(sink) = &self.audio_output_sink {
            sink.on_audio_output(bytes, format).await;
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        inner.timer_active = false;
        inner.generation += 1;
        inner.buffer.clear();
    }
}

fn mean_square(pcm: &[i16]) -> f64 {
    if pcm.is_empty() {
        return 0.0;
    }
    let sum: f64 = pcm.iter().map(|&s| (s as f64) * (s as f64)).sum();
    sum / pcm.len() as f64
}

/// Wraps raw 16-bit mono PCM in a minimal canonical WAV container.
fn wrap_wav(pcm: &[i16], sample_rate: u32) -> Bytes {
    let data_len = (pcm.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + pcm.len() * 2);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    out.extend_from_slice(&2u16.to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in pcm {
        out.extend_from_slice(&sample.to_le_bytes());
    }

    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceResult as VResult;
    use crate::ports::TranscriptionResult;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as AsyncMutex;

    struct PassthroughDecoder;
    impl OpusDecoder for PassthroughDecoder {
        fn decode(&self, frame: &[u8]) -> VResult<Vec<i16>> {
            Ok(frame.iter().map(|&b| (b as i16 - 128) * 200).collect())
        }
    }

    struct CountingAsr {
        calls: AtomicUsize,
        last_text: AsyncMutex<Option<String>>,
    }

    #[async_trait::async_trait]
    impl AsrService for CountingAsr {
        async fn transcribe(&self, _wav: Bytes) -> VResult<TranscriptionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_text.lock().await = Some("hello".to_string());
            Ok(TranscriptionResult {
                text: "hello".to_string(),
                confidence: 0.9,
                language: None,
            })
        }
    }

    struct NoopTts;
    #[async_trait::async_trait]
    impl TtsService for NoopTts {
        async fn synthesize(&self, _text: &str) -> VResult<(Bytes, AudioFormat)> {
            Ok((Bytes::new(), AudioFormat::Pcm))
        }
    }

    struct RecordingSink {
        events: Arc<Mutex<Vec<String>>>,
    }
    #[async_trait::async_trait]
    impl TranscriptionSink for RecordingSink {
        async fn on_transcription(&self, text: String, is_final: bool, _confidence: f32, _language: Option<String>) {
            self.events.lock().push(format!("{text}:{is_final}"));
        }
    }

    struct NoopTrack;
    #[async_trait::async_trait]
    impl AgentAudioTrack for NoopTrack {
        async fn send_audio(&self, _bytes: Bytes, _format: AudioFormat) -> VResult<()> {
            Ok(())
        }
    }

    fn speech_frame() -> Vec<u8> {
        vec![255; 320]
    }

    fn silence_frame() -> Vec<u8> {
        vec![128; 320]
    }

    #[tokio::test(start_paused = true)]
    async fn stale_silence_timer_is_rejected_in_favor_of_the_fresh_one() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let asr = Arc::new(CountingAsr {
            calls: AtomicUsize::new(0),
            last_text: AsyncMutex::new(None),
        });
        let pipeline = Arc::new(VoicePipeline::new(
            ConversationId::new("conv-1"),
            VoicePipelineConfig {
                silence_timeout: Duration::from_millis(50),
                min_speech_duration: Duration::from_millis(0),
                ..Default::default()
            },
            Arc::new(PassthroughDecoder),
            asr.clone(),
            Arc::new(NoopTts),
            Arc::new(RecordingSink { events: events.clone() }),
            None,
            Arc::new(NoopTrack),
        ));

        pipeline.process_audio_frame(&speech_frame()).await.unwrap();
        pipeline.process_audio_frame(&silence_frame()).await.unwrap();

        // Shorter than `silence_timeout`: the first timer is still asleep
        // (and thus still observes the generation it captured) when the new
        // speech frame below bumps the generation out from under it. That's
        // the actual race — a gap past `silence_timeout` would let the first
        // timer run to completion before the second utterance ever starts.
        tokio::time::sleep(Duration::from_millis(10)).await;

        pipeline.process_audio_frame(&speech_frame()).await.unwrap();
        pipeline.process_audio_frame(&silence_frame()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;

        assert_eq!(asr.calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn mean_square_of_silence_is_near_zero() {
        let pcm = vec![0i16; 100];
        assert_eq!(mean_square(&pcm), 0.0);
    }

    #[test]
    fn wav_header_reports_correct_data_length() {
        let wav = wrap_wav(&[1, 2, 3], 16_000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 6);
    }
}
