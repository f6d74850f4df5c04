//! Voice-activity-detection state machine: `Idle -> Speaking -> Ending -> Idle`.
//!
//! Mirrors the hysteresis shape of a client-side VAD gate, but tracks turn
//! boundaries (not per-frame gating) and reports wall-clock turn duration to
//! the caller. `OnTurnStart` is the barge-in signal; callers are expected to
//! cancel any in-flight generation/TTS the moment it fires.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::VoiceResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Speaking,
    Ending,
}

/// A single voice-activity probability, one per detector window.
pub trait VoiceActivityModel: Send + Sync {
    /// Returns `true` if the window at `pcm_mono_16k` contains speech.
    fn is_speech(&self, pcm_mono_16k: &[i16]) -> bool;
}

impl VoiceActivityModel for Box<dyn VoiceActivityModel> {
    fn is_speech(&self, pcm_mono_16k: &[i16]) -> bool {
        (**self).is_speech(pcm_mono_16k)
    }
}

#[async_trait]
pub trait TurnSink: Send + Sync {
    async fn on_turn_start(&self);
    async fn on_turn_end(&self, duration_ms: u64);
}

pub struct VadProcessorConfig {
    pub min_silence_duration: Duration,
}

impl Default for VadProcessorConfig {
    fn default() -> Self {
        Self {
            min_silence_duration: Duration::from_millis(1200),
        }
    }
}

pub struct VadProcessor<M: VoiceActivityModel> {
    model: M,
    config: VadProcessorConfig,
    state: State,
    turn_started_at: Option<Instant>,
    silence_started_at: Option<Instant>,
    resampler: Resampler48to16,
}

impl<M: VoiceActivityModel> VadProcessor<M> {
    pub fn new(model: M, config: VadProcessorConfig) -> Self {
        Self {
            model,
            config,
            state: State::Idle,
            turn_started_at: None,
            silence_started_at: None,
            resampler: Resampler48to16::default(),
        }
    }

    /// Feeds one frame of 48 kHz stereo PCM. Resamples to 16 kHz mono before
    /// detection, and drives the turn state machine.
    pub async fn process_frame(&mut self, stereo_48k: &[i16], sink: &dyn TurnSink) -> VoiceResult<()> {
        let mono_16k = self.resampler.resample(stereo_48k);
        let speech = self.model.is_speech(&mono_16k);
        self.advance(speech, sink).await;
        Ok(())
    }

    async fn advance(&mut self, speech: bool, sink: &dyn TurnSink) {
        match self.state {
            State::Idle => {
                if speech {
                    self.state = State::Speaking;
                    self.turn_started_at = Some(Instant::now());
                    sink.on_turn_start().await;
                }
            }
            State::Speaking => {
                if !speech {
                    self.state = State::Ending;
                    self.silence_started_at = Some(Instant::now());
                }
            }
            State::Ending => {
                if speech {
                    self.state = State::Speaking;
                    self.silence_started_at = None;
                } else if let Some(since) = self.silence_started_at {
                    if since.elapsed() >= self.config.min_silence_duration {
                        let duration_ms = self
                            .turn_started_at
                            .map(|start| start.elapsed().as_millis() as u64)
                            .unwrap_or(0);
                        self.state = State::Idle;
                        self.turn_started_at = None;
                        self.silence_started_at = None;
                        sink.on_turn_end(duration_ms).await;
                    }
                }
            }
        }
    }
}

/// Downsamples interleaved 48 kHz stereo PCM to 16 kHz mono: average the two
/// channels, then 3:1-decimate with local averaging as an anti-aliasing
/// filter in place of a proper polyphase resampler.
#[derive(Default)]
struct Resampler48to16;

impl Resampler48to16 {
    fn resample(&mut self, stereo_48k: &[i16]) -> Vec<i16> {
        let mono: Vec<i32> = stereo_48k
            .chunks_exact(2)
            .map(|pair| (pair[0] as i32 + pair[1] as i32) / 2)
            .collect();

        mono.chunks(3)
            .map(|group| {
                let sum: i32 = group.iter().sum();
                (sum / group.len() as i32) as i16
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct ScriptedModel {
        script: Mutex<std::collections::VecDeque<bool>>,
    }

    impl VoiceActivityModel for ScriptedModel {
        fn is_speech(&self, _pcm_mono_16k: &[i16]) -> bool {
            self.script.lock().pop_front().unwrap_or(false)
        }
    }

    struct RecordingSink {
        starts: Arc<Mutex<u32>>,
        ends: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl TurnSink for RecordingSink {
        async fn on_turn_start(&self) {
            *self.starts.lock() += 1;
        }
        async fn on_turn_end(&self, duration_ms: u64) {
            self.ends.lock().push(duration_ms);
        }
    }

    #[tokio::test]
    async fn resample_halves_sample_count_and_averages_channels() {
        let mut resampler = Resampler48to16::default();
        let stereo: Vec<i16> = vec![100, 200, 100, 200, 100, 200, 100, 200, 100, 200, 100, 200];
        let mono = resampler.resample(&stereo);
        assert_eq!(mono.len(), 2);
        assert_eq!(mono[0], 150);
    }

    #[tokio::test]
    async fn idle_to_speaking_to_ending_to_idle_fires_exactly_one_start_and_end() {
        let starts = Arc::new(Mutex::new(0));
        let ends = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            starts: starts.clone(),
            ends: ends.clone(),
        };

        let script = vec![true, true, false, false]
            .into_iter()
            .collect::<std::collections::VecDeque<_>>();
        let model = ScriptedModel {
            script: Mutex::new(script),
        };
        let mut vad = VadProcessor::new(
            model,
            VadProcessorConfig {
                min_silence_duration: Duration::from_millis(10),
            },
        );

        let frame = vec![0i16; 1920]; // 20ms @ 48k stereo
        vad.process_frame(&frame, &sink).await.unwrap();
        vad.process_frame(&frame, &sink).await.unwrap();
        vad.process_frame(&frame, &sink).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        vad.process_frame(&frame, &sink).await.unwrap();

        assert_eq!(*starts.lock(), 1);
        assert_eq!(ends.lock().len(), 1);
    }
}
