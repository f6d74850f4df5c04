use std::time::Duration;

use clap::Parser;

/// Runtime configuration for one `ac-agent` process. Every tunable named in
/// the wire-level configuration section has a long-form flag with an
/// `env` fallback for secrets/urls, mirroring `server/gateway/src/config.rs`
/// and `client/src/config.rs`. Durations are taken in milliseconds/seconds at
/// the CLI boundary and converted immediately after parsing.
#[derive(Parser, Debug, Clone)]
#[command(name = "ac-agent", about = "Conversational-agent protocol core")]
pub struct Config {
    /// SFU room server URL.
    #[arg(long, env = "AC_SFU_URL")]
    pub url: String,

    /// SFU API key.
    #[arg(long, env = "AC_SFU_API_KEY")]
    pub api_key: String,

    /// SFU API secret.
    #[arg(long, env = "AC_SFU_API_SECRET")]
    pub api_secret: String,

    /// Participant identity the agent registers under in a room.
    #[arg(long, env = "AC_AGENT_IDENTITY", default_value = "ac-agent")]
    pub agent_identity: String,

    /// Display name the agent registers under in a room.
    #[arg(long, env = "AC_AGENT_NAME", default_value = "Assistant")]
    pub agent_name: String,

    /// SFU access-token lifetime, in seconds.
    #[arg(long, default_value_t = 24 * 3600)]
    pub token_validity_duration_s: u64,

    /// Size of each agent's bounded work queue.
    #[arg(long, default_value_t = 100)]
    pub work_queue_size: usize,

    /// Number of workers draining the work queue.
    #[arg(long, default_value_t = 10)]
    pub worker_count: usize,

    /// Deadline for a single work-queue enqueue attempt, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub work_queue_timeout_ms: u64,

    /// Period of the acknowledgement-retry ticker, in seconds.
    #[arg(long, default_value_t = 5)]
    pub ack_timeout_s: u64,

    /// Retransmits attempted before a pending message is dropped.
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Capacity of the per-conversation replay ring.
    #[arg(long, default_value_t = 200)]
    pub max_buffer_size: usize,

    /// Largest `lastSequenceSeen` gap the reconnection algorithm will repair.
    #[arg(long, default_value_t = 1000)]
    pub max_reconnection_gap: u32,

    /// Path to the VAD model; empty disables voice-activity detection and
    /// turn-based barge-in.
    #[arg(long, default_value = "")]
    pub vad_model_path: String,

    /// Trailing silence required to close a turn, in milliseconds.
    #[arg(long, default_value_t = 1200)]
    pub vad_silence_duration_ms: u64,

    /// Speech/silence decision threshold for the VAD model.
    #[arg(long, default_value_t = 0.5)]
    pub vad_threshold: f32,

    /// Sample rate of PCM bytes handed to `SendAudio`, before resampling to
    /// the SFU's 48kHz stereo track.
    #[arg(long, default_value_t = 24_000)]
    pub tts_sample_rate: u32,

    /// Channel count of PCM bytes handed to `SendAudio`.
    #[arg(long, default_value_t = 1)]
    pub tts_channels: u8,

    /// Room-name prefix the worker's discovery sweep claims.
    #[arg(long, default_value = "conv_")]
    pub room_prefix: String,

    /// Interval between room-discovery sweeps, in seconds.
    #[arg(long, default_value_t = 5)]
    pub discovery_interval_s: u64,

    /// Interval between per-agent health checks, in seconds.
    #[arg(long, default_value_t = 10)]
    pub monitor_interval_s: u64,

    /// Interval between stale-generation sweeps, in seconds.
    #[arg(long, default_value_t = 60)]
    pub generation_cleanup_interval_s: u64,

    /// Maximum age of an in-flight generation before the cleanup sweep
    /// cancels it, in seconds.
    #[arg(long, default_value_t = 600)]
    pub generation_max_age_s: u64,
}

impl Config {
    pub fn token_validity_duration(&self) -> Duration {
        Duration::from_secs(self.token_validity_duration_s)
    }

    pub fn work_queue_timeout(&self) -> Duration {
        Duration::from_millis(self.work_queue_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_s)
    }

    pub fn vad_silence_duration(&self) -> Duration {
        Duration::from_millis(self.vad_silence_duration_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_s)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_s)
    }

    pub fn generation_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.generation_cleanup_interval_s)
    }

    pub fn generation_max_age(&self) -> Duration {
        Duration::from_secs(self.generation_max_age_s)
    }

    pub fn vad_enabled(&self) -> bool {
        !self.vad_model_path.is_empty()
    }

    pub fn agent_config(&self) -> crate::agent::AgentConfig {
        crate::agent::AgentConfig {
            work_queue_size: self.work_queue_size,
            worker_count: self.worker_count,
            work_queue_timeout: self.work_queue_timeout(),
            ack_timeout: self.ack_timeout(),
            max_retries: self.max_retries,
            tts_sample_rate: self.tts_sample_rate,
            tts_channels: self.tts_channels,
        }
    }
}
