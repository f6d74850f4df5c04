use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Inbound/outbound audio encoding understood by [`crate::ids`] consumers and
/// by the agent's outbound audio track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    Pcm,
    Opus,
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported audio format: {0}")]
pub struct UnsupportedAudioFormat(pub String);

impl FromStr for AudioFormat {
    type Err = UnsupportedAudioFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pcm" | "audio/pcm" | "pcm16" => Ok(AudioFormat::Pcm),
            "opus" | "audio/opus" => Ok(AudioFormat::Opus),
            other => Err(UnsupportedAudioFormat(other.to_string())),
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFormat::Pcm => write!(f, "pcm"),
            AudioFormat::Opus => write!(f, "opus"),
        }
    }
}

/// A fixed-rate, fixed-channel PCM block. Used at the boundary between the
/// voice pipeline and the agent's outbound audio track.
#[derive(Clone, Debug)]
pub struct PcmBlock {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u8,
}

impl PcmBlock {
    pub fn duration(&self) -> std::time::Duration {
        let frames = self.samples.len() as u64 / self.channels.max(1) as u64;
        std::time::Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64)
    }
}
