//! Real Opus codec, used both for the outbound 20ms encode path
//! ([`OpusEncoder`]) and the inbound decode path that feeds the VAD
//! ([`RawOpusDecoder`]). `ac_voice::OpusDecoder` (ASR-rate decode) is a
//! separate concern and gets its own instance at whatever rate the ASR
//! backend wants.

use std::sync::Mutex;

use bytes::Bytes;
use opus::{Application, Channels, Decoder, Encoder};

use crate::error::{AgentError, AgentResult};
use crate::ports::{OpusEncoder, RawOpusDecoder};
use crate::resample::{OPUS_FRAME_MS, SFU_CHANNELS, SFU_SAMPLE_RATE};

const MAX_ENCODED_FRAME_BYTES: usize = 4000;
const ASR_SAMPLE_RATE: u32 = 16_000;
const ASR_FRAME_SAMPLES: usize = (ASR_SAMPLE_RATE / 1000 * OPUS_FRAME_MS) as usize;

pub struct OpusCodec {
    encoder: Mutex<Encoder>,
    decoder: Mutex<Decoder>,
}

impl OpusCodec {
    pub fn new() -> AgentResult<Self> {
        let encoder = Encoder::new(SFU_SAMPLE_RATE, Channels::Stereo, Application::Voip)
            .map_err(|err| AgentError::Internal(format!("opus encoder init failed: {err}")))?;
        let decoder = Decoder::new(SFU_SAMPLE_RATE, Channels::Stereo)
            .map_err(|err| AgentError::Internal(format!("opus decoder init failed: {err}")))?;
        Ok(Self { encoder: Mutex::new(encoder), decoder: Mutex::new(decoder) })
    }

    fn frame_samples() -> usize {
        (SFU_SAMPLE_RATE / 1000 * OPUS_FRAME_MS) as usize * SFU_CHANNELS as usize
    }
}

impl OpusEncoder for OpusCodec {
    fn encode_20ms(&self, pcm_48k_stereo: &[i16]) -> AgentResult<Bytes> {
        let mut out = vec![0u8; MAX_ENCODED_FRAME_BYTES];
        let Ok(mut encoder) = self.encoder.lock() else {
            return Err(AgentError::Internal("opus encoder mutex poisoned".into()));
        };
        let len = encoder
            .encode(pcm_48k_stereo, &mut out)
            .map_err(|err| AgentError::Internal(format!("opus encode failed: {err}")))?;
        out.truncate(len);
        Ok(Bytes::from(out))
    }
}

impl RawOpusDecoder for OpusCodec {
    fn decode_48k_stereo(&self, frame: &[u8]) -> AgentResult<Vec<i16>> {
        let mut out = vec![0i16; Self::frame_samples()];
        let Ok(mut decoder) = self.decoder.lock() else {
            return Err(AgentError::Internal("opus decoder mutex poisoned".into()));
        };
        let samples_per_channel = decoder
            .decode(frame, &mut out, false)
            .map_err(|err| AgentError::Internal(format!("opus decode failed: {err}")))?;
        out.truncate(samples_per_channel * SFU_CHANNELS as usize);
        Ok(out)
    }
}

/// Decodes at the mono 16 kHz rate `VoicePipeline` hands to ASR, kept as a
/// separate decoder instance from [`OpusCodec`] (which stays at the SFU's
/// native 48 kHz stereo) so the two consumers of a frame don't share decoder
/// state.
pub struct AsrOpusDecoder {
    decoder: Mutex<Decoder>,
}

impl AsrOpusDecoder {
    pub fn new() -> ac_voice::VoiceResult<Self> {
        let decoder = Decoder::new(ASR_SAMPLE_RATE, Channels::Mono)
            .map_err(|err| ac_voice::VoiceError::DecodeFailed(format!("opus decoder init failed: {err}")))?;
        Ok(Self { decoder: Mutex::new(decoder) })
    }
}

impl ac_voice::OpusDecoder for AsrOpusDecoder {
    fn decode(&self, frame: &[u8]) -> ac_voice::VoiceResult<Vec<i16>> {
        let mut out = vec![0i16; ASR_FRAME_SAMPLES];
        let Ok(mut decoder) = self.decoder.lock() else {
            return Err(ac_voice::VoiceError::DecodeFailed("opus decoder mutex poisoned".into()));
        };
        let samples = decoder
            .decode(frame, &mut out, false)
            .map_err(|err| ac_voice::VoiceError::DecodeFailed(err.to_string()))?;
        out.truncate(samples);
        Ok(out)
    }
}
