//! PCM resampling for the outbound audio path: arbitrary TTS rate/channels
//! to the 48 kHz stereo format the SFU audio track expects.

pub const SFU_SAMPLE_RATE: u32 = 48_000;
pub const SFU_CHANNELS: u8 = 2;
pub const OPUS_FRAME_MS: u32 = 20;

/// Downmixes to mono, then linearly resamples to 48 kHz, then duplicates to
/// stereo.
pub fn resample_to_48k_stereo(pcm: &[i16], src_rate: u32, src_channels: u8) -> Vec<i16> {
    let mono = downmix_to_mono(pcm, src_channels);
    let resampled = linear_resample(&mono, src_rate, SFU_SAMPLE_RATE);
    interleave_stereo(&resampled)
}

fn downmix_to_mono(pcm: &[i16], channels: u8) -> Vec<i16> {
    if channels <= 1 {
        return pcm.to_vec();
    }
    pcm.chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

fn linear_resample(mono: &[i16], src_rate: u32, dst_rate: u32) -> Vec<i16> {
    if mono.is_empty() || src_rate == dst_rate {
        return mono.to_vec();
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let out_len = ((mono.len() as f64) * ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = src_pos - idx as f64;
        let a = mono[idx.min(mono.len() - 1)] as f64;
        let b = mono[(idx + 1).min(mono.len() - 1)] as f64;
        out.push((a + (b - a) * frac).round() as i16);
    }
    out
}

fn interleave_stereo(mono: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(mono.len() * 2);
    for &sample in mono {
        out.push(sample);
        out.push(sample);
    }
    out
}

/// Splits 48 kHz stereo PCM into fixed 20ms chunks, zero-padding the final
/// partial chunk.
pub fn chunk_into_20ms_frames(pcm_48k_stereo: &[i16]) -> Vec<Vec<i16>> {
    let frame_samples = (SFU_SAMPLE_RATE / 1000 * OPUS_FRAME_MS) as usize * SFU_CHANNELS as usize;
    if pcm_48k_stereo.is_empty() {
        return Vec::new();
    }
    pcm_48k_stereo
        .chunks(frame_samples)
        .map(|chunk| {
            if chunk.len() == frame_samples {
                chunk.to_vec()
            } else {
                let mut padded = chunk.to_vec();
                padded.resize(frame_samples, 0);
                padded
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_stereo_pairs() {
        let pcm = vec![100, 200, 300, 400];
        let mono = downmix_to_mono(&pcm, 2);
        assert_eq!(mono, vec![150, 350]);
    }

    #[test]
    fn resample_upsamples_length_by_ratio() {
        let mono = vec![0i16; 16_000];
        let resampled = linear_resample(&mono, 16_000, 48_000);
        assert_eq!(resampled.len(), 48_000);
    }

    #[test]
    fn chunking_pads_final_partial_frame() {
        let pcm = vec![1i16; 100];
        let frames = chunk_into_20ms_frames(&pcm);
        let frame_samples = (SFU_SAMPLE_RATE / 1000 * OPUS_FRAME_MS) as usize * SFU_CHANNELS as usize;
        assert!(frames.iter().all(|f| f.len() == frame_samples));
        assert_eq!(frames.last().unwrap()[99], 1);
        assert_eq!(frames.last().unwrap()[100], 0);
    }
}
