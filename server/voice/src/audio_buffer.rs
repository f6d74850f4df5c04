//! PCM ring buffer bounded by a maximum duration rather than a sample count,
//! since the pipeline only ever knows its configured sample rate at
//! construction time.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct AudioBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
    max_duration: Duration,
    last_activity: Instant,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, max_duration: Duration) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            max_duration,
            last_activity: Instant::now(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn len_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Appends PCM and drops the oldest samples if the buffer now exceeds
    /// `max_duration`.
    pub fn push(&mut self, pcm: &[i16]) {
        self.samples.extend_from_slice(pcm);
        self.last_activity = Instant::now();

        let max_samples = (self.max_duration.as_secs_f64() * self.sample_rate as f64) as usize;
        if self.samples.len() > max_samples {
            let drop = self.samples.len() - max_samples;
            self.samples.drain(0..drop);
        }
    }

    pub fn as_slice(&self) -> &[i16] {
        &self.samples
    }

    /// Drains the buffer, returning everything accumulated so far.
    pub fn take(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.samples)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_accumulates_and_reports_duration() {
        let mut buf = AudioBuffer::new(16_000, Duration::from_secs(10));
        buf.push(&[0; 1600]);
        assert_eq!(buf.len_samples(), 1600);
        assert!((buf.duration().as_secs_f64() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn push_beyond_max_duration_drops_oldest_samples() {
        let mut buf = AudioBuffer::new(16_000, Duration::from_millis(100));
        buf.push(&vec![1; 1_600]);
        buf.push(&vec![2; 1_600]);
        assert_eq!(buf.len_samples(), 1_600);
        assert!(buf.as_slice().iter().all(|&s| s == 2));
    }

    #[test]
    fn take_drains_and_resets() {
        let mut buf = AudioBuffer::new(16_000, Duration::from_secs(10));
        buf.push(&[1, 2, 3]);
        let drained = buf.take();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(buf.is_empty());
    }
}
