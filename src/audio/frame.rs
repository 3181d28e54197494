use std::time::Duration;

/// One decoded unit of multi-channel audio.
///
/// Samples are normalized to [-1, 1] and stored per channel. The frame is
/// read-only once built; fan-out hands every receiver its own clone.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioFrame {
    /// Builds a frame from per-channel sample sequences.
    ///
    /// Channels are truncated to the shortest one so every channel has the
    /// same sample count.
    pub fn new(sample_rate: u32, mut channels: Vec<Vec<f32>>) -> Self {
        let shortest = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in channels.iter_mut() {
            channel.truncate(shortest);
        }
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn sample_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Real-time length of the frame at its own sample rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_count() as f64 / self.sample_rate as f64)
    }

    /// Channel-averaged sample at `index`, or silence past the end.
    pub fn mono_sample(&self, index: usize) -> f32 {
        if self.channels.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .channels
            .iter()
            .map(|channel| channel.get(index).copied().unwrap_or(0.0))
            .sum();
        sum / self.channels.len() as f32
    }
}
