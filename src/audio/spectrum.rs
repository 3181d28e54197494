use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Rolling time-domain window plus the FFT needed to turn it into a
/// decibel-scaled magnitude spectrum.
///
/// Owned by exactly one analyzer; allocated lazily on the first frame and
/// dropped on destroy.
pub struct SpectrumEngine {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    ring: Vec<f32>,
    write_pos: usize,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothing: f32,
    min_decibels: f32,
}

impl SpectrumEngine {
    pub fn new(size: usize, smoothing: f32, min_decibels: f32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        log::debug!("Allocated spectrum engine: size={}, smoothing={:.2}", size, smoothing);

        Self {
            size,
            fft,
            window: blackman_window(size),
            ring: vec![0.0; size],
            write_pos: 0,
            smoothed: vec![0.0; size / 2],
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch,
            smoothing: smoothing.clamp(0.0, 1.0),
            min_decibels,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bin_count(&self) -> usize {
        self.size / 2
    }

    pub fn push_sample(&mut self, sample: f32) {
        self.ring[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.size;
    }

    pub fn push_silence(&mut self, count: usize) {
        // anything past one full window is indistinguishable
        for _ in 0..count.min(self.size) {
            self.push_sample(0.0);
        }
    }

    /// The last `size` samples, oldest first.
    pub fn time_domain(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.size);
        out.extend_from_slice(&self.ring[self.write_pos..]);
        out.extend_from_slice(&self.ring[..self.write_pos]);
        out
    }

    /// RMS of the current window with every sample clamped to [-1, 1].
    pub fn rms(&self) -> f32 {
        let sum: f32 = self
            .time_domain()
            .into_iter()
            .map(|s| {
                let s = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
                s * s
            })
            .sum();
        (sum / self.size as f32).sqrt().clamp(0.0, 1.0)
    }

    /// Magnitude spectrum in dB, `size / 2` bins, floored at `min_decibels`.
    ///
    /// Each call folds the current window into the temporally smoothed
    /// magnitudes, so it is meant to be called once per tick.
    pub fn frequency_data(&mut self) -> Vec<f32> {
        let oldest = self.write_pos;
        for i in 0..self.size {
            let sample = self.ring[(oldest + i) % self.size];
            let sample = if sample.is_finite() { sample } else { 0.0 };
            self.buffer[i] = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let norm = 1.0 / self.size as f32;
        let k = self.smoothing;
        for (bin, value) in self.smoothed.iter_mut().zip(self.buffer.iter()) {
            let magnitude = value.norm() * norm;
            *bin = k * *bin + (1.0 - k) * magnitude;
        }

        self.smoothed
            .iter()
            .map(|&magnitude| {
                let db = 20.0 * magnitude.log10();
                if db.is_finite() {
                    db.max(self.min_decibels)
                } else {
                    self.min_decibels
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for SpectrumEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumEngine")
            .field("size", &self.size)
            .field("smoothing", &self.smoothing)
            .field("min_decibels", &self.min_decibels)
            .finish()
    }
}

fn blackman_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / n;
            0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
        })
        .collect()
}
