//! Tick-driven frequency/amplitude analyzer.
//!
//! Frames arrive through [`FrequencyAnalyzer::receive_buffer`] and queue up
//! behind a single "active" frame that is virtually played in real time. Each
//! tick advances the playhead by the wall time since the previous tick, feeds
//! the played samples to the [`SpectrumEngine`] and emits an
//! [`AnalysisFrame`] with the decibel spectrum and the attack/release
//! smoothed RMS amplitude.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::frame::AudioFrame;
use super::ingest::FrameReceiver;
use super::spectrum::SpectrumEngine;
use crate::error::{Result, StreamError};
use crate::events::{ListenerId, Listeners};

/// Allowed spectral window sizes.
pub const TRANSFORM_SIZES: [usize; 4] = [256, 512, 1024, 2048];

const FALLBACK_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_transform_size")]
    pub transform_size: usize,
    /// Envelope rise time constant in milliseconds
    #[serde(default = "default_attack_ms")]
    pub attack_ms: f32,
    /// Envelope fall time constant in milliseconds
    #[serde(default = "default_release_ms")]
    pub release_ms: f32,
    /// Per-bin temporal smoothing of the spectrum (0.0-1.0)
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,
    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,
    /// Elapsed time assumed for the first tick after (re)starting
    #[serde(default = "default_tick_ms")]
    pub tick_ms: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            transform_size: default_transform_size(),
            attack_ms: default_attack_ms(),
            release_ms: default_release_ms(),
            smoothing: default_smoothing(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
            tick_ms: default_tick_ms(),
        }
    }
}

fn default_transform_size() -> usize { 2048 }
fn default_attack_ms() -> f32 { 10.0 }
fn default_release_ms() -> f32 { 100.0 }
fn default_smoothing() -> f32 { 0.8 }
fn default_min_decibels() -> f32 { -100.0 }
fn default_max_decibels() -> f32 { -30.0 }
fn default_tick_ms() -> f32 { 16.0 }

impl AnalyzerConfig {
    pub fn with_transform_size(transform_size: usize) -> Self {
        Self {
            transform_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !TRANSFORM_SIZES.contains(&self.transform_size) {
            return Err(StreamError::invalid(format!(
                "transform size must be one of {:?} (got {})",
                TRANSFORM_SIZES, self.transform_size
            )));
        }
        if !(self.attack_ms.is_finite() && self.attack_ms > 0.0) {
            return Err(StreamError::invalid("attack time must be a positive number of ms"));
        }
        if !(self.release_ms.is_finite() && self.release_ms > 0.0) {
            return Err(StreamError::invalid("release time must be a positive number of ms"));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(StreamError::invalid("spectral smoothing must be in [0, 1)"));
        }
        if !(self.min_decibels < self.max_decibels) {
            return Err(StreamError::invalid("min decibels must be below max decibels"));
        }
        if !(self.tick_ms.is_finite() && self.tick_ms >= 0.0) {
            return Err(StreamError::invalid("tick interval must be non-negative"));
        }
        Ok(())
    }

    pub fn bin_count(&self) -> usize {
        self.transform_size / 2
    }

    /// Maps a dB value linearly from [min_decibels, max_decibels] onto [0, 1].
    pub fn normalize_decibels(&self, db: f32) -> f32 {
        let range = self.max_decibels - self.min_decibels;
        ((db - self.min_decibels) / range).clamp(0.0, 1.0)
    }
}

/// One tick's worth of analysis output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisFrame {
    /// dB magnitudes, `transform_size / 2` bins
    pub frequency_magnitudes: Vec<f32>,
    /// Smoothed RMS amplitude (0.0-1.0)
    pub amplitude: f32,
    /// Milliseconds since the analyzer was created
    pub timestamp_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    Uninitialized,
    Active,
    Paused,
    Destroyed,
}

/// Asymmetric exponential envelope follower.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub smoothed: f32,
    pub last_tick: Option<Instant>,
}

impl Envelope {
    fn new() -> Self {
        Self {
            smoothed: 0.0,
            last_tick: None,
        }
    }

    /// Moves the envelope toward `instant`, using the attack constant while
    /// rising and the release constant while falling.
    pub fn update(&mut self, instant: f32, elapsed_ms: f32, attack_ms: f32, release_ms: f32) -> f32 {
        let instant = if instant.is_finite() { instant.clamp(0.0, 1.0) } else { 0.0 };
        let time_constant = if instant > self.smoothed { attack_ms } else { release_ms };
        let factor = if elapsed_ms > 0.0 {
            1.0 - (-elapsed_ms / time_constant).exp()
        } else {
            0.0
        };
        self.smoothed = (self.smoothed + (instant - self.smoothed) * factor).clamp(0.0, 1.0);
        self.smoothed
    }
}

#[derive(Debug)]
struct Playback {
    frame: AudioFrame,
    cursor: usize,
    /// Fractional sample owed from the previous advance
    carry: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    None,
    Pause,
    Destroy,
}

/// Lets code running inside an analysis listener pause or destroy the
/// analyzer that is currently dispatching to it.
///
/// A destroy request skips the listeners still waiting for the current
/// frame; a pause request takes effect once the dispatch returns.
#[derive(Debug, Clone)]
pub struct AnalyzerHandle {
    request: Rc<Cell<Request>>,
}

impl AnalyzerHandle {
    pub fn pause(&self) {
        if self.request.get() == Request::None {
            self.request.set(Request::Pause);
        }
    }

    pub fn destroy(&self) {
        self.request.set(Request::Destroy);
    }
}

pub struct FrequencyAnalyzer {
    config: AnalyzerConfig,
    state: AnalyzerState,
    engine: Option<SpectrumEngine>,
    queue: VecDeque<AudioFrame>,
    active: Option<Playback>,
    envelope: Envelope,
    frequency: Vec<f32>,
    epoch: Instant,
    silence_rate: u32,
    frames_played: u64,
    listeners: Listeners<AnalysisFrame>,
    request: Rc<Cell<Request>>,
}

impl FrequencyAnalyzer {
    /// Validates the configuration; nothing is allocated on failure.
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: AnalyzerState::Uninitialized,
            engine: None,
            queue: VecDeque::new(),
            active: None,
            envelope: Envelope::new(),
            frequency: vec![0.0; config.bin_count()],
            epoch: Instant::now(),
            silence_rate: FALLBACK_SAMPLE_RATE,
            frames_played: 0,
            listeners: Listeners::new("analysis"),
            request: Rc::new(Cell::new(Request::None)),
        })
    }

    pub fn state(&self) -> AnalyzerState {
        self.state
    }

    pub fn config(&self) -> AnalyzerConfig {
        self.config
    }

    pub fn handle(&self) -> AnalyzerHandle {
        AnalyzerHandle {
            request: self.request.clone(),
        }
    }

    pub fn on_analysis<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&AnalysisFrame) + 'static,
    {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Current smoothed amplitude, 0.0 before anything has played.
    pub fn amplitude(&self) -> f32 {
        self.envelope.smoothed
    }

    /// Copy of the most recent dB spectrum (all zeros before the first frame).
    pub fn frequency_data(&self) -> Vec<f32> {
        self.frequency.clone()
    }

    /// Most recent spectrum mapped linearly from [min_decibels, max_decibels]
    /// onto [0, 1].
    pub fn normalized_frequency_data(&self) -> Vec<f32> {
        if self.engine.is_none() {
            return vec![0.0; self.frequency.len()];
        }
        self.frequency
            .iter()
            .map(|&db| self.config.normalize_decibels(db))
            .collect()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_frame(&self) -> Option<AudioFrame> {
        self.active.as_ref().map(|p| p.frame.clone())
    }

    /// Number of frames that have been played to completion.
    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    /// Queues a decoded frame; the first one allocates the spectrum engine
    /// and starts the tick loop.
    pub fn receive_buffer(&mut self, frame: AudioFrame) {
        if self.state == AnalyzerState::Destroyed {
            return;
        }
        if frame.is_empty() {
            log::debug!("Ignoring empty frame");
            return;
        }

        if self.engine.is_none() {
            self.engine = Some(SpectrumEngine::new(
                self.config.transform_size,
                self.config.smoothing,
                self.config.min_decibels,
            ));
            self.frequency = vec![self.config.min_decibels; self.config.bin_count()];
        }

        self.queue.push_back(frame);

        if self.state == AnalyzerState::Uninitialized {
            self.state = AnalyzerState::Active;
            self.envelope.last_tick = None;
            log::info!(
                "Analysis loop started (transform size {})",
                self.config.transform_size
            );
        }
        if self.state == AnalyzerState::Active && self.active.is_none() {
            self.promote_next();
        }
    }

    /// Halts ticking and virtual playback; queued frames are kept.
    pub fn pause(&mut self) {
        match self.state {
            AnalyzerState::Active | AnalyzerState::Uninitialized => {
                self.state = AnalyzerState::Paused;
                log::debug!("Analysis paused with {} frames queued", self.queue.len());
            }
            AnalyzerState::Paused | AnalyzerState::Destroyed => {}
        }
    }

    /// Restarts ticking from where playback stopped.
    pub fn resume(&mut self) {
        if self.state != AnalyzerState::Paused {
            return;
        }
        if self.engine.is_none() {
            self.state = AnalyzerState::Uninitialized;
            return;
        }
        self.state = AnalyzerState::Active;
        self.envelope.last_tick = None;
        if self.active.is_none() {
            self.promote_next();
        }
        log::debug!("Analysis resumed with {} frames queued", self.queue.len());
    }

    /// Terminal: releases the engine and all buffers. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.state == AnalyzerState::Destroyed {
            return;
        }
        self.state = AnalyzerState::Destroyed;
        self.engine = None;
        self.queue.clear();
        self.active = None;
        self.listeners.clear();
        self.frequency = vec![0.0; self.config.bin_count()];
        log::info!("Analyzer destroyed after {} frames", self.frames_played);
    }

    pub fn tick(&mut self) -> Option<AnalysisFrame> {
        self.tick_at(Instant::now())
    }

    /// Runs one analysis pass as of `now`. Returns the emitted frame, or
    /// `None` when the analyzer is not active.
    pub fn tick_at(&mut self, now: Instant) -> Option<AnalysisFrame> {
        self.apply_request();
        if self.state != AnalyzerState::Active {
            return None;
        }

        let elapsed = match self.envelope.last_tick {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::from_secs_f32(self.config.tick_ms / 1000.0),
        };
        self.envelope.last_tick = Some(now);

        self.advance(elapsed);

        let engine = self.engine.as_mut()?;
        let magnitudes = engine.frequency_data();
        let instant = engine.rms();
        let amplitude = self.envelope.update(
            instant,
            elapsed.as_secs_f32() * 1000.0,
            self.config.attack_ms,
            self.config.release_ms,
        );

        let frame = AnalysisFrame {
            frequency_magnitudes: magnitudes.clone(),
            amplitude,
            timestamp_ms: now.saturating_duration_since(self.epoch).as_secs_f64() * 1000.0,
        };
        self.frequency = magnitudes;

        // a destroy requested mid-dispatch cuts off the remaining listeners
        let request = &self.request;
        self.listeners.emit_while(&frame, || request.get() != Request::Destroy);
        self.apply_request();

        Some(frame)
    }

    fn apply_request(&mut self) {
        match self.request.replace(Request::None) {
            Request::None => {}
            Request::Pause => self.pause(),
            Request::Destroy => self.destroy(),
        }
    }

    fn promote_next(&mut self) {
        self.active = next_playback(&mut self.queue, &mut self.silence_rate);
    }

    /// Plays `elapsed` worth of audio into the engine, moving through the
    /// queue as frames run out and filling with silence once it is empty.
    fn advance(&mut self, elapsed: Duration) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let window = engine.size();
        let mut remaining = elapsed.as_secs_f64();

        while remaining > 0.0 {
            if self.active.is_none() {
                self.active = next_playback(&mut self.queue, &mut self.silence_rate);
                if self.active.is_none() {
                    let samples = (remaining * self.silence_rate as f64).round() as usize;
                    engine.push_silence(samples);
                    break;
                }
            }

            let Some(playback) = self.active.as_mut() else {
                break;
            };
            let rate = playback.frame.sample_rate() as f64;
            let left = playback.frame.sample_count().saturating_sub(playback.cursor);
            if rate <= 0.0 || left == 0 {
                self.active = None;
                self.frames_played += 1;
                continue;
            }

            let due = remaining * rate + playback.carry;
            let whole = due.floor() as usize;
            let (count, finished) = if whole < left { (whole, false) } else { (left, true) };

            let end = playback.cursor + count;
            let start = end.saturating_sub(window).max(playback.cursor);
            for index in start..end {
                engine.push_sample(playback.frame.mono_sample(index));
            }
            playback.cursor = end;

            if finished {
                remaining -= ((left as f64 - playback.carry) / rate).max(0.0);
                self.active = None;
                self.frames_played += 1;
            } else {
                playback.carry = due - whole as f64;
                remaining = 0.0;
            }
        }

        if self.active.is_none() {
            self.promote_next();
        }
    }
}

fn next_playback(queue: &mut VecDeque<AudioFrame>, silence_rate: &mut u32) -> Option<Playback> {
    let frame = queue.pop_front()?;
    *silence_rate = frame.sample_rate().max(1);
    Some(Playback {
        frame,
        cursor: 0,
        carry: 0.0,
    })
}

impl FrameReceiver for FrequencyAnalyzer {
    fn receive_frame(&mut self, frame: AudioFrame) {
        self.receive_buffer(frame);
    }
}

impl std::fmt::Debug for FrequencyAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrequencyAnalyzer")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("queued", &self.queue.len())
            .field("active", &self.active.is_some())
            .field("amplitude", &self.envelope.smoothed)
            .field("frames_played", &self.frames_played)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn constant_frame(value: f32, samples: usize, sample_rate: u32) -> AudioFrame {
        AudioFrame::new(sample_rate, vec![vec![value; samples]])
    }

    fn square_frame(samples: usize, sample_rate: u32) -> AudioFrame {
        let data = (0..samples).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        AudioFrame::new(sample_rate, vec![data])
    }

    fn analyzer(size: usize) -> FrequencyAnalyzer {
        FrequencyAnalyzer::new(AnalyzerConfig::with_transform_size(size)).unwrap()
    }

    #[test]
    fn rejects_unsupported_transform_sizes() {
        for size in [0, 128, 300, 1000, 4096] {
            let err = FrequencyAnalyzer::new(AnalyzerConfig::with_transform_size(size)).unwrap_err();
            assert!(matches!(err, StreamError::InvalidConfig(_)));
        }
        for size in TRANSFORM_SIZES {
            assert!(FrequencyAnalyzer::new(AnalyzerConfig::with_transform_size(size)).is_ok());
        }
    }

    #[test]
    fn rejects_bad_time_constants() {
        let config = AnalyzerConfig {
            attack_ms: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = AnalyzerConfig {
            release_ms: f32::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn idle_output_is_valid_before_any_frame() {
        let mut analyzer = analyzer(1024);
        assert_eq!(analyzer.state(), AnalyzerState::Uninitialized);
        assert_eq!(analyzer.amplitude(), 0.0);

        let bins = analyzer.frequency_data();
        assert_eq!(bins.len(), 512);
        assert!(bins.iter().all(|v| *v == 0.0));

        assert!(analyzer.tick_at(Instant::now()).is_none());
    }

    #[test]
    fn first_frame_starts_the_loop_and_emits() {
        let mut analyzer = analyzer(256);
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        analyzer.on_analysis(move |frame| sink.borrow_mut().push(frame.clone()));

        analyzer.receive_buffer(square_frame(4_000, 1_000));
        assert_eq!(analyzer.state(), AnalyzerState::Active);
        assert!(analyzer.active_frame().is_some());

        let t0 = Instant::now();
        let frame = analyzer.tick_at(t0).unwrap();
        assert_eq!(frame.frequency_magnitudes.len(), 128);
        assert!(frame.amplitude > 0.0);
        assert!(frame.frequency_magnitudes.iter().all(|v| v.is_finite() && *v >= -100.0));

        analyzer.tick_at(t0 + ms(16)).unwrap();
        assert_eq!(received.borrow().len(), 2);
        assert!(received.borrow()[1].amplitude >= received.borrow()[0].amplitude);
        assert_eq!(analyzer.frequency_data(), received.borrow()[1].frequency_magnitudes);
    }

    #[test]
    fn amplitude_stays_in_unit_range() {
        let mut analyzer = analyzer(512);
        analyzer.receive_buffer(square_frame(2_000, 8_000));
        analyzer.receive_buffer(constant_frame(0.0, 2_000, 8_000));
        analyzer.receive_buffer(constant_frame(3.0, 2_000, 8_000));

        let t0 = Instant::now();
        for step in 0..120u64 {
            let frame = analyzer.tick_at(t0 + ms(step * 16)).unwrap();
            assert!((0.0..=1.0).contains(&frame.amplitude), "{}", frame.amplitude);
            assert!((0.0..=1.0).contains(&analyzer.amplitude()));
        }
    }

    #[test]
    fn attack_moves_further_than_release() {
        let defaults = AnalyzerConfig::default();
        let mut rising = Envelope {
            smoothed: 0.5,
            last_tick: None,
        };
        let mut falling = rising;

        let up = rising.update(1.0, 16.0, defaults.attack_ms, defaults.release_ms) - 0.5;
        let down = 0.5 - falling.update(0.0, 16.0, defaults.attack_ms, defaults.release_ms);
        assert!(up > down, "attack {} vs release {}", up, down);
        assert!(up > 0.0 && down > 0.0);
    }

    #[test]
    fn zero_elapsed_leaves_envelope_unchanged() {
        let mut envelope = Envelope {
            smoothed: 0.3,
            last_tick: None,
        };
        assert_eq!(envelope.update(1.0, 0.0, 10.0, 100.0), 0.3);
    }

    #[test]
    fn pause_then_resume_plays_every_frame_in_order() {
        let mut analyzer = analyzer(256);
        let rate = 1_000;
        analyzer.receive_buffer(constant_frame(0.05, 100, rate));
        analyzer.pause();
        assert_eq!(analyzer.state(), AnalyzerState::Paused);

        let count = 5;
        for i in 1..=count {
            analyzer.receive_buffer(constant_frame(i as f32 * 0.1, 100, rate));
        }
        assert_eq!(analyzer.queued_len(), count);

        let t0 = Instant::now();
        assert!(analyzer.tick_at(t0).is_none());
        assert!(analyzer.tick_at(t0 + ms(500)).is_none());
        assert_eq!(analyzer.frames_played(), 0);

        analyzer.resume();
        let mut order: Vec<f32> = Vec::new();
        let mut now = t0 + ms(1_000);
        for _ in 0..100 {
            if let Some(active) = analyzer.active_frame() {
                let value = active.channel(0).unwrap()[0];
                if order.last() != Some(&value) {
                    order.push(value);
                }
            }
            analyzer.tick_at(now);
            now += ms(10);
        }

        assert_eq!(analyzer.frames_played(), count as u64 + 1);
        assert_eq!(analyzer.queued_len(), 0);
        let expected: Vec<f32> = (0..=count).map(|i| if i == 0 { 0.05 } else { i as f32 * 0.1 }).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let mut analyzer = analyzer(256);
        analyzer.receive_buffer(constant_frame(0.5, 100, 1_000));
        analyzer.pause();
        analyzer.pause();
        assert_eq!(analyzer.state(), AnalyzerState::Paused);
        analyzer.resume();
        analyzer.resume();
        assert_eq!(analyzer.state(), AnalyzerState::Active);
        assert_eq!(analyzer.active_frame().unwrap().sample_count(), 100);
    }

    #[test]
    fn destroy_is_terminal_and_idempotent() {
        let mut analyzer = analyzer(256);
        analyzer.receive_buffer(constant_frame(0.5, 100, 1_000));
        analyzer.destroy();
        analyzer.destroy();

        analyzer.receive_buffer(constant_frame(0.5, 100, 1_000));
        analyzer.pause();
        analyzer.resume();
        assert_eq!(analyzer.state(), AnalyzerState::Destroyed);
        assert_eq!(analyzer.queued_len(), 0);
        assert!(analyzer.active_frame().is_none());
        assert!(analyzer.tick_at(Instant::now()).is_none());
        assert_eq!(analyzer.frequency_data().len(), 128);
    }

    #[test]
    fn panicking_listener_does_not_abort_tick() {
        let mut analyzer = analyzer(256);
        let hits = Rc::new(Cell::new(0));
        analyzer.on_analysis(|_| panic!("renderer fault"));
        let counter = hits.clone();
        analyzer.on_analysis(move |_| counter.set(counter.get() + 1));

        analyzer.receive_buffer(constant_frame(0.5, 1_000, 1_000));
        let t0 = Instant::now();
        assert!(analyzer.tick_at(t0).is_some());
        assert!(analyzer.tick_at(t0 + ms(16)).is_some());
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn destroy_from_inside_listener_stops_the_loop() {
        let mut analyzer = analyzer(256);
        let handle = analyzer.handle();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        analyzer.on_analysis(move |_| {
            counter.set(counter.get() + 1);
            handle.destroy();
        });
        let later = Rc::new(Cell::new(0));
        let counter = later.clone();
        analyzer.on_analysis(move |_| counter.set(counter.get() + 1));

        analyzer.receive_buffer(constant_frame(0.5, 1_000, 1_000));
        let t0 = Instant::now();
        assert!(analyzer.tick_at(t0).is_some());
        assert_eq!(analyzer.state(), AnalyzerState::Destroyed);
        assert!(analyzer.tick_at(t0 + ms(16)).is_none());
        assert_eq!(hits.get(), 1);
        assert_eq!(later.get(), 0);
    }

    #[test]
    fn pause_from_inside_listener_still_reaches_every_listener() {
        let mut analyzer = analyzer(256);
        let handle = analyzer.handle();
        analyzer.on_analysis(move |_| handle.pause());
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        analyzer.on_analysis(move |_| counter.set(counter.get() + 1));

        analyzer.receive_buffer(constant_frame(0.5, 1_000, 1_000));
        assert!(analyzer.tick_at(Instant::now()).is_some());
        assert_eq!(analyzer.state(), AnalyzerState::Paused);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn removed_listener_misses_later_ticks() {
        let mut analyzer = analyzer(256);
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let id = analyzer.on_analysis(move |_| counter.set(counter.get() + 1));

        analyzer.receive_buffer(constant_frame(0.5, 1_000, 1_000));
        let t0 = Instant::now();
        analyzer.tick_at(t0);
        assert!(analyzer.remove_listener(id));
        assert!(!analyzer.remove_listener(id));
        analyzer.tick_at(t0 + ms(16));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn normalize_decibels_clamps_to_unit_range() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.normalize_decibels(-100.0), 0.0);
        assert_eq!(config.normalize_decibels(-140.0), 0.0);
        assert!((config.normalize_decibels(-65.0) - 0.5).abs() < 1e-6);
        assert_eq!(config.normalize_decibels(-30.0), 1.0);
        assert_eq!(config.normalize_decibels(0.0), 1.0);
    }

    #[test]
    fn normalized_frequency_data_follows_the_spectrum() {
        let config = AnalyzerConfig {
            transform_size: 256,
            smoothing: 0.0,
            ..Default::default()
        };

        let mut quiet = FrequencyAnalyzer::new(config).unwrap();
        assert_eq!(quiet.normalized_frequency_data(), vec![0.0; 128]);
        quiet.receive_buffer(constant_frame(0.0, 48_000, 48_000));
        quiet.tick_at(Instant::now());
        assert!(quiet.normalized_frequency_data().iter().all(|v| *v == 0.0));

        // a full window of DC puts bin 0 well above max_decibels
        let mut loud = FrequencyAnalyzer::new(config).unwrap();
        loud.receive_buffer(constant_frame(1.0, 48_000, 48_000));
        loud.tick_at(Instant::now());
        let normalized = loud.normalized_frequency_data();
        assert_eq!(normalized.len(), 128);
        assert_eq!(normalized[0], 1.0);
        assert!(normalized.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn silence_decays_toward_zero() {
        let mut analyzer = analyzer(256);
        analyzer.receive_buffer(square_frame(100, 1_000));

        let t0 = Instant::now();
        let mut now = t0;
        let mut peak = 0.0f32;
        for _ in 0..8 {
            peak = peak.max(analyzer.tick_at(now).unwrap().amplitude);
            now += ms(16);
        }
        assert!(peak > 0.0);
        assert!(analyzer.active_frame().is_none());

        let mut last = analyzer.amplitude();
        for step in 0..60 {
            let frame = analyzer.tick_at(now).unwrap();
            // the played samples have left the window by now
            if step >= 20 {
                assert!(frame.amplitude <= last);
            }
            last = frame.amplitude;
            now += ms(16);
        }
        assert!(last < peak * 0.05);
        assert!(analyzer.frequency_data().iter().all(|db| *db >= -100.0));
    }

    #[test]
    fn late_frames_are_queued_not_dropped() {
        let mut analyzer = analyzer(256);
        for i in 0..10 {
            analyzer.receive_buffer(constant_frame(i as f32 * 0.01, 16, 1_000));
        }
        assert_eq!(analyzer.queued_len(), 9);

        // one long gap consumes several frames in a single tick
        let t0 = Instant::now();
        analyzer.tick_at(t0);
        analyzer.tick_at(t0 + ms(100));
        assert!(analyzer.frames_played() >= 6);
        let mut now = t0 + ms(100);
        while analyzer.frames_played() < 10 {
            now += ms(16);
            analyzer.tick_at(now);
        }
        assert_eq!(analyzer.queued_len(), 0);
    }

    #[test]
    fn config_is_returned_by_value() {
        let analyzer = analyzer(512);
        let mut snapshot = analyzer.config();
        snapshot.transform_size = 4;
        assert_eq!(analyzer.config().transform_size, 512);

        let mut bins = analyzer.frequency_data();
        bins[0] = 42.0;
        assert_eq!(analyzer.frequency_data()[0], 0.0);
    }
}
