//! Stream ingestor
//!
//! Normalizes a chunked byte stream into [`AudioFrame`]s and fans them out.
//!
//! Raw PCM is converted synchronously on the calling thread. Container
//! formats accumulate bytes and hand a snapshot of the whole accumulator to a
//! background `"sonica-decode"` thread; only one attempt is ever in flight,
//! so frames are emitted in input order.
//!
//! ```text
//!   feed(bytes) ──raw──► pcm::deinterleave ──────────────┐
//!        │                                               ▼
//!        └─container─► accumulator ─► decode thread ─► emit ─► data listeners
//!                                                        └──► connected receivers
//! ```

use crossbeam_channel::{Receiver, TryRecvError};
use std::borrow::Cow;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Instant;

use super::decode::{decode_container, DecodeMode};
use super::format::{StreamConfig, StreamFormat};
use super::frame::AudioFrame;
use super::pcm;
use crate::error::{Result, StreamError};
use crate::events::{ListenerId, Listeners};

/// Anything that accepts decoded frames pushed by a [`StreamIngestor`].
pub trait FrameReceiver {
    fn receive_frame(&mut self, frame: AudioFrame);
}

/// Shared receivers, e.g. an analyzer that the host also ticks.
impl<R: FrameReceiver + ?Sized> FrameReceiver for Rc<RefCell<R>> {
    fn receive_frame(&mut self, frame: AudioFrame) {
        match self.try_borrow_mut() {
            Ok(mut receiver) => receiver.receive_frame(frame),
            Err(_) => log::warn!("Receiver is busy (re-entrant feed); frame not delivered"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(u64);

#[derive(Debug, Clone)]
pub struct DataEvent {
    pub frame: AudioFrame,
    pub emitted_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndEvent {
    /// Samples per channel across every emitted frame
    pub total_samples: u64,
    /// Seconds since the first successful feed, 0.0 if never fed
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub cause: StreamError,
    pub recoverable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Idle,
    Processing,
    Ended,
    Stopped,
}

/// The single in-flight decode attempt.
struct InFlight {
    /// Accumulator chunks covered by this attempt
    chunks: usize,
    rx: Receiver<Result<AudioFrame>>,
}

pub struct StreamIngestor {
    config: StreamConfig,
    state: IngestState,
    started_at: Option<Instant>,
    total_samples: u64,
    raw_carry: Vec<u8>,
    pending: Vec<Vec<u8>>,
    in_flight: Option<InFlight>,
    dirty: bool,
    receivers: Vec<(ReceiverId, Box<dyn FrameReceiver>)>,
    next_receiver: u64,
    data: Listeners<DataEvent>,
    end: Listeners<EndEvent>,
    error: Listeners<ErrorEvent>,
}

impl StreamIngestor {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            state: IngestState::Idle,
            started_at: None,
            total_samples: 0,
            raw_carry: Vec::new(),
            pending: Vec::new(),
            in_flight: None,
            dirty: false,
            receivers: Vec::new(),
            next_receiver: 0,
            data: Listeners::new("data"),
            end: Listeners::new("end"),
            error: Listeners::new("error"),
        }
    }

    /// Validates the parameters before building anything.
    pub fn with_params(format: StreamFormat, sample_rate: u32, channels: u16, bits: u16) -> Result<Self> {
        Ok(Self::new(StreamConfig::new(format, sample_rate, channels, bits)?))
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Bytes waiting in the container accumulator.
    pub fn pending_bytes(&self) -> usize {
        self.pending.iter().map(Vec::len).sum()
    }

    pub fn is_decoding(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn on_data<F: FnMut(&DataEvent) + 'static>(&mut self, listener: F) -> ListenerId {
        self.data.add(listener)
    }

    pub fn on_end<F: FnMut(&EndEvent) + 'static>(&mut self, listener: F) -> ListenerId {
        self.end.add(listener)
    }

    pub fn on_error<F: FnMut(&ErrorEvent) + 'static>(&mut self, listener: F) -> ListenerId {
        self.error.add(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.data.remove(id) || self.end.remove(id) || self.error.remove(id)
    }

    pub fn connect<R: FrameReceiver + 'static>(&mut self, receiver: R) -> ReceiverId {
        let id = ReceiverId(self.next_receiver);
        self.next_receiver += 1;
        self.receivers.push((id, Box::new(receiver)));
        id
    }

    /// Drops every connected receiver.
    pub fn disconnect(&mut self) {
        self.receivers.clear();
    }

    pub fn disconnect_receiver(&mut self, id: ReceiverId) -> bool {
        let before = self.receivers.len();
        self.receivers.retain(|(receiver_id, _)| *receiver_id != id);
        self.receivers.len() != before
    }

    /// Pushes one chunk of the stream. Never panics on bad input; misuse is
    /// reported through the `error` listeners.
    pub fn feed(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        match self.state {
            IngestState::Stopped => {
                self.report(StreamError::Stopped, false);
                return;
            }
            IngestState::Ended => {
                self.report(StreamError::Ended, false);
                return;
            }
            IngestState::Idle => {
                self.state = IngestState::Processing;
                self.started_at = Some(Instant::now());
                log::info!(
                    "Ingest started: {} @ {}Hz, {}ch",
                    self.config.format().name(),
                    self.config.sample_rate(),
                    self.config.channels()
                );
            }
            IngestState::Processing => {}
        }

        if self.config.format().is_container() {
            self.pending.push(chunk.to_vec());
            self.dirty = true;
            self.poll();
            self.start_attempt();
        } else {
            self.feed_raw(chunk);
        }
    }

    /// Collects a finished decode attempt without blocking and starts the
    /// next one if more bytes arrived meanwhile.
    pub fn poll(&mut self) {
        let Some(in_flight) = self.in_flight.as_ref() else {
            return;
        };
        let outcome = match in_flight.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                Err(StreamError::Worker("decode thread exited without a result".into()))
            }
        };
        let chunks = in_flight.chunks;
        self.in_flight = None;
        self.resolve(chunks, outcome);
        self.start_attempt();
    }

    /// Blocks until no decode attempt is in flight and every fed byte has
    /// been attempted at least once.
    pub fn settle(&mut self) {
        loop {
            self.start_attempt();
            let Some(in_flight) = self.in_flight.take() else {
                break;
            };
            let outcome = in_flight
                .rx
                .recv()
                .unwrap_or_else(|_| Err(StreamError::Worker("decode thread exited without a result".into())));
            self.resolve(in_flight.chunks, outcome);
        }
    }

    /// Finishes the stream: waits for the in-flight attempt, makes one last
    /// lenient decode of anything still pending and emits the `end` event.
    pub fn end(&mut self) {
        if matches!(self.state, IngestState::Ended | IngestState::Stopped) {
            return;
        }

        if self.config.format().is_container() {
            self.settle();
            if !self.pending.is_empty() {
                let bytes = self.pending.concat();
                self.pending.clear();
                match decode_container(self.config.format(), bytes, DecodeMode::Final) {
                    Ok(frame) => self.emit_frame(frame),
                    Err(e) => {
                        log::debug!("Final decode attempt failed: {}", e);
                        self.report(e, true);
                    }
                }
            }
        }

        if !self.raw_carry.is_empty() {
            let dropped = self.raw_carry.len();
            self.raw_carry.clear();
            self.report(
                StreamError::Decode(format!("{} trailing bytes do not form a whole sample", dropped)),
                true,
            );
        }

        self.state = IngestState::Ended;
        let event = EndEvent {
            total_samples: self.total_samples,
            elapsed_secs: self.started_at.map_or(0.0, |t| t.elapsed().as_secs_f64()),
        };
        log::info!(
            "Ingest ended: {} samples in {:.2}s",
            event.total_samples,
            event.elapsed_secs
        );
        self.end.emit(&event);
    }

    /// Terminal: discards pending bytes and any in-flight result.
    pub fn stop(&mut self) {
        if self.state == IngestState::Stopped {
            return;
        }
        if self.in_flight.take().is_some() {
            log::debug!("Discarding in-flight decode on stop");
        }
        self.state = IngestState::Stopped;
        self.pending.clear();
        self.raw_carry.clear();
        self.dirty = false;
        log::info!("Ingest stopped after {} samples", self.total_samples);
    }

    fn feed_raw(&mut self, chunk: &[u8]) {
        let depth = self.config.bit_depth();
        let channels = self.config.channels() as usize;

        let bytes: Cow<[u8]> = if self.raw_carry.is_empty() {
            Cow::Borrowed(chunk)
        } else {
            let mut joined = std::mem::take(&mut self.raw_carry);
            joined.extend_from_slice(chunk);
            Cow::Owned(joined)
        };

        let whole = pcm::frame_count(bytes.len(), depth, channels) * self.config.bytes_per_frame();
        self.raw_carry = bytes[whole..].to_vec();
        if whole == 0 {
            return;
        }

        let samples = pcm::deinterleave(&bytes[..whole], depth, channels);
        self.emit_frame(AudioFrame::new(self.config.sample_rate(), samples));
    }

    /// Hands a snapshot of the accumulator to the decode thread, unless an
    /// attempt is already running or nothing changed since the last one.
    fn start_attempt(&mut self) {
        if self.in_flight.is_some() || !self.dirty || self.pending.is_empty() {
            return;
        }
        self.dirty = false;

        let chunks = self.pending.len();
        let bytes = self.pending.concat();
        let format = self.config.format();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let spawned = std::thread::Builder::new()
            .name("sonica-decode".to_string())
            .spawn(move || {
                let _ = tx.send(decode_container(format, bytes, DecodeMode::Complete));
            });

        match spawned {
            Ok(_) => self.in_flight = Some(InFlight { chunks, rx }),
            Err(e) => {
                log::warn!("Failed to spawn decode thread, decoding inline: {}", e);
                let bytes = self.pending.concat();
                let outcome = decode_container(format, bytes, DecodeMode::Complete);
                self.resolve(chunks, outcome);
            }
        }
    }

    fn resolve(&mut self, chunks: usize, outcome: Result<AudioFrame>) {
        if self.state == IngestState::Stopped {
            return;
        }
        match outcome {
            Ok(frame) => {
                self.pending.drain(..chunks.min(self.pending.len()));
                self.emit_frame(frame);
            }
            Err(e @ StreamError::Worker(_)) => self.report(e, true),
            Err(e) => log::debug!("Decode attempt over {} chunks not ready yet: {}", chunks, e),
        }
    }

    fn emit_frame(&mut self, frame: AudioFrame) {
        if frame.is_empty() {
            return;
        }
        self.total_samples += frame.sample_count() as u64;

        let event = DataEvent {
            frame,
            emitted_at: Instant::now(),
        };
        self.data.emit(&event);

        for (id, receiver) in self.receivers.iter_mut() {
            let frame = event.frame.clone();
            if catch_unwind(AssertUnwindSafe(|| receiver.receive_frame(frame))).is_err() {
                log::warn!("Receiver {:?} panicked; ignoring", id);
            }
        }
    }

    fn report(&mut self, cause: StreamError, recoverable: bool) {
        if !recoverable {
            log::warn!("Rejected: {}", cause);
        }
        self.error.emit(&ErrorEvent { cause, recoverable });
    }
}

impl std::fmt::Debug for StreamIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamIngestor")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("total_samples", &self.total_samples)
            .field("pending_bytes", &self.pending_bytes())
            .field("decoding", &self.in_flight.is_some())
            .field("receivers", &self.receivers.len())
            .finish()
    }
}
