//! Streaming audio ingestion and real-time spectral analysis.
//!
//! A [`StreamIngestor`] turns raw PCM or container bytes into decoded
//! [`AudioFrame`]s and pushes them to connected receivers. A
//! [`FrequencyAnalyzer`] queues those frames, plays them back virtually on
//! each host tick and emits [`AnalysisFrame`]s (dB spectrum plus an
//! attack/release smoothed amplitude) for a renderer.

pub mod audio;
pub mod error;
pub mod events;

pub use audio::analyzer::{
    AnalysisFrame, AnalyzerConfig, AnalyzerHandle, AnalyzerState, FrequencyAnalyzer,
    TRANSFORM_SIZES,
};
pub use audio::format::{BitDepth, StreamConfig, StreamFormat, StreamSettings};
pub use audio::frame::AudioFrame;
pub use audio::ingest::{
    DataEvent, EndEvent, ErrorEvent, FrameReceiver, IngestState, ReceiverId, StreamIngestor,
};
pub use error::{Result, StreamError};
pub use events::{ListenerId, Listeners};
