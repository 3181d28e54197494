use serde::Deserialize;
use std::str::FromStr;

use crate::error::{Result, StreamError};

/// Wire encoding of the incoming byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// Interleaved PCM, described out-of-band by [`StreamConfig`].
    Raw,
    /// RIFF/WAVE container; rate and channels come from its header.
    Wav,
    /// Frame-synced MPEG audio.
    Mp3,
}

impl StreamFormat {
    /// Container formats go through the byte accumulator and the decoder.
    pub fn is_container(self) -> bool {
        !matches!(self, StreamFormat::Raw)
    }

    pub fn name(self) -> &'static str {
        match self {
            StreamFormat::Raw => "raw",
            StreamFormat::Wav => "wav",
            StreamFormat::Mp3 => "mp3",
        }
    }
}

impl FromStr for StreamFormat {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "pcm" => Ok(StreamFormat::Raw),
            "wav" | "wave" => Ok(StreamFormat::Wav),
            "mp3" | "mpeg" => Ok(StreamFormat::Mp3),
            other => Err(StreamError::invalid(format!("unsupported format '{}'", other))),
        }
    }
}

/// Sample width for raw input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    /// Unsigned 8-bit, centered on 128
    U8,
    /// Signed 16-bit little-endian
    S16,
    /// 32-bit IEEE float little-endian
    F32,
}

impl BitDepth {
    pub fn from_bits(bits: u16) -> Result<Self> {
        match bits {
            8 => Ok(BitDepth::U8),
            16 => Ok(BitDepth::S16),
            32 => Ok(BitDepth::F32),
            other => Err(StreamError::invalid(format!(
                "bit depth must be 8, 16 or 32 (got {})",
                other
            ))),
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            BitDepth::U8 => 8,
            BitDepth::S16 => 16,
            BitDepth::F32 => 32,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        self.bits() as usize / 8
    }
}

/// Validated, immutable description of an ingest stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    format: StreamFormat,
    sample_rate: u32,
    channels: u16,
    bit_depth: BitDepth,
}

impl StreamConfig {
    pub fn new(format: StreamFormat, sample_rate: u32, channels: u16, bits: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(StreamError::invalid("sample rate must be greater than zero"));
        }
        if channels == 0 {
            return Err(StreamError::invalid("channel count must be at least 1"));
        }
        let bit_depth = BitDepth::from_bits(bits)?;

        Ok(Self {
            format,
            sample_rate,
            channels,
            bit_depth,
        })
    }

    /// Shorthand for a raw PCM stream.
    pub fn raw(sample_rate: u32, channels: u16, bits: u16) -> Result<Self> {
        Self::new(StreamFormat::Raw, sample_rate, channels, bits)
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    /// Bytes taken by one interleaved sample frame (all channels).
    pub fn bytes_per_frame(&self) -> usize {
        self.bit_depth.bytes_per_sample() * self.channels as usize
    }
}

/// Untyped, deserializable form of [`StreamConfig`] for host config files.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_format")]
    pub format: StreamFormat,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_bit_depth")]
    pub bit_depth: u16,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            format: default_format(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            bit_depth: default_bit_depth(),
        }
    }
}

impl TryFrom<&StreamSettings> for StreamConfig {
    type Error = StreamError;

    fn try_from(settings: &StreamSettings) -> Result<Self> {
        StreamConfig::new(
            settings.format,
            settings.sample_rate,
            settings.channels,
            settings.bit_depth,
        )
    }
}

fn default_format() -> StreamFormat { StreamFormat::Raw }
fn default_sample_rate() -> u32 { 44_100 }
fn default_channels() -> u16 { 2 }
fn default_bit_depth() -> u16 { 16 }
