use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sonica-stream",
    about = "Stream an audio file through the ingest/analysis pipeline and print spectral measurements"
)]
pub struct Cli {
    /// Input audio (raw PCM, WAV or MP3)
    pub input: PathBuf,

    /// Config file (defaults to ./sonica-stream.toml, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Wire format: raw, wav or mp3. Guessed from the file extension if omitted.
    #[arg(short, long)]
    pub format: Option<String>,

    /// Sample rate of raw input
    #[arg(long, default_value_t = 44_100)]
    pub sample_rate: u32,

    /// Channel count of raw input
    #[arg(long, default_value_t = 2)]
    pub channels: u16,

    /// Bit depth of raw input (8, 16 or 32)
    #[arg(long, default_value_t = 16)]
    pub bit_depth: u16,

    /// Bytes handed to the ingestor per tick
    #[arg(long, default_value_t = 4096)]
    pub chunk_size: usize,

    /// Spectral window size (256, 512, 1024 or 2048)
    #[arg(long, default_value_t = 2048)]
    pub fft_size: usize,

    /// Envelope attack time in ms
    #[arg(long, default_value_t = 10.0)]
    pub attack: f32,

    /// Envelope release time in ms
    #[arg(long, default_value_t = 100.0)]
    pub release: f32,

    /// Virtual time between analysis ticks in ms
    #[arg(long, default_value_t = 16)]
    pub tick_ms: u64,

    /// Print only every Nth analysis frame
    #[arg(long, default_value_t = 1)]
    pub every: usize,

    /// Emit analysis frames as JSON lines
    #[arg(long)]
    pub json: bool,
}
