mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use cli::Cli;
use sonica_stream::{
    AnalysisFrame, AnalyzerConfig, EndEvent, FrequencyAnalyzer, StreamConfig, StreamFormat,
    StreamIngestor,
};

const METER_WIDTH: usize = 40;
const PEAK_WIDTH: usize = 10;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect sonica-stream.toml / user config
    let config_path = cli.config.clone().or_else(|| {
        let local = PathBuf::from("sonica-stream.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("sonica-stream").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });

    let mut stream_format = None;
    let mut analysis = AnalyzerConfig::default();
    if let Some(ref path) = config_path {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.sample_rate == 44_100 { cli.sample_rate = cfg.stream.sample_rate; }
            if cli.channels == 2 { cli.channels = cfg.stream.channels; }
            if cli.bit_depth == 16 { cli.bit_depth = cfg.stream.bit_depth; }
            if cli.chunk_size == 4096 { cli.chunk_size = cfg.host.chunk_size; }
            if cli.tick_ms == 16 { cli.tick_ms = cfg.host.tick_ms; }
            if cli.fft_size == 2048 { cli.fft_size = cfg.analysis.transform_size; }
            if cli.attack == 10.0 { cli.attack = cfg.analysis.attack_ms; }
            if cli.release == 100.0 { cli.release = cfg.analysis.release_ms; }
            stream_format = Some(cfg.stream.format);
            analysis = cfg.analysis;
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    if !cli.input.exists() {
        anyhow::bail!("Input file not found: {}", cli.input.display());
    }
    if cli.chunk_size == 0 || cli.tick_ms == 0 {
        anyhow::bail!("--chunk-size and --tick-ms must be greater than zero");
    }

    let format = resolve_format(&cli, stream_format)?;
    let stream_config = StreamConfig::new(format, cli.sample_rate, cli.channels, cli.bit_depth)
        .context("Invalid stream parameters")?;
    let analyzer_config = AnalyzerConfig {
        transform_size: cli.fft_size,
        attack_ms: cli.attack,
        release_ms: cli.release,
        tick_ms: cli.tick_ms as f32,
        ..analysis
    };
    let analyzer = Rc::new(RefCell::new(
        FrequencyAnalyzer::new(analyzer_config).context("Invalid analysis parameters")?,
    ));

    log::info!("sonica-stream - streaming spectrum analysis");
    log::info!("Input: {} ({})", cli.input.display(), format.name());
    log::info!(
        "Window: {} samples, attack {}ms, release {}ms, tick {}ms",
        cli.fft_size, cli.attack, cli.release, cli.tick_ms
    );

    let bytes = std::fs::read(&cli.input)
        .with_context(|| format!("Failed to read input: {}", cli.input.display()))?;

    let pb = ProgressBar::new(bytes.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} fed")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );

    let mut ingestor = StreamIngestor::new(stream_config);
    ingestor.connect(analyzer.clone());
    ingestor.on_error(|event| {
        if event.recoverable {
            log::debug!("Ingest notice: {}", event.cause);
        } else {
            log::warn!("Ingest error: {}", event.cause);
        }
    });
    let finished: Rc<RefCell<Option<EndEvent>>> = Rc::new(RefCell::new(None));
    let sink = finished.clone();
    ingestor.on_end(move |event| *sink.borrow_mut() = Some(*event));

    let printer = pb.clone();
    let json = cli.json;
    let every = cli.every.max(1);
    let meter_config = analyzer_config;
    let mut emitted = 0usize;
    analyzer.borrow_mut().on_analysis(move |frame| {
        emitted += 1;
        if (emitted - 1) % every != 0 {
            return;
        }
        let line = if json {
            match serde_json::to_string(frame) {
                Ok(line) => line,
                Err(err) => {
                    log::warn!("Failed to serialize analysis frame: {}", err);
                    return;
                }
            }
        } else {
            meter_line(frame, &meter_config)
        };
        printer.println(line);
    });

    // Drive the pipeline on a virtual clock: one chunk and one tick per step.
    let tick = Duration::from_millis(cli.tick_ms);
    let mut now = Instant::now();
    for chunk in bytes.chunks(cli.chunk_size) {
        ingestor.feed(chunk);
        analyzer.borrow_mut().tick_at(now);
        now += tick;
        pb.inc(chunk.len() as u64);
    }
    ingestor.end();
    pb.finish_with_message("Ingest complete");

    // Play out whatever is still queued.
    loop {
        let mut analyzer = analyzer.borrow_mut();
        if analyzer.active_frame().is_none() && analyzer.queued_len() == 0 {
            break;
        }
        analyzer.tick_at(now);
        now += tick;
    }

    let frames_played = analyzer.borrow().frames_played();
    analyzer.borrow_mut().destroy();

    match *finished.borrow() {
        Some(end) => log::info!(
            "Done! {} samples in {} frames, ingest took {:.2}s",
            end.total_samples, frames_played, end.elapsed_secs
        ),
        None => log::warn!("Stream ended without a completion event"),
    }

    Ok(())
}

fn resolve_format(cli: &Cli, configured: Option<StreamFormat>) -> Result<StreamFormat> {
    if let Some(ref name) = cli.format {
        return name.parse().context("Unknown --format");
    }
    if let Some(format) = format_from_extension(&cli.input) {
        return Ok(format);
    }
    Ok(configured.unwrap_or(StreamFormat::Raw))
}

fn format_from_extension(path: &Path) -> Option<StreamFormat> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(|e| e.parse().ok())
}

fn meter_line(frame: &AnalysisFrame, config: &AnalyzerConfig) -> String {
    let filled = (frame.amplitude * METER_WIDTH as f32).round() as usize;
    let (peak_bin, peak_db) = frame
        .frequency_magnitudes
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::MIN), |best, (i, db)| if db > best.1 { (i, db) } else { best });

    let peak = (config.normalize_decibels(peak_db) * PEAK_WIDTH as f32).round() as usize;

    format!(
        "{:>9.1}ms  amp {:.3} [{:<width$}]  peak bin {:>4} {:>6.1} dB [{:<peak_width$}]",
        frame.timestamp_ms,
        frame.amplitude,
        "#".repeat(filled.min(METER_WIDTH)),
        peak_bin,
        peak_db,
        "=".repeat(peak.min(PEAK_WIDTH)),
        width = METER_WIDTH,
        peak_width = PEAK_WIDTH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_selects_format() {
        assert_eq!(format_from_extension(Path::new("a/b.wav")), Some(StreamFormat::Wav));
        assert_eq!(format_from_extension(Path::new("song.MP3")), Some(StreamFormat::Mp3));
        assert_eq!(format_from_extension(Path::new("capture.pcm")), Some(StreamFormat::Raw));
        assert_eq!(format_from_extension(Path::new("notes.txt")), None);
    }

    #[test]
    fn meter_line_scales_with_amplitude() {
        let frame = AnalysisFrame {
            frequency_magnitudes: vec![-100.0, -20.0, -60.0],
            amplitude: 0.5,
            timestamp_ms: 16.0,
        };
        let config = AnalyzerConfig::default();
        let line = meter_line(&frame, &config);
        assert!(line.contains(&"#".repeat(METER_WIDTH / 2)));
        assert!(line.contains("peak bin    1"));
        // -20 dB is above max_decibels, so the peak bar is full
        assert!(line.ends_with(&format!("[{}]", "=".repeat(PEAK_WIDTH))));

        let quiet = AnalysisFrame {
            frequency_magnitudes: vec![-100.0; 4],
            amplitude: 0.0,
            timestamp_ms: 0.0,
        };
        let line = meter_line(&quiet, &config);
        assert!(line.ends_with(&format!("[{}]", " ".repeat(PEAK_WIDTH))));
    }
}
