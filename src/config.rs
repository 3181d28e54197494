use serde::Deserialize;
use std::path::Path;

use sonica_stream::{AnalyzerConfig, StreamSettings};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub analysis: AnalyzerConfig,
    #[serde(default)]
    pub host: HostConfig,
}

#[derive(Debug, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            tick_ms: default_tick_ms(),
        }
    }
}

fn default_chunk_size() -> usize { 4096 }
fn default_tick_ms() -> u64 { 16 }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}
