use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;
use super::protocol::DEFAULT_VOLUME;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub ticker: TickerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Persisted preferences (connected flag, volume).
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Where the channel and library documents come from.  Each entry is either
/// an http(s) URL or a local file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_channels_source")]
    pub channels: String,
    #[serde(default = "default_library_source")]
    pub library: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Base that root-relative track URLs (`/audio/chill/x.mp3`) are resolved
    /// against: an http(s) origin or a local directory.
    #[serde(default = "default_media_root")]
    pub media_root: String,
    /// Used when no persisted volume exists.
    #[serde(default = "default_volume")]
    pub default_volume: u8,
    /// Fixed wait between firing the tuning effect and playing.
    #[serde(default = "default_tune_delay_ms")]
    pub tune_delay_ms: u64,
    #[serde(default = "default_tuning_effect")]
    pub tuning_effect: bool,
    /// Noise burst length, clamped to 60..=400 ms.
    #[serde(default = "default_burst_ms")]
    pub burst_ms: u64,
    /// How long `play()` may wait for audio before it is rejected.
    #[serde(default = "default_play_timeout_secs")]
    pub play_timeout_secs: u64,
}

/// Geometry used to decide whether the now-playing title scrolls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerConfig {
    #[serde(default = "default_container_px")]
    pub container_px: u32,
    #[serde(default = "default_cell_px")]
    pub cell_px: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            channels: default_channels_source(),
            library: default_library_source(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            default_volume: default_volume(),
            tune_delay_ms: default_tune_delay_ms(),
            tuning_effect: default_tuning_effect(),
            burst_ms: default_burst_ms(),
            play_timeout_secs: default_play_timeout_secs(),
        }
    }
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            container_px: default_container_px(),
            cell_px: default_cell_px(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_channels_source() -> String {
    "http://127.0.0.1:8080/radio.json".to_string()
}

fn default_library_source() -> String {
    "http://127.0.0.1:8080/api/library".to_string()
}

fn default_media_root() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_volume() -> u8 {
    DEFAULT_VOLUME
}

fn default_tune_delay_ms() -> u64 {
    500
}

fn default_tuning_effect() -> bool {
    true
}

fn default_burst_ms() -> u64 {
    180
}

fn default_play_timeout_secs() -> u64 {
    15
}

fn default_container_px() -> u32 {
    320
}

fn default_cell_px() -> u32 {
    8
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
