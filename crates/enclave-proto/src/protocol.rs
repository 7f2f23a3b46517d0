use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Commands accepted by the radio core (HTTP API, CLI, tests).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    /// The user gesture: arm the media primitive once, then play.
    Connect,
    Play,
    Stop,
    SelectChannel { id: String },
    /// Raw percent as received; clamped by the core.
    Volume { percent: i64 },
    RefreshLibrary,
    GetState,
}

// ── channels ──────────────────────────────────────────────────────────────────

/// A named audio source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub source: ChannelSource,
}

/// Where a channel's audio comes from, selected by the `mode` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ChannelSource {
    /// A folder of tracks, shuffled one at a time.
    Folder { folder: String },
    /// A fixed stream URL.
    Direct { src: String },
}

impl Channel {
    pub fn folder(id: &str, name: &str, folder: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            source: ChannelSource::Folder {
                folder: folder.to_string(),
            },
        }
    }

    pub fn direct(id: &str, name: &str, src: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            source: ChannelSource::Direct {
                src: src.to_string(),
            },
        }
    }

    pub fn mode(&self) -> &'static str {
        match self.source {
            ChannelSource::Folder { .. } => "folder",
            ChannelSource::Direct { .. } => "direct",
        }
    }
}

/// Top-level shape of the channel-configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub channels: Vec<Channel>,
}

/// Folder-key → ordered filenames.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct LibraryIndex(HashMap<String, Vec<String>>);

impl LibraryIndex {
    pub fn new(entries: HashMap<String, Vec<String>>) -> Self {
        Self(entries)
    }

    /// Filenames for `key`; unknown keys yield an empty slice.
    pub fn tracks(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<String>)> for LibraryIndex {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ── playback state ────────────────────────────────────────────────────────────

/// Machine state of the playback controller.
///
/// Transitions:
///   Locked -> Armed   (connect gesture, once)
///   Armed  -> Playing (first successful play)
///   Playing -> Playing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum MachineState {
    #[default]
    Locked,
    Armed,
    Playing,
}

/// User-facing status. Wider than `MachineState`: TUNING, LOADING, BLOCKED,
/// EMPTY and STOPPED are reported without a machine transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    #[default]
    Locked,
    Armed,
    Tuning,
    Loading,
    Playing,
    Blocked,
    Empty,
    Stopped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Locked => "LOCKED",
            Status::Armed => "ARMED",
            Status::Tuning => "TUNING",
            Status::Loading => "LOADING",
            Status::Playing => "PLAYING",
            Status::Blocked => "BLOCKED",
            Status::Empty => "EMPTY",
            Status::Stopped => "STOPPED",
        }
    }

    /// Text for the status pill, e.g. `AUDIO: PLAYING`.
    pub fn pill(&self) -> String {
        format!("AUDIO: {}", self.as_str())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── volume ────────────────────────────────────────────────────────────────────

pub const DEFAULT_VOLUME: u8 = 75;

/// Volume as an integer percent, always within 0..=100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "i64", into = "u8")]
pub struct Volume(u8);

impl Volume {
    pub fn from_percent(percent: i64) -> Self {
        Self(percent.clamp(0, 100) as u8)
    }

    /// Parses a slider value. Reads a leading integer and ignores the rest;
    /// anything unparsable is 0.
    pub fn parse_lenient(raw: &str) -> Self {
        let trimmed = raw.trim();
        let negative = trimmed.starts_with('-');
        let sign_len = usize::from(negative || trimmed.starts_with('+'));
        let end = trimmed[sign_len..]
            .find(|c: char| !c.is_ascii_digit())
            .map(|idx| sign_len + idx)
            .unwrap_or(trimmed.len());
        match trimmed[..end].parse::<i64>() {
            Ok(value) => Self::from_percent(value),
            // overflowing digit runs
            Err(_) if end > sign_len && !negative => Self(100),
            Err(_) => Self(0),
        }
    }

    pub fn percent(&self) -> u8 {
        self.0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self(DEFAULT_VOLUME)
    }
}

impl From<i64> for Volume {
    fn from(percent: i64) -> Self {
        Self::from_percent(percent)
    }
}

impl From<Volume> for u8 {
    fn from(volume: Volume) -> Self {
        volume.0
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

// ── presentation ──────────────────────────────────────────────────────────────

pub const NOW_PLAYING_LABEL: &str = "CURRENTLY PLAYING";

/// Title shown for the current track and how to animate it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NowPlaying {
    pub title: String,
    /// Scroll duration in seconds when the title overflows its container.
    pub ticker_secs: Option<u32>,
}

impl NowPlaying {
    pub fn is_ticker(&self) -> bool {
        self.ticker_secs.is_some()
    }

    pub fn display(&self) -> String {
        format!("{} — {}", NOW_PLAYING_LABEL, self.title)
    }
}

/// A line for the widget's log panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub at: DateTime<Local>,
    pub text: String,
}

impl LogLine {
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            at: Local::now(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub mode: String,
}

impl From<&Channel> for ChannelInfo {
    fn from(channel: &Channel) -> Self {
        Self {
            id: channel.id.clone(),
            name: channel.name.clone(),
            mode: channel.mode().to_string(),
        }
    }
}

/// Full published state.  `rev` increases on every change so clients can
/// detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RadioSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub channels: Vec<ChannelInfo>,
    pub selected: Option<String>,
    pub machine_state: MachineState,
    pub status: Status,
    /// Pill text for `status`, e.g. `AUDIO: PLAYING`.
    #[serde(default)]
    pub status_text: String,
    pub now_playing: Option<NowPlaying>,
    /// Labelled title line for `now_playing`.
    #[serde(default)]
    pub now_playing_text: Option<String>,
    pub volume: Volume,
    /// The user has connected at least once (persisted).
    pub connected: bool,
    /// Volume and similar controls are disabled until the first connect.
    pub controls_locked: bool,
    /// Set when the channel or library documents could not be loaded.
    pub init_error: Option<String>,
}
