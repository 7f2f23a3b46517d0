use crate::protocol::{RadioSnapshot, Status, Volume};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Preferences that survive restarts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    pub connected: bool,
    pub volume: Volume,
}

impl PersistentState {
    pub fn with_volume(volume: Volume) -> Self {
        Self {
            connected: false,
            volume,
        }
    }

    /// Reads each key on its own so one corrupt value does not discard the
    /// other.  Anything missing or malformed keeps the value from `defaults`.
    pub fn from_json(content: &str, defaults: Self) -> Self {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(content) else {
            return defaults;
        };
        let connected = match value.get("connected") {
            Some(serde_json::Value::Bool(b)) => *b,
            // older writers stored "1"
            Some(serde_json::Value::String(s)) => s == "1",
            _ => defaults.connected,
        };
        let volume = match value.get("volume") {
            // fractional values truncate toward zero
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
                .map(Volume::from_percent)
                .unwrap_or(defaults.volume),
            Some(serde_json::Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Volume::from_percent)
                .unwrap_or(defaults.volume),
            _ => defaults.volume,
        };
        Self { connected, volume }
    }

    pub fn load(state_file: &Path, defaults: Self) -> Self {
        match std::fs::read_to_string(state_file) {
            Ok(content) => Self::from_json(&content, defaults),
            Err(_) => defaults,
        }
    }
}

/// Shared published state plus the preferences file behind it.
///
/// The core event loop is the only writer of playback fields; the HTTP layer
/// reads snapshots.  Preference writes are best-effort: a failed save is
/// logged and the in-memory value stays authoritative.
pub struct StateManager {
    state: Arc<RwLock<RadioSnapshot>>,
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf, default_volume: Volume) -> Self {
        let prefs = PersistentState::load(&state_file, PersistentState::with_volume(default_volume));

        let state = RadioSnapshot {
            rev: 1,
            volume: prefs.volume,
            connected: prefs.connected,
            controls_locked: true,
            status_text: Status::Locked.pill(),
            ..RadioSnapshot::default()
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            state_file,
        }
    }

    pub async fn get_state(&self) -> RadioSnapshot {
        self.state.read().await.clone()
    }

    pub async fn preferences(&self) -> PersistentState {
        let state = self.state.read().await;
        PersistentState {
            connected: state.connected,
            volume: state.volume,
        }
    }

    /// Apply `f` and bump the revision.
    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut RadioSnapshot),
    {
        let mut state = self.state.write().await;
        f(&mut state);
        state.rev += 1;
    }

    pub async fn set_connected(&self) {
        {
            let mut state = self.state.write().await;
            state.connected = true;
            state.rev += 1;
        }
        self.persist().await;
    }

    pub async fn set_volume(&self, volume: Volume) -> Volume {
        {
            let mut state = self.state.write().await;
            state.volume = volume;
            state.rev += 1;
        }
        self.persist().await;
        volume
    }

    pub async fn volume(&self) -> Volume {
        self.state.read().await.volume
    }

    async fn persist(&self) {
        if let Err(e) = self.save().await {
            debug!("state: could not persist preferences to {:?}: {}", self.state_file, e);
        }
    }

    async fn save(&self) -> anyhow::Result<()> {
        let persistent = self.preferences().await;

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }
}
