//! The media-playback capability the controller drives.

use async_trait::async_trait;
use enclave_proto::protocol::Volume;
use thiserror::Error;

/// Notifications pushed by a media backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// Audio started flowing for the loaded source.
    Started,
    /// The loaded source played through to its end.
    Ended,
}

/// Why `play()` was rejected.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The platform refused to start audio.
    #[error("{0}")]
    NotAllowed(String),
    /// The source is missing or cannot be decoded.
    #[error("{0}")]
    NotSupported(String),
    /// Loading was interrupted or never produced audio.
    #[error("{0}")]
    Aborted(String),
    #[error(transparent)]
    Media(#[from] anyhow::Error),
}

impl PlaybackError {
    /// Error class name shown in the log panel.
    pub fn kind(&self) -> &'static str {
        match self {
            PlaybackError::NotAllowed(_) => "NotAllowedError",
            PlaybackError::NotSupported(_) => "NotSupportedError",
            PlaybackError::Aborted(_) => "AbortError",
            PlaybackError::Media(_) => "MediaError",
        }
    }
}

/// A single audio element: one source at a time, explicit play/pause.
///
/// `load` only assigns the source; nothing is audible until `play`.
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    async fn load(&self, url: &str) -> anyhow::Result<()>;
    async fn play(&self) -> Result<(), PlaybackError>;
    async fn pause(&self) -> anyhow::Result<()>;
    async fn seek_to_start(&self) -> anyhow::Result<()>;
    async fn set_volume(&self, volume: Volume) -> anyhow::Result<()>;
    async fn volume(&self) -> anyhow::Result<Volume>;
    async fn set_muted(&self, muted: bool) -> anyhow::Result<()>;
    /// The source last passed to `load`, as given.
    fn current_url(&self) -> Option<String>;
    /// A trivial silent source used to unlock playback.
    fn probe_source(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(PlaybackError::NotAllowed("x".into()).kind(), "NotAllowedError");
        assert_eq!(
            PlaybackError::Media(anyhow::anyhow!("ipc gone")).to_string(),
            "ipc gone"
        );
    }
}
