use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use enclave_proto::protocol::Volume;
use enclave_radio::controller::PlaybackController;
use enclave_radio::media::{MediaPlayer, PlaybackError};
use enclave_radio::tuning::TuningEffect;
use enclave_radio::BroadcastMessage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;

pub const FAKE_PROBE: &str = "probe:silence";

/// In-memory media element.  Records every call as a short string.
#[derive(Default)]
pub struct FakeMedia {
    calls: Mutex<Vec<String>>,
    current: Mutex<Option<String>>,
    volume: Mutex<Option<Volume>>,
    /// When set, `play` rejects with NotAllowed(message).
    reject: Mutex<Option<String>>,
    play_delay: Mutex<Duration>,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    /// Sources passed to `load`, probe excluded.
    pub fn loaded_tracks(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix("load:"))
            .filter(|url| *url != FAKE_PROBE)
            .map(str::to_string)
            .collect()
    }

    pub fn reject_plays(&self, message: &str) {
        *self.reject.lock().unwrap() = Some(message.to_string());
    }

    pub fn accept_plays(&self) {
        *self.reject.lock().unwrap() = None;
    }

    pub fn set_play_delay(&self, delay: Duration) {
        *self.play_delay.lock().unwrap() = delay;
    }

    pub fn last_volume(&self) -> Option<Volume> {
        *self.volume.lock().unwrap()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl MediaPlayer for FakeMedia {
    async fn load(&self, url: &str) -> anyhow::Result<()> {
        self.record(format!("load:{url}"));
        *self.current.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        self.record("play");
        let delay = *self.play_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.current.lock().unwrap().is_none() {
            return Err(PlaybackError::NotSupported("no source".to_string()));
        }
        let reject = self.reject.lock().unwrap().clone();
        match reject {
            Some(message) => Err(PlaybackError::NotAllowed(message)),
            None => Ok(()),
        }
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.record("pause");
        Ok(())
    }

    async fn seek_to_start(&self) -> anyhow::Result<()> {
        self.record("seek0");
        Ok(())
    }

    async fn set_volume(&self, volume: Volume) -> anyhow::Result<()> {
        self.record(format!("volume:{}", volume.percent()));
        *self.volume.lock().unwrap() = Some(volume);
        Ok(())
    }

    async fn volume(&self) -> anyhow::Result<Volume> {
        Ok(self.last_volume().unwrap_or_default())
    }

    async fn set_muted(&self, muted: bool) -> anyhow::Result<()> {
        self.record(format!("muted:{muted}"));
        Ok(())
    }

    fn current_url(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }

    fn probe_source(&self) -> &str {
        FAKE_PROBE
    }
}

/// Counts how often it was fired; optionally fails.
#[derive(Default)]
pub struct CountingEffect {
    pub fired: AtomicUsize,
    pub fail: bool,
}

impl CountingEffect {
    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TuningEffect for CountingEffect {
    async fn play(&self) -> anyhow::Result<()> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("no audio device");
        }
        Ok(())
    }
}

/// Controller over the fakes with a seeded generator.
pub fn controller(
    media: &Arc<FakeMedia>,
    effect: &Arc<CountingEffect>,
) -> (PlaybackController, broadcast::Receiver<BroadcastMessage>) {
    let (tx, rx) = broadcast::channel(256);
    let controller = PlaybackController::new(media.clone(), effect.clone(), tx)
        .with_rng(Box::new(StdRng::seed_from_u64(11)));
    (controller, rx)
}
