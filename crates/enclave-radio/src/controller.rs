//! PlaybackController: owns the LOCKED → ARMED → PLAYING machine.
//!
//! The controller is the only thing that drives the media primitive.  Every
//! operation that waits (tuning delay, `play()`) is split in two so the event
//! loop can run the waiting part in a task:
//!
//! ```text
//!   begin_play()  ── resolve + load ──► PendingPlay { token }
//!                                        │ run(): await media.play()
//!   finish_play(token, result) ◄─────────┘ applied only if token is latest
//!
//!   begin_tune(id) ── pause + TUNING ──► PendingTune { token }
//!                                        │ run(): effect, fixed delay
//!   tune_is_current(token) ◄─────────────┘ then begin_play()
//! ```
//!
//! Every new intent (play, tune, stop) takes a fresh token, so whatever the
//! user asked for last wins over anything still in flight.  `play_selected`,
//! `change_channel`, `connect` and `on_ended` chain the same halves inline.

use std::sync::Arc;
use std::time::Duration;

use enclave_proto::protocol::{
    Channel, ChannelInfo, LibraryIndex, LogLine, MachineState, NowPlaying, RadioSnapshot, Status,
    Volume,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::catalog::ChannelCatalog;
use crate::media::{MediaPlayer, PlaybackError};
use crate::now_playing::NowPlayingPresenter;
use crate::resolver::{resolve, Resolution};
use crate::tuning::TuningEffect;
use crate::BroadcastMessage;

pub const DEFAULT_TUNE_DELAY: Duration = Duration::from_millis(500);

pub const HINT_CONNECT_FIRST: &str = "> Tap CONNECT to arm audio first.";
pub const HINT_RETRY: &str = "> Tap CONNECT, then PLAY.";
pub const LOG_CONNECTED: &str = "> CONNECTED.";

/// A play request whose `play()` has not been awaited yet.
pub struct PendingPlay {
    pub token: u64,
    pub url: String,
    media: Arc<dyn MediaPlayer>,
}

impl PendingPlay {
    pub async fn run(self) -> (u64, Result<(), PlaybackError>) {
        let result = self.media.play().await;
        (self.token, result)
    }
}

/// A channel change waiting out the tuning effect.
pub struct PendingTune {
    pub token: u64,
    effect: Arc<dyn TuningEffect>,
    delay: Duration,
}

impl PendingTune {
    pub async fn run(self) -> u64 {
        if let Err(e) = self.effect.play().await {
            debug!("tuning effect failed: {}", e);
        }
        tokio::time::sleep(self.delay).await;
        self.token
    }
}

pub struct PlaybackController {
    catalog: ChannelCatalog,
    library: LibraryIndex,
    media: Arc<dyn MediaPlayer>,
    effect: Arc<dyn TuningEffect>,
    presenter: NowPlayingPresenter,
    rng: Box<dyn RngCore + Send + Sync>,
    tune_delay: Duration,
    armed: bool,
    state: MachineState,
    status: Status,
    now_playing: Option<NowPlaying>,
    /// Token of the most recent intent.
    intent: u64,
    /// Play started by the connect gesture; its result is followed by
    /// the connected line.
    connect_token: Option<u64>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl PlaybackController {
    pub fn new(
        media: Arc<dyn MediaPlayer>,
        effect: Arc<dyn TuningEffect>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            catalog: ChannelCatalog::default(),
            library: LibraryIndex::default(),
            media,
            effect,
            presenter: NowPlayingPresenter::default(),
            rng: Box::new(StdRng::from_entropy()),
            tune_delay: DEFAULT_TUNE_DELAY,
            armed: false,
            state: MachineState::Locked,
            status: Status::Locked,
            now_playing: None,
            intent: 0,
            connect_token: None,
            broadcast_tx,
        }
    }

    pub fn with_rng(mut self, rng: Box<dyn RngCore + Send + Sync>) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_presenter(mut self, presenter: NowPlayingPresenter) -> Self {
        self.presenter = presenter;
        self
    }

    pub fn with_tune_delay(mut self, delay: Duration) -> Self {
        self.tune_delay = delay;
        self
    }

    // ── catalog / library ─────────────────────────────────────────────────────

    pub fn load_channels(&mut self, channels: Vec<Channel>) {
        info!("controller: {} channels loaded", channels.len());
        self.catalog.load(channels);
    }

    pub fn set_library(&mut self, library: LibraryIndex) {
        info!("controller: library index with {} folders", library.len());
        self.library = library;
    }

    pub fn catalog(&self) -> &ChannelCatalog {
        &self.catalog
    }

    pub fn select(&mut self, id: &str) -> bool {
        self.catalog.select(id)
    }

    // ── observers ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    /// Copy the controller-owned fields into a published snapshot.
    pub fn fill_snapshot(&self, snapshot: &mut RadioSnapshot) {
        snapshot.channels = self.catalog.channels().iter().map(ChannelInfo::from).collect();
        snapshot.selected = self.catalog.current().map(|c| c.id.clone());
        snapshot.machine_state = self.state;
        snapshot.status = self.status;
        snapshot.status_text = self.status.pill();
        snapshot.now_playing = self.now_playing.clone();
        snapshot.now_playing_text = self.now_playing.as_ref().map(NowPlaying::display);
        snapshot.controls_locked = self.state == MachineState::Locked;
    }

    // ── reporting ─────────────────────────────────────────────────────────────

    fn set_status(&mut self, status: Status) {
        if status != self.status {
            debug!("controller: status {} → {}", self.status, status);
        }
        self.status = status;
        let _ = self.broadcast_tx.send(BroadcastMessage::Status(status));
    }

    /// Emit a line for the widget's log panel.
    pub fn log(&self, text: impl Into<String>) {
        let line = LogLine::now(text);
        info!("log: {}", line.text);
        let _ = self.broadcast_tx.send(BroadcastMessage::Log(line));
    }

    fn next_intent(&mut self) -> u64 {
        self.intent += 1;
        self.intent
    }

    // ── arming ────────────────────────────────────────────────────────────────

    /// LOCKED → ARMED, once.  Runs a muted probe play/pause cycle so later
    /// audible playback is allowed.
    pub async fn arm_once(&mut self) {
        if self.armed {
            return;
        }
        // Flag first: nothing after this point may start a second probe.
        self.armed = true;

        info!("controller: arming media with silent probe");
        let probe = self.media.probe_source().to_string();
        if let Err(e) = self.media.set_muted(true).await {
            debug!("arm: mute failed: {}", e);
        }
        match self.media.load(&probe).await {
            Ok(()) => {
                if let Err(e) = self.media.play().await {
                    debug!("arm: probe play rejected: {}", e);
                }
            }
            Err(e) => debug!("arm: probe load failed: {}", e),
        }
        if let Err(e) = self.media.pause().await {
            debug!("arm: pause failed: {}", e);
        }
        if let Err(e) = self.media.seek_to_start().await {
            debug!("arm: rewind failed: {}", e);
        }
        if let Err(e) = self.media.set_muted(false).await {
            debug!("arm: unmute failed: {}", e);
        }

        self.state = MachineState::Armed;
        self.set_status(Status::Armed);
    }

    // ── playing ───────────────────────────────────────────────────────────────

    /// Resolve the selected channel and assign it to the media primitive.
    /// Returns `None` when nothing should be played.
    pub async fn begin_play(&mut self) -> Option<PendingPlay> {
        if self.state == MachineState::Locked {
            self.log(HINT_CONNECT_FIRST);
            self.set_status(Status::Locked);
            return None;
        }
        let Some(channel) = self.catalog.current().cloned() else {
            debug!("controller: play requested with an empty catalog");
            return None;
        };
        let token = self.next_intent();

        match resolve(&channel, &self.library, self.rng.as_mut()) {
            Resolution::Empty { folder } => {
                warn!("controller: channel '{}' has no tracks in {}", channel.id, folder);
                self.set_status(Status::Empty);
                self.log(format!("> No audio files found in {}/", folder));
                None
            }
            Resolution::Track(url) => {
                info!("controller: channel '{}' → {}", channel.id, url);
                if let Err(e) = self.media.load(&url).await {
                    self.reject(PlaybackError::Media(e));
                    return None;
                }
                self.set_status(Status::Loading);
                Some(PendingPlay {
                    token,
                    url,
                    media: Arc::clone(&self.media),
                })
            }
        }
    }

    /// Apply the outcome of a `PendingPlay`.  Results for superseded tokens
    /// are dropped.  Returns true when playback started.
    pub fn finish_play(&mut self, token: u64, result: Result<(), PlaybackError>) -> bool {
        let connecting = self.connect_token == Some(token);
        if connecting {
            self.connect_token = None;
        }
        let playing = self.apply_play(token, result);
        if connecting {
            self.log(LOG_CONNECTED);
        }
        playing
    }

    fn apply_play(&mut self, token: u64, result: Result<(), PlaybackError>) -> bool {
        if token != self.intent {
            debug!(
                "controller: dropping play result for token {} (latest {})",
                token, self.intent
            );
            return false;
        }
        match result {
            Ok(()) => {
                self.state = MachineState::Playing;
                self.set_status(Status::Playing);
                self.refresh_now_playing();
                true
            }
            Err(e) => {
                self.reject(e);
                false
            }
        }
    }

    fn reject(&mut self, err: PlaybackError) {
        warn!("controller: playback rejected: {}: {}", err.kind(), err);
        self.set_status(Status::Blocked);
        self.log(format!("[ERROR] {}: {}", err.kind(), err));
        self.log(HINT_RETRY);
    }

    pub async fn play_selected(&mut self) -> bool {
        let Some(pending) = self.begin_play().await else {
            return false;
        };
        let (token, result) = pending.run().await;
        self.finish_play(token, result)
    }

    /// Pause and rewind.  Reported as STOPPED; the machine state stays where
    /// it is so the next play needs no new gesture.
    pub async fn stop(&mut self) {
        self.next_intent();
        if let Err(e) = self.media.pause().await {
            debug!("stop: pause failed: {}", e);
        }
        if let Err(e) = self.media.seek_to_start().await {
            debug!("stop: rewind failed: {}", e);
        }
        self.set_status(Status::Stopped);
    }

    // ── channel change ────────────────────────────────────────────────────────

    /// Select `id` and, when armed, start tuning to it.
    pub async fn begin_tune(&mut self, id: &str) -> Option<PendingTune> {
        if !self.catalog.select(id) {
            debug!("controller: ignoring unknown channel '{}'", id);
            return None;
        }
        if self.state == MachineState::Locked {
            self.log(HINT_CONNECT_FIRST);
            self.set_status(Status::Locked);
            return None;
        }

        if let Err(e) = self.media.pause().await {
            debug!("tune: pause failed: {}", e);
        }
        if let Err(e) = self.media.seek_to_start().await {
            debug!("tune: rewind failed: {}", e);
        }
        let token = self.next_intent();
        self.set_status(Status::Tuning);
        Some(PendingTune {
            token,
            effect: Arc::clone(&self.effect),
            delay: self.tune_delay,
        })
    }

    pub fn tune_is_current(&self, token: u64) -> bool {
        token == self.intent
    }

    pub async fn change_channel(&mut self, id: &str) -> bool {
        let Some(tune) = self.begin_tune(id).await else {
            return false;
        };
        let token = tune.run().await;
        if !self.tune_is_current(token) {
            return false;
        }
        self.play_selected().await
    }

    // ── gesture / media events ────────────────────────────────────────────────

    /// First half of the connect gesture: arm, then start the selection.
    /// The connected line follows the play's outcome in `finish_play`, or
    /// goes out here when there is nothing to play.
    pub async fn begin_connect(&mut self) -> Option<PendingPlay> {
        self.arm_once().await;
        let pending = self.begin_play().await;
        match &pending {
            Some(p) => self.connect_token = Some(p.token),
            None => self.log(LOG_CONNECTED),
        }
        pending
    }

    /// The connect gesture: arm, then play the selection.
    pub async fn connect(&mut self) -> bool {
        let Some(pending) = self.begin_connect().await else {
            return false;
        };
        let (token, result) = pending.run().await;
        self.finish_play(token, result)
    }

    fn probe_loaded(&self) -> bool {
        self.media.current_url().as_deref() == Some(self.media.probe_source())
    }

    /// A track began playing: recompute the title.
    pub fn on_started(&mut self) {
        if self.probe_loaded() {
            return;
        }
        self.refresh_now_playing();
    }

    /// A track ended: draw the next one.  The arming probe never advances.
    pub async fn begin_advance(&mut self) -> Option<PendingPlay> {
        if self.probe_loaded() {
            return None;
        }
        self.begin_play().await
    }

    pub async fn on_ended(&mut self) -> bool {
        let Some(pending) = self.begin_advance().await else {
            return false;
        };
        let (token, result) = pending.run().await;
        self.finish_play(token, result)
    }

    fn refresh_now_playing(&mut self) {
        let url = self.media.current_url().unwrap_or_default();
        let now_playing = self.presenter.derive(&url);
        debug!("controller: now playing '{}'", now_playing.title);
        self.now_playing = Some(now_playing.clone());
        let _ = self.broadcast_tx.send(BroadcastMessage::NowPlaying(now_playing));
    }

    // ── volume ────────────────────────────────────────────────────────────────

    pub async fn set_volume(&mut self, volume: Volume) {
        if let Err(e) = self.media.set_volume(volume).await {
            debug!("controller: set volume {} failed: {}", volume, e);
        }
    }
}
