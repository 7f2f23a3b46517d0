//! RadioCore: single-owner event loop around the playback controller.
//!
//! HTTP handlers, the media backend and the helper tasks spawned here all
//! talk to the core through `RadioEvent` messages.  Only the core touches the
//! `PlaybackController`; anything slow (the tuning delay, waiting for a
//! `play()` to settle) runs in a task that reports back with the intent token
//! it was started under, and the controller discards reports that have been
//! overtaken.
//!
//! After every event the controller's view is copied into the
//! `StateManager` snapshot and `BroadcastMessage::StateUpdated` goes out.
use std::sync::Arc;

use enclave_proto::config::SourcesConfig;
use enclave_proto::protocol::{Command, Volume};
use enclave_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::controller::{PendingPlay, PendingTune, PlaybackController};
use crate::loader::{LoadError, Loader};
use crate::media::{MediaEvent, PlaybackError};
use crate::BroadcastMessage;

// ── RadioEvent ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum RadioEvent {
    /// A command from the HTTP API.
    ClientCommand(Command),
    /// Notification from the media backend.
    Media(MediaEvent),
    /// A tuning delay elapsed.
    TuneFinished { token: u64 },
    /// A `play()` settled.
    PlayFinished {
        token: u64,
        result: Result<(), PlaybackError>,
    },
    Shutdown,
}

// ── RadioCore ─────────────────────────────────────────────────────────────────

pub struct RadioCore {
    controller: PlaybackController,
    loader: Loader,
    sources: SourcesConfig,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// Loop-back sender for the tasks the core spawns.
    event_tx: mpsc::Sender<RadioEvent>,
}

impl RadioCore {
    pub fn new(
        controller: PlaybackController,
        loader: Loader,
        sources: SourcesConfig,
        state_manager: Arc<StateManager>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<RadioEvent>,
    ) -> Self {
        Self {
            controller,
            loader,
            sources,
            state_manager,
            broadcast_tx,
            event_tx,
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    /// Apply the stored volume and load channels then library.  A load
    /// failure is reported and leaves the radio running without content.
    pub async fn init(&mut self) {
        let volume = self.state_manager.volume().await;
        self.controller.set_volume(volume).await;

        if let Err(e) = self.load_sources().await {
            error!("Init failed: {}", e);
            self.controller.log(format!("[ERROR] Init failed: {}", e));
            let message = e.to_string();
            self.state_manager
                .update(|s| s.init_error = Some(message))
                .await;
        }
        self.publish().await;
    }

    async fn load_sources(&mut self) -> Result<(), LoadError> {
        let channels = self.loader.load_channels(&self.sources.channels).await?;
        self.controller.load_channels(channels);
        let library = self.loader.load_library(&self.sources.library).await?;
        self.controller.set_library(library);
        Ok(())
    }

    /// Run until `Shutdown` arrives or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<RadioEvent>) -> anyhow::Result<()> {
        info!("RadioCore: starting event loop");

        while let Some(event) = event_rx.recv().await {
            match event {
                RadioEvent::Shutdown => {
                    info!("RadioCore: shutdown requested");
                    break;
                }
                RadioEvent::ClientCommand(cmd) => {
                    info!("RadioCore: command {:?}", cmd);
                    if let Err(e) = self.handle_command(cmd).await {
                        error!("RadioCore: command error: {}", e);
                    }
                }
                RadioEvent::Media(MediaEvent::Started) => self.controller.on_started(),
                RadioEvent::Media(MediaEvent::Ended) => {
                    info!("RadioCore: track ended, advancing");
                    let pending = self.controller.begin_advance().await;
                    self.spawn_play(pending);
                }
                RadioEvent::TuneFinished { token } => {
                    if self.controller.tune_is_current(token) {
                        let pending = self.controller.begin_play().await;
                        self.spawn_play(pending);
                    } else {
                        debug!("RadioCore: tune {} superseded", token);
                    }
                }
                RadioEvent::PlayFinished { token, result } => {
                    self.controller.finish_play(token, result);
                }
            }
            self.publish().await;
        }

        info!("RadioCore: event loop finished");
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Connect => {
                self.state_manager.set_connected().await;
                let pending = self.controller.begin_connect().await;
                self.spawn_play(pending);
            }
            Command::Play => {
                let pending = self.controller.begin_play().await;
                self.spawn_play(pending);
            }
            Command::Stop => self.controller.stop().await,
            Command::SelectChannel { id } => {
                let tune = self.controller.begin_tune(&id).await;
                self.spawn_tune(tune);
            }
            Command::Volume { percent } => {
                let volume = Volume::from_percent(percent);
                self.controller.set_volume(volume).await;
                self.state_manager.set_volume(volume).await;
            }
            Command::RefreshLibrary => {
                match self.loader.load_library(&self.sources.library).await {
                    Ok(library) => self.controller.set_library(library),
                    Err(e) => {
                        warn!("RadioCore: library refresh failed: {}", e);
                        self.controller.log(format!("[ERROR] Library refresh failed: {}", e));
                    }
                }
            }
            Command::GetState => {}
        }
        Ok(())
    }

    fn spawn_play(&self, pending: Option<PendingPlay>) {
        let Some(pending) = pending else {
            return;
        };
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let (token, result) = pending.run().await;
            let _ = tx.send(RadioEvent::PlayFinished { token, result }).await;
        });
    }

    fn spawn_tune(&self, tune: Option<PendingTune>) {
        let Some(tune) = tune else {
            return;
        };
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let token = tune.run().await;
            let _ = tx.send(RadioEvent::TuneFinished { token }).await;
        });
    }

    async fn publish(&self) {
        let controller = &self.controller;
        self.state_manager
            .update(|snapshot| controller.fill_snapshot(snapshot))
            .await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }
}
