use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use enclave_proto::config::Config;
use enclave_proto::platform;
use enclave_proto::protocol::Volume;
use enclave_proto::state::StateManager;
use enclave_radio::controller::PlaybackController;
use enclave_radio::core::{RadioCore, RadioEvent};
use enclave_radio::http;
use enclave_radio::loader::Loader;
use enclave_radio::media::MediaEvent;
use enclave_radio::mpv::MpvMedia;
use enclave_radio::now_playing::{CellMeasure, NowPlayingPresenter};
use enclave_radio::tuning::{Silent, StaticBurst, TuningEffect};
use enclave_radio::BroadcastMessage;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "enclave-radio", version, about = "Gesture-gated channel radio with a local HTTP API")]
struct Args {
    /// Config file (default: <config_dir>/enclave-radio/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Channel document: URL or local JSON file
    #[arg(long)]
    channels: Option<String>,

    /// Library index document: URL or local JSON file
    #[arg(long)]
    library: Option<String>,

    /// Origin or directory that root-relative track URLs resolve against
    #[arg(long)]
    media_root: Option<String>,

    /// HTTP API port
    #[arg(long)]
    port: Option<u16>,

    /// Skip the static burst on channel change
    #[arg(long)]
    no_tuning: bool,

    /// Prefer mpv from PATH over a bundled copy
    #[arg(long)]
    use_system_deps: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(channels) = &self.channels {
            config.sources.channels = channels.clone();
        }
        if let Some(library) = &self.library {
            config.sources.library = library.clone();
        }
        if let Some(root) = &self.media_root {
            config.playback.media_root = root.clone();
        }
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if self.no_tuning {
            config.playback.tuning_effect = false;
        }
    }
}

fn init_logging() -> anyhow::Result<PathBuf> {
    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("enclave-radio.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,enclave_radio=debug")),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    platform::set_use_system_deps(args.use_system_deps);

    let log_path = init_logging()?;
    info!("Log file: {:?}", log_path);

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    args.apply(&mut config);
    info!("Config: {:?}", config);

    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);
    let (event_tx, event_rx) = mpsc::channel::<RadioEvent>(256);

    let state_manager = Arc::new(StateManager::new(
        config.daemon.state_file.clone(),
        Volume::from_percent(config.playback.default_volume.into()),
    ));

    // Media backend; its notifications are funnelled into the core loop.
    let (media_tx, mut media_rx) = mpsc::channel::<MediaEvent>(32);
    let initial_volume = state_manager.volume().await;
    let media = Arc::new(MpvMedia::start(&config.playback, initial_volume, media_tx).await?);
    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(ev) = media_rx.recv().await {
            if forward_tx.send(RadioEvent::Media(ev)).await.is_err() {
                break;
            }
        }
    });

    let effect: Arc<dyn TuningEffect> = if config.playback.tuning_effect {
        Arc::new(StaticBurst::new(config.playback.burst_ms))
    } else {
        Arc::new(Silent)
    };

    let controller = PlaybackController::new(media.clone(), effect, broadcast_tx.clone())
        .with_presenter(NowPlayingPresenter::new(Box::new(CellMeasure::from(&config.ticker))))
        .with_tune_delay(Duration::from_millis(config.playback.tune_delay_ms));

    let mut core = RadioCore::new(
        controller,
        Loader::new(),
        config.sources.clone(),
        Arc::clone(&state_manager),
        broadcast_tx.clone(),
        event_tx.clone(),
    );
    core.init().await;

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            Arc::clone(&state_manager),
            event_tx.clone(),
            broadcast_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("ctrl-c handler failed: {}", e);
            return;
        }
        let _ = shutdown_tx.send(RadioEvent::Shutdown).await;
    });
    drop(event_tx);

    info!("Radio initialised, running event loop");
    let result = core.run(event_rx).await;
    media.shutdown().await;
    result
}
