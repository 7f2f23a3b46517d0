use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use enclave_proto::protocol::{Command, RadioSnapshot, Volume};
use enclave_proto::state::StateManager;
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::core::RadioEvent;
use crate::BroadcastMessage;

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<RadioEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

pub fn router(
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<RadioEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> Router {
    let app_state = HttpState {
        state_manager,
        event_tx,
        broadcast_tx,
    };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/connect", post(connect))
        .route("/api/play", post(play))
        .route("/api/stop", post(stop))
        .route("/api/channel/:id", post(select_channel))
        .route("/api/volume/:pct", post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/library/refresh", post(refresh_library))
        .route("/api/events", get(events))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<RadioEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx, broadcast_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn forward(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(RadioEvent::ClientCommand(cmd)).await.is_err() {
        error!("HTTP API: radio core is gone");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<HttpState>) -> Json<RadioSnapshot> {
    Json(state.state_manager.get_state().await)
}

async fn connect(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::Connect).await
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::Play).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::Stop).await
}

async fn select_channel(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    forward(&state, Command::SelectChannel { id }).await
}

async fn refresh_library(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::RefreshLibrary).await
}

/// Slider semantics: a leading integer is read, clamped to 0..=100, and
/// anything unparsable means 0.
async fn set_volume(State(state): State<HttpState>, Path(raw): Path<String>) -> StatusCode {
    let percent = i64::from(Volume::parse_lenient(&raw).percent());
    forward(&state, Command::Volume { percent }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let volume = state.state_manager.volume().await.percent();
    Json(VolumeStatus { volume })
}

// ── server-sent events ────────────────────────────────────────────────────────

fn to_event(msg: &BroadcastMessage, snapshot: Option<&RadioSnapshot>) -> Option<Event> {
    let event = match msg {
        BroadcastMessage::StateUpdated => Event::default().event("state").json_data(snapshot?),
        BroadcastMessage::Status(status) => Event::default().event("status").json_data(status),
        BroadcastMessage::NowPlaying(np) => Event::default().event("now_playing").json_data(np),
        BroadcastMessage::Log(line) => Event::default().event("log").json_data(line),
    };
    match event {
        Ok(ev) => Some(ev),
        Err(e) => {
            debug!("SSE: could not encode {:?}: {}", msg, e);
            None
        }
    }
}

async fn events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.broadcast_tx.subscribe();
    let state_manager = Arc::clone(&state.state_manager);

    let stream = stream::unfold((rx, state_manager), |(mut rx, state_manager)| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    let snapshot = match msg {
                        BroadcastMessage::StateUpdated => Some(state_manager.get_state().await),
                        _ => None,
                    };
                    if let Some(ev) = to_event(&msg, snapshot.as_ref()) {
                        return Some((Ok(ev), (rx, state_manager)));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("SSE: subscriber skipped {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
