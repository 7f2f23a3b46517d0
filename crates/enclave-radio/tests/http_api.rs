//! HTTP API routed in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use enclave_proto::protocol::{Command, LogLine, Status, Volume};
use enclave_proto::state::StateManager;
use enclave_radio::core::RadioEvent;
use enclave_radio::http::router;
use enclave_radio::BroadcastMessage;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceExt;

struct Harness {
    app: axum::Router,
    event_rx: mpsc::Receiver<RadioEvent>,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let state_manager = Arc::new(StateManager::new(
        dir.path().join("state.json"),
        Volume::default(),
    ));
    let (event_tx, event_rx) = mpsc::channel(16);
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(16);
    Harness {
        app: router(Arc::clone(&state_manager), event_tx, broadcast_tx.clone()),
        event_rx,
        state_manager,
        broadcast_tx,
        _dir: dir,
    }
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn next_command(rx: &mut mpsc::Receiver<RadioEvent>) -> Command {
    match rx.try_recv() {
        Ok(RadioEvent::ClientCommand(cmd)) => cmd,
        other => panic!("expected a client command, got {other:?}"),
    }
}

#[tokio::test]
async fn state_starts_locked() {
    let h = harness();
    let resp = h.app.oneshot(get("/api/state")).await.expect("response");
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    assert_eq!(body["status"], "LOCKED");
    assert_eq!(body["machine_state"], "LOCKED");
    assert_eq!(body["volume"], 75);
    assert_eq!(body["controls_locked"], true);
    assert_eq!(body["connected"], false);
    assert!(body["init_error"].is_null());
}

#[tokio::test]
async fn commands_are_forwarded_to_the_core() {
    let mut h = harness();

    for (uri, expected) in [
        ("/api/connect", Command::Connect),
        ("/api/play", Command::Play),
        ("/api/stop", Command::Stop),
        ("/api/library/refresh", Command::RefreshLibrary),
        (
            "/api/channel/c2",
            Command::SelectChannel {
                id: "c2".to_string(),
            },
        ),
    ] {
        let resp = h.app.clone().oneshot(post(uri)).await.expect("response");
        assert_eq!(resp.status(), StatusCode::ACCEPTED, "{uri}");
        assert_eq!(next_command(&mut h.event_rx), expected, "{uri}");
    }
}

#[tokio::test]
async fn volume_path_uses_slider_parsing() {
    let mut h = harness();

    for (raw, expected) in [("37", 37), ("140", 100), ("-5", 0), ("loud", 0), ("64px", 64)] {
        let resp = h
            .app
            .clone()
            .oneshot(post(&format!("/api/volume/{raw}")))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(
            next_command(&mut h.event_rx),
            Command::Volume { percent: expected },
            "raw {raw}"
        );
    }
}

#[tokio::test]
async fn get_volume_reports_percent() {
    let h = harness();
    let resp = h.app.oneshot(get("/api/volume")).await.expect("response");
    assert_eq!(json_body(resp).await["volume"], 75);
}

#[tokio::test]
async fn closed_core_is_service_unavailable() {
    let h = harness();
    drop(h.event_rx);
    let resp = h.app.oneshot(post("/api/play")).await.expect("response");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let h = harness();
    let req = Request::builder()
        .uri("/api/state")
        .header("origin", "http://widget.example.com")
        .body(Body::empty())
        .expect("request");
    let resp = h.app.oneshot(req).await.expect("response");
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

/// Reads server-sent events until `count` have arrived; each is returned as
/// its `event:` name and parsed `data:` payload.
async fn read_events(resp: axum::response::Response, count: usize) -> Vec<(String, Value)> {
    let mut body = resp.into_body().into_data_stream();
    let mut buffer = String::new();
    let mut events = Vec::new();
    while events.len() < count {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("event in time")
            .expect("stream open")
            .expect("chunk");
        buffer.push_str(std::str::from_utf8(&chunk).expect("utf8"));
        while let Some(end) = buffer.find("\n\n") {
            let block: String = buffer.drain(..end + 2).collect();
            let mut name = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event: ") {
                    name = Some(v.to_string());
                } else if let Some(v) = line.strip_prefix("data: ") {
                    data = Some(serde_json::from_str::<Value>(v).expect("json data"));
                }
            }
            if let (Some(name), Some(data)) = (name, data) {
                events.push((name, data));
            }
        }
    }
    events
}

#[tokio::test]
async fn event_stream_forwards_broadcasts() {
    let h = harness();
    h.state_manager
        .update(|s| s.selected = Some("c2".to_string()))
        .await;

    let resp = h.app.oneshot(get("/api/events")).await.expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    h.broadcast_tx
        .send(BroadcastMessage::Status(Status::Tuning))
        .expect("subscriber");
    h.broadcast_tx
        .send(BroadcastMessage::Log(LogLine::now("> CONNECTED.")))
        .expect("subscriber");
    h.broadcast_tx
        .send(BroadcastMessage::StateUpdated)
        .expect("subscriber");

    let events = read_events(resp, 3).await;
    assert_eq!(events[0].0, "status");
    assert_eq!(events[0].1, "TUNING");
    assert_eq!(events[1].0, "log");
    assert_eq!(events[1].1["text"], "> CONNECTED.");
    assert_eq!(events[2].0, "state");
    assert_eq!(events[2].1["selected"], "c2");
    assert_eq!(events[2].1["status"], "LOCKED");
    assert_eq!(events[2].1["status_text"], "AUDIO: LOCKED");
    assert_eq!(events[2].1["volume"], 75);
}
