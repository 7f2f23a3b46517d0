//! mpv as the media primitive.
//!
//! ```text
//!   MpvProcess::spawn()  ── child mpv --idle --ipc ──┐
//!                                                    │ socket / named pipe
//!   MpvHandle::request() ─► writer ──────────────────┤
//!                 oneshot ◄── reader ◄───────────────┘
//!                               └─ unsolicited lines ─► MpvEvent ─► translate()
//!                                                                    ├─ watch<Signal>  (play() waits here)
//!                                                                    └─ MediaEvent     (event loop)
//! ```
//!
//! `MpvMedia` maps the `MediaPlayer` contract onto IPC commands: `load`
//! replaces the file paused, `play` unpauses and waits until mpv reports
//! audio flowing (`core-idle` false), a load error, or the play timeout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use enclave_proto::config::PlaybackConfig;
use enclave_proto::platform;
use enclave_proto::protocol::Volume;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::media::{MediaEvent, MediaPlayer, PlaybackError};

/// Silent one-tenth of a second, used to unlock playback.
pub const PROBE_SOURCE: &str = "av://lavfi:anullsrc=d=0.1";

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// observe_property id for `core-idle`.
pub const OBS_CORE_IDLE: u64 = 1;

type Replies = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct Outgoing {
    id: u64,
    line: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// A line from mpv that was not a reply.
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    pub fn property(&self, obs_id: u64) -> Option<&Value> {
        if self.name()? != "property-change" || self.raw.get("id")?.as_u64()? != obs_id {
            return None;
        }
        Some(self.raw.get("data").unwrap_or(&Value::Null))
    }

    /// `reason` of an `end-file` event ("eof", "error", "stop", ...).
    pub fn end_reason(&self) -> Option<&str> {
        if self.name()? != "end-file" {
            return None;
        }
        self.raw.get("reason")?.as_str()
    }

    pub fn file_error(&self) -> Option<&str> {
        self.raw.get("file_error")?.as_str()
    }
}

// ── IPC handle ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<Outgoing>,
}

impl MpvHandle {
    /// Send one command array and wait for its reply.
    pub async fn request(&self, command: Value) -> anyhow::Result<Value> {
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": id }))?;
        line.push('\n');

        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(Outgoing { id, line, reply })
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC writer stopped"))?;

        tokio::time::timeout(REPLY_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv did not answer request {}", id))?
            .map_err(|_| anyhow::anyhow!("mpv dropped request {}", id))?
    }

    pub async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.request(json!(["set_property", name, value])).await?;
        Ok(())
    }

    pub async fn get_property(&self, name: &str) -> anyhow::Result<Value> {
        let reply = self.request(json!(["get_property", name])).await?;
        Ok(reply.get("data").cloned().unwrap_or(Value::Null))
    }

    pub async fn observe(&self, obs_id: u64, name: &str) -> anyhow::Result<()> {
        self.request(json!(["observe_property", obs_id, name])).await?;
        debug!("mpv: observing {} as {}", name, obs_id);
        Ok(())
    }
}

/// Split `stream` into reader/writer tasks and hand back a request handle.
pub fn start_io<S>(stream: S, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let replies: Replies = Arc::new(Mutex::new(HashMap::new()));
    let (tx, rx) = mpsc::channel::<Outgoing>(64);

    tokio::spawn(write_loop(write_half, rx, Arc::clone(&replies)));
    tokio::spawn(read_loop(BufReader::new(read_half), replies, event_tx));

    MpvHandle { tx }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Outgoing>, replies: Replies)
where
    W: AsyncWrite + Unpin,
{
    while let Some(out) = rx.recv().await {
        // Register before writing; the reply can beat write_all back.
        replies.lock().await.insert(out.id, out.reply);
        if let Err(e) = writer.write_all(out.line.as_bytes()).await {
            warn!("mpv: IPC write failed: {}", e);
            if let Some(reply) = replies.lock().await.remove(&out.id) {
                let _ = reply.send(Err(anyhow::anyhow!("mpv IPC write failed: {}", e)));
            }
            break;
        }
    }
    debug!("mpv: writer finished");
}

async fn read_loop<R>(mut reader: BufReader<R>, replies: Replies, event_tx: mpsc::Sender<MpvEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    let reason = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break "connection closed".to_string(),
            Ok(_) => {}
            Err(e) => break format!("read failed: {}", e),
        }
        let Ok(value) = serde_json::from_str::<Value>(line.trim()) else {
            if !line.trim().is_empty() {
                debug!("mpv: skipping non-JSON line {:?}", line.trim());
            }
            continue;
        };

        match value.get("request_id").and_then(Value::as_u64) {
            Some(id) => {
                let Some(reply) = replies.lock().await.remove(&id) else {
                    debug!("mpv: reply for unknown request {}", id);
                    continue;
                };
                let outcome = match value.get("error").and_then(Value::as_str) {
                    Some("success") => Ok(value),
                    other => Err(anyhow::anyhow!(
                        "mpv: {}",
                        other.unwrap_or("unknown error")
                    )),
                };
                let _ = reply.send(outcome);
            }
            None => {
                if event_tx.send(MpvEvent { raw: value }).await.is_err() {
                    break "event receiver dropped".to_string();
                }
            }
        }
    };

    debug!("mpv: reader finished ({})", reason);
    for (_, reply) in replies.lock().await.drain() {
        let _ = reply.send(Err(anyhow::anyhow!("mpv IPC {}", reason)));
    }
}

// ── process ───────────────────────────────────────────────────────────────────

/// The mpv child process.  Dropping it kills mpv.
pub struct MpvProcess {
    socket_name: String,
    child: Option<tokio::process::Child>,
}

impl MpvProcess {
    pub fn new() -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            child: None,
        }
    }

    pub async fn spawn(
        &mut self,
        volume: Volume,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;

        let binary = platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found (set MPV_PATH or install mpv)"))?;
        info!("mpv: starting {}", binary.display());

        let child = tokio::process::Command::new(binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--no-terminal")
            .arg(platform::mpv_socket_arg())
            .arg(format!("--volume={}", volume.percent()))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.child = Some(child);

        let handle = connect_ipc(&self.socket_name, event_tx).await?;
        info!("mpv: IPC connected");
        Ok(handle)
    }

    pub async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
            debug!("mpv: process stopped");
        }
    }
}

impl Default for MpvProcess {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn connect_ipc(socket_name: &str, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvHandle> {
    let path = Path::new(socket_name);
    let mut last_err = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !path.exists() {
            continue;
        }
        match tokio::net::UnixStream::connect(path).await {
            Ok(stream) => return Ok(start_io(stream, event_tx)),
            Err(e) => last_err = Some(e),
        }
    }
    match last_err {
        Some(e) => Err(anyhow::anyhow!("mpv IPC socket refused connection: {}", e)),
        None => Err(anyhow::anyhow!("mpv IPC socket did not appear")),
    }
}

#[cfg(windows)]
async fn connect_ipc(socket_name: &str, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvHandle> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let pipe = format!(r"\\.\pipe\{}", socket_name);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(client) = ClientOptions::new().open(&pipe) {
            return Ok(start_io(client, event_tx));
        }
    }
    anyhow::bail!("mpv named pipe did not appear")
}

// ── MediaPlayer ───────────────────────────────────────────────────────────────

/// What `play()` waits on.  Reset by every `load`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signal {
    pub core_idle: Option<bool>,
    pub failure: Option<String>,
}

/// Map root-relative URLs onto `media_root`: an http(s) origin is prefixed,
/// anything else is treated as a local directory.
pub fn locate(media_root: &str, url: &str) -> String {
    if url.contains("://") || media_root.is_empty() {
        return url.to_string();
    }
    let root = media_root.trim_end_matches('/');
    if root.starts_with("http://") || root.starts_with("https://") {
        if url.starts_with('/') {
            format!("{}{}", root, url)
        } else {
            format!("{}/{}", root, url)
        }
    } else {
        let decoded = urlencoding::decode(url)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| url.to_string());
        PathBuf::from(media_root)
            .join(decoded.trim_start_matches('/'))
            .to_string_lossy()
            .into_owned()
    }
}

/// Fold one mpv event into the play signal and the outgoing media events.
pub fn translate(event: &MpvEvent, signal: &mut Signal) -> Option<MediaEvent> {
    if let Some(data) = event.property(OBS_CORE_IDLE) {
        let idle = data.as_bool();
        let was = signal.core_idle;
        signal.core_idle = idle;
        return (idle == Some(false) && was != Some(false)).then_some(MediaEvent::Started);
    }
    match event.name()? {
        "start-file" => {
            signal.failure = None;
            None
        }
        "end-file" => match event.end_reason()? {
            "eof" => Some(MediaEvent::Ended),
            "error" => {
                signal.failure = Some(event.file_error().unwrap_or("load error").to_string());
                None
            }
            _ => None,
        },
        _ => None,
    }
}

pub struct MpvMedia {
    handle: MpvHandle,
    process: Mutex<MpvProcess>,
    media_root: String,
    play_timeout: Duration,
    current: std::sync::Mutex<Option<String>>,
    signal: watch::Sender<Signal>,
}

impl MpvMedia {
    /// Start mpv and the event translator.  `media_tx` receives
    /// Started/Ended notifications.
    pub async fn start(
        cfg: &PlaybackConfig,
        volume: Volume,
        media_tx: mpsc::Sender<MediaEvent>,
    ) -> anyhow::Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(64);
        let mut process = MpvProcess::new();
        let handle = process.spawn(volume, event_tx).await?;
        handle.observe(OBS_CORE_IDLE, "core-idle").await?;

        let (signal, _) = watch::channel(Signal::default());
        tokio::spawn(translate_loop(event_rx, signal.clone(), media_tx));

        Ok(Self {
            handle,
            process: Mutex::new(process),
            media_root: cfg.media_root.clone(),
            play_timeout: Duration::from_secs(cfg.play_timeout_secs.max(1)),
            current: std::sync::Mutex::new(None),
            signal,
        })
    }

    pub async fn shutdown(&self) {
        let _ = self.handle.request(json!(["quit"])).await;
        self.process.lock().await.kill().await;
    }

    fn remember(&self, url: &str) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = Some(url.to_string());
    }
}

async fn translate_loop(
    mut event_rx: mpsc::Receiver<MpvEvent>,
    signal: watch::Sender<Signal>,
    media_tx: mpsc::Sender<MediaEvent>,
) {
    while let Some(event) = event_rx.recv().await {
        let mut emitted = None;
        signal.send_modify(|s| emitted = translate(&event, s));
        if let Some(media_event) = emitted {
            debug!("mpv: {:?}", media_event);
            if media_tx.send(media_event).await.is_err() {
                break;
            }
        }
    }
    debug!("mpv: event translator finished");
}

#[async_trait]
impl MediaPlayer for MpvMedia {
    async fn load(&self, url: &str) -> anyhow::Result<()> {
        let target = locate(&self.media_root, url);
        debug!("mpv: load {}", target);
        self.signal.send_replace(Signal::default());
        self.remember(url);
        self.handle.set_property("pause", json!(true)).await?;
        self.handle.request(json!(["loadfile", target, "replace"])).await?;
        Ok(())
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        let url = self
            .current_url()
            .ok_or_else(|| PlaybackError::NotSupported("no source assigned".to_string()))?;
        let mut rx = self.signal.subscribe();
        self.handle.set_property("pause", json!(false)).await?;

        let started = async {
            loop {
                {
                    let signal = rx.borrow_and_update();
                    if let Some(reason) = &signal.failure {
                        return Err(PlaybackError::NotSupported(format!("{}: {}", url, reason)));
                    }
                    if signal.core_idle == Some(false) {
                        return Ok(());
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(PlaybackError::Aborted("mpv event stream closed".to_string()));
                }
            }
        };
        match tokio::time::timeout(self.play_timeout, started).await {
            Ok(result) => result,
            Err(_) => Err(PlaybackError::Aborted(format!(
                "no audio from {} after {}s",
                url,
                self.play_timeout.as_secs()
            ))),
        }
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.handle.set_property("pause", json!(true)).await
    }

    async fn seek_to_start(&self) -> anyhow::Result<()> {
        self.handle.request(json!(["seek", 0, "absolute"])).await?;
        Ok(())
    }

    async fn set_volume(&self, volume: Volume) -> anyhow::Result<()> {
        self.handle.set_property("volume", json!(volume.percent())).await
    }

    async fn volume(&self) -> anyhow::Result<Volume> {
        let value = self.handle.get_property("volume").await?;
        let pct = value
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("mpv volume is not a number: {}", value))?;
        Ok(Volume::from_percent(pct.round() as i64))
    }

    async fn set_muted(&self, muted: bool) -> anyhow::Result<()> {
        self.handle.set_property("mute", json!(muted)).await
    }

    fn current_url(&self) -> Option<String> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn probe_source(&self) -> &str {
        PROBE_SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_locate_http_root() {
        assert_eq!(
            locate("http://127.0.0.1:8080/", "/audio/chill/one.mp3"),
            "http://127.0.0.1:8080/audio/chill/one.mp3"
        );
        assert_eq!(
            locate("http://host", "https://other/live"),
            "https://other/live"
        );
    }

    #[test]
    fn test_locate_local_root_decodes() {
        let path = locate("/srv/site", "/audio/mixes/DJ%20Mix.mp3");
        assert_eq!(PathBuf::from(path), PathBuf::from("/srv/site/audio/mixes/DJ Mix.mp3"));
    }

    #[test]
    fn test_translate_core_idle_edges() {
        let mut signal = Signal::default();
        let idle = event(json!({"event":"property-change","id":OBS_CORE_IDLE,"data":true}));
        let busy = event(json!({"event":"property-change","id":OBS_CORE_IDLE,"data":false}));

        assert_eq!(translate(&idle, &mut signal), None);
        assert_eq!(translate(&busy, &mut signal), Some(MediaEvent::Started));
        // Repeated false is not a new start.
        assert_eq!(translate(&busy, &mut signal), None);
        assert_eq!(signal.core_idle, Some(false));
    }

    #[test]
    fn test_translate_end_file() {
        let mut signal = Signal::default();
        let eof = event(json!({"event":"end-file","reason":"eof"}));
        assert_eq!(translate(&eof, &mut signal), Some(MediaEvent::Ended));

        let err = event(json!({"event":"end-file","reason":"error","file_error":"unrecognized file format"}));
        assert_eq!(translate(&err, &mut signal), None);
        assert_eq!(signal.failure.as_deref(), Some("unrecognized file format"));

        let start = event(json!({"event":"start-file"}));
        translate(&start, &mut signal);
        assert_eq!(signal.failure, None);
    }

    #[tokio::test]
    async fn test_request_reply_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handle = start_io(client, event_tx);

        // Fake mpv: answer each request with its id, then push one event.
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["request_id"].as_u64().unwrap();
                let reply = json!({"request_id": id, "error": "success", "data": 42.0});
                let event = json!({"event": "start-file"});
                write_half
                    .write_all(format!("{}\n{}\n", reply, event).as_bytes())
                    .await
                    .unwrap();
            }
        });

        let data = handle.get_property("volume").await.unwrap();
        assert_eq!(data, json!(42.0));
        let ev = event_rx.recv().await.unwrap();
        assert_eq!(ev.name(), Some("start-file"));
    }

    #[tokio::test]
    async fn test_error_reply_is_err() {
        let (client, server) = tokio::io::duplex(4096);
        let (event_tx, _event_rx) = mpsc::channel(8);
        let handle = start_io(client, event_tx);

        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let reply = json!({"request_id": req["request_id"], "error": "property unavailable"});
                write_half.write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
            }
        });

        let err = handle.get_property("nope").await.unwrap_err();
        assert!(err.to_string().contains("property unavailable"));
    }
}
