#![allow(dead_code)]

pub mod fakes;

use std::time::Duration;

use enclave_proto::protocol::{Channel, LibraryIndex};
use enclave_radio::BroadcastMessage;
use tokio::sync::broadcast;

pub fn sample_channels() -> Vec<Channel> {
    vec![
        Channel::folder("c1", "Chill", "/audio/chill"),
        Channel::direct("c2", "Live", "https://radio.example.com/live"),
        Channel::folder("c3", "Jazz", "/audio/jazz"),
    ]
}

/// `chill` has two tracks; `jazz` is absent on purpose.
pub fn sample_library() -> LibraryIndex {
    [(
        "chill".to_string(),
        vec!["one.mp3".to_string(), "two.mp3".to_string()],
    )]
    .into_iter()
    .collect()
}

/// Everything currently queued on `rx` that is a log line.
pub fn drain_logs(rx: &mut broadcast::Receiver<BroadcastMessage>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let BroadcastMessage::Log(line) = msg {
            lines.push(line.text);
        }
    }
    lines
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
