pub mod catalog;
pub mod controller;
pub mod core;
pub mod http;
pub mod loader;
pub mod media;
pub mod mpv;
pub mod now_playing;
pub mod resolver;
pub mod tuning;

use enclave_proto::protocol::{LogLine, NowPlaying, Status};

/// Fan-out from the core to API subscribers.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The shared snapshot changed; read it from the `StateManager`.
    StateUpdated,
    Status(Status),
    NowPlaying(NowPlaying),
    Log(LogLine),
}
