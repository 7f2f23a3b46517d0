//! Tuning effect: a short burst of band-passed static on channel change.
//!
//! Purely cosmetic.  `play` returns once the burst has been started; the
//! controller waits its own fixed delay afterwards and never fails a channel
//! change because the burst could not be made.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

pub const MIN_BURST_MS: u64 = 60;
pub const MAX_BURST_MS: u64 = 400;

#[async_trait]
pub trait TuningEffect: Send + Sync {
    async fn play(&self) -> anyhow::Result<()>;
}

/// No sound at all.
#[derive(Debug, Default, Clone)]
pub struct Silent;

#[async_trait]
impl TuningEffect for Silent {
    async fn play(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// White noise through a 1.4 kHz band-pass with short fades, rendered by a
/// throwaway mpv process from a lavfi graph.
#[derive(Debug, Clone)]
pub struct StaticBurst {
    duration_ms: u64,
}

impl StaticBurst {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms: duration_ms.clamp(MIN_BURST_MS, MAX_BURST_MS),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// The lavfi source mpv renders for this burst.
    pub fn lavfi_source(&self) -> String {
        let secs = self.duration_ms as f64 / 1000.0;
        let fade_out = (secs - 0.02).max(0.0);
        format!(
            "av://lavfi:anoisesrc=d={secs:.3}:c=white:a=0.22,\
             bandpass=f=1400:width_type=q:w=0.9,\
             afade=t=in:d=0.02,afade=t=out:st=0.02:d={fade_out:.3}"
        )
    }

    fn binary(&self) -> anyhow::Result<PathBuf> {
        enclave_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))
    }
}

#[async_trait]
impl TuningEffect for StaticBurst {
    async fn play(&self) -> anyhow::Result<()> {
        let mut child = tokio::process::Command::new(self.binary()?)
            .arg("--no-video")
            .arg("--really-quiet")
            .arg("--no-config")
            .arg(self.lavfi_source())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        // Reap in the background; the caller only needs the burst started.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("tuning burst exited: {}", status),
                Err(e) => debug!("tuning burst wait failed: {}", e),
            }
        });
        Ok(())
    }
}
