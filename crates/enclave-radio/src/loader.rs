//! Fetches the channel list and the folder library index.
//!
//! A source is either an http(s) URL, fetched with caching disabled, or a
//! path to a local JSON file.

use std::path::PathBuf;
use std::time::Duration;

use enclave_proto::protocol::{Channel, ChannelConfig, LibraryIndex};
use reqwest::header::CACHE_CONTROL;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{url} -> {status}")]
    Status { url: String, status: StatusCode },
    #[error("{url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{origin} is not valid JSON: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

#[derive(Clone)]
pub struct Loader {
    client: reqwest::Client,
}

impl Loader {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("enclave-radio/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    async fn read_bytes(&self, source: &str) -> Result<Vec<u8>, LoadError> {
        if !is_remote(source) {
            let path = PathBuf::from(source);
            return tokio::fs::read(&path)
                .await
                .map_err(|source| LoadError::Io { path, source });
        }

        let request_err = |e: reqwest::Error| LoadError::Request {
            url: source.to_string(),
            source: e,
        };
        let resp = self
            .client
            .get(source)
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(request_err)?;
        if !resp.status().is_success() {
            return Err(LoadError::Status {
                url: source.to_string(),
                status: resp.status(),
            });
        }
        let body = resp.bytes().await.map_err(request_err)?;
        Ok(body.to_vec())
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, source: &str) -> Result<T, LoadError> {
        let bytes = self.read_bytes(source).await?;
        debug!("loader: {} bytes from {}", bytes.len(), source);
        serde_json::from_slice(&bytes).map_err(|e| LoadError::Parse {
            origin: source.to_string(),
            source: e,
        })
    }

    /// The `channels` array; a document without one yields an empty list.
    pub async fn load_channels(&self, source: &str) -> Result<Vec<Channel>, LoadError> {
        let cfg: ChannelConfig = self.fetch_json(source).await?;
        info!("loader: {} channels from {}", cfg.channels.len(), source);
        Ok(cfg.channels)
    }

    pub async fn load_library(&self, source: &str) -> Result<LibraryIndex, LoadError> {
        let library: LibraryIndex = self.fetch_json(source).await?;
        info!("loader: {} library folders from {}", library.len(), source);
        Ok(library)
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}
