//! Targets reachable over HTTP
//!
//! The registry is a TOML file listing targets. It is read again on every
//! discovery so edits take effect on the next event:
//!
//! ```toml
//! [[targets]]
//! id = "dashboard"
//! url = "http://127.0.0.1:9000/deliver"
//! ```

use super::{
    DeliverRequest, DeliveryAck, DeliveryError, DeliveryFuture, DeliveryTarget, DiscoverFuture,
    TargetId, TargetRegistry,
};
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct TargetsFile {
    #[serde(default)]
    targets: Vec<TargetEntry>,
}

#[derive(Debug, Deserialize)]
struct TargetEntry {
    id: String,
    url: String,
}

pub struct HttpTarget {
    id: TargetId,
    url: String,
    client: reqwest::Client,
}

impl HttpTarget {
    pub fn new(id: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        HttpTarget {
            id: TargetId::new(id),
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl DeliveryTarget for HttpTarget {
    fn id(&self) -> &TargetId {
        &self.id
    }

    fn deliver(&self, request: DeliverRequest) -> DeliveryFuture {
        let pending = self.client.post(&self.url).json(&request);
        Box::pin(async move {
            let response = pending.send().await.map_err(|e| {
                if e.is_connect() {
                    DeliveryError::TargetGone
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

            match response.status() {
                StatusCode::NOT_FOUND | StatusCode::GONE => Err(DeliveryError::TargetGone),
                status if status.is_success() => response
                    .json::<DeliveryAck>()
                    .await
                    .map_err(|e| DeliveryError::Transport(e.to_string())),
                status => Err(DeliveryError::Transport(format!("HTTP {}", status.as_u16()))),
            }
        })
    }
}

pub struct HttpTargetRegistry {
    path: PathBuf,
    client: reqwest::Client,
}

impl HttpTargetRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        HttpTargetRegistry {
            path: path.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl TargetRegistry for HttpTargetRegistry {
    fn discover(&self) -> DiscoverFuture {
        let path = self.path.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(DeliveryError::Registry(format!("{}: {}", path.display(), e)))
                }
            };
            let file: TargetsFile = toml::from_str(&contents)
                .map_err(|e| DeliveryError::Registry(format!("{}: {}", path.display(), e)))?;

            Ok(file
                .targets
                .into_iter()
                .map(|entry| {
                    Arc::new(HttpTarget::new(entry.id, entry.url, client.clone()))
                        as Arc<dyn DeliveryTarget>
                })
                .collect())
        })
    }
}
