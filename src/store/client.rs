use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;

use super::{LampChange, LampEvent, StoreError, TokenSource};

/// HTTP client for the realtime store. Holds the streaming watch on the
/// event path and serves token registry reads.
#[derive(Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    config: StoreConfig,
}

impl StoreClient {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: config.clone(),
        }
    }

    fn event_url(&self) -> String {
        format!("{}/{}.json", self.config.base_url, self.config.event_path)
    }

    fn tokens_url(&self) -> String {
        format!("{}/{}.json", self.config.base_url, self.config.tokens_path)
    }

    /// Main watch loop. Opens the event stream, forwards changes, reconnects
    /// with backoff on failure.
    pub async fn run(&self, tx: mpsc::Sender<LampChange>) {
        let mut backoff = Duration::from_secs(5);
        let max_backoff = Duration::from_secs(60);

        loop {
            info!("Opening watch stream on {}", self.event_url());

            match self.stream_changes(&tx).await {
                Ok(()) => {
                    if tx.is_closed() {
                        return;
                    }
                    info!("Watch stream ended, reopening");
                    backoff = Duration::from_secs(5);
                }
                Err(e) => {
                    error!("Watch stream error: {}. Reconnecting in {:?}", e, backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }
    }

    async fn stream_changes(&self, tx: &mpsc::Sender<LampChange>) -> Result<(), StoreError> {
        let response = self
            .http
            .get(self.event_url())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        let mut body = response.bytes_stream();
        let mut buf = String::new();
        let mut state = WatchState::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            buf.push_str(&String::from_utf8_lossy(&chunk));

            // Frames are separated by a blank line.
            while let Some(pos) = buf.find("\n\n") {
                let frame: String = buf.drain(..pos + 2).collect();
                if let Some(change) = state.observe(&frame)? {
                    if tx.send(change).await.is_err() {
                        warn!("Change channel closed");
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl TokenSource for StoreClient {
    async fn device_tokens(&self) -> Result<Vec<String>, StoreError> {
        let value: Value = self
            .http
            .get(self.tokens_url())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match value {
            Value::Null => Ok(Vec::new()),
            Value::Object(map) => Ok(map.keys().cloned().collect()),
            other => Err(StoreError::Protocol(format!(
                "token registry is not a map: {other}"
            ))),
        }
    }
}

/// Tracks the value at the watched path across stream frames so every
/// forwarded change carries the value it replaced. The snapshot the server
/// sends on connect only primes the cache.
struct WatchState {
    cached: Value,
    primed: bool,
    last: Option<LampEvent>,
}

/// `put`/`patch` frame body: an update located relative to the watched path.
#[derive(Deserialize)]
struct UpdateEnvelope {
    path: String,
    data: Value,
}

struct StreamFrame {
    name: String,
    data: String,
}

impl WatchState {
    fn new() -> Self {
        Self {
            cached: Value::Null,
            primed: false,
            last: None,
        }
    }

    /// Digest one stream frame, returning a change to forward if the frame
    /// produced one.
    fn observe(&mut self, raw: &str) -> Result<Option<LampChange>, StoreError> {
        let Some(frame) = parse_frame(raw) else {
            return Ok(None);
        };

        match frame.name.as_str() {
            "keep-alive" => Ok(None),
            "cancel" => Err(StoreError::Cancelled),
            "auth_revoked" => Err(StoreError::Protocol(
                "server revoked stream credentials".into(),
            )),
            "put" | "patch" => {
                let envelope: UpdateEnvelope = serde_json::from_str(&frame.data)
                    .map_err(|e| StoreError::Protocol(format!("bad {} frame: {e}", frame.name)))?;

                if frame.name == "put" {
                    apply_put(&mut self.cached, &envelope.path, envelope.data);
                } else {
                    apply_patch(&mut self.cached, &envelope.path, envelope.data)?;
                }

                let decoded = LampEvent::decode(&self.cached);
                if !self.primed {
                    self.primed = true;
                    self.last = decoded;
                    return Ok(None);
                }

                let before = self.last.take();
                match decoded {
                    None => {
                        if self.cached.is_null() {
                            debug!("Watched path deleted, nothing to forward");
                        } else {
                            warn!("Undecodable value at watched path, ignoring");
                        }
                        Ok(None)
                    }
                    Some(after) => {
                        self.last = Some(after.clone());
                        Ok(Some(LampChange {
                            before,
                            after: Some(after),
                        }))
                    }
                }
            }
            other => {
                debug!("Ignoring stream frame: {}", other);
                Ok(None)
            }
        }
    }
}

fn parse_frame(raw: &str) -> Option<StreamFrame> {
    let mut name = None;
    let mut data = String::new();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("event:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    name.map(|name| StreamFrame { name, data })
}

/// Write `data` at `path` inside the cached value. The controller rewrites
/// the whole record in one go, so nested paths only show up for partial
/// writes; intermediate nodes are forced to maps as the store itself would.
fn apply_put(root: &mut Value, path: &str, data: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((leaf, parents)) = segments.split_last() else {
        *root = data;
        return;
    };

    let mut node = root;
    for seg in parents {
        node = ensure_map(node).entry(seg.to_string()).or_insert(Value::Null);
    }

    let map = ensure_map(node);
    if data.is_null() {
        map.remove(*leaf);
    } else {
        map.insert(leaf.to_string(), data);
    }
}

fn apply_patch(root: &mut Value, path: &str, data: Value) -> Result<(), StoreError> {
    let Value::Object(fields) = data else {
        return Err(StoreError::Protocol("patch frame data is not a map".into()));
    };
    for (key, value) in fields {
        let field_path = format!("{}/{}", path.trim_end_matches('/'), key);
        apply_put(root, &field_path, value);
    }
    Ok(())
}

fn ensure_map(node: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !matches!(node, Value::Object(_)) {
        *node = Value::Object(serde_json::Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with a map"),
    }
}
