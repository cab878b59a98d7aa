pub mod client;

use async_trait::async_trait;
use serde_json::Value;

/// Substituted when a report record arrives without usable text.
const FALLBACK_EVENT_TEXT: &str = "Lamp status changed";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("realtime store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected stream payload: {0}")]
    Protocol(String),
    #[error("watch stream cancelled by server")]
    Cancelled,
}

/// Origin of a lamp state change, as tagged by the device controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LampMode {
    Auto,
    ManualApp,
    ManualSwitch,
    Unknown,
}

impl LampMode {
    fn parse(raw: &str) -> Self {
        match raw {
            "AUTO" => LampMode::Auto,
            "MANUAL_APP" => LampMode::ManualApp,
            "MANUAL_SWITCH" => LampMode::ManualSwitch,
            _ => LampMode::Unknown,
        }
    }
}

/// Canonical decode of the value at the watched path.
#[derive(Debug, Clone, PartialEq)]
pub enum LampEvent {
    /// Structured record written by the controller: `{"text": ..., "mode": ...}`.
    Report { text: String, mode: LampMode },
    /// Bare string message.
    Message(String),
    /// Bare on/off flag.
    Status(bool),
}

impl LampEvent {
    /// Decode a raw store value. Null means the path was deleted; shapes the
    /// controller never writes (arrays, nested objects in odd places) decode
    /// to None and are dropped upstream.
    pub fn decode(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(LampEvent::Status(*b)),
            Value::String(s) => Some(LampEvent::Message(s.clone())),
            Value::Number(n) => Some(LampEvent::Message(n.to_string())),
            Value::Object(map) => {
                let text = map
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .unwrap_or(FALLBACK_EVENT_TEXT)
                    .to_string();
                let mode = map
                    .get("mode")
                    .and_then(Value::as_str)
                    .map(LampMode::parse)
                    .unwrap_or(LampMode::Unknown);
                Some(LampEvent::Report { text, mode })
            }
            Value::Array(_) => None,
        }
    }

    /// An empty message carries nothing worth announcing.
    pub fn is_empty(&self) -> bool {
        matches!(self, LampEvent::Message(s) if s.is_empty())
    }
}

/// One observed write to the watched path, with the value it replaced.
#[derive(Debug, Clone)]
pub struct LampChange {
    pub before: Option<LampEvent>,
    pub after: Option<LampEvent>,
}

/// Read access to the device token registry.
#[async_trait]
pub trait TokenSource {
    /// Current key set of the registry. An absent registry is an empty set,
    /// not an error.
    async fn device_tokens(&self) -> Result<Vec<String>, StoreError>;
}
