pub mod client;

use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push delivery request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("push service returned status {0}")]
    Service(u16),
}

/// Notification content derived from one lamp event. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// On/off flips are delivered with a high-priority hint.
    pub urgent: bool,
}

/// Per-token outcome counts reported by the delivery service.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SendReceipt {
    pub success: u32,
    pub failure: u32,
}

/// Multicast delivery to the push service.
#[async_trait]
pub trait PushSender {
    /// Issue one request addressing every token with the same payload.
    async fn send_multicast(
        &self,
        tokens: &[String],
        note: &Notification,
    ) -> Result<SendReceipt, PushError>;
}
