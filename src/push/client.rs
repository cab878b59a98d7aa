use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use tracing::debug;

use crate::config::PushConfig;

use super::{Notification, PushError, PushSender, SendReceipt};

/// HTTP client for the push delivery gateway.
#[derive(Clone)]
pub struct PushClient {
    http: reqwest::Client,
    config: PushConfig,
}

#[derive(Serialize)]
struct MulticastRequest<'a> {
    registration_ids: &'a [String],
    notification: NotificationBody<'a>,
    android: AndroidOptions<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    apns: Option<ApnsOptions>,
}

#[derive(Serialize)]
struct NotificationBody<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct AndroidOptions<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<&'static str>,
    notification: AndroidNotification<'a>,
}

// The gateway expects camelCase delivery-option keys.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AndroidNotification<'a> {
    sound: &'static str,
    channel_id: &'a str,
    click_action: &'a str,
}

#[derive(Serialize)]
struct ApnsOptions {
    payload: ApnsPayload,
}

#[derive(Serialize)]
struct ApnsPayload {
    aps: Aps,
}

#[derive(Serialize)]
struct Aps {
    sound: &'static str,
}

impl PushClient {
    pub fn new(config: &PushConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: config.clone(),
        }
    }

    fn build_request<'a>(
        &'a self,
        tokens: &'a [String],
        note: &'a Notification,
    ) -> MulticastRequest<'a> {
        MulticastRequest {
            registration_ids: tokens,
            notification: NotificationBody {
                title: &note.title,
                body: &note.body,
            },
            android: AndroidOptions {
                priority: note.urgent.then_some("high"),
                notification: AndroidNotification {
                    sound: "default",
                    channel_id: &self.config.channel_id,
                    click_action: &self.config.click_action,
                },
            },
            apns: note.urgent.then_some(ApnsOptions {
                payload: ApnsPayload {
                    aps: Aps { sound: "default" },
                },
            }),
        }
    }
}

#[async_trait]
impl PushSender for PushClient {
    async fn send_multicast(
        &self,
        tokens: &[String],
        note: &Notification,
    ) -> Result<SendReceipt, PushError> {
        let request = self.build_request(tokens, note);

        let mut call = self.http.post(&self.config.endpoint).json(&request);
        if let Some(key) = &self.config.server_key {
            call = call.header(AUTHORIZATION, format!("key={key}"));
        }

        let response = call.send().await?;
        if !response.status().is_success() {
            return Err(PushError::Service(response.status().as_u16()));
        }

        let receipt: SendReceipt = response.json().await?;
        debug!(
            "Delivery service replied: success={}, failure={}",
            receipt.success, receipt.failure
        );
        Ok(receipt)
    }
}
