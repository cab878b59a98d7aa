use tracing::{debug, error, info, warn};

use crate::push::{Notification, PushError, PushSender};
use crate::store::{LampChange, LampEvent, LampMode, StoreError, TokenSource};

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Push(#[from] PushError),
}

/// Turns observed lamp changes into multicast push requests.
pub struct Dispatcher<T, P> {
    tokens: T,
    push: P,
    product_name: String,
}

impl<T: TokenSource, P: PushSender> Dispatcher<T, P> {
    pub fn new(tokens: T, push: P, product_name: String) -> Self {
        Self {
            tokens,
            push,
            product_name,
        }
    }

    /// Handle one observed change. Failures are logged and contained here;
    /// the watch loop never sees them.
    pub async fn handle_change(&self, change: LampChange) {
        if let Err(e) = self.try_dispatch(change).await {
            error!("Failed to send notification: {}", e);
        }
    }

    async fn try_dispatch(&self, change: LampChange) -> Result<(), DispatchError> {
        let Some(after) = change.after else {
            debug!("Event cleared, nothing to announce");
            return Ok(());
        };
        if after.is_empty() {
            debug!("Empty event, nothing to announce");
            return Ok(());
        }
        // Rapid re-triggers rewrite the on/off flag without flipping it;
        // those must not notify again.
        if let (LampEvent::Status(now), Some(LampEvent::Status(prev))) = (&after, &change.before) {
            if now == prev {
                debug!("Status unchanged, skipping notification");
                return Ok(());
            }
        }

        let note = compose(&after, &self.product_name);

        let tokens = self.tokens.device_tokens().await?;
        if tokens.is_empty() {
            info!("No device tokens registered, skipping notification");
            return Ok(());
        }

        let receipt = self.push.send_multicast(&tokens, &note).await?;
        info!(
            "Notification sent to {} of {} devices",
            receipt.success,
            tokens.len()
        );
        if receipt.failure > 0 {
            // TODO: drop tokens the service reports as unregistered once the
            // app's re-registration flow lands.
            warn!("{} device tokens were rejected", receipt.failure);
        }
        Ok(())
    }
}

/// Map a lamp event to notification content.
fn compose(event: &LampEvent, product_name: &str) -> Notification {
    match event {
        LampEvent::Report { text, mode } => match mode {
            LampMode::Auto => Notification {
                title: "Scheduled Mode".to_string(),
                body: format!("{text} (scheduled)"),
                urgent: false,
            },
            LampMode::ManualApp => Notification {
                title: "App Control".to_string(),
                body: format!("{text} via app"),
                urgent: false,
            },
            LampMode::ManualSwitch => Notification {
                title: "Manual Switch".to_string(),
                body: format!("{text} via wall switch"),
                urgent: false,
            },
            LampMode::Unknown => Notification {
                title: product_name.to_string(),
                body: text.clone(),
                urgent: false,
            },
        },
        LampEvent::Message(text) => Notification {
            title: product_name.to_string(),
            body: text.clone(),
            urgent: false,
        },
        LampEvent::Status(on) => Notification {
            title: if *on { "Light ON" } else { "Light OFF" }.to_string(),
            body: if *on {
                "The light is on."
            } else {
                "The light is off."
            }
            .to_string(),
            urgent: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::SendReceipt;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedTokens(Vec<String>);

    impl FixedTokens {
        fn of(tokens: &[&str]) -> Self {
            Self(tokens.iter().map(|t| t.to_string()).collect())
        }
    }

    #[async_trait]
    impl TokenSource for FixedTokens {
        async fn device_tokens(&self) -> Result<Vec<String>, StoreError> {
            Ok(self.0.clone())
        }
    }

    struct FailingTokens;

    #[async_trait]
    impl TokenSource for FailingTokens {
        async fn device_tokens(&self) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Protocol("registry read refused".into()))
        }
    }

    #[derive(Default)]
    struct RecordingPush {
        sent: Mutex<Vec<(Vec<String>, Notification)>>,
        rejected: u32,
    }

    #[async_trait]
    impl PushSender for RecordingPush {
        async fn send_multicast(
            &self,
            tokens: &[String],
            note: &Notification,
        ) -> Result<SendReceipt, PushError> {
            self.sent
                .lock()
                .unwrap()
                .push((tokens.to_vec(), note.clone()));
            Ok(SendReceipt {
                success: (tokens.len() as u32).saturating_sub(self.rejected),
                failure: self.rejected,
            })
        }
    }

    struct FailingPush;

    #[async_trait]
    impl PushSender for FailingPush {
        async fn send_multicast(
            &self,
            _tokens: &[String],
            _note: &Notification,
        ) -> Result<SendReceipt, PushError> {
            Err(PushError::Service(503))
        }
    }

    fn dispatcher(tokens: &[&str]) -> Dispatcher<FixedTokens, RecordingPush> {
        Dispatcher::new(
            FixedTokens::of(tokens),
            RecordingPush::default(),
            "Smart Lamp".to_string(),
        )
    }

    fn report(text: &str, mode: LampMode) -> LampEvent {
        LampEvent::Report {
            text: text.to_string(),
            mode,
        }
    }

    fn sends(d: &Dispatcher<FixedTokens, RecordingPush>) -> Vec<(Vec<String>, Notification)> {
        d.push.sent.lock().unwrap().clone()
    }

    #[test]
    fn mode_rows_map_to_expected_titles_and_qualifiers() {
        let cases = [
            (LampMode::Auto, "Scheduled Mode", "Lamp turned on (scheduled)"),
            (LampMode::ManualApp, "App Control", "Lamp turned on via app"),
            (
                LampMode::ManualSwitch,
                "Manual Switch",
                "Lamp turned on via wall switch",
            ),
        ];
        for (mode, title, body) in cases {
            let note = compose(&report("Lamp turned on", mode), "Smart Lamp");
            assert_eq!(note.title, title);
            assert_eq!(note.body, body);
            assert!(!note.urgent);
        }
    }

    #[test]
    fn unknown_mode_falls_back_to_product_name() {
        let note = compose(&report("Lamp turned on", LampMode::Unknown), "Smart Lamp");
        assert_eq!(note.title, "Smart Lamp");
        assert_eq!(note.body, "Lamp turned on");
    }

    #[test]
    fn plain_message_uses_product_name_and_text_verbatim() {
        let note = compose(&LampEvent::Message("hello".to_string()), "Smart Lamp");
        assert_eq!(note.title, "Smart Lamp");
        assert_eq!(note.body, "hello");
        assert!(!note.urgent);
    }

    #[test]
    fn status_flags_map_to_on_off_and_are_urgent() {
        let on = compose(&LampEvent::Status(true), "Smart Lamp");
        assert_eq!(on.title, "Light ON");
        assert_eq!(on.body, "The light is on.");
        assert!(on.urgent);

        let off = compose(&LampEvent::Status(false), "Smart Lamp");
        assert_eq!(off.title, "Light OFF");
        assert_eq!(off.body, "The light is off.");
        assert!(off.urgent);
    }

    #[tokio::test]
    async fn auto_report_multicasts_to_every_registered_device() {
        let d = dispatcher(&["tok-1", "tok-2", "tok-3"]);
        d.handle_change(LampChange {
            before: None,
            after: Some(report("Lamp turned on", LampMode::Auto)),
        })
        .await;

        let sent = sends(&d);
        assert_eq!(sent.len(), 1);
        let (recipients, note) = &sent[0];
        assert_eq!(recipients.len(), 3);
        for tok in ["tok-1", "tok-2", "tok-3"] {
            assert!(recipients.contains(&tok.to_string()));
        }
        assert_eq!(note.title, "Scheduled Mode");
        assert!(note.body.contains("Lamp turned on"));
        assert!(note.body.contains("(scheduled)"));
    }

    #[tokio::test]
    async fn cleared_event_sends_nothing() {
        let d = dispatcher(&["tok"]);
        d.handle_change(LampChange {
            before: Some(LampEvent::Status(true)),
            after: None,
        })
        .await;
        assert!(sends(&d).is_empty());
    }

    #[tokio::test]
    async fn empty_message_sends_nothing() {
        let d = dispatcher(&["tok"]);
        d.handle_change(LampChange {
            before: None,
            after: Some(LampEvent::Message(String::new())),
        })
        .await;
        assert!(sends(&d).is_empty());
    }

    #[tokio::test]
    async fn unchanged_status_sends_nothing() {
        let d = dispatcher(&["tok"]);
        d.handle_change(LampChange {
            before: Some(LampEvent::Status(true)),
            after: Some(LampEvent::Status(true)),
        })
        .await;
        assert!(sends(&d).is_empty());
    }

    #[tokio::test]
    async fn status_flip_sends_exactly_one_notification() {
        let d = dispatcher(&["tok"]);
        d.handle_change(LampChange {
            before: Some(LampEvent::Status(false)),
            after: Some(LampEvent::Status(true)),
        })
        .await;

        let sent = sends(&d);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.title, "Light ON");
    }

    #[tokio::test]
    async fn report_resends_even_when_value_did_not_change() {
        let event = report("Lamp turned on", LampMode::Auto);
        let d = dispatcher(&["tok"]);
        d.handle_change(LampChange {
            before: Some(event.clone()),
            after: Some(event),
        })
        .await;
        assert_eq!(sends(&d).len(), 1);
    }

    #[tokio::test]
    async fn empty_registry_sends_nothing() {
        let d = dispatcher(&[]);
        d.handle_change(LampChange {
            before: None,
            after: Some(report("Lamp turned on", LampMode::Auto)),
        })
        .await;
        assert!(sends(&d).is_empty());
    }

    #[tokio::test]
    async fn push_failure_is_contained() {
        let d = Dispatcher::new(
            FixedTokens::of(&["tok"]),
            FailingPush,
            "Smart Lamp".to_string(),
        );
        // Must resolve without propagating the delivery error.
        d.handle_change(LampChange {
            before: None,
            after: Some(LampEvent::Status(true)),
        })
        .await;
    }

    #[tokio::test]
    async fn token_read_failure_is_contained() {
        let d = Dispatcher::new(FailingTokens, RecordingPush::default(), "Smart Lamp".to_string());
        d.handle_change(LampChange {
            before: None,
            after: Some(LampEvent::Status(true)),
        })
        .await;
        assert!(d.push.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_failure_is_not_retried() {
        let d = Dispatcher::new(
            FixedTokens::of(&["tok-1", "tok-2"]),
            RecordingPush {
                sent: Mutex::new(Vec::new()),
                rejected: 1,
            },
            "Smart Lamp".to_string(),
        );
        d.handle_change(LampChange {
            before: None,
            after: Some(LampEvent::Message("hi".to_string())),
        })
        .await;
        assert_eq!(sends(&d).len(), 1);
    }
}
