//! # Push Payload Receiver
//!
//! Entry point for messages delivered by the push mechanism. The transport
//! itself lives outside the crate; it hands each message over as a
//! string-to-string data map plus an optional notification block.
//!
//! Two shapes are understood:
//! - a data message whose `events` key holds a string-encoded JSON array of
//!   event records. The batch is published on the live channel.
//! - anything else carrying alert fields (`magnitude`, `place`, `depthKm`,
//!   `title`, `body`) or a notification block. A single alert is produced and
//!   nothing is merged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::feed_controller::AlertNotice;
use crate::core::live_channel::{BatchOrigin, LiveBatch, LiveChannel};
use crate::error::DecodeError;
use crate::quakes::event_record::decode_batch;

/// Data key holding the event array.
pub const EVENTS_KEY: &str = "events";

const ALERT_FIELDS: [&str; 5] = ["magnitude", "place", "depthKm", "title", "body"];

/// Visible part of a push message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushNotification {
    /// Notification title.
    pub title: Option<String>,
    /// Notification text.
    pub body: Option<String>,
}

/// A push message as handed over by the delivery mechanism.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Flat data map; every value is a string on the wire.
    #[serde(default)]
    pub data: HashMap<String, String>,
    /// Optional display block.
    #[serde(default)]
    pub notification: Option<PushNotification>,
}

/// What the receiver did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// A batch went out on the live channel; `alerts` lists the records at or
    /// above the alert threshold.
    Batch {
        /// Number of records published.
        published: usize,
        /// Alerts for the strong records in the batch.
        alerts: Vec<AlertNotice>,
    },
    /// Nothing merged, one alert to show.
    Alert(AlertNotice),
}

/// # Push Receiver
pub struct PushReceiver {
    channel: LiveChannel,
    alert_threshold: f64,
}

impl PushReceiver {
    /// Creates a receiver publishing on `channel`.
    pub fn new(channel: LiveChannel, alert_threshold: f64) -> Self {
        Self { channel, alert_threshold }
    }

    /// Decodes and routes one message. Malformed messages are logged and
    /// reported back; nothing is published for them.
    pub fn handle(&self, message: PushMessage) -> Result<PushOutcome, DecodeError> {
        let result = self.route(message);
        if let Err(e) = &result {
            log::warn!("Rejected push message: {}", e);
        }
        result
    }

    fn route(&self, message: PushMessage) -> Result<PushOutcome, DecodeError> {
        if let Some(payload) = message.data.get(EVENTS_KEY) {
            let events = decode_batch(payload)?;
            let alerts: Vec<AlertNotice> = events
                .iter()
                .filter(|e| e.is_alert(self.alert_threshold))
                .map(AlertNotice::for_event)
                .collect();
            let published = events.len();
            self.channel.publish(LiveBatch::new(BatchOrigin::Push, events));
            log::info!("Push batch: {} event(s), {} alert(s)", published, alerts.len());
            return Ok(PushOutcome::Batch { published, alerts });
        }

        let has_fields = ALERT_FIELDS.iter().any(|k| message.data.contains_key(*k));
        if !has_fields && message.notification.is_none() {
            return Err(DecodeError::EmptyPush);
        }
        Ok(PushOutcome::Alert(alert_from_fields(&message)))
    }
}

fn alert_from_fields(message: &PushMessage) -> AlertNotice {
    let data = &message.data;
    let notification = message.notification.clone().unwrap_or_default();

    let magnitude = data.get("magnitude").and_then(|m| match m.trim().parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring non-numeric push magnitude `{}`", m);
            None
        }
    });
    let place = data.get("place").filter(|p| !p.trim().is_empty());

    let title = data
        .get("title")
        .cloned()
        .or(notification.title)
        .or_else(|| magnitude.map(|m| format!("Earthquake M{m}")))
        .unwrap_or_else(|| AlertNotice::DEFAULT_TITLE.to_string());

    let body = data
        .get("body")
        .cloned()
        .or(notification.body)
        .or_else(|| {
            place.map(|p| match data.get("depthKm") {
                Some(depth) => format!("{p} - Depth {depth} km"),
                None => p.clone(),
            })
        })
        .unwrap_or_else(|| AlertNotice::DEFAULT_BODY.to_string());

    AlertNotice { title, body, magnitude, event_id: data.get("id").cloned() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> PushMessage {
        PushMessage {
            data: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            notification: None,
        }
    }

    #[test]
    fn events_key_publishes_a_batch() {
        let channel = LiveChannel::new();
        let mut rx = channel.subscribe("test");
        let receiver = PushReceiver::new(channel, 5.5);

        let outcome = receiver
            .handle(data(&[(
                "events",
                r#"[{"id":"p1","occurredAt":"2024-09-19T13:14:40-06:00","magnitude":7.1,"place":"AXOCHIAPAN, MOR","depthKm":57},
                    {"id":"p2","occurredAt":"2024-09-19T13:20:00-06:00","magnitude":3.4}]"#,
            )]))
            .unwrap();

        match outcome {
            PushOutcome::Batch { published, alerts } => {
                assert_eq!(published, 2);
                assert_eq!(alerts.len(), 1);
                assert_eq!(alerts[0].title, "Earthquake M7.1");
                assert_eq!(alerts[0].event_id.as_deref(), Some("p1"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.origin, BatchOrigin::Push);
        assert_eq!(batch.events.len(), 2);
    }

    #[test]
    fn malformed_events_publish_nothing() {
        let channel = LiveChannel::new();
        let mut rx = channel.subscribe("test");
        let receiver = PushReceiver::new(channel, 5.5);

        assert!(matches!(
            receiver.handle(data(&[("events", "{oops")])),
            Err(DecodeError::Json(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn notification_block_uses_defaults() {
        let receiver = PushReceiver::new(LiveChannel::new(), 5.5);
        let msg = PushMessage {
            data: HashMap::new(),
            notification: Some(PushNotification { title: None, body: Some("Sismo fuerte".into()) }),
        };
        let PushOutcome::Alert(alert) = receiver.handle(msg).unwrap() else {
            panic!("expected an alert");
        };
        assert_eq!(alert.title, AlertNotice::DEFAULT_TITLE);
        assert_eq!(alert.body, "Sismo fuerte");
    }

    #[test]
    fn loose_fields_build_an_alert() {
        let receiver = PushReceiver::new(LiveChannel::new(), 5.5);
        let PushOutcome::Alert(alert) = receiver
            .handle(data(&[("magnitude", "6.2"), ("place", "PINOTEPA NACIONAL, OAX"), ("depthKm", "16")]))
            .unwrap()
        else {
            panic!("expected an alert");
        };
        assert_eq!(alert.title, "Earthquake M6.2");
        assert_eq!(alert.body, "PINOTEPA NACIONAL, OAX - Depth 16 km");
        assert_eq!(alert.magnitude, Some(6.2));
    }

    #[test]
    fn empty_message_is_rejected() {
        let receiver = PushReceiver::new(LiveChannel::new(), 5.5);
        assert_eq!(receiver.handle(PushMessage::default()), Err(DecodeError::EmptyPush));
    }
}
