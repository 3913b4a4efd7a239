//! Notification envelope: events about a message in a session

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LimeError, Result};
use crate::protocol::envelope::{EnvelopeHeader, RawEnvelope};
use crate::types::Reason;

/// Information about events associated to a message in a session
///
/// Can be originated by a server or by the message destination node.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub header: EnvelopeHeader,
    /// Event related to the notification
    pub event: NotificationEvent,
    /// In the case of a failed event, details about the problem
    pub reason: Option<Reason>,
}

impl Notification {
    pub fn new(event: NotificationEvent) -> Self {
        Self {
            header: EnvelopeHeader::new(),
            event,
            reason: None,
        }
    }

    /// A `failed` notification carrying the given reason
    pub fn failure(reason: Reason) -> Self {
        Self {
            header: EnvelopeHeader::new(),
            event: NotificationEvent::Failed,
            reason: Some(reason),
        }
    }

    pub(crate) fn from_raw(mut raw: RawEnvelope) -> Result<Notification> {
        let header = raw.take_header();
        let event = raw.event.ok_or(LimeError::MissingField("event"))?;

        Ok(Notification {
            header,
            event,
            reason: raw.reason,
        })
    }

    pub(crate) fn to_raw(&self) -> RawEnvelope {
        let mut raw = RawEnvelope::from(self.header.clone());
        raw.event = Some(self.event);
        raw.reason = self.reason.clone();
        raw
    }
}

/// Events that can happen in the message pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationEvent {
    /// The message was received and accepted by an intermediate node
    Accepted,
    /// The message was dispatched to the destination by an intermediate node
    Dispatched,
    /// The destination node has received the message
    Received,
    /// The destination node has consumed the content of the message
    Consumed,
    /// A problem occurred during processing; `reason` should be present
    Failed,
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationEvent::Accepted => write!(f, "accepted"),
            NotificationEvent::Dispatched => write!(f, "dispatched"),
            NotificationEvent::Received => write!(f, "received"),
            NotificationEvent::Consumed => write!(f, "consumed"),
            NotificationEvent::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::reason_codes;
    use serde_json::json;

    #[test]
    fn test_marshal_received() {
        let mut n = Notification::new(NotificationEvent::Received);
        n.header = n.header.id("1");

        let json = serde_json::to_value(n.to_raw()).unwrap();
        assert_eq!(json, json!({"id": "1", "event": "received"}));
    }

    #[test]
    fn test_marshal_failure_carries_reason() {
        let mut n = Notification::failure(Reason::new(
            reason_codes::GENERAL_ERROR,
            "the destination is unavailable",
        ));
        n.header = n.header.id("1");

        let json = serde_json::to_value(n.to_raw()).unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["reason"]["code"], 1);
    }

    #[test]
    fn test_unmarshal() {
        let raw: RawEnvelope = serde_json::from_value(json!({
            "id": "1",
            "from": "postmaster@msging.net",
            "event": "consumed"
        }))
        .unwrap();

        let n = Notification::from_raw(raw).unwrap();
        assert_eq!(n.event, NotificationEvent::Consumed);
        assert!(n.reason.is_none());
    }

    #[test]
    fn test_invalid_event_rejected() {
        let result: std::result::Result<RawEnvelope, _> =
            serde_json::from_value(json!({"id": "1", "event": "exploded"}));
        assert!(result.is_err());
    }
}
