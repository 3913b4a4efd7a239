//! Envelope base and the permissive raw form
//!
//! The four envelope kinds share the same header keys, so decoding happens
//! in two phases: the frame is first parsed into [`RawEnvelope`], which
//! keeps payload fields as opaque JSON, and the kind is then discriminated
//! by the presence of marker fields (`content`, `event`, `method`,
//! `state`). Exactly one marker must be present.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::DocumentRegistry;
use crate::error::{LimeError, Result};
use crate::protocol::command::{Command, CommandMethod, CommandStatus};
use crate::protocol::message::Message;
use crate::protocol::notification::{Notification, NotificationEvent};
use crate::protocol::session::{AuthenticationScheme, Session, SessionState};
use crate::types::{
    EnvelopeId, LimeUri, MediaType, Node, Reason, SessionCompression, SessionEncryption,
};

/// Fields shared by every envelope kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeHeader {
    /// Unique identifier, typically a UUID
    pub id: Option<EnvelopeId>,
    /// Sender address; omitted means the implicit remote party
    pub from: Option<Node>,
    /// Destination address; omitted means the immediate peer
    pub to: Option<Node>,
    /// Proxy sender, when the envelope is sent on behalf of another node
    pub pp: Option<Node>,
    /// Additional key/value information, order-insensitive
    pub metadata: HashMap<String, String>,
}

impl EnvelopeHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header carrying a freshly generated id
    pub fn with_generated_id() -> Self {
        Self {
            id: Some(EnvelopeId::new()),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<EnvelopeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn to(mut self, node: Node) -> Self {
        self.to = Some(node);
        self
    }

    pub fn from(mut self, node: Node) -> Self {
        self.from = Some(node);
        self
    }
}

/// The protocol data unit: one of the four envelope kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Message(Message),
    Notification(Notification),
    Command(Command),
    Session(Session),
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Message(_) => EnvelopeKind::Message,
            Envelope::Notification(_) => EnvelopeKind::Notification,
            Envelope::Command(_) => EnvelopeKind::Command,
            Envelope::Session(_) => EnvelopeKind::Session,
        }
    }

    pub fn header(&self) -> &EnvelopeHeader {
        match self {
            Envelope::Message(m) => &m.header,
            Envelope::Notification(n) => &n.header,
            Envelope::Command(c) => &c.header,
            Envelope::Session(s) => &s.header,
        }
    }

    pub fn id(&self) -> Option<&EnvelopeId> {
        self.header().id.as_ref()
    }

    /// Decode a raw envelope, discriminating the kind and resolving
    /// document payloads through the registry
    pub fn from_raw(raw: RawEnvelope, registry: &DocumentRegistry) -> Result<Envelope> {
        match raw.kind()? {
            EnvelopeKind::Message => Message::from_raw(raw, registry).map(Envelope::Message),
            EnvelopeKind::Notification => Notification::from_raw(raw).map(Envelope::Notification),
            EnvelopeKind::Command => Command::from_raw(raw, registry).map(Envelope::Command),
            EnvelopeKind::Session => Session::from_raw(raw).map(Envelope::Session),
        }
    }

    pub fn to_raw(&self) -> Result<RawEnvelope> {
        match self {
            Envelope::Message(m) => m.to_raw(),
            Envelope::Notification(n) => Ok(n.to_raw()),
            Envelope::Command(c) => c.to_raw(),
            Envelope::Session(s) => s.to_raw(),
        }
    }
}

impl From<Message> for Envelope {
    fn from(value: Message) -> Self {
        Envelope::Message(value)
    }
}

impl From<Notification> for Envelope {
    fn from(value: Notification) -> Self {
        Envelope::Notification(value)
    }
}

impl From<Command> for Envelope {
    fn from(value: Command) -> Self {
        Envelope::Command(value)
    }
}

impl From<Session> for Envelope {
    fn from(value: Session) -> Self {
        Envelope::Session(value)
    }
}

/// Discriminated kind of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Message,
    Notification,
    Command,
    Session,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeKind::Message => write!(f, "message"),
            EnvelopeKind::Notification => write!(f, "notification"),
            EnvelopeKind::Command => write!(f, "command"),
            EnvelopeKind::Session => write!(f, "session"),
        }
    }
}

/// Permissive wire form shared by all envelope kinds
///
/// Every field is optional; payloads stay as opaque JSON until the kind is
/// known and the registry resolves the document type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<EnvelopeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pp: Option<Node>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,

    // Message fields (`type` is shared with command resources)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,

    // Notification fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<NotificationEvent>,

    // Command fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<CommandMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<LimeUri>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CommandStatus>,

    // Session fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_options: Option<Vec<SessionEncryption>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<SessionEncryption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_options: Option<Vec<SessionCompression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<SessionCompression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme_options: Option<Vec<AuthenticationScheme>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<AuthenticationScheme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Value>,

    // Shared by notification, command and session failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl RawEnvelope {
    /// Discriminate the envelope kind by marker-field presence
    ///
    /// Exactly one of `content`, `event`, `method` and `state` must be
    /// present; anything else is a malformed envelope.
    pub fn kind(&self) -> Result<EnvelopeKind> {
        let mut kind = None;
        let mut count = 0usize;

        if self.content.is_some() {
            kind = Some(EnvelopeKind::Message);
            count += 1;
        }
        if self.event.is_some() {
            kind = Some(EnvelopeKind::Notification);
            count += 1;
        }
        if self.method.is_some() {
            kind = Some(EnvelopeKind::Command);
            count += 1;
        }
        if self.state.is_some() {
            kind = Some(EnvelopeKind::Session);
            count += 1;
        }

        match (kind, count) {
            (Some(kind), 1) => Ok(kind),
            (_, 0) => Err(LimeError::MalformedEnvelope(
                "no discriminator field present".to_string(),
            )),
            _ => Err(LimeError::MalformedEnvelope(
                "multiple discriminator fields present".to_string(),
            )),
        }
    }

    /// Move the shared header fields out of the raw envelope
    pub(crate) fn take_header(&mut self) -> EnvelopeHeader {
        EnvelopeHeader {
            id: self.id.take(),
            from: self.from.take(),
            to: self.to.take(),
            pp: self.pp.take(),
            metadata: std::mem::take(&mut self.metadata),
        }
    }
}

impl From<EnvelopeHeader> for RawEnvelope {
    fn from(header: EnvelopeHeader) -> Self {
        RawEnvelope {
            id: header.id,
            from: header.from,
            to: header.to,
            pp: header.pp,
            metadata: header.metadata,
            ..RawEnvelope::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(json: Value) -> Result<Envelope> {
        let raw: RawEnvelope = serde_json::from_value(json)?;
        Envelope::from_raw(raw, &DocumentRegistry::new())
    }

    #[test]
    fn test_discriminator_message() {
        let env = decode(json!({
            "id": "1",
            "type": "text/plain",
            "content": "Hello world"
        }))
        .unwrap();
        assert_eq!(env.kind(), EnvelopeKind::Message);
    }

    #[test]
    fn test_discriminator_notification() {
        let env = decode(json!({"id": "1", "event": "received"})).unwrap();
        assert_eq!(env.kind(), EnvelopeKind::Notification);
    }

    #[test]
    fn test_discriminator_command() {
        let env = decode(json!({"id": "1", "method": "get", "uri": "/presence"})).unwrap();
        assert_eq!(env.kind(), EnvelopeKind::Command);
    }

    #[test]
    fn test_discriminator_session() {
        let env = decode(json!({"id": "1", "state": "new"})).unwrap();
        assert_eq!(env.kind(), EnvelopeKind::Session);
    }

    #[test]
    fn test_no_discriminator_rejected() {
        let result = decode(json!({"id": "1", "to": "a@b/c"}));
        assert!(matches!(result, Err(LimeError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_multiple_discriminators_rejected() {
        let result = decode(json!({
            "id": "1",
            "event": "received",
            "method": "get"
        }));
        assert!(matches!(result, Err(LimeError::MalformedEnvelope(_))));

        let result = decode(json!({
            "id": "1",
            "type": "text/plain",
            "content": "x",
            "state": "new"
        }));
        assert!(matches!(result, Err(LimeError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_header_roundtrip_with_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("property1".to_string(), "value1".to_string());

        let raw = RawEnvelope {
            id: Some("abc".into()),
            to: Some("golang@limeprotocol.org/default".parse().unwrap()),
            metadata,
            event: Some(NotificationEvent::Received),
            ..RawEnvelope::default()
        };

        let json = serde_json::to_value(&raw).unwrap();
        assert_eq!(json["metadata"]["property1"], "value1");
        assert_eq!(json["to"], "golang@limeprotocol.org/default");

        // Empty metadata is omitted entirely
        let raw = RawEnvelope {
            event: Some(NotificationEvent::Received),
            ..RawEnvelope::default()
        };
        let json = serde_json::to_value(&raw).unwrap();
        assert!(json.get("metadata").is_none());
        assert!(json.get("id").is_none());
    }
}
