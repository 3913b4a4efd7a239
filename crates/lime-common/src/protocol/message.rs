//! Message envelope: transports a document between nodes

use crate::document::{Document, DocumentRegistry};
use crate::error::{LimeError, Result};
use crate::protocol::envelope::{EnvelopeHeader, RawEnvelope};
use crate::types::MediaType;

/// Transports a content document between nodes in a network
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: EnvelopeHeader,
    /// MIME declaration of the content type
    pub media_type: MediaType,
    /// Message body content
    pub content: Document,
}

impl Message {
    /// Create a message carrying the given document, deriving the media
    /// type from the document itself
    pub fn new(content: impl Into<Document>) -> Self {
        let content = content.into();
        Self {
            header: EnvelopeHeader::new(),
            media_type: content.media_type(),
            content,
        }
    }

    /// Replace the content, updating the media type accordingly
    pub fn set_content(&mut self, content: impl Into<Document>) {
        let content = content.into();
        self.media_type = content.media_type();
        self.content = content;
    }

    pub(crate) fn from_raw(mut raw: RawEnvelope, registry: &DocumentRegistry) -> Result<Message> {
        let header = raw.take_header();

        let media_type = raw.media_type.ok_or(LimeError::MissingField("type"))?;
        let content = raw.content.ok_or(LimeError::MissingField("content"))?;
        let content = registry.decode(&content, &media_type)?;

        Ok(Message {
            header,
            media_type,
            content,
        })
    }

    pub(crate) fn to_raw(&self) -> Result<RawEnvelope> {
        let mut raw = RawEnvelope::from(self.header.clone());
        raw.media_type = Some(self.media_type.clone());
        raw.content = Some(self.content.to_value());
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::Envelope;
    use crate::types::Node;
    use serde_json::json;

    fn create_message() -> Message {
        let mut m = Message::new("Hello world");
        m.header = m
            .header
            .id("4609d0a3-00eb-4e16-9d44-27d115c6eb31")
            .to("golang@limeprotocol.org/default".parse::<Node>().unwrap());
        m
    }

    #[test]
    fn test_marshal_text_plain() {
        let m = create_message();
        let raw = m.to_raw().unwrap();
        let json = serde_json::to_value(&raw).unwrap();
        assert_eq!(
            json,
            json!({
                "id": "4609d0a3-00eb-4e16-9d44-27d115c6eb31",
                "to": "golang@limeprotocol.org/default",
                "type": "text/plain",
                "content": "Hello world"
            })
        );
    }

    #[test]
    fn test_marshal_metadata() {
        let mut m = create_message();
        m.header
            .metadata
            .insert("property1".to_string(), "value1".to_string());

        let json = serde_json::to_value(m.to_raw().unwrap()).unwrap();
        assert_eq!(json["metadata"]["property1"], "value1");
    }

    #[test]
    fn test_marshal_application_json() {
        let mut m = create_message();
        let mut map = serde_json::Map::new();
        map.insert("property1".to_string(), json!("value1"));
        map.insert("property2".to_string(), json!(2));
        m.set_content(map);

        let json = serde_json::to_value(m.to_raw().unwrap()).unwrap();
        assert_eq!(json["type"], "application/json");
        assert_eq!(json["content"]["property2"], 2);
    }

    #[test]
    fn test_unmarshal_text_plain() {
        let raw: RawEnvelope = serde_json::from_value(json!({
            "id": "4609d0a3-00eb-4e16-9d44-27d115c6eb31",
            "to": "golang@limeprotocol.org/default",
            "type": "text/plain",
            "content": "Hello world"
        }))
        .unwrap();

        let env = Envelope::from_raw(raw, &DocumentRegistry::new()).unwrap();
        let Envelope::Message(m) = env else {
            panic!("wrong envelope kind");
        };

        assert_eq!(m.header.id.as_ref().unwrap().as_str(), "4609d0a3-00eb-4e16-9d44-27d115c6eb31");
        assert!(m.header.from.is_none());
        assert_eq!(m.header.to.as_ref().unwrap().to_string(), "golang@limeprotocol.org/default");
        assert_eq!(m.media_type, MediaType::text_plain());
        assert_eq!(m.content, Document::Plain("Hello world".to_string()));
    }

    #[test]
    fn test_unmarshal_unknown_json_type() {
        let raw: RawEnvelope = serde_json::from_value(json!({
            "id": "1",
            "type": "application/x-unknown+json",
            "content": {"property1": "value1", "property4": false, "property5": 12.3}
        }))
        .unwrap();

        let env = Envelope::from_raw(raw, &DocumentRegistry::new()).unwrap();
        let Envelope::Message(m) = env else {
            panic!("wrong envelope kind");
        };

        assert_eq!(m.media_type, MediaType::with_suffix("application", "x-unknown", "json"));
        match m.content {
            Document::Json(map) => {
                assert_eq!(map["property1"], "value1");
                assert_eq!(map["property4"], false);
                assert_eq!(map["property5"], 12.3);
            }
            other => panic!("wrong document: {other:?}"),
        }
    }

    #[test]
    fn test_unmarshal_missing_content() {
        let raw: RawEnvelope = serde_json::from_value(json!({
            "id": "1",
            "type": "text/plain"
        }))
        .unwrap();

        // Without content there is no discriminator at all
        let result = Envelope::from_raw(raw, &DocumentRegistry::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_unmarshal_missing_type() {
        let raw: RawEnvelope = serde_json::from_value(json!({
            "id": "1",
            "content": "Hello world"
        }))
        .unwrap();

        let result = Envelope::from_raw(raw, &DocumentRegistry::new());
        assert!(matches!(result, Err(LimeError::MissingField("type"))));
    }
}
