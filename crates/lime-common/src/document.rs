//! Document payloads and the media-type registry
//!
//! A document is a typed payload carried inside a message or a command,
//! tagged by a MIME media type. Deserialization consults a registry that
//! maps media types to factories, so embedders can extend the wire format
//! without touching the codec.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{LimeError, Result};
use crate::types::MediaType;

/// A generic JSON object payload
pub type JsonMap = serde_json::Map<String, Value>;

/// A typed payload carried in a message or command
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// A raw textual payload (`text/plain` and other non-JSON types)
    Plain(String),
    /// A generic JSON object (`application/json` and `*+json` types)
    Json(JsonMap),
}

impl Document {
    /// The media type this document serializes under when the envelope
    /// does not override it
    pub fn media_type(&self) -> MediaType {
        match self {
            Document::Plain(_) => MediaType::text_plain(),
            Document::Json(_) => MediaType::application_json(),
        }
    }

    /// Encode the document as a JSON value
    pub fn to_value(&self) -> Value {
        match self {
            Document::Plain(text) => Value::String(text.clone()),
            Document::Json(map) => Value::Object(map.clone()),
        }
    }
}

impl From<&str> for Document {
    fn from(value: &str) -> Self {
        Document::Plain(value.to_string())
    }
}

impl From<String> for Document {
    fn from(value: String) -> Self {
        Document::Plain(value)
    }
}

impl From<JsonMap> for Document {
    fn from(value: JsonMap) -> Self {
        Document::Json(value)
    }
}

/// Factory producing a typed document from raw envelope JSON
pub type DocumentFactory = Arc<dyn Fn(&Value) -> Result<Document> + Send + Sync>;

/// Registry dispatching MIME media types to document factories
///
/// A default instance covers `text/plain` and `application/json`. Types
/// without a registered factory fall back on their suffix: `*+json` decodes
/// as a generic JSON object, anything else as a raw string.
#[derive(Clone, Default)]
pub struct DocumentRegistry {
    factories: HashMap<MediaType, DocumentFactory>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(MediaType::text_plain(), Arc::new(decode_plain));
        registry.register(MediaType::application_json(), Arc::new(decode_json));
        registry
    }

    /// Register a factory for a media type, replacing any previous one
    pub fn register(&mut self, media_type: MediaType, factory: DocumentFactory) {
        self.factories.insert(media_type, factory);
    }

    /// Decode a raw JSON payload into a document for the given media type
    pub fn decode(&self, value: &Value, media_type: &MediaType) -> Result<Document> {
        if let Some(factory) = self.factories.get(media_type) {
            return factory(value);
        }

        if media_type.is_json() {
            decode_json(value)
        } else {
            decode_plain(value)
        }
    }
}

impl std::fmt::Debug for DocumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRegistry")
            .field("media_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn decode_plain(value: &Value) -> Result<Document> {
    match value {
        Value::String(text) => Ok(Document::Plain(text.clone())),
        other => Err(LimeError::MalformedEnvelope(format!(
            "expected a string payload, got {other}"
        ))),
    }
}

fn decode_json(value: &Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(Document::Json(map.clone())),
        other => Err(LimeError::MalformedEnvelope(format!(
            "expected a JSON object payload, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_text_plain() {
        let registry = DocumentRegistry::new();
        let doc = registry
            .decode(&json!("Hello world"), &MediaType::text_plain())
            .unwrap();
        assert_eq!(doc, Document::Plain("Hello world".to_string()));
    }

    #[test]
    fn test_decode_unknown_json_suffix() {
        let registry = DocumentRegistry::new();
        let mt = MediaType::with_suffix("application", "x-unknown", "json");
        let doc = registry
            .decode(&json!({"property1": "value1"}), &mt)
            .unwrap();
        match doc {
            Document::Json(map) => assert_eq!(map["property1"], "value1"),
            other => panic!("wrong document: {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_non_json_falls_back_to_plain() {
        let registry = DocumentRegistry::new();
        let mt = MediaType::new("text", "unknown");
        let doc = registry.decode(&json!("Hello world"), &mt).unwrap();
        assert_eq!(doc, Document::Plain("Hello world".to_string()));
    }

    #[test]
    fn test_decode_type_mismatch() {
        let registry = DocumentRegistry::new();
        let result = registry.decode(&json!(42), &MediaType::text_plain());
        assert!(matches!(result, Err(LimeError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_custom_factory_takes_precedence() {
        let mut registry = DocumentRegistry::new();
        let mt = MediaType::with_suffix("application", "vnd.lime.presence", "json");
        registry.register(
            mt.clone(),
            Arc::new(|value| match value {
                Value::Object(map) if map.contains_key("status") => {
                    Ok(Document::Json(map.clone()))
                }
                _ => Err(LimeError::MissingField("status")),
            }),
        );

        assert!(registry.decode(&json!({"status": "available"}), &mt).is_ok());
        assert!(registry.decode(&json!({"other": 1}), &mt).is_err());
    }
}
