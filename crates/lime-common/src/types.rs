//! Core type definitions for LIME
//!
//! These types are shared across all LIME components and form the
//! fundamental building blocks of the protocol: envelope ids, node
//! addressing, MIME media types and session capability enums.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::LimeError;

/// Well-known reason codes carried by failure notifications, failed
/// commands and failed sessions.
pub mod reason_codes {
    /// Unclassified failure.
    pub const GENERAL_ERROR: i32 = 1;
    /// An envelope violated the session state rules.
    pub const PROTOCOL_ERROR: i32 = 2;
    /// The peer picked a compression or encryption that was not offered.
    pub const NEGOTIATION_ERROR: i32 = 3;
}

/// Unique identifier of an envelope
///
/// Ids are opaque strings; new ids are backed by random UUIDs. The id is
/// what correlates a command response with its request, and what fixes the
/// session identity after the server's first reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(String);

impl EnvelopeId {
    /// Generate a new random envelope id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EnvelopeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EnvelopeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An identity in the form `name@domain`
///
/// Who a party claims to be, before an instance is assigned. Either
/// component may be empty, acting as a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Identity {
    pub name: String,
    pub domain: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }

    /// Promote the identity to a node with the given instance
    pub fn into_node(self, instance: impl Into<String>) -> Node {
        Node {
            identity: self,
            instance: instance.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.domain)
        }
    }
}

impl FromStr for Identity {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, domain) = match s.split_once('@') {
            Some((name, domain)) => (name, domain),
            None => (s, ""),
        };
        Ok(Self::new(name, domain))
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or_default())
    }
}

/// The routable address of a LIME endpoint, in the form
/// `name@domain/instance`
///
/// Parses by splitting on the last `/` and then on `@`; empty components
/// are permitted and the separators are retained only when needed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Node {
    pub identity: Identity,
    pub instance: String,
}

impl Node {
    pub fn new(identity: Identity, instance: impl Into<String>) -> Self {
        Self {
            identity,
            instance: instance.into(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance.is_empty() {
            write!(f, "{}", self.identity)
        } else {
            write!(f, "{}/{}", self.identity, self.instance)
        }
    }
}

impl FromStr for Node {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (identity, instance) = match s.rsplit_once('/') {
            Some((identity, instance)) => (identity, instance),
            None => (s, ""),
        };
        Ok(Self {
            identity: identity.parse().unwrap_or_default(),
            instance: instance.to_string(),
        })
    }
}

impl From<Identity> for Node {
    fn from(identity: Identity) -> Self {
        Self {
            identity,
            instance: String::new(),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or_default())
    }
}

/// A MIME media type in the form `type/subtype` or `type/subtype+suffix`
///
/// Equality is structural. The `main` field holds the top-level type
/// identifier (text, application, image, audio, video).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType {
    pub main: String,
    pub subtype: String,
    pub suffix: Option<String>,
}

impl MediaType {
    pub fn new(main: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            main: main.into(),
            subtype: subtype.into(),
            suffix: None,
        }
    }

    pub fn with_suffix(
        main: impl Into<String>,
        subtype: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            main: main.into(),
            subtype: subtype.into(),
            suffix: Some(suffix.into()),
        }
    }

    /// `text/plain`
    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    /// `application/json`
    pub fn application_json() -> Self {
        Self::new("application", "json")
    }

    /// Whether this media type represents a JSON payload: the suffix is
    /// exactly `json`, or the type equals `application/json`.
    pub fn is_json(&self) -> bool {
        match &self.suffix {
            Some(suffix) => suffix == "json",
            None => self.main == "application" && self.subtype == "json",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main, self.subtype)?;
        if let Some(suffix) = &self.suffix {
            write!(f, "+{}", suffix)?;
        }
        Ok(())
    }
}

impl FromStr for MediaType {
    type Err = LimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, suffix) = match s.split_once('+') {
            Some((base, suffix)) if !suffix.is_empty() => (base, Some(suffix)),
            Some(_) | None => (s, None),
        };

        let (main, subtype) = base
            .split_once('/')
            .ok_or_else(|| LimeError::InvalidMediaType(s.to_string()))?;

        if main.is_empty() || subtype.is_empty() {
            return Err(LimeError::InvalidMediaType(s.to_string()));
        }

        Ok(Self {
            main: main.to_string(),
            subtype: subtype.to_string(),
            suffix: suffix.map(str::to_string),
        })
    }
}

impl Serialize for MediaType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// An opaque absolute or relative URI used as the target of a command
/// (e.g. `/presence`, `lime://domain/resource`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimeUri(String);

impl LimeUri {
    pub fn parse(s: impl Into<String>) -> Result<Self, LimeError> {
        let s = s.into();
        if s.is_empty() {
            return Err(LimeError::InvalidUri(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LimeUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LimeUri {
    type Err = LimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for LimeUri {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LimeUri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Details about why an event, command or session failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: i32,
    pub description: String,
}

impl Reason {
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.description, self.code)
    }
}

/// Compression applied to a session's transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionCompression {
    None,
    Gzip,
}

impl fmt::Display for SessionCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionCompression::None => write!(f, "none"),
            SessionCompression::Gzip => write!(f, "gzip"),
        }
    }
}

/// Encryption applied to a session's transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEncryption {
    None,
    Tls,
}

impl fmt::Display for SessionEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEncryption::None => write!(f, "none"),
            SessionEncryption::Tls => write!(f, "tls"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_id_generation() {
        let id1 = EnvelopeId::new();
        let id2 = EnvelopeId::new();
        assert_ne!(id1, id2);
        assert_eq!(id1.to_string().len(), 36); // UUID format
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::new("postmaster", "msging.net").to_string(), "postmaster@msging.net");
        assert_eq!(Identity::new("", "msging.net").to_string(), "@msging.net");
        assert_eq!(Identity::new("name", "").to_string(), "name");
    }

    #[test]
    fn test_identity_parse() {
        let id: Identity = "postmaster@msging.net".parse().unwrap();
        assert_eq!(id, Identity::new("postmaster", "msging.net"));

        let id: Identity = "@msging.net".parse().unwrap();
        assert_eq!(id, Identity::new("", "msging.net"));
    }

    #[test]
    fn test_identity_empty_domain_roundtrip() {
        let id: Identity = "name".parse().unwrap();
        assert_eq!(id, Identity::new("name", ""));
        assert_eq!(id.to_string(), "name");
    }

    #[test]
    fn test_node_display() {
        let node = Node::new(Identity::new("user", "msging.net"), "mobile");
        assert_eq!(node.to_string(), "user@msging.net/mobile");

        let node = Node::new(Identity::new("postmaster", "msging.net"), "");
        assert_eq!(node.to_string(), "postmaster@msging.net");

        let node = Node::new(Identity::new("", "msging.net"), "home");
        assert_eq!(node.to_string(), "@msging.net/home");
    }

    #[test]
    fn test_node_parse() {
        let node: Node = "user@msging.net/mobile".parse().unwrap();
        assert_eq!(node.identity, Identity::new("user", "msging.net"));
        assert_eq!(node.instance, "mobile");

        let node: Node = "@msging.net/home".parse().unwrap();
        assert_eq!(node.identity, Identity::new("", "msging.net"));
        assert_eq!(node.instance, "home");

        let node: Node = "postmaster@msging.net".parse().unwrap();
        assert_eq!(node.instance, "");
    }

    #[test]
    fn test_node_json_roundtrip() {
        let node: Node = "golang@limeprotocol.org/default".parse().unwrap();
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, r#""golang@limeprotocol.org/default""#);
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_media_type_display() {
        assert_eq!(MediaType::text_plain().to_string(), "text/plain");
        assert_eq!(
            MediaType::with_suffix("application", "vnd.lime.presence", "json").to_string(),
            "application/vnd.lime.presence+json"
        );
    }

    #[test]
    fn test_media_type_parse() {
        let mt: MediaType = "application/vnd.lime.presence+json".parse().unwrap();
        assert_eq!(mt.main, "application");
        assert_eq!(mt.subtype, "vnd.lime.presence");
        assert_eq!(mt.suffix.as_deref(), Some("json"));

        let mt: MediaType = "text/plain".parse().unwrap();
        assert_eq!(mt, MediaType::text_plain());

        assert!("notamediatype".parse::<MediaType>().is_err());
        assert!("/plain".parse::<MediaType>().is_err());
    }

    #[test]
    fn test_media_type_is_json() {
        assert!(MediaType::application_json().is_json());
        assert!(MediaType::with_suffix("application", "x-unknown", "json").is_json());
        assert!(!MediaType::text_plain().is_json());
        assert!(!MediaType::new("application", "octet-stream").is_json());
    }

    #[test]
    fn test_lime_uri() {
        let uri = LimeUri::parse("/presence").unwrap();
        assert_eq!(uri.as_str(), "/presence");
        assert!(LimeUri::parse("").is_err());
    }

    #[test]
    fn test_session_enums_wire_names() {
        assert_eq!(serde_json::to_string(&SessionEncryption::Tls).unwrap(), r#""tls""#);
        assert_eq!(serde_json::to_string(&SessionCompression::None).unwrap(), r#""none""#);
        let e: SessionEncryption = serde_json::from_str(r#""none""#).unwrap();
        assert_eq!(e, SessionEncryption::None);
    }
}
