//! Session envelope, session states and authentication documents

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LimeError, Result};
use crate::protocol::envelope::{EnvelopeHeader, RawEnvelope};
use crate::types::{Reason, SessionCompression, SessionEncryption};

/// Establishes and controls the communication channel between nodes
///
/// The session `id` is assigned by the server on its first reply and must
/// be echoed on every subsequent session envelope by both parties.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub header: EnvelopeHeader,
    /// Current state of the negotiation
    pub state: SessionState,
    /// Encryption options offered by the server
    pub encryption_options: Option<Vec<SessionEncryption>>,
    /// Encryption chosen for the session
    pub encryption: Option<SessionEncryption>,
    /// Compression options offered by the server
    pub compression_options: Option<Vec<SessionCompression>>,
    /// Compression chosen for the session
    pub compression: Option<SessionCompression>,
    /// Authentication schemes offered by the server
    pub scheme_options: Option<Vec<AuthenticationScheme>>,
    /// Authentication presented by the client (or challenge by the server)
    pub authentication: Option<Authentication>,
    /// In the case of a failed or finished session, details about the cause
    pub reason: Option<Reason>,
}

impl Session {
    pub fn new(state: SessionState) -> Self {
        Self {
            header: EnvelopeHeader::new(),
            state,
            encryption_options: None,
            encryption: None,
            compression_options: None,
            compression: None,
            scheme_options: None,
            authentication: None,
            reason: None,
        }
    }

    /// A `failed` session carrying the given reason
    pub fn failure(reason: Reason) -> Self {
        let mut session = Self::new(SessionState::Failed);
        session.reason = Some(reason);
        session
    }

    pub(crate) fn from_raw(mut raw: RawEnvelope) -> Result<Session> {
        let header = raw.take_header();
        let state = raw.state.ok_or(LimeError::MissingField("state"))?;

        let authentication = match raw.scheme {
            Some(scheme) => Some(Authentication::from_parts(
                scheme,
                raw.authentication.as_ref(),
            )?),
            None => None,
        };

        Ok(Session {
            header,
            state,
            encryption_options: raw.encryption_options,
            encryption: raw.encryption,
            compression_options: raw.compression_options,
            compression: raw.compression,
            scheme_options: raw.scheme_options,
            authentication,
            reason: raw.reason,
        })
    }

    pub(crate) fn to_raw(&self) -> Result<RawEnvelope> {
        let mut raw = RawEnvelope::from(self.header.clone());
        raw.state = Some(self.state);
        raw.encryption_options = self.encryption_options.clone();
        raw.encryption = self.encryption;
        raw.compression_options = self.compression_options.clone();
        raw.compression = self.compression;
        raw.scheme_options = self.scheme_options.clone();
        if let Some(authentication) = &self.authentication {
            raw.scheme = Some(authentication.scheme());
            raw.authentication = Some(authentication.body()?);
        }
        raw.reason = self.reason.clone();
        Ok(raw)
    }
}

/// States of the session negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// The session was just created and nothing was negotiated yet
    New,
    /// Compression and encryption are being negotiated
    Negotiating,
    /// The client identity is being authenticated
    Authenticating,
    /// The session is active and accepts any envelope kind
    Established,
    /// A party asked to end the session
    Finishing,
    /// The session ended normally (terminal)
    Finished,
    /// The session ended with an error (terminal)
    Failed,
}

impl SessionState {
    /// Whether the session can never leave this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::New => write!(f, "new"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Authenticating => write!(f, "authenticating"),
            SessionState::Established => write!(f, "established"),
            SessionState::Finishing => write!(f, "finishing"),
            SessionState::Finished => write!(f, "finished"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// An authentication mechanism offered or presented during establishment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationScheme {
    Guest,
    Plain,
    Transport,
    Key,
    External,
}

impl fmt::Display for AuthenticationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationScheme::Guest => write!(f, "guest"),
            AuthenticationScheme::Plain => write!(f, "plain"),
            AuthenticationScheme::Transport => write!(f, "transport"),
            AuthenticationScheme::Key => write!(f, "key"),
            AuthenticationScheme::External => write!(f, "external"),
        }
    }
}

/// Credentials presented on an `authenticating` session envelope, carried
/// on the wire as the `scheme` and `authentication` fields
#[derive(Debug, Clone, PartialEq)]
pub enum Authentication {
    /// No credentials; the server decides what a guest may do
    Guest,
    /// A base64-encoded password
    Plain(PlainAuthentication),
    /// The transport layer authenticates the identity (e.g. a TLS client
    /// certificate)
    Transport,
    /// A base64-encoded long-lived key
    Key(KeyAuthentication),
    /// A token issued by a third party
    External(ExternalAuthentication),
}

impl Authentication {
    pub fn scheme(&self) -> AuthenticationScheme {
        match self {
            Authentication::Guest => AuthenticationScheme::Guest,
            Authentication::Plain(_) => AuthenticationScheme::Plain,
            Authentication::Transport => AuthenticationScheme::Transport,
            Authentication::Key(_) => AuthenticationScheme::Key,
            Authentication::External(_) => AuthenticationScheme::External,
        }
    }

    fn from_parts(scheme: AuthenticationScheme, body: Option<&Value>) -> Result<Authentication> {
        let require_body = || body.cloned().ok_or(LimeError::MissingField("authentication"));

        Ok(match scheme {
            AuthenticationScheme::Guest => Authentication::Guest,
            AuthenticationScheme::Transport => Authentication::Transport,
            AuthenticationScheme::Plain => {
                Authentication::Plain(serde_json::from_value(require_body()?)?)
            }
            AuthenticationScheme::Key => {
                Authentication::Key(serde_json::from_value(require_body()?)?)
            }
            AuthenticationScheme::External => {
                Authentication::External(serde_json::from_value(require_body()?)?)
            }
        })
    }

    fn body(&self) -> Result<Value> {
        Ok(match self {
            Authentication::Guest | Authentication::Transport => {
                Value::Object(serde_json::Map::new())
            }
            Authentication::Plain(plain) => serde_json::to_value(plain)?,
            Authentication::Key(key) => serde_json::to_value(key)?,
            Authentication::External(external) => serde_json::to_value(external)?,
        })
    }
}

/// Password credentials for the `plain` scheme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainAuthentication {
    /// Base64 representation of the password
    pub password: String,
}

impl PlainAuthentication {
    /// Build credentials from a clear-text password
    pub fn from_clear_text(password: &str) -> Self {
        Self {
            password: BASE64.encode(password),
        }
    }

    /// Decode the password back to clear text
    pub fn clear_text(&self) -> Result<String> {
        let bytes = BASE64
            .decode(&self.password)
            .map_err(|e| LimeError::Serialization(format!("invalid base64 password: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| LimeError::Serialization(format!("password is not UTF-8: {e}")))
    }
}

/// Key credentials for the `key` scheme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyAuthentication {
    /// Base64 representation of the key
    pub key: String,
}

impl KeyAuthentication {
    pub fn from_clear_text(key: &str) -> Self {
        Self {
            key: BASE64.encode(key),
        }
    }

    pub fn clear_text(&self) -> Result<String> {
        let bytes = BASE64
            .decode(&self.key)
            .map_err(|e| LimeError::Serialization(format!("invalid base64 key: {e}")))?;
        String::from_utf8(bytes).map_err(|e| LimeError::Serialization(format!("key is not UTF-8: {e}")))
    }
}

/// Third-party token credentials for the `external` scheme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalAuthentication {
    pub token: String,
    pub issuer: String,
}
