//! Error types for LIME
//!
//! We use `thiserror` for structured error types that can be matched on,
//! and `anyhow` for error propagation in application code.

use thiserror::Error;

use crate::protocol::{AuthenticationScheme, EnvelopeKind, SessionState};
use crate::types::{EnvelopeId, Reason, SessionCompression, SessionEncryption};

/// Central error type for LIME operations
#[derive(Error, Debug)]
pub enum LimeError {
    // === Protocol Errors ===
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("envelope kind '{kind}' is not valid in session state '{state}'")]
    InvalidState {
        kind: EnvelopeKind,
        state: SessionState,
    },

    #[error("unexpected session state '{actual}', expected '{expected}'")]
    UnexpectedSessionState {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("duplicate command id '{0}'")]
    DuplicateCommandId(EnvelopeId),

    #[error("invalid media type '{0}'")]
    InvalidMediaType(String),

    #[error("invalid uri '{0}'")]
    InvalidUri(String),

    // === Negotiation Errors ===
    #[error("compression '{0}' is not supported")]
    UnsupportedCompression(SessionCompression),

    #[error("encryption '{0}' is not supported")]
    UnsupportedEncryption(SessionEncryption),

    #[error("cannot downgrade encryption from tls to none")]
    EncryptionDowngrade,

    #[error("authentication scheme '{0}' was not offered")]
    SchemeNotOffered(AuthenticationScheme),

    #[error("session failed: {reason}")]
    SessionFailed { reason: Reason },

    // === Transport Errors ===
    #[error("transport is not open")]
    TransportClosed,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("frame too large: {size} bytes (limit: {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    // === Lifecycle ===
    #[error("channel closed")]
    ChannelClosed,

    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization ===
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using LimeError
pub type Result<T> = std::result::Result<T, LimeError>;

impl From<serde_json::Error> for LimeError {
    fn from(err: serde_json::Error) -> Self {
        LimeError::Serialization(err.to_string())
    }
}

impl From<rustls::Error> for LimeError {
    fn from(err: rustls::Error) -> Self {
        LimeError::Tls(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LimeError::FrameTooLarge {
            size: 16,
            limit: 8,
        };
        assert!(err.to_string().contains("frame too large"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let lime_err: LimeError = io_err.into();
        assert!(matches!(lime_err, LimeError::Io(_)));
    }
}
