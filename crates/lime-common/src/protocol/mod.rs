//! Wire protocol definitions for LIME
//!
//! ## Protocol Design Principles
//!
//! 1. **Textual format**: envelopes are UTF-8 JSON objects, one per frame
//! 2. **Self-delimited**: a streaming decoder bounds each frame on the
//!    closing brace of the top-level object; inter-envelope whitespace
//!    (including the encoder's trailing newline) is part of the framing
//! 3. **Polymorphic payloads**: document bodies are tagged with a MIME
//!    media type and decoded through a registry
//! 4. **Two-phase decode**: a permissive raw envelope first, then kind
//!    discrimination by the presence of marker fields

pub mod codec;
pub mod command;
pub mod envelope;
pub mod message;
pub mod notification;
pub mod session;

pub use codec::EnvelopeCodec;
pub use command::{Command, CommandMethod, CommandStatus};
pub use envelope::{Envelope, EnvelopeHeader, EnvelopeKind, RawEnvelope};
pub use message::Message;
pub use notification::{Notification, NotificationEvent};
pub use session::{
    Authentication, AuthenticationScheme, ExternalAuthentication, KeyAuthentication,
    PlainAuthentication, Session, SessionState,
};

/// Maximum size of one inbound envelope (8 MiB)
///
/// This is generous for most use cases while preventing memory exhaustion
/// from a flood of unterminated JSON.
pub const DEFAULT_READ_LIMIT: usize = 8 * 1024 * 1024;

/// Default capacity of each inbound demux buffer
pub const DEFAULT_INBOUND_BUFFER: usize = 64;
