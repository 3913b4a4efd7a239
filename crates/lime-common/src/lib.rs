//! # lime-common
//!
//! Core components of the LIME protocol: a node-to-node messaging protocol
//! in which two endpoints exchange JSON-encoded envelopes over a persistent,
//! optionally-encrypted transport.
//!
//! This crate contains:
//! - Envelope model and the two-phase JSON codec
//! - Document registry for MIME-tagged payloads
//! - Transport abstraction with TCP (plus in-place TLS upgrade) and
//!   in-process implementations
//! - The channel: envelope demultiplexing and command correlation
//! - Client and server session state machines
//!
//! ## Architecture
//!
//! The common crate is designed to be minimal and stable. Client and server
//! facades live in their own crates and only bind listeners, channels and
//! handlers together.

pub mod channel;
pub mod crypto;
pub mod document;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-export commonly used items at crate root
pub use channel::{Channel, ChannelConfig, ClientChannel, ServerChannel};
pub use document::{Document, DocumentRegistry};
pub use error::{LimeError, Result};
pub use protocol::{
    Command, CommandMethod, CommandStatus, Envelope, EnvelopeKind, Message, Notification,
    NotificationEvent, Session, SessionState,
};
pub use types::{
    EnvelopeId, Identity, LimeUri, MediaType, Node, Reason, SessionCompression, SessionEncryption,
};
