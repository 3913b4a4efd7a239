//! Transport abstraction for LIME
//!
//! A transport delivers full envelopes in both directions and answers
//! capability queries for compression and encryption. Implementations must
//! be safe for one concurrent sender and one concurrent receiver; the
//! channel serializes senders itself.

pub mod mem;
pub mod tcp;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Envelope;
use crate::types::{SessionCompression, SessionEncryption};

pub use mem::{InProcessTransport, InProcessTransportOptions};
pub use tcp::{TcpTransport, TcpTransportConfig, TcpTransportListener, TlsClientConfig};

/// A bidirectional envelope transport
///
/// `send` and `receive` move exactly one envelope per call. Dropping the
/// returned futures cancels the wait; a dropped `receive` may not be
/// resumed mid-frame, so cancellation is reserved for teardown.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one envelope to the remote party
    async fn send(&self, envelope: &Envelope) -> Result<()>;

    /// Receive the next envelope from the remote party
    async fn receive(&self) -> Result<Envelope>;

    /// Compressions this transport can apply
    fn supported_compression(&self) -> Vec<SessionCompression>;

    /// Compression currently in effect
    fn compression(&self) -> SessionCompression;

    /// Apply a compression to the open connection
    async fn set_compression(&self, compression: SessionCompression) -> Result<()>;

    /// Encryptions this transport can apply
    fn supported_encryption(&self) -> Vec<SessionEncryption>;

    /// Encryption currently in effect
    fn encryption(&self) -> SessionEncryption;

    /// Apply an encryption to the open connection
    ///
    /// For TCP this performs an in-place TLS handshake on the existing
    /// socket. Both sides must have quiesced envelope traffic beforehand,
    /// which the session negotiation guarantees. Downgrading from TLS to
    /// none fails.
    async fn set_encryption(&self, encryption: SessionEncryption) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Whether the connection is open
    fn is_connected(&self) -> bool;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Observer of the raw bytes flowing through a transport
///
/// Used only for observability; implementations must not block.
pub trait TraceWriter: Send + Sync {
    /// Called with each frame written to the wire
    fn on_send(&self, frame: &[u8]);

    /// Called with each chunk read from the wire
    fn on_receive(&self, frame: &[u8]);
}

/// Trace writer that emits the traffic as `tracing` events
#[derive(Debug, Default)]
pub struct LogTraceWriter;

impl TraceWriter for LogTraceWriter {
    fn on_send(&self, frame: &[u8]) {
        tracing::trace!(direction = "send", frame = %String::from_utf8_lossy(frame));
    }

    fn on_receive(&self, frame: &[u8]) {
        tracing::trace!(direction = "receive", frame = %String::from_utf8_lossy(frame));
    }
}

/// Shared handle to a trace writer
pub type SharedTraceWriter = Arc<dyn TraceWriter>;
