//! In-process transport
//!
//! A connected pair of transports backed by bounded channels. Used by
//! tests and by embedders hosting both ends of a session in one process.
//! The supported capability lists are configurable so negotiation
//! failures can be exercised.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::{LimeError, Result};
use crate::protocol::Envelope;
use crate::transport::Transport;
use crate::types::{SessionCompression, SessionEncryption};

/// Options for an in-process transport pair
#[derive(Debug, Clone)]
pub struct InProcessTransportOptions {
    /// Capacity of each direction's buffer
    pub buffer: usize,
    /// Compressions `set_compression` accepts
    pub supported_compressions: Vec<SessionCompression>,
    /// Encryptions `set_encryption` accepts
    pub supported_encryptions: Vec<SessionEncryption>,
}

impl Default for InProcessTransportOptions {
    fn default() -> Self {
        Self {
            buffer: 32,
            supported_compressions: vec![SessionCompression::None],
            supported_encryptions: vec![SessionEncryption::None],
        }
    }
}

/// One end of an in-process transport pair
pub struct InProcessTransport {
    tx: RwLock<Option<mpsc::Sender<Envelope>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
    connected: AtomicBool,
    compression: RwLock<SessionCompression>,
    encryption: RwLock<SessionEncryption>,
    options: InProcessTransportOptions,
}

impl InProcessTransport {
    /// Create a connected pair with default options
    pub fn pair() -> (Self, Self) {
        Self::pair_with(InProcessTransportOptions::default())
    }

    /// Create a connected pair with the given options on both ends
    pub fn pair_with(options: InProcessTransportOptions) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(options.buffer);
        let (b_tx, b_rx) = mpsc::channel(options.buffer);

        let a = Self::new(a_tx, b_rx, options.clone());
        let b = Self::new(b_tx, a_rx, options);
        (a, b)
    }

    fn new(
        tx: mpsc::Sender<Envelope>,
        rx: mpsc::Receiver<Envelope>,
        options: InProcessTransportOptions,
    ) -> Self {
        Self {
            tx: RwLock::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            connected: AtomicBool::new(true),
            compression: RwLock::new(SessionCompression::None),
            encryption: RwLock::new(SessionEncryption::None),
            options,
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let sender = self
            .tx
            .read()
            .clone()
            .ok_or(LimeError::TransportClosed)?;
        sender
            .send(envelope.clone())
            .await
            .map_err(|_| LimeError::TransportClosed)
    }

    async fn receive(&self) -> Result<Envelope> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LimeError::TransportClosed);
        }
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(LimeError::TransportClosed)
    }

    fn supported_compression(&self) -> Vec<SessionCompression> {
        self.options.supported_compressions.clone()
    }

    fn compression(&self) -> SessionCompression {
        *self.compression.read()
    }

    async fn set_compression(&self, compression: SessionCompression) -> Result<()> {
        if !self.options.supported_compressions.contains(&compression) {
            return Err(LimeError::UnsupportedCompression(compression));
        }
        *self.compression.write() = compression;
        Ok(())
    }

    fn supported_encryption(&self) -> Vec<SessionEncryption> {
        self.options.supported_encryptions.clone()
    }

    fn encryption(&self) -> SessionEncryption {
        *self.encryption.read()
    }

    async fn set_encryption(&self, encryption: SessionEncryption) -> Result<()> {
        if encryption == SessionEncryption::None && self.encryption() == SessionEncryption::Tls {
            return Err(LimeError::EncryptionDowngrade);
        }
        if !self.options.supported_encryptions.contains(&encryption) {
            return Err(LimeError::UnsupportedEncryption(encryption));
        }
        *self.encryption.write() = encryption;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(LimeError::TransportClosed);
        }
        // Dropping the sender lets the peer drain in-flight envelopes and
        // then observe the close
        self.tx.write().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::Message;

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (a, b) = InProcessTransport::pair();

        let envelope = Envelope::Message(Message::new("Hello world"));
        a.send(&envelope).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), envelope);

        b.send(&envelope).await.unwrap();
        assert_eq!(a.receive().await.unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_close_observed_by_peer() {
        let (a, b) = InProcessTransport::pair();

        a.close().await.unwrap();
        assert!(!a.is_connected());
        assert!(matches!(b.receive().await, Err(LimeError::TransportClosed)));
        assert!(matches!(
            a.send(&Envelope::Message(Message::new("x"))).await,
            Err(LimeError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_capability_negotiation() {
        let options = InProcessTransportOptions {
            supported_encryptions: vec![SessionEncryption::None, SessionEncryption::Tls],
            ..InProcessTransportOptions::default()
        };
        let (a, _b) = InProcessTransport::pair_with(options);

        a.set_encryption(SessionEncryption::Tls).await.unwrap();
        assert_eq!(a.encryption(), SessionEncryption::Tls);
        assert!(matches!(
            a.set_encryption(SessionEncryption::None).await,
            Err(LimeError::EncryptionDowngrade)
        ));

        let (a, _b) = InProcessTransport::pair();
        assert!(matches!(
            a.set_encryption(SessionEncryption::Tls).await,
            Err(LimeError::UnsupportedEncryption(_))
        ));
        assert!(matches!(
            a.set_compression(SessionCompression::Gzip).await,
            Err(LimeError::UnsupportedCompression(_))
        ));
    }
}
