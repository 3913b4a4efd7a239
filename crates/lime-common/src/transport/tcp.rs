//! TCP transport with in-place TLS upgrade
//!
//! Envelopes are written as compact JSON objects separated by whitespace
//! and parsed by the streaming codec. The transport keeps the read and
//! write halves of the socket behind separate async mutexes, so one
//! sender and one receiver can operate concurrently; `set_encryption`
//! quiesces both halves, rejoins them and performs the TLS handshake on
//! the live socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::RwLock;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::document::DocumentRegistry;
use crate::error::{LimeError, Result};
use crate::protocol::{Envelope, EnvelopeCodec, DEFAULT_READ_LIMIT};
use crate::transport::{SharedTraceWriter, Transport};
use crate::types::{SessionCompression, SessionEncryption};

/// Object-safe byte stream the transport can swap under itself
trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;

/// Configuration shared by TCP transports and listeners
#[derive(Clone)]
pub struct TcpTransportConfig {
    /// Maximum size of one inbound envelope
    pub read_limit: usize,
    /// Registry resolving document payload types
    pub registry: Arc<DocumentRegistry>,
    /// Optional observer of the raw bytes in both directions
    pub trace_writer: Option<SharedTraceWriter>,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            read_limit: DEFAULT_READ_LIMIT,
            registry: Arc::new(DocumentRegistry::new()),
            trace_writer: None,
        }
    }
}

/// TLS parameters for the client side of a connection
#[derive(Clone)]
pub struct TlsClientConfig {
    pub config: Arc<rustls::ClientConfig>,
    /// Server name presented for SNI and certificate validation
    pub server_name: String,
}

/// Role-specific TLS material for the in-place upgrade
enum TlsRole {
    Client {
        config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
    },
    Server {
        config: Arc<rustls::ServerConfig>,
    },
}

struct ReadState {
    io: Option<ReadHalf<BoxedStream>>,
    buf: BytesMut,
    codec: EnvelopeCodec,
}

struct WriteState {
    io: Option<WriteHalf<BoxedStream>>,
    codec: EnvelopeCodec,
}

/// TCP transport for LIME envelopes
pub struct TcpTransport {
    read: tokio::sync::Mutex<ReadState>,
    write: tokio::sync::Mutex<WriteState>,
    encryption: RwLock<SessionEncryption>,
    connected: AtomicBool,
    tls: Option<TlsRole>,
    trace_writer: Option<SharedTraceWriter>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl TcpTransport {
    /// Open a client connection to the given address
    ///
    /// When `tls` is provided the connection still starts in plaintext;
    /// encryption is applied by `set_encryption` once the session
    /// negotiation agrees on it.
    pub async fn connect(
        addr: SocketAddr,
        config: TcpTransportConfig,
        tls: Option<TlsClientConfig>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| LimeError::ConnectionFailed(e.to_string()))?;
        stream.set_nodelay(true)?;
        debug!("connected to {addr}");

        let tls = match tls {
            Some(client) => {
                let server_name = ServerName::try_from(client.server_name.clone())
                    .map_err(|e| LimeError::Tls(format!("invalid server name: {e}")))?;
                Some(TlsRole::Client {
                    config: client.config,
                    server_name,
                })
            }
            None => None,
        };

        Self::new(stream, &config, tls)
    }

    fn new(stream: TcpStream, config: &TcpTransportConfig, tls: Option<TlsRole>) -> Result<Self> {
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;

        let boxed: BoxedStream = Box::new(stream);
        let (read_io, write_io) = tokio::io::split(boxed);
        let codec =
            EnvelopeCodec::new(config.registry.clone()).with_read_limit(config.read_limit);

        Ok(Self {
            read: tokio::sync::Mutex::new(ReadState {
                io: Some(read_io),
                buf: BytesMut::with_capacity(4096),
                codec: codec.clone(),
            }),
            write: tokio::sync::Mutex::new(WriteState {
                io: Some(write_io),
                codec,
            }),
            encryption: RwLock::new(SessionEncryption::None),
            connected: AtomicBool::new(true),
            tls,
            trace_writer: config.trace_writer.clone(),
            local_addr,
            remote_addr,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let mut write = self.write.lock().await;

        let mut buf = BytesMut::new();
        write.codec.encode(envelope, &mut buf)?;

        if let Some(trace) = &self.trace_writer {
            trace.on_send(&buf);
        }

        let io = write.io.as_mut().ok_or(LimeError::TransportClosed)?;
        io.write_all(&buf).await?;
        io.flush().await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Envelope> {
        let mut read = self.read.lock().await;
        let state = &mut *read;

        loop {
            if let Some(envelope) = state.codec.decode(&mut state.buf)? {
                return Ok(envelope);
            }

            let io = state.io.as_mut().ok_or(LimeError::TransportClosed)?;
            let before = state.buf.len();
            let n = io.read_buf(&mut state.buf).await?;
            if n == 0 {
                self.connected.store(false, Ordering::SeqCst);
                return Err(LimeError::TransportClosed);
            }

            if let Some(trace) = &self.trace_writer {
                trace.on_receive(&state.buf[before..]);
            }
        }
    }

    fn supported_compression(&self) -> Vec<SessionCompression> {
        vec![SessionCompression::None]
    }

    fn compression(&self) -> SessionCompression {
        SessionCompression::None
    }

    async fn set_compression(&self, compression: SessionCompression) -> Result<()> {
        if compression == self.compression() {
            return Ok(());
        }
        Err(LimeError::UnsupportedCompression(compression))
    }

    fn supported_encryption(&self) -> Vec<SessionEncryption> {
        if self.tls.is_some() {
            vec![SessionEncryption::None, SessionEncryption::Tls]
        } else {
            vec![SessionEncryption::None]
        }
    }

    fn encryption(&self) -> SessionEncryption {
        *self.encryption.read()
    }

    async fn set_encryption(&self, encryption: SessionEncryption) -> Result<()> {
        if encryption == self.encryption() {
            return Ok(());
        }
        if encryption == SessionEncryption::None {
            return Err(LimeError::EncryptionDowngrade);
        }

        let role = self
            .tls
            .as_ref()
            .ok_or_else(|| LimeError::Tls("tls configuration is not defined".to_string()))?;

        // The negotiation quiesces traffic before the upgrade, so both
        // locks acquire without waiting on an in-flight operation.
        let mut read = self.read.lock().await;
        let mut write = self.write.lock().await;

        let read_io = read.io.take().ok_or(LimeError::TransportClosed)?;
        let write_io = write.io.take().ok_or(LimeError::TransportClosed)?;
        let stream = read_io.unsplit(write_io);

        let handshake = async {
            Ok::<BoxedStream, LimeError>(match role {
                TlsRole::Client {
                    config,
                    server_name,
                } => {
                    let connector = TlsConnector::from(config.clone());
                    Box::new(
                        connector
                            .connect(server_name.clone(), stream)
                            .await
                            .map_err(|e| LimeError::Tls(format!("handshake failed: {e}")))?,
                    )
                }
                TlsRole::Server { config } => {
                    let acceptor = TlsAcceptor::from(config.clone());
                    Box::new(
                        acceptor
                            .accept(stream)
                            .await
                            .map_err(|e| LimeError::Tls(format!("handshake failed: {e}")))?,
                    )
                }
            })
        };

        match handshake.await {
            Ok(upgraded) => {
                let (read_io, write_io) = tokio::io::split(upgraded);
                read.io = Some(read_io);
                write.io = Some(write_io);
                *self.encryption.write() = SessionEncryption::Tls;
                debug!("transport upgraded to tls");
                Ok(())
            }
            Err(e) => {
                // The socket was consumed by the failed handshake
                self.connected.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(LimeError::TransportClosed);
        }

        let mut write = self.write.lock().await;
        if let Some(mut io) = write.io.take() {
            let _ = io.shutdown().await;
        }

        // A receiver blocked mid-read keeps its half until it observes the
        // peer's close; only reclaim the read half when it is idle.
        if let Ok(mut read) = self.read.try_lock() {
            read.io.take();
        }

        debug!("transport to {} closed", self.remote_addr);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote_addr)
    }
}

/// Listener producing server-role TCP transports
pub struct TcpTransportListener {
    listener: TcpListener,
    config: TcpTransportConfig,
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl TcpTransportListener {
    /// Bind the listener to the given address
    pub async fn bind(
        addr: SocketAddr,
        config: TcpTransportConfig,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LimeError::ConnectionFailed(e.to_string()))?;
        debug!("listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config,
            tls,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the next incoming connection
    ///
    /// The accepted transport inherits the listener's read limit, registry,
    /// trace writer and TLS material.
    pub async fn accept(&self) -> Result<TcpTransport> {
        let (stream, remote_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| LimeError::ConnectionFailed(e.to_string()))?;
        stream.set_nodelay(true)?;
        debug!("accepted connection from {remote_addr}");

        let tls = self
            .tls
            .clone()
            .map(|config| TlsRole::Server { config });
        TcpTransport::new(stream, &self.config, tls)
    }
}
