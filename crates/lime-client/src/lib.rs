//! # lime-client
//!
//! Client facade for the LIME protocol: a builder that dials a TCP
//! transport, establishes the session and hands back the channel.

use std::sync::Arc;

use tracing::debug;

use lime_common::channel::{ChannelConfig, ClientChannel};
use lime_common::crypto::tls::{client_config, TlsOptions};
use lime_common::document::DocumentRegistry;
use lime_common::error::{LimeError, Result};
use lime_common::protocol::{Authentication, DEFAULT_INBOUND_BUFFER, DEFAULT_READ_LIMIT};
use lime_common::transport::{
    LogTraceWriter, TcpTransport, TcpTransportConfig, TlsClientConfig,
};
use lime_common::types::{Identity, SessionCompression, SessionEncryption};

/// Builds a connected, established client channel
///
/// ```no_run
/// # use lime_client::ClientBuilder;
/// # use lime_common::types::Identity;
/// # async fn example() -> lime_common::error::Result<()> {
/// let channel = ClientBuilder::new(Identity::new("andreb", "msging.net"))
///     .addr("tcp.msging.net:55321")
///     .plain_password("123456")
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    addr: String,
    identity: Identity,
    instance: String,
    authentication: Authentication,
    tls: Option<TlsOptions>,
    registry: Arc<DocumentRegistry>,
    read_limit: usize,
    inbound_buffer: usize,
    trace: bool,
}

impl ClientBuilder {
    pub fn new(identity: Identity) -> Self {
        Self {
            addr: format!("{}:55321", identity.domain),
            identity,
            instance: "default".to_string(),
            authentication: Authentication::Guest,
            tls: None,
            registry: Arc::new(DocumentRegistry::new()),
            read_limit: DEFAULT_READ_LIMIT,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
            trace: false,
        }
    }

    /// Server address in `host:port` form
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Instance label proposed for the node address
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Authenticate with a clear-text password (`plain` scheme)
    pub fn plain_password(mut self, password: &str) -> Self {
        self.authentication = Authentication::Plain(
            lime_common::protocol::PlainAuthentication::from_clear_text(password),
        );
        self
    }

    /// Authenticate with the given credentials
    pub fn authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = authentication;
        self
    }

    /// Enable TLS; the session negotiation picks it up when the server
    /// offers it
    pub fn tls(mut self, options: TlsOptions) -> Self {
        self.tls = Some(options);
        self
    }

    /// Registry resolving document payload types
    pub fn document_registry(mut self, registry: Arc<DocumentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn read_limit(mut self, read_limit: usize) -> Self {
        self.read_limit = read_limit;
        self
    }

    pub fn inbound_buffer(mut self, inbound_buffer: usize) -> Self {
        self.inbound_buffer = inbound_buffer;
        self
    }

    /// Log the raw frames flowing through the transport
    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Dial the server and establish the session
    pub async fn connect(self) -> Result<ClientChannel> {
        let addr = tokio::net::lookup_host(&self.addr)
            .await
            .map_err(|e| LimeError::ConnectionFailed(format!("{}: {e}", self.addr)))?
            .next()
            .ok_or_else(|| {
                LimeError::ConnectionFailed(format!("{} resolved to no address", self.addr))
            })?;
        debug!(addr = %addr, "dialing");

        let tls = match &self.tls {
            Some(options) => {
                let host = self
                    .addr
                    .rsplit_once(':')
                    .map(|(host, _)| host)
                    .unwrap_or(&self.addr);
                let server_name = options
                    .server_name
                    .clone()
                    .unwrap_or_else(|| host.to_string());
                Some(TlsClientConfig {
                    config: Arc::new(client_config(options)?),
                    server_name,
                })
            }
            None => None,
        };
        let prefer_tls = tls.is_some();

        let transport_config = TcpTransportConfig {
            read_limit: self.read_limit,
            registry: self.registry.clone(),
            trace_writer: self.trace.then(|| {
                Arc::new(LogTraceWriter) as lime_common::transport::SharedTraceWriter
            }),
        };

        let transport = TcpTransport::connect(addr, transport_config, tls).await?;
        let channel = ClientChannel::new(
            Arc::new(transport),
            ChannelConfig {
                inbound_buffer: self.inbound_buffer,
            },
        );

        let authentication = self.authentication.clone();
        channel
            .establish_session(
                |compressions| {
                    if compressions.contains(&SessionCompression::None) {
                        SessionCompression::None
                    } else {
                        compressions
                            .first()
                            .copied()
                            .unwrap_or(SessionCompression::None)
                    }
                },
                move |encryptions| {
                    if prefer_tls && encryptions.contains(&SessionEncryption::Tls) {
                        SessionEncryption::Tls
                    } else {
                        SessionEncryption::None
                    }
                },
                self.identity.clone(),
                move |_schemes, _challenge| authentication.clone(),
                &self.instance,
            )
            .await?;

        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use lime_common::crypto::cert::generate_self_signed_cert;
    use lime_common::protocol::{
        Command, CommandMethod, CommandStatus, Message, NotificationEvent, SessionState,
    };
    use lime_common::types::{EnvelopeId, LimeUri, MediaType};
    use lime_server::config::{ServerConfig, TlsIdentity};
    use lime_server::{DefaultEnvelopeHandler, LimeServer, MemoryAuthenticator};

    async fn spawn_server(config: ServerConfig) -> SocketAddr {
        let authenticator = MemoryAuthenticator::new(true);
        authenticator.add_account("andreb", "123456");

        let server = LimeServer::new(
            config,
            Arc::new(authenticator),
            Arc::new(DefaultEnvelopeHandler),
        );
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve(listener).await });
        addr
    }

    fn presence_command() -> Command {
        let mut presence = serde_json::Map::new();
        presence.insert("status".to_string(), serde_json::json!("available"));

        let mut command = Command::new(CommandMethod::Set)
            .with_uri(LimeUri::parse("/presence").unwrap())
            .with_resource(
                MediaType::with_suffix("application", "vnd.lime.presence", "json"),
                presence,
            );
        command.header.id = Some(EnvelopeId::new());
        command
    }

    #[tokio::test]
    async fn test_connect_and_establish_plain() {
        let addr = spawn_server(ServerConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            "localhost",
        ))
        .await;

        let channel = ClientBuilder::new(Identity::new("andreb", "localhost"))
            .addr(addr.to_string())
            .plain_password("123456")
            .connect()
            .await
            .unwrap();

        assert!(channel.is_established());
        assert_eq!(
            channel.local_node().unwrap().to_string(),
            "andreb@localhost/default"
        );

        // The default handler refuses command requests
        let response = channel.process_command(presence_command()).await.unwrap();
        assert_eq!(response.status, Some(CommandStatus::Failure));

        // Messages with an id are acknowledged with a `received` event
        let mut message = Message::new("Hello world");
        message.header.id = Some(EnvelopeId::new());
        let message_id = message.header.id.clone();
        channel.send_message(message).await.unwrap();

        let notification = channel.receive_notification().await.unwrap();
        assert_eq!(notification.event, NotificationEvent::Received);
        assert_eq!(notification.header.id, message_id);

        // Orderly finish
        let session = channel.finish_session().await.unwrap();
        assert_eq!(session.state, SessionState::Finished);
        assert_eq!(channel.state(), SessionState::Finished);
    }

    #[tokio::test]
    async fn test_connect_with_tls() {
        let cert = generate_self_signed_cert("localhost", 1).unwrap();
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), "localhost").with_tls(
            TlsIdentity {
                cert_pem: cert.cert_pem,
                key_pem: cert.key_pem,
            },
        );
        let addr = spawn_server(config).await;

        let channel = ClientBuilder::new(Identity::new("andreb", "localhost"))
            .addr(addr.to_string())
            .plain_password("123456")
            .tls(TlsOptions {
                server_name: Some("localhost".to_string()),
                ca_cert_pem: None,
                insecure_skip_verify: true,
            })
            .connect()
            .await
            .unwrap();

        assert!(channel.is_established());

        // Traffic flows over the upgraded transport
        let mut message = Message::new("over tls");
        message.header.id = Some(EnvelopeId::new());
        channel.send_message(message).await.unwrap();

        let notification = channel.receive_notification().await.unwrap();
        assert_eq!(notification.event, NotificationEvent::Received);
    }
}
