//! Connection listener and per-session dispatch
//!
//! Accepts TCP transports, drives the server-side session establishment
//! for each one, then routes established-phase envelopes to the
//! configured handler until the session ends.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use lime_common::channel::{ChannelConfig, ServerChannel, ServerChannelConfig};
use lime_common::crypto::tls::server_config as tls_server_config;
use lime_common::document::DocumentRegistry;
use lime_common::error::Result;
use lime_common::protocol::SessionState;
use lime_common::transport::{TcpTransportConfig, TcpTransportListener, Transport};
use lime_common::types::Node;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::handler::EnvelopeHandler;
use crate::registry::NodeRegistry;

/// A LIME server bound to one TCP listener
pub struct LimeServer {
    config: ServerConfig,
    authenticator: Arc<dyn Authenticator>,
    handler: Arc<dyn EnvelopeHandler>,
    registry: Arc<NodeRegistry>,
    document_registry: Arc<DocumentRegistry>,
}

impl LimeServer {
    pub fn new(
        config: ServerConfig,
        authenticator: Arc<dyn Authenticator>,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Self {
        Self {
            config,
            authenticator,
            handler,
            registry: NodeRegistry::new(),
            document_registry: Arc::new(DocumentRegistry::new()),
        }
    }

    /// Replace the document registry consulted when decoding payloads
    pub fn with_document_registry(mut self, registry: Arc<DocumentRegistry>) -> Self {
        self.document_registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Bind the configured TCP listener
    pub async fn bind(&self) -> Result<TcpTransportListener> {
        let tls = match &self.config.tls {
            Some(identity) => Some(Arc::new(tls_server_config(
                &identity.cert_pem,
                &identity.key_pem,
            )?)),
            None => None,
        };

        let transport_config = TcpTransportConfig {
            read_limit: self.config.read_limit,
            registry: self.document_registry.clone(),
            trace_writer: None,
        };

        let listener =
            TcpTransportListener::bind(self.config.bind_addr, transport_config, tls).await?;
        info!("LIME server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and run the accept loop
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Run the accept loop on an already bound listener
    pub async fn serve(&self, listener: TcpTransportListener) -> Result<()> {
        loop {
            let transport = match listener.accept().await {
                Ok(transport) => transport,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };

            let connection = SessionConnection {
                authenticator: self.authenticator.clone(),
                handler: self.handler.clone(),
                registry: self.registry.clone(),
                channel_config: ChannelConfig {
                    inbound_buffer: self.config.inbound_buffer,
                },
                server_channel_config: ServerChannelConfig {
                    node: self.config.node(),
                    compressions: self.config.compressions.clone(),
                    encryptions: self.config.encryptions.clone(),
                    schemes: self.config.schemes.clone(),
                },
            };

            tokio::spawn(async move {
                if let Err(e) = connection.handle(Arc::new(transport) as Arc<dyn Transport>).await {
                    debug!("session ended: {e}");
                }
            });
        }
    }
}

/// Everything one accepted connection needs to run its session
struct SessionConnection {
    authenticator: Arc<dyn Authenticator>,
    handler: Arc<dyn EnvelopeHandler>,
    registry: Arc<NodeRegistry>,
    channel_config: ChannelConfig,
    server_channel_config: ServerChannelConfig,
}

impl SessionConnection {
    async fn handle(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let channel = ServerChannel::new(
            transport,
            self.channel_config.clone(),
            self.server_channel_config.clone(),
        );

        let registered: Mutex<Option<Node>> = Mutex::new(None);
        let establishment = channel
            .establish_session(
                |identity, authentication| {
                    self.authenticator.authenticate(identity, authentication)
                },
                |identity, instance| {
                    let node =
                        self.registry
                            .register(identity, instance, channel.channel().clone());
                    *registered.lock() = Some(node.clone());
                    node
                },
            )
            .await;

        let result = match establishment {
            Ok(_) => self.dispatch(&channel).await,
            Err(e) => Err(e),
        };

        if let Some(node) = registered.lock().take() {
            self.registry.unregister(&node);
        }
        result
    }

    /// Route inbound envelopes until the session ends
    async fn dispatch(&self, channel: &ServerChannel) -> Result<()> {
        loop {
            tokio::select! {
                result = channel.receive_message() => match result {
                    Ok(message) => self.handler.on_message(channel, message).await?,
                    Err(_) => break,
                },
                result = channel.receive_notification() => match result {
                    Ok(notification) => self.handler.on_notification(channel, notification).await?,
                    Err(_) => break,
                },
                result = channel.receive_command() => match result {
                    Ok(command) => self.handler.on_command(channel, command).await?,
                    Err(_) => break,
                },
                result = channel.receive_session() => {
                    match result {
                        Ok(session) if session.state == SessionState::Finishing => {
                            channel.send_finished_session().await?;
                        }
                        Ok(session) => {
                            debug!(state = %session.state, "session reached a terminal state");
                        }
                        Err(_) => {}
                    }
                    break;
                },
            }
        }
        Ok(())
    }
}
