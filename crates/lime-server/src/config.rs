//! Server configuration

use std::net::SocketAddr;

use lime_common::protocol::{AuthenticationScheme, DEFAULT_INBOUND_BUFFER, DEFAULT_READ_LIMIT};
use lime_common::types::{Identity, Node, SessionCompression, SessionEncryption};

/// Default LIME port
pub const DEFAULT_PORT: u16 = 55321;

/// PEM material for the server's TLS identity
#[derive(Debug, Clone)]
pub struct TlsIdentity {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Configuration for a LIME server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    pub bind_addr: SocketAddr,
    /// Domain this server is authoritative for
    pub domain: String,
    /// Name component of the server's node address
    pub name: String,
    /// Maximum size of one inbound envelope
    pub read_limit: usize,
    /// Capacity of each channel's inbound demux buffer
    pub inbound_buffer: usize,
    /// Compressions offered during negotiation
    pub compressions: Vec<SessionCompression>,
    /// Encryptions offered during negotiation
    pub encryptions: Vec<SessionEncryption>,
    /// Authentication schemes offered to clients
    pub schemes: Vec<AuthenticationScheme>,
    /// TLS identity; offering `tls` encryption requires one
    pub tls: Option<TlsIdentity>,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr, domain: impl Into<String>) -> Self {
        Self {
            bind_addr,
            domain: domain.into(),
            name: "postmaster".to_string(),
            read_limit: DEFAULT_READ_LIMIT,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
            compressions: vec![SessionCompression::None],
            encryptions: vec![SessionEncryption::None],
            schemes: vec![AuthenticationScheme::Guest, AuthenticationScheme::Plain],
            tls: None,
        }
    }

    /// Enable TLS with the given identity and offer it during negotiation
    pub fn with_tls(mut self, tls: TlsIdentity) -> Self {
        self.tls = Some(tls);
        if !self.encryptions.contains(&SessionEncryption::Tls) {
            self.encryptions.push(SessionEncryption::Tls);
        }
        self
    }

    /// The server's own node address (`name@domain`)
    pub fn node(&self) -> Node {
        Identity::new(self.name.clone(), self.domain.clone()).into_node("")
    }
}
