//! Server-side session state machine
//!
//! The server is the authority: it assigns the session id on its first
//! reply, offers the negotiable options, validates the client's choice,
//! drives authentication through a caller-supplied callback and assigns
//! the client's node address on success.

use std::ops::Deref;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelConfig};
use crate::error::{LimeError, Result};
use crate::protocol::{Authentication, AuthenticationScheme, Session, SessionState};
use crate::transport::Transport;
use crate::types::{
    reason_codes, EnvelopeId, Identity, Node, Reason, SessionCompression, SessionEncryption,
};

/// Outcome of an authentication attempt
#[derive(Debug, Clone)]
pub enum AuthenticationResult {
    /// The credentials were accepted
    Success,
    /// The credentials were rejected
    Failure(Reason),
    /// The server wants another round; the document is sent back to the
    /// client as a challenge
    Roundtrip(Authentication),
}

/// Options the server offers during establishment
#[derive(Debug, Clone)]
pub struct ServerChannelConfig {
    /// The server's own node address, stamped as `from` on its replies
    pub node: Node,
    /// Compressions offered to the client
    pub compressions: Vec<SessionCompression>,
    /// Encryptions offered to the client
    pub encryptions: Vec<SessionEncryption>,
    /// Authentication schemes offered to the client
    pub schemes: Vec<AuthenticationScheme>,
}

impl ServerChannelConfig {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            compressions: vec![SessionCompression::None],
            encryptions: vec![SessionEncryption::None],
            schemes: vec![AuthenticationScheme::Guest, AuthenticationScheme::Plain],
        }
    }
}

/// Server end of a LIME session
pub struct ServerChannel {
    inner: Arc<Channel>,
    config: ServerChannelConfig,
}

impl Deref for ServerChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.inner
    }
}

impl ServerChannel {
    /// Create a server channel around an accepted transport
    pub fn new(
        transport: Arc<dyn Transport>,
        channel_config: ChannelConfig,
        config: ServerChannelConfig,
    ) -> Self {
        Self {
            inner: Channel::new(transport, channel_config),
            config,
        }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.inner
    }

    /// Establish the session with the client
    ///
    /// `authenticate` judges each credential presentation; `register`
    /// assigns the definitive node address for an authenticated identity
    /// (receiving the instance the client proposed, when any).
    ///
    /// Returns the `established` session envelope sent to the client; on
    /// rejection a `failed` envelope is sent when possible and the error
    /// is returned.
    pub async fn establish_session(
        &self,
        authenticate: impl FnMut(&Identity, &Authentication) -> AuthenticationResult + Send,
        register: impl FnMut(&Identity, Option<&str>) -> Node + Send,
    ) -> Result<Session> {
        let result = self.establish_inner(authenticate, register).await;
        if result.is_err() {
            self.inner.teardown(SessionState::Failed).await;
        }
        result
    }

    async fn establish_inner(
        &self,
        mut authenticate: impl FnMut(&Identity, &Authentication) -> AuthenticationResult + Send,
        mut register: impl FnMut(&Identity, Option<&str>) -> Node + Send,
    ) -> Result<Session> {
        let channel = &self.inner;
        if channel.state() != SessionState::New {
            return Err(LimeError::UnexpectedSessionState {
                expected: SessionState::New,
                actual: channel.state(),
            });
        }

        // The client opens with `new`; the server fixes the session id
        let proposal = channel.receive_session().await?;
        if proposal.state != SessionState::New {
            return self
                .reject(
                    Reason::new(
                        reason_codes::PROTOCOL_ERROR,
                        format!("unexpected session state '{}'", proposal.state),
                    ),
                    LimeError::UnexpectedSessionState {
                        expected: SessionState::New,
                        actual: proposal.state,
                    },
                )
                .await;
        }

        let session_id = EnvelopeId::new();
        channel.set_session_id(session_id.clone());
        channel.set_state(SessionState::Negotiating);
        debug!(%session_id, "session proposed");

        // Offer the negotiable options
        let mut offer = Session::new(SessionState::Negotiating);
        offer.header = offer.header.id(session_id.clone()).from(self.config.node.clone());
        offer.compression_options = Some(self.config.compressions.clone());
        offer.encryption_options = Some(self.config.encryptions.clone());
        channel.send_session(offer).await?;

        // Validate the client's choice
        let choice = channel.receive_session().await?;
        if choice.state != SessionState::Negotiating {
            return self
                .reject(
                    Reason::new(
                        reason_codes::PROTOCOL_ERROR,
                        format!("unexpected session state '{}'", choice.state),
                    ),
                    LimeError::UnexpectedSessionState {
                        expected: SessionState::Negotiating,
                        actual: choice.state,
                    },
                )
                .await;
        }

        let compression = choice.compression.unwrap_or(SessionCompression::None);
        if !self.config.compressions.contains(&compression) {
            return self
                .reject(
                    Reason::new(
                        reason_codes::NEGOTIATION_ERROR,
                        format!("compression '{compression}' was not offered"),
                    ),
                    LimeError::UnsupportedCompression(compression),
                )
                .await;
        }

        let encryption = choice.encryption.unwrap_or(SessionEncryption::None);
        if !self.config.encryptions.contains(&encryption) {
            return self
                .reject(
                    Reason::new(
                        reason_codes::NEGOTIATION_ERROR,
                        format!("encryption '{encryption}' was not offered"),
                    ),
                    LimeError::UnsupportedEncryption(encryption),
                )
                .await;
        }

        // Echo the agreed options, then upgrade the transport in the same
        // order the client does: compression first, then encryption
        let mut echo = Session::new(SessionState::Negotiating);
        echo.header = echo.header.id(session_id.clone()).from(self.config.node.clone());
        echo.compression = Some(compression);
        echo.encryption = Some(encryption);
        channel.send_session(echo).await?;

        let transport = channel.transport();
        if compression != transport.compression() {
            transport.set_compression(compression).await?;
        }
        if encryption != transport.encryption() {
            transport.set_encryption(encryption).await?;
        }

        // Authentication
        channel.set_state(SessionState::Authenticating);
        let mut auth_offer = Session::new(SessionState::Authenticating);
        auth_offer.header = auth_offer
            .header
            .id(session_id.clone())
            .from(self.config.node.clone());
        auth_offer.scheme_options = Some(self.config.schemes.clone());
        channel.send_session(auth_offer).await?;

        loop {
            let credentials = channel.receive_session().await?;
            if credentials.state != SessionState::Authenticating {
                return self
                    .reject(
                        Reason::new(
                            reason_codes::PROTOCOL_ERROR,
                            format!("unexpected session state '{}'", credentials.state),
                        ),
                        LimeError::UnexpectedSessionState {
                            expected: SessionState::Authenticating,
                            actual: credentials.state,
                        },
                    )
                    .await;
            }

            let Some(from) = credentials.header.from.clone() else {
                return self
                    .reject(
                        Reason::new(reason_codes::PROTOCOL_ERROR, "credentials carry no identity"),
                        LimeError::MissingField("from"),
                    )
                    .await;
            };
            let Some(authentication) = credentials.authentication.clone() else {
                return self
                    .reject(
                        Reason::new(reason_codes::PROTOCOL_ERROR, "credentials carry no authentication"),
                        LimeError::MissingField("authentication"),
                    )
                    .await;
            };

            let scheme = authentication.scheme();
            if !self.config.schemes.contains(&scheme) {
                return self
                    .reject(
                        Reason::new(
                            reason_codes::NEGOTIATION_ERROR,
                            format!("authentication scheme '{scheme}' was not offered"),
                        ),
                        LimeError::SchemeNotOffered(scheme),
                    )
                    .await;
            }

            match authenticate(&from.identity, &authentication) {
                AuthenticationResult::Roundtrip(challenge) => {
                    debug!(identity = %from.identity, "authentication roundtrip");
                    let mut session = Session::new(SessionState::Authenticating);
                    session.header = session
                        .header
                        .id(session_id.clone())
                        .from(self.config.node.clone());
                    session.authentication = Some(challenge);
                    channel.send_session(session).await?;
                }
                AuthenticationResult::Failure(reason) => {
                    warn!(identity = %from.identity, %reason, "authentication failed");
                    return self
                        .reject(reason.clone(), LimeError::SessionFailed { reason })
                        .await;
                }
                AuthenticationResult::Success => {
                    let instance = match from.instance.as_str() {
                        "" => None,
                        instance => Some(instance),
                    };
                    let node = register(&from.identity, instance);

                    channel.set_local_node(Some(self.config.node.clone()));
                    channel.set_remote_node(Some(node.clone()));

                    let mut established = Session::new(SessionState::Established);
                    established.header = established
                        .header
                        .id(session_id.clone())
                        .from(self.config.node.clone())
                        .to(node.clone());
                    channel.send_session(established.clone()).await?;
                    channel.set_state(SessionState::Established);
                    channel.start_reader();
                    info!(node = %node, "session established");
                    return Ok(established);
                }
            }
        }
    }

    /// Reply `finished` to a client that asked to finish, then tear down
    pub async fn send_finished_session(&self) -> Result<()> {
        let mut session = Session::new(SessionState::Finished);
        session.header.id = self.inner.session_id();
        self.inner.send_session(session).await?;
        self.inner.teardown(SessionState::Finished).await;
        Ok(())
    }

    /// Fail the session towards the client, then tear down
    pub async fn send_failed_session(&self, reason: Reason) -> Result<()> {
        let mut session = Session::failure(reason.clone());
        session.header.id = self.inner.session_id();
        let sent = self.inner.send_session(session).await;
        self.inner.fail_locally(reason).await;
        sent
    }

    /// Send the failure when the wire still permits it, then surface `error`
    async fn reject(&self, reason: Reason, error: LimeError) -> Result<Session> {
        let mut session = Session::failure(reason.clone());
        session.header.id = self.inner.session_id();
        if let Err(e) = self.inner.send_session(session).await {
            debug!("could not notify the peer of the failure: {e}");
        }
        self.inner.fail_locally(reason).await;
        Err(error)
    }
}
