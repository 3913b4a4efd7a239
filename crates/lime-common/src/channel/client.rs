//! Client-side session state machine
//!
//! The client proposes and accepts: it opens the session, picks one
//! compression and one encryption from the server's offers, applies them
//! to the transport, authenticates an identity (looping on server
//! challenges) and settles on `established`, or reaches a terminal state.

use std::ops::Deref;
use std::sync::Arc;

use tracing::{debug, info};

use crate::channel::{Channel, ChannelConfig};
use crate::error::{LimeError, Result};
use crate::protocol::{Authentication, AuthenticationScheme, Session, SessionState};
use crate::transport::Transport;
use crate::types::{
    reason_codes, EnvelopeId, Identity, Reason, SessionCompression, SessionEncryption,
};

/// Client end of a LIME session
pub struct ClientChannel {
    inner: Arc<Channel>,
}

impl Deref for ClientChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.inner
    }
}

impl ClientChannel {
    /// Create a client channel around an open transport
    pub fn new(transport: Arc<dyn Transport>, config: ChannelConfig) -> Self {
        Self {
            inner: Channel::new(transport, config),
        }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.inner
    }

    /// Establish the session with the server
    ///
    /// The selectors pick one compression and one encryption from the
    /// server's offers; `authenticate` maps the offered schemes (and the
    /// previous server challenge, when iterating) to the credentials to
    /// present for `identity`. `instance` is the instance label the client
    /// prefers for its node address.
    ///
    /// Returns the `established` session envelope, or an error once the
    /// session reaches `failed`. Deadlines compose from the outside with
    /// `tokio::time::timeout`.
    pub async fn establish_session(
        &self,
        select_compression: impl Fn(&[SessionCompression]) -> SessionCompression + Send,
        select_encryption: impl Fn(&[SessionEncryption]) -> SessionEncryption + Send,
        identity: Identity,
        authenticate: impl FnMut(&[AuthenticationScheme], Option<&Authentication>) -> Authentication
            + Send,
        instance: &str,
    ) -> Result<Session> {
        let result = self
            .establish_inner(
                select_compression,
                select_encryption,
                identity,
                authenticate,
                instance,
            )
            .await;

        if result.is_err() {
            // Terminal either way; a remote failure already tore down
            self.inner.teardown(SessionState::Failed).await;
        }
        result
    }

    async fn establish_inner(
        &self,
        select_compression: impl Fn(&[SessionCompression]) -> SessionCompression + Send,
        select_encryption: impl Fn(&[SessionEncryption]) -> SessionEncryption + Send,
        identity: Identity,
        mut authenticate: impl FnMut(&[AuthenticationScheme], Option<&Authentication>) -> Authentication
            + Send,
        instance: &str,
    ) -> Result<Session> {
        let channel = &self.inner;
        if channel.state() != SessionState::New {
            return Err(LimeError::UnexpectedSessionState {
                expected: SessionState::New,
                actual: channel.state(),
            });
        }

        // Propose the session; the server fixes the definitive id on its
        // first reply
        let mut proposal = Session::new(SessionState::New);
        proposal.header = proposal.header.id(EnvelopeId::new());
        channel.send_session(proposal).await?;

        // Option negotiation
        let negotiating = self.expect_session(SessionState::Negotiating).await?;
        let session_id = negotiating
            .header
            .id
            .clone()
            .ok_or(LimeError::MissingField("id"))?;
        channel.set_session_id(session_id.clone());
        channel.set_state(SessionState::Negotiating);

        let compression = select_compression(
            negotiating
                .compression_options
                .as_deref()
                .unwrap_or(&[SessionCompression::None]),
        );
        let encryption = select_encryption(
            negotiating
                .encryption_options
                .as_deref()
                .unwrap_or(&[SessionEncryption::None]),
        );
        debug!(%compression, %encryption, "negotiating session options");

        let mut choice = Session::new(SessionState::Negotiating);
        choice.header = choice.header.id(session_id.clone());
        choice.compression = Some(compression);
        choice.encryption = Some(encryption);
        channel.send_session(choice).await?;

        let confirmation = self.expect_session(SessionState::Negotiating).await?;
        let compression = confirmation.compression.unwrap_or(compression);
        let encryption = confirmation.encryption.unwrap_or(encryption);

        // Upgrade the transport: compression first, then encryption. The
        // TLS handshake happens here, on the quiesced socket.
        let transport = channel.transport();
        if compression != transport.compression() {
            transport.set_compression(compression).await?;
        }
        if encryption != transport.encryption() {
            transport.set_encryption(encryption).await?;
        }

        // Authentication, iterating on server challenges
        let authenticating = self.expect_session(SessionState::Authenticating).await?;
        channel.set_state(SessionState::Authenticating);

        let mut schemes = authenticating.scheme_options.unwrap_or_default();
        let mut challenge: Option<Authentication> = None;

        loop {
            let authentication = authenticate(&schemes, challenge.as_ref());

            let mut credentials = Session::new(SessionState::Authenticating);
            credentials.header = credentials
                .header
                .id(session_id.clone())
                .from(identity.clone().into_node(instance));
            credentials.authentication = Some(authentication);
            channel.send_session(credentials).await?;

            let response = self.next_session().await?;
            match response.state {
                SessionState::Authenticating => {
                    if let Some(options) = response.scheme_options.clone() {
                        schemes = options;
                    }
                    challenge = response.authentication.clone();
                    debug!("authentication roundtrip requested by the server");
                }
                SessionState::Established => {
                    channel.set_local_node(response.header.to.clone());
                    channel.set_remote_node(response.header.from.clone());
                    channel.set_state(SessionState::Established);
                    channel.start_reader();
                    info!(
                        node = %response.header.to.as_ref().map(ToString::to_string).unwrap_or_default(),
                        "session established"
                    );
                    return Ok(response);
                }
                actual => {
                    channel
                        .fail_locally(Reason::new(
                            reason_codes::PROTOCOL_ERROR,
                            format!("unexpected session state '{actual}'"),
                        ))
                        .await;
                    return Err(LimeError::UnexpectedSessionState {
                        expected: SessionState::Established,
                        actual,
                    });
                }
            }
        }
    }

    /// Ask the server to finish the established session
    ///
    /// Returns the terminal session envelope sent by the server.
    pub async fn finish_session(&self) -> Result<Session> {
        let channel = &self.inner;
        if !channel.is_established() {
            return Err(LimeError::UnexpectedSessionState {
                expected: SessionState::Established,
                actual: channel.state(),
            });
        }

        channel.set_state(SessionState::Finishing);
        let mut finishing = Session::new(SessionState::Finishing);
        finishing.header.id = channel.session_id();
        channel.send_session(finishing).await?;

        let session = channel.receive_session().await?;
        match session.state {
            SessionState::Finished => {
                info!("session finished");
                Ok(session)
            }
            SessionState::Failed => Err(LimeError::SessionFailed {
                reason: session
                    .reason
                    .clone()
                    .unwrap_or_else(|| Reason::new(reason_codes::GENERAL_ERROR, "session failed")),
            }),
            actual => {
                channel
                    .fail_locally(Reason::new(
                        reason_codes::PROTOCOL_ERROR,
                        format!("unexpected session state '{actual}'"),
                    ))
                    .await;
                Err(LimeError::UnexpectedSessionState {
                    expected: SessionState::Finished,
                    actual,
                })
            }
        }
    }

    /// Receive the next session envelope, resolving terminal states
    async fn next_session(&self) -> Result<Session> {
        let session = self.inner.receive_session().await?;
        match session.state {
            SessionState::Failed => {
                let reason = session
                    .reason
                    .clone()
                    .unwrap_or_else(|| Reason::new(reason_codes::GENERAL_ERROR, "session failed"));
                self.inner.fail_locally(reason.clone()).await;
                Err(LimeError::SessionFailed { reason })
            }
            SessionState::Finished => {
                self.inner.teardown(SessionState::Finished).await;
                Err(LimeError::SessionFailed {
                    reason: Reason::new(
                        reason_codes::GENERAL_ERROR,
                        "session finished by the server",
                    ),
                })
            }
            _ => Ok(session),
        }
    }

    async fn expect_session(&self, expected: SessionState) -> Result<Session> {
        let session = self.next_session().await?;
        if session.state != expected {
            let actual = session.state;
            self.inner
                .fail_locally(Reason::new(
                    reason_codes::PROTOCOL_ERROR,
                    format!("unexpected session state '{actual}', expected '{expected}'"),
                ))
                .await;
            return Err(LimeError::UnexpectedSessionState { expected, actual });
        }
        Ok(session)
    }
}
