//! The channel: a typed multiplexer over one transport
//!
//! A channel owns a transport and mediates envelope exchange for one
//! session. Inbound envelopes are split onto four demultiplexed queues by
//! a single background reader; outbound sends are serialized so one full
//! envelope is written atomically. Command requests are correlated with
//! their responses through a pending table of one-shot slots.
//!
//! The background reader starts when the session reaches `established`.
//! Before that the state machines consume the transport sequentially,
//! which also quiesces the socket for the in-place TLS upgrade.

pub mod client;
mod queue;
pub mod server;

pub use client::ClientChannel;
pub use server::{AuthenticationResult, ServerChannel, ServerChannelConfig};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LimeError, Result};
use crate::protocol::{
    Command, Envelope, EnvelopeKind, Message, Notification, Session, SessionState,
    DEFAULT_INBOUND_BUFFER,
};
use crate::transport::Transport;
use crate::types::{reason_codes, EnvelopeId, Node, Reason};

use queue::InboundQueue;

/// Configuration options for a channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Capacity of each inbound demux buffer
    pub inbound_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }
}

/// The in-process object that owns a transport and mediates envelope
/// exchange for one session
pub struct Channel {
    transport: Arc<dyn Transport>,

    state: RwLock<SessionState>,
    session_id: RwLock<Option<EnvelopeId>>,
    local_node: RwLock<Option<Node>>,
    remote_node: RwLock<Option<Node>>,
    failure_reason: RwLock<Option<Reason>>,

    /// Serializes outbound envelopes so each one hits the wire atomically
    send_lock: tokio::sync::Mutex<()>,
    /// Outstanding command requests awaiting their response
    pending: DashMap<EnvelopeId, oneshot::Sender<Command>>,

    messages: InboundQueue<Message>,
    notifications: InboundQueue<Notification>,
    commands: InboundQueue<Command>,
    sessions: InboundQueue<Session>,

    shutdown: CancellationToken,
    closed: AtomicBool,
    reader_started: AtomicBool,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    /// Create a channel around an open transport, in state `new`
    pub fn new(transport: Arc<dyn Transport>, config: ChannelConfig) -> Arc<Self> {
        let buffer = config.inbound_buffer;
        Arc::new(Self {
            transport,
            state: RwLock::new(SessionState::New),
            session_id: RwLock::new(None),
            local_node: RwLock::new(None),
            remote_node: RwLock::new(None),
            failure_reason: RwLock::new(None),
            send_lock: tokio::sync::Mutex::new(()),
            pending: DashMap::new(),
            messages: InboundQueue::new(buffer, "message"),
            notifications: InboundQueue::new(buffer, "notification"),
            commands: InboundQueue::new(buffer, "command"),
            sessions: InboundQueue::new(buffer, "session"),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            reader_started: AtomicBool::new(false),
            reader: parking_lot::Mutex::new(None),
        })
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Session id assigned by the server, once known
    pub fn session_id(&self) -> Option<EnvelopeId> {
        self.session_id.read().clone()
    }

    /// Address assigned to the local party on establishment
    pub fn local_node(&self) -> Option<Node> {
        self.local_node.read().clone()
    }

    /// Address of the remote party, once known
    pub fn remote_node(&self) -> Option<Node> {
        self.remote_node.read().clone()
    }

    /// Reason reported by a failed session, if any
    pub fn failure_reason(&self) -> Option<Reason> {
        self.failure_reason.read().clone()
    }

    pub fn is_established(&self) -> bool {
        self.state() == SessionState::Established
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // === Outbound ===

    pub async fn send_message(&self, message: Message) -> Result<()> {
        self.ensure_send_allowed(EnvelopeKind::Message)?;
        self.send_envelope(Envelope::Message(message)).await
    }

    pub async fn send_notification(&self, notification: Notification) -> Result<()> {
        self.ensure_send_allowed(EnvelopeKind::Notification)?;
        self.send_envelope(Envelope::Notification(notification)).await
    }

    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.ensure_send_allowed(EnvelopeKind::Command)?;
        self.send_envelope(Envelope::Command(command)).await
    }

    pub async fn send_session(&self, session: Session) -> Result<()> {
        self.ensure_send_allowed(EnvelopeKind::Session)?;
        self.send_envelope(Envelope::Session(session)).await
    }

    /// Outbound admission mirrors the receive table: sessions flow in any
    /// non-terminal state, everything else only while established.
    /// Violations fail synchronously and do not touch the transport.
    fn ensure_send_allowed(&self, kind: EnvelopeKind) -> Result<()> {
        let state = self.state();
        let allowed = match kind {
            EnvelopeKind::Session => !state.is_terminal(),
            _ => state == SessionState::Established,
        };
        if allowed {
            Ok(())
        } else {
            Err(LimeError::InvalidState { kind, state })
        }
    }

    async fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(LimeError::ChannelClosed);
        }
        let _guard = self.send_lock.lock().await;
        self.transport.send(&envelope).await
    }

    // === Inbound ===

    /// Next inbound message; suspends until one arrives or the channel
    /// closes
    pub async fn receive_message(&self) -> Result<Message> {
        self.messages.pop().await
    }

    pub async fn receive_notification(&self) -> Result<Notification> {
        self.notifications.pop().await
    }

    pub async fn receive_command(&self) -> Result<Command> {
        self.commands.pop().await
    }

    /// Next inbound session envelope
    ///
    /// Before establishment the transport is consumed directly, one
    /// envelope per call; a non-session arrival is a state violation that
    /// fails the session. Once the reader runs, session envelopes come
    /// from the demux queue.
    pub async fn receive_session(&self) -> Result<Session> {
        if self.reader_started.load(Ordering::Acquire) {
            return self.sessions.pop().await;
        }

        match self.transport.receive().await? {
            Envelope::Session(session) => Ok(session),
            envelope => {
                let kind = envelope.kind();
                let state = self.state();
                warn!(%kind, %state, "received non-session envelope during establishment");
                self.fail_locally(Reason::new(
                    reason_codes::PROTOCOL_ERROR,
                    format!("unexpected {kind} envelope in state '{state}'"),
                ))
                .await;
                Err(LimeError::InvalidState { kind, state })
            }
        }
    }

    // === Request/reply correlation ===

    /// Send a command request and await its single matching response
    ///
    /// Completes on the matching response or on channel closure; dropping
    /// the returned future (caller cancellation or deadline) removes the
    /// pending slot, and a late response is silently discarded.
    pub async fn process_command(&self, command: Command) -> Result<Command> {
        let id = command
            .header
            .id
            .clone()
            .ok_or(LimeError::MissingField("id"))?;

        let (tx, rx) = oneshot::channel();
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => return Err(LimeError::DuplicateCommandId(id)),
            Entry::Vacant(entry) => {
                entry.insert(tx);
            }
        }
        let _slot = PendingSlot {
            pending: &self.pending,
            id: &id,
        };

        self.send_command(command).await?;

        match rx.await {
            Ok(response) => Ok(response),
            Err(_) => Err(LimeError::ChannelClosed),
        }
    }

    /// Number of outstanding command requests
    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    // === Reader task ===

    /// Start the background reader that demultiplexes inbound envelopes
    pub(crate) fn start_reader(self: &Arc<Self>) {
        if self.reader_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let channel = Arc::clone(self);
        let handle = tokio::spawn(async move { channel.read_loop().await });
        *self.reader.lock() = Some(handle);
    }

    async fn read_loop(&self) {
        loop {
            let envelope = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.transport.receive() => match result {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        if !self.shutdown.is_cancelled() {
                            debug!("transport receive failed: {e}");
                            self.teardown(SessionState::Failed).await;
                        }
                        break;
                    }
                },
            };

            if !self.route(envelope).await {
                break;
            }
        }
    }

    /// Route one inbound envelope; returns false when reading must stop
    async fn route(&self, envelope: Envelope) -> bool {
        let envelope = match envelope {
            Envelope::Session(session) => return self.route_session(session).await,
            other => other,
        };

        let state = self.state();
        if state != SessionState::Established {
            let kind = envelope.kind();
            warn!(%kind, %state, "envelope kind not admitted in this state");
            self.fail_locally(Reason::new(
                reason_codes::PROTOCOL_ERROR,
                format!("unexpected {kind} envelope in state '{state}'"),
            ))
            .await;
            return false;
        }

        match envelope {
            Envelope::Command(command) if command.status.is_some() => {
                if let Some(id) = command.header.id.clone() {
                    if let Some((_, slot)) = self.pending.remove(&id) {
                        if slot.send(command).is_err() {
                            debug!(%id, "command response arrived after its requester left");
                        }
                        return true;
                    }
                }
                // Late or unsolicited response; at-most-once delivery per
                // slot means it is dropped, not surfaced
                debug!("discarding unmatched command response");
            }
            Envelope::Message(message) => self.messages.push(message),
            Envelope::Notification(notification) => self.notifications.push(notification),
            Envelope::Command(command) => self.commands.push(command),
            Envelope::Session(_) => unreachable!("session envelopes are routed above"),
        }
        true
    }

    async fn route_session(&self, session: Session) -> bool {
        match session.state {
            SessionState::Finishing => {
                *self.state.write() = SessionState::Finishing;
                self.sessions.push(session);
                true
            }
            SessionState::Finished | SessionState::Failed => {
                if let Some(reason) = &session.reason {
                    *self.failure_reason.write() = Some(reason.clone());
                }
                let final_state = session.state;
                self.sessions.push(session);
                self.teardown(final_state).await;
                false
            }
            other => {
                let state = self.state();
                warn!(session_state = %other, %state, "session envelope inconsistent with the negotiation sequence");
                self.fail_locally(Reason::new(
                    reason_codes::PROTOCOL_ERROR,
                    format!("unexpected session state '{other}'"),
                ))
                .await;
                false
            }
        }
    }

    // === Lifecycle ===

    pub(crate) fn set_session_id(&self, id: EnvelopeId) {
        *self.session_id.write() = Some(id);
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    pub(crate) fn set_local_node(&self, node: Option<Node>) {
        *self.local_node.write() = node;
    }

    pub(crate) fn set_remote_node(&self, node: Option<Node>) {
        *self.remote_node.write() = node;
    }

    /// Record a local protocol failure and tear the channel down
    pub(crate) async fn fail_locally(&self, reason: Reason) {
        *self.failure_reason.write() = Some(reason);
        self.teardown(SessionState::Failed).await;
    }

    /// Close the channel without an orderly finish
    pub async fn close(&self) {
        self.teardown(SessionState::Finished).await;
    }

    /// Tear the channel down: mark the state terminal, close the
    /// transport (which makes the reader exit), fail every pending
    /// command, then close the demux queues.
    pub(crate) async fn teardown(&self, final_state: SessionState) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut state = self.state.write();
            if !state.is_terminal() {
                *state = final_state;
            }
        }

        self.shutdown.cancel();
        if self.transport.is_connected() {
            let _ = self.transport.close().await;
        }

        // Dropping the slots resolves every awaiting process_command with
        // a channel-closed error
        self.pending.clear();

        self.messages.close();
        self.notifications.close();
        self.commands.close();
        self.sessions.close();

        debug!(state = %self.state(), "channel closed");
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

/// Removes a pending-command slot when its awaiting future goes away
struct PendingSlot<'a> {
    pending: &'a DashMap<EnvelopeId, oneshot::Sender<Command>>,
    id: &'a EnvelopeId,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::transport::InProcessTransport;

    /// A channel forced straight into the established state, plus the
    /// peer's raw transport
    pub(crate) fn established_channel() -> (Arc<Channel>, Arc<InProcessTransport>) {
        let (local, peer) = InProcessTransport::pair();
        let channel = Channel::new(Arc::new(local), ChannelConfig::default());
        channel.set_state(SessionState::Established);
        channel.start_reader();
        (channel, Arc::new(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandMethod, CommandStatus, NotificationEvent};
    use crate::transport::InProcessTransport;
    use crate::types::{LimeUri, MediaType};
    use std::time::Duration;

    use super::test_support::established_channel;

    fn set_presence_command(id: &str) -> Command {
        let mut presence = serde_json::Map::new();
        presence.insert("status".to_string(), serde_json::json!("available"));

        let mut command = Command::new(CommandMethod::Set)
            .with_uri(LimeUri::parse("/presence").unwrap())
            .with_resource(
                MediaType::with_suffix("application", "vnd.lime.presence", "json"),
                presence,
            );
        command.header.id = Some(id.into());
        command
    }

    #[tokio::test]
    async fn test_demux_routes_by_kind() {
        let (channel, peer) = established_channel();

        peer.send(&Envelope::Message(Message::new("Hello world")))
            .await
            .unwrap();
        peer.send(&Envelope::Notification(Notification::new(
            NotificationEvent::Received,
        )))
        .await
        .unwrap();

        let message = channel.receive_message().await.unwrap();
        assert_eq!(
            message.content,
            crate::document::Document::Plain("Hello world".to_string())
        );
        let notification = channel.receive_notification().await.unwrap();
        assert_eq!(notification.event, NotificationEvent::Received);
    }

    #[tokio::test]
    async fn test_process_command_resolves_with_response() {
        let (channel, peer) = established_channel();

        let peer_task = {
            let peer = peer.clone();
            tokio::spawn(async move {
                let Envelope::Command(request) = peer.receive().await.unwrap() else {
                    panic!("expected command");
                };
                assert!(request.is_request());
                peer.send(&Envelope::Command(request.success_response()))
                    .await
                    .unwrap();
            })
        };

        let response = channel
            .process_command(set_presence_command("q1"))
            .await
            .unwrap();
        assert_eq!(response.status, Some(CommandStatus::Success));
        assert_eq!(response.header.id.unwrap().as_str(), "q1");
        assert_eq!(channel.pending_commands(), 0);
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_process_command_timeout_discards_late_response() {
        let (channel, peer) = established_channel();

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            channel.process_command(set_presence_command("q1")),
        )
        .await;
        assert!(result.is_err(), "must time out without a response");
        assert_eq!(channel.pending_commands(), 0);

        // A late response with the same id is silently discarded and the
        // channel stays usable
        let mut late = Command::new(CommandMethod::Set);
        late.header.id = Some("q1".into());
        late.status = Some(CommandStatus::Success);
        peer.send(&Envelope::Command(late)).await.unwrap();

        peer.send(&Envelope::Message(Message::new("still alive")))
            .await
            .unwrap();
        let message = channel.receive_message().await.unwrap();
        assert_eq!(
            message.content,
            crate::document::Document::Plain("still alive".to_string())
        );
        assert!(channel.is_established());
    }

    #[tokio::test]
    async fn test_process_command_duplicate_id() {
        let (channel, _peer) = established_channel();

        let first = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.process_command(set_presence_command("q1")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = channel.process_command(set_presence_command("q1")).await;
        assert!(matches!(result, Err(LimeError::DuplicateCommandId(_))));

        first.abort();
    }

    #[tokio::test]
    async fn test_process_command_requires_id() {
        let (channel, _peer) = established_channel();

        let mut command = Command::new(CommandMethod::Get);
        command.header.id = None;
        let result = channel.process_command(command).await;
        assert!(matches!(result, Err(LimeError::MissingField("id"))));
    }

    #[tokio::test]
    async fn test_send_admission_outside_established() {
        let (local, peer) = InProcessTransport::pair();
        let channel = Channel::new(Arc::new(local), ChannelConfig::default());

        let result = channel.send_message(Message::new("too early")).await;
        assert!(matches!(
            result,
            Err(LimeError::InvalidState {
                kind: EnvelopeKind::Message,
                state: SessionState::New,
            })
        ));

        // The violation never touched the transport
        let nothing = tokio::time::timeout(Duration::from_millis(50), peer.receive()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_inbound_state_violation_fails_channel() {
        let (local, peer) = InProcessTransport::pair();
        let channel = Channel::new(Arc::new(local), ChannelConfig::default());
        channel.set_state(SessionState::Negotiating);

        let pending = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.receive_session().await })
        };

        peer.send(&Envelope::Message(Message::new("out of turn")))
            .await
            .unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(LimeError::InvalidState { .. })));
        assert_eq!(channel.state(), SessionState::Failed);
        assert_eq!(
            channel.failure_reason().unwrap().code,
            reason_codes::PROTOCOL_ERROR
        );

        // The transport was closed under the peer
        assert!(matches!(peer.receive().await, Err(LimeError::TransportClosed)));
    }

    #[tokio::test]
    async fn test_teardown_fails_pending_and_receivers() {
        let (channel, _peer) = established_channel();

        let pending_command = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.process_command(set_presence_command("q1")).await })
        };
        let pending_receive = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.receive_message().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        channel.close().await;

        let command_result = tokio::time::timeout(Duration::from_secs(1), pending_command)
            .await
            .expect("pending command must resolve on close")
            .unwrap();
        assert!(matches!(command_result, Err(LimeError::ChannelClosed)));

        let receive_result = tokio::time::timeout(Duration::from_secs(1), pending_receive)
            .await
            .expect("pending receive must resolve on close")
            .unwrap();
        assert!(matches!(receive_result, Err(LimeError::ChannelClosed)));

        // Sends after closure fail immediately
        let result = channel.send_message(Message::new("late")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_peer_transport_close_fails_channel() {
        let (channel, peer) = established_channel();

        peer.close().await.unwrap();

        // The reader observes the closed transport and tears down
        let result = tokio::time::timeout(Duration::from_secs(1), channel.receive_message())
            .await
            .expect("receive must resolve when the transport closes");
        assert!(matches!(result, Err(LimeError::ChannelClosed)));
        assert_eq!(channel.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_ordering_within_a_kind() {
        let (channel, peer) = established_channel();

        for i in 0..5 {
            peer.send(&Envelope::Message(Message::new(format!("m{i}"))))
                .await
                .unwrap();
        }
        for i in 0..5 {
            let message = channel.receive_message().await.unwrap();
            assert_eq!(
                message.content,
                crate::document::Document::Plain(format!("m{i}"))
            );
        }
    }
}
