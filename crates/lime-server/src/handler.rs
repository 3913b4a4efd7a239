//! Established-phase envelope handlers
//!
//! The server dispatch loop hands each inbound envelope to a handler.
//! The defaults are deliberately conservative: messages are acknowledged
//! when the sender asked for it, command requests are refused, and
//! notifications are only logged.

use async_trait::async_trait;

use lime_common::channel::Channel;
use lime_common::error::Result;
use lime_common::protocol::{Command, Message, Notification, NotificationEvent};
use lime_common::types::{reason_codes, Reason};
use tracing::debug;

/// Application hooks for envelopes received on an established session
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn on_message(&self, channel: &Channel, message: Message) -> Result<()> {
        // Acknowledge when the sender expects a delivery notification
        if message.header.id.is_some() {
            let mut notification = Notification::new(NotificationEvent::Received);
            notification.header.id = message.header.id.clone();
            notification.header.to = message.header.from.clone();
            channel.send_notification(notification).await?;
        }
        Ok(())
    }

    async fn on_notification(&self, _channel: &Channel, notification: Notification) -> Result<()> {
        debug!(event = %notification.event, "notification received");
        Ok(())
    }

    async fn on_command(&self, channel: &Channel, command: Command) -> Result<()> {
        if command.is_request() {
            let response = command.failure_response(Reason::new(
                reason_codes::GENERAL_ERROR,
                "the resource is not supported",
            ));
            channel.send_command(response).await?;
        }
        Ok(())
    }
}

/// Handler with only the default behaviors
#[derive(Debug, Default)]
pub struct DefaultEnvelopeHandler;

#[async_trait]
impl EnvelopeHandler for DefaultEnvelopeHandler {}
