//! Command envelope: request/reply interactions over resources

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentRegistry};
use crate::error::{LimeError, Result};
use crate::protocol::envelope::{EnvelopeHeader, RawEnvelope};
use crate::types::{LimeUri, MediaType, Reason};

/// Allows the manipulation of node resources, like server session
/// parameters or protocol extension information
///
/// A request carries a method and no status; the matching response carries
/// the same `id` plus a status, and optionally a resource or a reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub header: EnvelopeHeader,
    /// Action to be taken on the resource
    pub method: CommandMethod,
    /// Universal identifier of the resource
    pub uri: Option<LimeUri>,
    /// MIME declaration of the resource type
    pub media_type: Option<MediaType>,
    /// Server resource representation
    pub resource: Option<Document>,
    /// Indicates the result of a processed request; absent on requests
    pub status: Option<CommandStatus>,
    /// In the case of a failed command, details about the problem
    pub reason: Option<Reason>,
}

impl Command {
    /// Create a request with a freshly generated id
    pub fn new(method: CommandMethod) -> Self {
        Self {
            header: EnvelopeHeader::with_generated_id(),
            method,
            uri: None,
            media_type: None,
            resource: None,
            status: None,
            reason: None,
        }
    }

    pub fn with_uri(mut self, uri: LimeUri) -> Self {
        self.uri = Some(uri);
        self
    }

    /// Attach a resource document, recording its media type
    pub fn with_resource(mut self, media_type: MediaType, resource: impl Into<Document>) -> Self {
        self.media_type = Some(media_type);
        self.resource = Some(resource.into());
        self
    }

    /// Whether this command is a request still awaiting a response
    pub fn is_request(&self) -> bool {
        self.status.is_none()
    }

    /// Build the success response for this request, echoing its id and
    /// addressing the original sender
    pub fn success_response(&self) -> Command {
        self.response(CommandStatus::Success, None)
    }

    /// Build the failure response for this request
    pub fn failure_response(&self, reason: Reason) -> Command {
        self.response(CommandStatus::Failure, Some(reason))
    }

    fn response(&self, status: CommandStatus, reason: Option<Reason>) -> Command {
        Command {
            header: EnvelopeHeader {
                id: self.header.id.clone(),
                from: self.header.to.clone(),
                to: self.header.from.clone(),
                pp: None,
                metadata: Default::default(),
            },
            method: self.method,
            uri: None,
            media_type: None,
            resource: None,
            status: Some(status),
            reason,
        }
    }

    pub(crate) fn from_raw(mut raw: RawEnvelope, registry: &DocumentRegistry) -> Result<Command> {
        let header = raw.take_header();
        let method = raw.method.ok_or(LimeError::MissingField("method"))?;

        let resource = match (&raw.resource, &raw.media_type) {
            (Some(value), Some(media_type)) => Some(registry.decode(value, media_type)?),
            (Some(_), None) => return Err(LimeError::MissingField("type")),
            (None, _) => None,
        };

        Ok(Command {
            header,
            method,
            uri: raw.uri,
            media_type: raw.media_type,
            resource,
            status: raw.status,
            reason: raw.reason,
        })
    }

    pub(crate) fn to_raw(&self) -> Result<RawEnvelope> {
        if self.resource.is_some() && self.media_type.is_none() {
            return Err(LimeError::MissingField("type"));
        }

        let mut raw = RawEnvelope::from(self.header.clone());
        raw.method = Some(self.method);
        raw.uri = self.uri.clone();
        raw.media_type = self.media_type.clone();
        raw.resource = self.resource.as_ref().map(Document::to_value);
        raw.status = self.status;
        raw.reason = self.reason.clone();
        Ok(raw)
    }
}

/// Action to be taken on a command's resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMethod {
    Get,
    Set,
    Delete,
    Subscribe,
    Unsubscribe,
    Observe,
    Merge,
}

impl fmt::Display for CommandMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandMethod::Get => write!(f, "get"),
            CommandMethod::Set => write!(f, "set"),
            CommandMethod::Delete => write!(f, "delete"),
            CommandMethod::Subscribe => write!(f, "subscribe"),
            CommandMethod::Unsubscribe => write!(f, "unsubscribe"),
            CommandMethod::Observe => write!(f, "observe"),
            CommandMethod::Merge => write!(f, "merge"),
        }
    }
}

/// Result of a processed command request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Failure,
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::Success => write!(f, "success"),
            CommandStatus::Failure => write!(f, "failure"),
        }
    }
}
