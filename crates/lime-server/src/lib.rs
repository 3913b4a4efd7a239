//! # lime-server
//!
//! Server facade for the LIME protocol: binds a TCP listener, drives the
//! server-side session establishment for each accepted transport, keeps a
//! registry of connected nodes and dispatches established-phase envelopes
//! to pluggable handlers.

pub mod auth;
pub mod config;
pub mod handler;
pub mod registry;
pub mod server;

pub use auth::{Authenticator, MemoryAuthenticator};
pub use config::ServerConfig;
pub use handler::{DefaultEnvelopeHandler, EnvelopeHandler};
pub use registry::NodeRegistry;
pub use server::LimeServer;
