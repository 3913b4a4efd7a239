//! LIME client CLI
//!
//! Connects to a server, publishes presence, prints inbound envelopes and
//! finishes the session on ENTER.

use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use lime_client::ClientBuilder;
use lime_common::crypto::tls::TlsOptions;
use lime_common::protocol::{Command, CommandMethod, SessionState};
use lime_common::types::{EnvelopeId, Identity, LimeUri, MediaType, Node};

#[derive(Parser, Debug)]
#[command(name = "lime-client", about = "LIME protocol sample client", version)]
struct Cli {
    /// Server address in host:port form (defaults to the identity's
    /// domain on the standard port)
    #[arg(long)]
    addr: Option<String>,

    /// Identity to authenticate as, in name@domain form
    #[arg(long, default_value = "guest@localhost")]
    identity: Identity,

    /// Clear-text password for the plain scheme; guest without one
    #[arg(long)]
    password: Option<String>,

    /// Instance label for the node address
    #[arg(long, default_value = "default")]
    instance: String,

    /// Negotiate TLS when the server offers it
    #[arg(long)]
    tls: bool,

    /// Skip TLS certificate verification (dev only)
    #[arg(long, requires = "tls")]
    insecure: bool,

    /// Path to a PEM bundle with a custom CA to trust
    #[arg(long, requires = "tls")]
    ca_cert: Option<String>,

    /// Log the raw frames flowing through the transport
    #[arg(long)]
    trace: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose || cli.trace {
            Level::TRACE
        } else {
            Level::INFO
        };
        EnvFilter::new(format!("lime_client={level},lime_common={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut builder = ClientBuilder::new(cli.identity.clone())
        .instance(cli.instance.clone())
        .trace(cli.trace);

    if let Some(addr) = &cli.addr {
        builder = builder.addr(addr.clone());
    }
    if let Some(password) = &cli.password {
        builder = builder.plain_password(password);
    }
    if cli.tls {
        let ca_cert_pem = match &cli.ca_cert {
            Some(path) => Some(std::fs::read_to_string(path)?),
            None => None,
        };
        builder = builder.tls(TlsOptions {
            server_name: None,
            ca_cert_pem,
            insecure_skip_verify: cli.insecure,
        });
    }

    let channel = builder.connect().await?;
    println!(
        "Session established - ID: {} - Node: {}",
        channel
            .session_id()
            .map(|id| id.to_string())
            .unwrap_or_default(),
        channel
            .local_node()
            .map(|node| node.to_string())
            .unwrap_or_default(),
    );

    // Publish presence, the canonical first command
    let mut presence = serde_json::Map::new();
    presence.insert("status".to_string(), serde_json::json!("available"));
    presence.insert("routingRule".to_string(), serde_json::json!("identity"));

    let mut command = Command::new(CommandMethod::Set)
        .with_uri(LimeUri::parse("/presence")?)
        .with_resource(
            MediaType::with_suffix("application", "vnd.lime.presence", "json"),
            presence,
        );
    command.header.id = Some(EnvelopeId::new());
    command.header.to = Some(Node::new(
        Identity::new("postmaster", cli.identity.domain.clone()),
        "",
    ));

    match channel.process_command(command).await {
        Ok(response) => println!(
            "Command response received - ID: {} - Status: {}",
            response
                .header
                .id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            response
                .status
                .map(|status| status.to_string())
                .unwrap_or_default(),
        ),
        Err(e) => println!("Presence command failed: {e}"),
    }

    println!("Press ENTER to exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = lines.next_line() => break,
            result = channel.receive_message() => match result {
                Ok(message) => println!(
                    "Message received - From: {} - Type: {} - Content: {:?}",
                    message.header.from.map(|node| node.to_string()).unwrap_or_default(),
                    message.media_type,
                    message.content,
                ),
                Err(_) => break,
            },
            result = channel.receive_notification() => match result {
                Ok(notification) => println!(
                    "Notification received - ID: {} - Event: {}",
                    notification.header.id.map(|id| id.to_string()).unwrap_or_default(),
                    notification.event,
                ),
                Err(_) => break,
            },
            result = channel.receive_command() => match result {
                Ok(command) => println!(
                    "Command received - ID: {} - Method: {}",
                    command.header.id.map(|id| id.to_string()).unwrap_or_default(),
                    command.method,
                ),
                Err(_) => break,
            },
        }
    }

    if channel.state() == SessionState::Established {
        let session = channel.finish_session().await?;
        println!("Session finished - State: {}", session.state);
    }
    Ok(())
}
