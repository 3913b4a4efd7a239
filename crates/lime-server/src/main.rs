//! LIME server CLI
//!
//! Binds a TCP listener, authenticates clients against a static account
//! list and dispatches envelopes with the default handlers.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use lime_common::crypto::cert::generate_self_signed_cert;
use lime_server::config::{ServerConfig, TlsIdentity, DEFAULT_PORT};
use lime_server::{DefaultEnvelopeHandler, LimeServer, MemoryAuthenticator};

#[derive(Parser, Debug)]
#[command(name = "lime-server", about = "LIME protocol server", version)]
struct Cli {
    /// Address to bind the TCP listener to
    #[arg(long, default_value_t = default_bind())]
    bind: SocketAddr,

    /// Domain this server is authoritative for
    #[arg(long, default_value = "localhost")]
    domain: String,

    /// Accounts in name=password form; may be repeated
    #[arg(long = "account", value_name = "NAME=PASSWORD")]
    accounts: Vec<String>,

    /// Accept guest sessions without credentials
    #[arg(long)]
    allow_guest: bool,

    /// Path to a PEM certificate enabling TLS
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<String>,

    /// Path to the PEM private key for --tls-cert
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<String>,

    /// Generate a self-signed certificate and offer TLS
    #[arg(long, conflicts_with = "tls_cert")]
    self_signed: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        EnvFilter::new(format!("lime_server={level},lime_common={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
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
    let mut config = ServerConfig::new(cli.bind, cli.domain.clone());

    if cli.self_signed {
        let cert = generate_self_signed_cert(&cli.domain, 365)?;
        config = config.with_tls(TlsIdentity {
            cert_pem: cert.cert_pem,
            key_pem: cert.key_pem,
        });
        tracing::warn!("using a self-signed certificate; clients must trust it explicitly");
    } else if let (Some(cert_path), Some(key_path)) = (&cli.tls_cert, &cli.tls_key) {
        config = config.with_tls(TlsIdentity {
            cert_pem: std::fs::read_to_string(cert_path)?,
            key_pem: std::fs::read_to_string(key_path)?,
        });
    }

    let authenticator = MemoryAuthenticator::new(cli.allow_guest);
    for account in &cli.accounts {
        let (name, password) = account
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid account '{account}', expected NAME=PASSWORD"))?;
        authenticator.add_account(name, password);
    }

    let server = LimeServer::new(
        config,
        Arc::new(authenticator),
        Arc::new(DefaultEnvelopeHandler),
    );
    server.run().await?;
    Ok(())
}
