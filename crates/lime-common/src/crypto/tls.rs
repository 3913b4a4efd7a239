//! TLS configuration utilities
//!
//! Provides secure-by-default TLS configuration for both the client and
//! the server side of a LIME connection.
//!
//! ## Security Defaults
//! - Certificate verification enabled, backed by the webpki roots
//! - Custom CA support for private deployments
//! - The insecure verifier is for development and tests only

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::{LimeError, Result};

/// TLS configuration holder for the client side
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Server name for SNI (defaults to the dialed host)
    pub server_name: Option<String>,
    /// PEM bundle of a custom CA to trust instead of the system roots
    pub ca_cert_pem: Option<String>,
    /// Skip certificate verification (DANGEROUS - dev only)
    pub insecure_skip_verify: bool,
}

/// Create a TLS client configuration
///
/// Suitable for upgrading a client transport once the session negotiation
/// settles on TLS.
pub fn client_config(options: &TlsOptions) -> Result<ClientConfig> {
    let builder = ClientConfig::builder();

    let root_store = match &options.ca_cert_pem {
        Some(ca_pem) => load_root_certs_from_pem(ca_pem)?,
        None => {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            root_store
        }
    };

    let config = if options.insecure_skip_verify {
        // DANGEROUS: Skip verification - only for development!
        tracing::warn!("TLS certificate verification disabled - DO NOT USE IN PRODUCTION");

        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    Ok(config)
}

/// Create a TLS server configuration from PEM-encoded material
pub fn server_config(cert_pem: &str, key_pem: &str) -> Result<ServerConfig> {
    let certs = load_certs_from_pem(cert_pem)?;
    let key = load_key_from_pem(key_pem)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| LimeError::Tls(format!("failed to create server config: {e}")))?;

    Ok(config)
}

/// Load certificates from PEM data
fn load_certs_from_pem(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem.as_bytes());
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .filter_map(|c| c.ok())
        .collect();

    if certs.is_empty() {
        return Err(LimeError::Certificate("no certificates found".to_string()));
    }

    Ok(certs)
}

/// Load a private key from PEM data
fn load_key_from_pem(pem: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(pem.as_bytes());
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| LimeError::Certificate(format!("failed to parse key: {e}")))?
        .ok_or_else(|| LimeError::Certificate("no private key found".to_string()))?;

    Ok(key)
}

/// Load root certificates from PEM data
fn load_root_certs_from_pem(pem: &str) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    let mut reader = std::io::BufReader::new(pem.as_bytes());

    let certs = rustls_pemfile::certs(&mut reader).filter_map(|c| c.ok());
    for cert in certs {
        root_store
            .add(cert)
            .map_err(|e| LimeError::Certificate(format!("failed to add root cert: {e}")))?;
    }

    if root_store.is_empty() {
        return Err(LimeError::Certificate(
            "no root certificates found".to_string(),
        ));
    }

    Ok(root_store)
}

/// Certificate verifier that accepts any certificate (DANGEROUS)
///
/// This is ONLY for development and testing. Never use in production.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cert::generate_self_signed_cert;

    #[test]
    fn test_create_server_config() {
        let cert_info = generate_self_signed_cert("test.local", 1).unwrap();
        let config = server_config(&cert_info.cert_pem, &cert_info.key_pem);
        assert!(config.is_ok());
    }

    #[test]
    fn test_create_client_config_insecure() {
        let options = TlsOptions {
            insecure_skip_verify: true,
            ..TlsOptions::default()
        };
        assert!(client_config(&options).is_ok());
    }

    #[test]
    fn test_create_client_config_custom_ca() {
        let cert_info = generate_self_signed_cert("test.local", 1).unwrap();
        let options = TlsOptions {
            ca_cert_pem: Some(cert_info.cert_pem),
            ..TlsOptions::default()
        };
        assert!(client_config(&options).is_ok());
    }

    #[test]
    fn test_invalid_pem_rejected() {
        assert!(server_config("not a pem", "also not a pem").is_err());
    }
}
