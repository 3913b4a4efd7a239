//! Certificate generation
//!
//! Provides utilities for generating certificates, primarily for
//! development and testing. Production deployments should use proper PKI
//! infrastructure.

use std::time::Duration;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};

use crate::error::{LimeError, Result};

/// Information about a generated certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// PEM-encoded certificate
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
}

/// Generate a self-signed certificate for development/testing
///
/// The certificate always includes `localhost` and the loopback addresses
/// as subject alternative names so locally bound listeners validate.
///
/// # Security Note
/// Self-signed certificates should ONLY be used for development.
/// Production deployments must use certificates from a trusted CA.
pub fn generate_self_signed_cert(common_name: &str, validity_days: u32) -> Result<CertificateInfo> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "LIME");
    params.distinguished_name = dn;

    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = time::OffsetDateTime::now_utc()
        + Duration::from_secs(validity_days as u64 * 24 * 60 * 60);

    let mut sans = vec![SanType::DnsName(
        common_name
            .to_string()
            .try_into()
            .map_err(|e| LimeError::Certificate(format!("invalid DNS name: {e}")))?,
    )];
    if common_name != "localhost" {
        sans.push(SanType::DnsName(
            "localhost"
                .to_string()
                .try_into()
                .map_err(|e| LimeError::Certificate(format!("invalid DNS name: {e}")))?,
        ));
    }
    sans.push(SanType::IpAddress(std::net::IpAddr::V4(
        std::net::Ipv4Addr::LOCALHOST,
    )));
    sans.push(SanType::IpAddress(std::net::IpAddr::V6(
        std::net::Ipv6Addr::LOCALHOST,
    )));
    params.subject_alt_names = sans;

    let key_pair = KeyPair::generate()
        .map_err(|e| LimeError::Certificate(format!("key generation failed: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| LimeError::Certificate(format!("certificate generation failed: {e}")))?;

    Ok(CertificateInfo {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}
