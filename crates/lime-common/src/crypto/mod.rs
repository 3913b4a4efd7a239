//! TLS and certificate utilities

pub mod cert;
pub mod tls;

pub use cert::{generate_self_signed_cert, CertificateInfo};
pub use tls::{client_config, server_config, TlsOptions};
