//! TLS material loading
//!
//! Certificates are checked for expiry at load time; stale material is a
//! startup failure, not a per-handshake one.

use std::fs::File;
use std::io::BufReader;

use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tracing::debug;

/// Errors from loading TLS material
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to read TLS material: {0}")]
    Io(#[from] std::io::Error),

    #[error("No certificate found in {0}")]
    NoCertificate(String),

    #[error("No private key found in {0}")]
    NoPrivateKey(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("TLS certificate is expired or not yet valid (not_after: {0})")]
    OutsideValidity(String),

    #[error("TLS setup failed: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Load a PEM certificate chain and private key into a server config.
///
/// Fails when the leaf certificate is outside its validity window.
pub fn load_tls(cert_file: &str, key_file: &str) -> Result<rustls::ServerConfig, TlsError> {
    let mut cert_reader = BufReader::new(File::open(cert_file)?);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(cert_file.to_string()));
    }
    check_validity(&certs[0])?;

    let mut key_reader = BufReader::new(File::open(key_file)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| TlsError::NoPrivateKey(key_file.to_string()))?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

fn check_validity(cert: &CertificateDer<'_>) -> Result<(), TlsError> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
    let validity = parsed.validity();
    debug!(not_after = %validity.not_after, "checked TLS certificate validity");
    if !validity.is_valid() {
        return Err(TlsError::OutsideValidity(validity.not_after.to_string()));
    }
    Ok(())
}
