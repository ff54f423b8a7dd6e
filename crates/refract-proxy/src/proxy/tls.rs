//! TLS plumbing: the interception acceptor and the permissive upstream
//! verifier used when re-encrypting terminated tunnels.

use crate::config::SslConfig;
use crate::error::ProxyError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use std::io::Cursor;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// No-op upstream certificate verifier.
///
/// # Warning
/// This disables all TLS security checks - use only against origins you
/// control, such as test doubles behind an interception setup.
#[derive(Debug)]
pub struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

/// Builds the acceptor terminating redirected tunnels from in-memory
/// PEM material. The CA certificate, when present, is appended to the
/// served chain so clients trusting the CA accept the leaf.
pub fn acceptor_from_pem(ssl: &SslConfig) -> Result<TlsAcceptor, ProxyError> {
    let mut cert_reader = Cursor::new(&ssl.cert);
    let mut certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| ProxyError::Tls(format!("failed to parse certificate pem: {e}")))?;

    if certs.is_empty() {
        return Err(ProxyError::Tls(
            "no certificates found in certificate pem".to_string(),
        ));
    }

    if !ssl.ca.is_empty() {
        let mut ca_reader = Cursor::new(&ssl.ca);
        let ca_certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut ca_reader)
            .collect::<Result<_, _>>()
            .map_err(|e| ProxyError::Tls(format!("failed to parse ca pem: {e}")))?;
        certs.extend(ca_certs);
    }

    let mut key_reader = Cursor::new(&ssl.key);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| ProxyError::Tls(format!("failed to parse private key pem: {e}")))?
        .ok_or_else(|| ProxyError::Tls("no private key found in key pem".to_string()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ProxyError::Tls(format!("failed to build tls configuration: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
