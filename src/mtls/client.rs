//! rustls client configuration for the outbound mutual-TLS call.
//!
//! The proxy presents the user's certificate and trusts the server CA that
//! travels with it. With backend verification disabled the server chain is
//! accepted as-is, but handshake signatures are still checked so the peer
//! must hold the key for the certificate it presents.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::debug;

use super::cert_manager::{parse_certs, parse_private_key};
use crate::{Error, Result};

/// Build a client config presenting `cert_pem` / `key_pem`.
///
/// With `verify_backend` set the backend chain must lead to a certificate
/// in `ca_pem` and match the host name. Otherwise any server certificate is
/// accepted.
///
/// # Errors
///
/// Returns `Error::CertGeneration` if the PEM material is unusable or the
/// key does not match the certificate.
pub fn build_client_config(
    cert_pem: &str,
    key_pem: &str,
    ca_pem: &str,
    verify_backend: bool,
) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let client_chain = parse_certs(cert_pem)?;
    let client_key = parse_private_key(key_pem)?;

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::CertGeneration(format!("TLS protocol setup failed: {e}")))?;

    let builder = if verify_backend {
        let mut roots = RootCertStore::empty();
        for cert in parse_certs(ca_pem)? {
            roots.add(cert).map_err(|e| {
                Error::CertGeneration(format!("Failed to add CA cert to trust store: {e}"))
            })?;
        }
        builder.with_root_certificates(roots)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(&provider)))
    };

    let config = builder
        .with_client_auth_cert(client_chain, client_key)
        .map_err(|e| {
            Error::CertGeneration(format!("TLS config error (cert/key mismatch?): {e}"))
        })?;

    debug!(verify_backend, "mTLS client config built");
    Ok(config)
}

/// Server verifier that skips chain and name checks.
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
