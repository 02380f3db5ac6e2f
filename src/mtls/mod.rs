//! Certificate material for the outbound mutual-TLS leg.
//!
//! # Architecture
//!
//! ```text
//! CertificateIssuer
//!   → CertGenerator      (rcgen: server CA, per-user client certs)
//!   → sealing            (Argon2id + AES-256-GCM over the private key)
//!   → ClientCredential   (record + passphrase, key stays sealed)
//!   → build_client_config (rustls: client auth, backend trust)
//! ```
//!
//! # Modules
//!
//! - [`cert_manager`] — certificate generation and PEM decoding
//! - [`certificate_info`] — X.509 field extraction (`CertificateInfo`)
//! - [`sealing`] — passphrase protection for keys and secrets at rest
//! - [`credential`] — the credential handed to the proxy
//! - [`client`] — rustls `ClientConfig` construction

pub mod cert_manager;
pub mod certificate_info;
pub mod client;
pub mod credential;
pub mod sealing;

pub use cert_manager::{
    CaParams, CertGenerator, GeneratedCert, LeafCertParams, LeafUsage, Validity, parse_certs,
    parse_private_key,
};
pub use certificate_info::CertificateInfo;
pub use client::build_client_config;
pub use credential::ClientCredential;
