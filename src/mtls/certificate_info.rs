//! Certificate inspection.
//!
//! Parses a PEM certificate and extracts the fields shown to operators and
//! used to derive passphrase secret names: subject, serial, validity, and
//! SHA-256 fingerprint. Never touches key material.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use super::cert_manager::parse_certs;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Certificate info
// ─────────────────────────────────────────────────────────────────────────────

/// Public fields of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    /// Certificate Common Name (CN).
    pub common_name: Option<String>,
    /// First Organisational Unit (OU) in the subject.
    pub organizational_unit: Option<String>,
    /// Issuer Common Name.
    pub issuer_common_name: Option<String>,
    /// Serial number, lowercase hex.
    pub serial: String,
    /// Start of validity.
    pub not_before: DateTime<Utc>,
    /// End of validity.
    pub not_after: DateTime<Utc>,
    /// SHA-256 of the DER encoding, lowercase hex.
    pub fingerprint_sha256: String,
    /// Whether the certificate is a CA.
    pub is_ca: bool,
}

impl CertificateInfo {
    /// Inspect the first certificate in `pem`.
    ///
    /// # Errors
    ///
    /// Returns `Error::CertGeneration` if the PEM holds no parseable
    /// certificate.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = parse_certs(pem)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::CertGeneration("No certificates found in PEM".to_string()))?;
        Self::from_der(der.as_ref())
    }

    /// Inspect a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns `Error::CertGeneration` if the certificate cannot be parsed.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::CertGeneration(format!("Failed to parse certificate: {e}")))?;

        let validity = cert.validity();
        Ok(Self {
            common_name: first_cn(cert.subject()),
            organizational_unit: cert
                .subject()
                .iter_organizational_unit()
                .next()
                .and_then(|attr| attr.as_str().ok())
                .map(str::to_owned),
            issuer_common_name: first_cn(cert.issuer()),
            serial: hex::encode(cert.raw_serial()),
            not_before: to_utc(validity.not_before.timestamp())?,
            not_after: to_utc(validity.not_after.timestamp())?,
            fingerprint_sha256: hex::encode(Sha256::digest(der).as_slice()),
            is_ca: cert.is_ca(),
        })
    }

    /// Whether the certificate is usable at `now` (`not_after` is exclusive).
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now < self.not_after
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

fn first_cn(name: &x509_parser::x509::X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| Error::CertGeneration(format!("Certificate time out of range: {timestamp}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
