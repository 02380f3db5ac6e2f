//! Certificate management — generation and PEM loading.
//!
//! Provides:
//! - [`CertGenerator`] — `rcgen`-backed generation of the server CA and of
//!   per-user client certificates signed by it
//! - [`parse_certs`] / [`parse_private_key`] — PEM decoding for rustls
//!
//! # File format
//!
//! All certificates and keys are exchanged in **PEM format**, the same shape
//! the certificate store persists and the backend trusts.

use chrono::{DateTime, Utc};
use rand::Rng;
use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Public: certificate generation
// ─────────────────────────────────────────────────────────────────────────────

/// Validity window of a generated certificate.
#[derive(Debug, Clone, Copy)]
pub struct Validity {
    /// Start of validity.
    pub not_before: DateTime<Utc>,
    /// End of validity; the certificate is unusable from this instant on.
    pub not_after: DateTime<Utc>,
}

impl Validity {
    /// A window of `days` starting at `now`.
    #[must_use]
    pub fn days_from(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            not_before: now,
            not_after: now + chrono::Duration::days(i64::from(days)),
        }
    }
}

/// Parameters for generating the server CA certificate.
#[derive(Debug)]
pub struct CaParams<'a> {
    /// Common Name for the CA (e.g. `"SAP Certificate Proxy CA"`).
    pub cn: &'a str,
    /// Validity window.
    pub validity: Validity,
}

/// Parameters for generating a leaf certificate (client or test server).
#[derive(Debug)]
pub struct LeafCertParams<'a> {
    /// Common Name. For user certificates this is the SAP user id.
    pub cn: &'a str,
    /// Organisational Unit (optional).
    pub ou: Option<&'a str>,
    /// Subject Alternative Names — DNS entries.
    pub san_dns: Vec<String>,
    /// Extended key usage of the certificate.
    pub usage: LeafUsage,
    /// Validity window.
    pub validity: Validity,
}

/// What a leaf certificate is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafUsage {
    /// TLS client authentication (per-user certificates).
    Client,
    /// TLS server authentication.
    Server,
}

/// Generated certificate and key pair in PEM format.
///
/// `key_pem` is the plaintext PKCS#8 key; callers seal it before it leaves
/// the issuer.
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

impl std::fmt::Debug for GeneratedCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedCert")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}

/// Certificate generator backed by `rcgen`.
pub struct CertGenerator;

impl CertGenerator {
    /// Generate a self-signed CA certificate.
    ///
    /// The CA certificate signs user certificates via
    /// [`CertGenerator::issue_leaf`] and is the trust anchor handed to the
    /// backend connection.
    ///
    /// # Errors
    ///
    /// Returns `Error::CertGeneration` if key generation or certificate
    /// serialisation fails.
    pub fn init_ca(params: &CaParams<'_>) -> Result<GeneratedCert> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::CertGeneration(format!("Failed to generate CA key: {e}")))?;

        let mut ca_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.cn);
        ca_params.distinguished_name = dn;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        ca_params.serial_number = Some(random_serial());
        apply_validity(&mut ca_params, params.validity)?;

        let ca_cert = ca_params
            .self_signed(&key_pair)
            .map_err(|e| Error::CertGeneration(format!("CA cert generation failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: ca_cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// Issue a leaf certificate signed by `ca_cert_pem` / `ca_key_pem`.
    ///
    /// Every call generates a fresh key pair and a random serial, so two
    /// issuances for the same subject never share material.
    ///
    /// # Errors
    ///
    /// Returns `Error::CertGeneration` if the CA cert/key cannot be parsed,
    /// key generation fails, or certificate serialisation fails.
    pub fn issue_leaf(
        params: &LeafCertParams<'_>,
        ca_cert_pem: &str,
        ca_key_pem: &str,
    ) -> Result<GeneratedCert> {
        let ca_key = KeyPair::from_pem(ca_key_pem)
            .map_err(|e| Error::CertGeneration(format!("Failed to parse CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, ca_key)
            .map_err(|e| Error::CertGeneration(format!("Failed to parse CA cert: {e}")))?;

        let leaf_key = KeyPair::generate()
            .map_err(|e| Error::CertGeneration(format!("Failed to generate leaf key: {e}")))?;

        let mut leaf_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.cn);
        if let Some(ou) = params.ou {
            dn.push(DnType::OrganizationalUnitName, ou);
        }
        leaf_params.distinguished_name = dn;
        leaf_params.serial_number = Some(random_serial());
        leaf_params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        leaf_params.extended_key_usages = vec![match params.usage {
            LeafUsage::Client => ExtendedKeyUsagePurpose::ClientAuth,
            LeafUsage::Server => ExtendedKeyUsagePurpose::ServerAuth,
        }];
        apply_validity(&mut leaf_params, params.validity)?;

        let mut sans: Vec<SanType> = Vec::new();
        for dns in &params.san_dns {
            let ia5 = Ia5String::try_from(dns.as_str())
                .map_err(|e| Error::CertGeneration(format!("Invalid DNS SAN '{dns}': {e}")))?;
            sans.push(SanType::DnsName(ia5));
        }
        leaf_params.subject_alt_names = sans;

        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| Error::CertGeneration(format!("Leaf cert signing failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key.serialize_pem(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Decode all certificates from PEM text.
///
/// # Errors
///
/// Returns `Error::CertGeneration` if the PEM is malformed or contains no
/// certificate blocks.
pub fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::CertGeneration(format!("Failed to parse certificate PEM: {e}")))?;

    if certs.is_empty() {
        return Err(Error::CertGeneration(
            "No certificates found in PEM".to_string(),
        ));
    }

    Ok(certs)
}

/// Decode the first private key from plaintext PEM.
///
/// Supports PKCS#8 (`PRIVATE KEY`), RSA, and SEC1 EC keys.
///
/// # Errors
///
/// Returns `Error::CertGeneration` if the PEM contains no usable key. The
/// error never includes key bytes.
pub fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| Error::CertGeneration(format!("Failed to parse private key: {e}")))?
        .ok_or_else(|| Error::CertGeneration("No private key found in PEM".to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn apply_validity(params: &mut CertificateParams, validity: Validity) -> Result<()> {
    if validity.not_after <= validity.not_before {
        return Err(Error::CertGeneration(
            "Certificate validity must end after it starts".to_string(),
        ));
    }
    params.not_before = to_offset_date_time(validity.not_before)?;
    params.not_after = to_offset_date_time(validity.not_after)?;
    Ok(())
}

fn to_offset_date_time(instant: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(instant.timestamp())
        .map_err(|e| Error::CertGeneration(format!("Date calculation error: {e}")))
}

/// Positive 128-bit serial (high bit cleared so DER keeps it unsigned).
fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::rng().random();
    bytes[0] &= 0x7f;
    SerialNumber::from(bytes.to_vec())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
