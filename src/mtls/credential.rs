//! Client credential handed from the issuer to the proxy.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use super::client::build_client_config;
use super::sealing::open_private_key_pem;
use crate::store::UserCertificateRecord;
use crate::{Error, Result};

/// Certificate material needed for one outbound mutual-TLS call.
///
/// The private key stays sealed; it is only opened inside
/// [`ClientCredential::tls_client_config`].
pub struct ClientCredential {
    record: UserCertificateRecord,
    passphrase: SecretString,
}

impl ClientCredential {
    /// Pair a stored record with its key passphrase.
    #[must_use]
    pub fn new(record: UserCertificateRecord, passphrase: SecretString) -> Self {
        Self { record, passphrase }
    }

    /// Identity the certificate belongs to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.record.user_id
    }

    /// PEM client certificate.
    #[must_use]
    pub fn certificate_pem(&self) -> &str {
        &self.record.certificate_pem
    }

    /// PEM CA certificate trusted for the backend.
    #[must_use]
    pub fn server_certificate_pem(&self) -> &str {
        &self.record.server_certificate_pem
    }

    /// End of validity (exclusive).
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.record.expires_at
    }

    /// Underlying store record.
    #[must_use]
    pub fn record(&self) -> &UserCertificateRecord {
        &self.record
    }

    /// Open the private key and build a rustls client config from it.
    ///
    /// Key derivation runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns `Error::SecretUnavailable` if the passphrase does not open the
    /// key, or `Error::CertGeneration` if the material is unusable for TLS.
    pub async fn tls_client_config(&self, verify_backend: bool) -> Result<rustls::ClientConfig> {
        let record = self.record.clone();
        let passphrase = SecretString::from(self.passphrase.expose_secret().to_owned());
        tokio::task::spawn_blocking(move || {
            let key_pem = open_private_key_pem(&record.private_key_pem, &passphrase)?;
            build_client_config(
                &record.certificate_pem,
                &key_pem,
                &record.server_certificate_pem,
                verify_backend,
            )
        })
        .await
        .map_err(|e| Error::CertGeneration(format!("Key worker failed: {e}")))?
    }
}

impl std::fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredential")
            .field("user_id", &self.record.user_id)
            .field("expires_at", &self.record.expires_at)
            .finish_non_exhaustive()
    }
}
