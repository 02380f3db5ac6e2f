//! Certificate issuer — per-user certificate lifecycle.
//!
//! # How it works
//!
//! 1. The caller asks for a credential for `user_id`.
//! 2. The stored record is reused while `now < expires_at`, unless the
//!    caller forces regeneration.
//! 3. Otherwise a new key pair is generated, signed by the server CA, and the
//!    private key sealed under a fresh random passphrase.
//! 4. The passphrase is written first, under a name derived from the user id
//!    and the new certificate's fingerprint, then the record. A record is
//!    therefore never visible before the secret it points at.
//!
//! Regeneration for one user is serialised inside the process; concurrent
//! processes may both regenerate and the last record written wins. Secrets
//! of superseded records are left in place for external retention.
//!
//! The server CA is kept in the same certificate store under a reserved id
//! and follows the same secret-then-record write order.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use secrecy::SecretString;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{CertificateConfig, Config, StoreKind};
use crate::mtls::sealing::{generate_passphrase, open_private_key_pem, seal_private_key_pem};
use crate::mtls::{
    CaParams, CertGenerator, CertificateInfo, ClientCredential, LeafCertParams, LeafUsage, Validity,
};
use crate::secrets::{FileSecretStore, InMemorySecretStore, SecretStore, fetch_single_secret};
use crate::store::{
    CertificateStore, FileCertificateStore, InMemoryCertificateStore, UserCertificateRecord,
};
use crate::{Error, Result};

/// Hex digits of the fingerprint appended to passphrase secret names.
const SECRET_SUFFIX_LEN: usize = 16;

/// Issues, reuses, and rotates client certificates.
pub struct CertificateIssuer {
    certificates: Arc<dyn CertificateStore>,
    secrets: Arc<dyn SecretStore>,
    config: CertificateConfig,
    operation_timeout: Duration,
    console_log: bool,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Freshly generated material before it is persisted.
struct Minted {
    cert_pem: String,
    sealed_key_pem: String,
    passphrase: SecretString,
    info: CertificateInfo,
}

impl CertificateIssuer {
    /// Create an issuer over the given stores.
    #[must_use]
    pub fn new(
        certificates: Arc<dyn CertificateStore>,
        secrets: Arc<dyn SecretStore>,
        config: CertificateConfig,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            certificates,
            secrets,
            config,
            operation_timeout,
            console_log: false,
            locks: DashMap::new(),
        }
    }

    /// Build the issuer over the stores selected by `config.store`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file store has no master passphrase,
    /// or a store error if its directories cannot be created.
    pub fn from_config(config: &Config) -> Result<Self> {
        let (certificates, secrets): (Arc<dyn CertificateStore>, Arc<dyn SecretStore>) =
            match config.store.kind {
                StoreKind::Memory => (
                    Arc::new(InMemoryCertificateStore::new()),
                    Arc::new(InMemorySecretStore::new()),
                ),
                StoreKind::File => {
                    let master = config.store.master_passphrase.clone().ok_or_else(|| {
                        Error::Config("store.master_passphrase is required for the file store".to_string())
                    })?;
                    let root = Path::new(&config.store.directory);
                    (
                        Arc::new(FileCertificateStore::new(root.join("certificates"))?),
                        Arc::new(FileSecretStore::new(root.join("secrets"), SecretString::from(master))?),
                    )
                }
            };

        Ok(Self::new(
            certificates,
            secrets,
            config.certificates.clone(),
            config.store.operation_timeout,
        )
        .with_console_log(config.logging.write_console_log))
    }

    /// Log lifecycle decisions at `info` instead of `debug`.
    #[must_use]
    pub fn with_console_log(mut self, enabled: bool) -> Self {
        self.console_log = enabled;
        self
    }

    /// Certificate settings in use.
    #[must_use]
    pub fn config(&self) -> &CertificateConfig {
        &self.config
    }

    // ── User certificates ────────────────────────────────────────────────────

    /// Return a usable credential for `user_id`, generating one if needed.
    ///
    /// # Errors
    ///
    /// - `Error::IdentityResolution` if `user_id` is empty or reserved
    /// - `Error::StoreUnavailable` if the certificate store fails or times out
    /// - `Error::SecretUnavailable` if the passphrase cannot be read or written
    /// - `Error::CertGeneration` if no server CA exists or signing fails
    pub async fn issue_certificate(&self, user_id: &str, force: bool) -> Result<ClientCredential> {
        if user_id.is_empty() || user_id == self.config.server_record_id {
            return Err(Error::identity(format!("'{user_id}' is not a valid user id")));
        }

        if !force {
            if let Some(credential) = self.reuse(user_id, Utc::now()).await? {
                return Ok(credential);
            }
        }

        let slot = LockSlot::new(&self.locks, user_id);
        let _guard = slot.lock().await;
        // Another task may have regenerated while we waited.
        let current = if force {
            None
        } else {
            self.reuse(user_id, Utc::now()).await?
        };
        match current {
            Some(credential) => Ok(credential),
            None => self.regenerate(user_id, force).await,
        }
    }

    async fn reuse(&self, user_id: &str, now: DateTime<Utc>) -> Result<Option<ClientCredential>> {
        let Some(record) = self.get_record(user_id).await? else {
            diagnostic!(self.console_log, user = %user_id, "No certificate on record");
            return Ok(None);
        };
        if !record.is_valid_at(now) {
            diagnostic!(
                self.console_log,
                user = %user_id,
                expired_at = %record.expires_at,
                "Certificate expired"
            );
            return Ok(None);
        }

        let passphrase = self.get_passphrase(&record.passphrase_secret).await?;
        diagnostic!(
            self.console_log,
            user = %user_id,
            expires_at = %record.expires_at,
            "Reusing certificate"
        );
        Ok(Some(ClientCredential::new(record, passphrase)))
    }

    async fn regenerate(&self, user_id: &str, forced: bool) -> Result<ClientCredential> {
        let now = Utc::now();
        let (ca_record, ca_key_pem) = self.server_ca(now).await?;

        let cn = user_id.to_string();
        let validity = Validity::days_from(now, self.config.expiry_in_days);
        let ca_cert_pem = ca_record.certificate_pem.clone();
        let minted = blocking(move || {
            let leaf = CertGenerator::issue_leaf(
                &LeafCertParams {
                    cn: &cn,
                    ou: None,
                    san_dns: vec![],
                    usage: LeafUsage::Client,
                    validity,
                },
                &ca_cert_pem,
                &ca_key_pem,
            )?;
            seal(leaf.cert_pem, &leaf.key_pem)
        })
        .await?;

        let record = UserCertificateRecord {
            user_id: user_id.to_string(),
            certificate_pem: minted.cert_pem,
            private_key_pem: minted.sealed_key_pem,
            server_certificate_pem: ca_record.certificate_pem,
            issued_at: now,
            expires_at: minted.info.not_after,
            passphrase_secret: secret_name(
                &format!("{}{user_id}", self.config.user_key_prefix),
                &minted.info,
            ),
        };
        self.persist(&record, &minted.passphrase).await?;

        diagnostic!(
            self.console_log,
            user = %user_id,
            forced,
            serial = %minted.info.serial,
            expires_at = %record.expires_at,
            "Issued new certificate"
        );
        Ok(ClientCredential::new(record, minted.passphrase))
    }

    // ── Server CA ────────────────────────────────────────────────────────────

    /// Make sure a valid server CA exists, creating one if absent, expired,
    /// or `force` is set.
    ///
    /// # Errors
    ///
    /// Returns store, secret, or generation errors as for
    /// [`issue_certificate`](Self::issue_certificate).
    pub async fn ensure_server_certificate(&self, force: bool) -> Result<CertificateInfo> {
        let slot = LockSlot::new(&self.locks, &self.config.server_record_id);
        let _guard = slot.lock().await;

        if !force {
            let current = self
                .get_record(&self.config.server_record_id)
                .await?
                .filter(|record| record.is_valid_at(Utc::now()));
            if let Some(record) = current {
                // Fails loudly if the CA's secret went missing.
                self.get_passphrase(&record.passphrase_secret).await?;
                debug!(expires_at = %record.expires_at, "Server certificate is current");
                return CertificateInfo::from_pem(&record.certificate_pem);
            }
        }

        self.create_server_ca().await
    }

    async fn create_server_ca(&self) -> Result<CertificateInfo> {
        let now = Utc::now();
        let subject = self.config.server_subject.clone();
        let validity = Validity::days_from(now, self.config.server_expiry_in_days);
        let minted = blocking(move || {
            let ca = CertGenerator::init_ca(&CaParams {
                cn: &subject,
                validity,
            })?;
            seal(ca.cert_pem, &ca.key_pem)
        })
        .await?;

        let record = UserCertificateRecord {
            user_id: self.config.server_record_id.clone(),
            server_certificate_pem: minted.cert_pem.clone(),
            certificate_pem: minted.cert_pem,
            private_key_pem: minted.sealed_key_pem,
            issued_at: now,
            expires_at: minted.info.not_after,
            passphrase_secret: secret_name(&self.config.server_key_name, &minted.info),
        };
        self.persist(&record, &minted.passphrase).await?;

        info!(
            subject = %self.config.server_subject,
            serial = %minted.info.serial,
            expires_at = %record.expires_at,
            "Created server certificate"
        );
        Ok(minted.info)
    }

    /// Load the server CA and open its key.
    async fn server_ca(&self, now: DateTime<Utc>) -> Result<(UserCertificateRecord, Zeroizing<String>)> {
        let record = match self.get_record(&self.config.server_record_id).await? {
            Some(record) if record.is_valid_at(now) => record,
            found => {
                if !self.config.bootstrap_server_cert {
                    let state = if found.is_some() { "expired" } else { "missing" };
                    return Err(Error::CertGeneration(format!(
                        "Server certificate is {state}; run `server-cert` or enable bootstrap_server_cert"
                    )));
                }
                warn!("Server certificate unavailable, bootstrapping a new one");
                self.ensure_server_certificate(false).await?;
                self.get_record(&self.config.server_record_id)
                    .await?
                    .ok_or_else(|| {
                        Error::StoreUnavailable("Server certificate vanished after creation".to_string())
                    })?
            }
        };

        let passphrase = self.get_passphrase(&record.passphrase_secret).await?;
        let sealed = record.private_key_pem.clone();
        let key_pem = blocking(move || open_private_key_pem(&sealed, &passphrase)).await?;
        Ok((record, key_pem))
    }

    // ── Store access ─────────────────────────────────────────────────────────

    async fn get_record(&self, id: &str) -> Result<Option<UserCertificateRecord>> {
        bounded(
            self.operation_timeout,
            Error::StoreUnavailable,
            self.certificates.get(id),
        )
        .await
    }

    async fn get_passphrase(&self, name: &str) -> Result<SecretString> {
        bounded(
            self.operation_timeout,
            Error::SecretUnavailable,
            fetch_single_secret(self.secrets.as_ref(), name),
        )
        .await
    }

    /// Secret first, record second.
    async fn persist(&self, record: &UserCertificateRecord, passphrase: &SecretString) -> Result<()> {
        bounded(
            self.operation_timeout,
            Error::SecretUnavailable,
            self.secrets.put_secret(&record.passphrase_secret, passphrase),
        )
        .await?;
        bounded(
            self.operation_timeout,
            Error::StoreUnavailable,
            self.certificates.put(record.clone()),
        )
        .await
    }
}

/// A claim on one id's regeneration lock.
///
/// Dropping the last claim removes the map entry, including when the
/// owning future is cancelled mid-wait.
struct LockSlot<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    id: String,
    lock: Arc<Mutex<()>>,
}

impl<'a> LockSlot<'a> {
    fn new(locks: &'a DashMap<String, Arc<Mutex<()>>>, id: &str) -> Self {
        let lock = locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self {
            locks,
            id: id.to_string(),
            lock,
        }
    }

    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for LockSlot<'_> {
    fn drop(&mut self) {
        // The map's handle plus ours: nobody else is waiting.
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 2);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn seal(cert_pem: String, key_pem: &str) -> Result<Minted> {
    let info = CertificateInfo::from_pem(&cert_pem)?;
    let passphrase = generate_passphrase();
    let sealed_key_pem = seal_private_key_pem(key_pem, &passphrase)?;
    Ok(Minted {
        cert_pem,
        sealed_key_pem,
        passphrase,
        info,
    })
}

fn secret_name(base: &str, info: &CertificateInfo) -> String {
    let suffix = info
        .fingerprint_sha256
        .get(..SECRET_SUFFIX_LEN)
        .unwrap_or(&info.fingerprint_sha256);
    format!("{base}/{suffix}")
}

/// Run CPU-heavy key work (key generation, Argon2) off the async workers.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::CertGeneration(format!("Key worker failed: {e}")))?
}

async fn bounded<T>(
    limit: Duration,
    on_timeout: fn(String) -> Error,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| on_timeout(format!("operation timed out after {limit:?}")))?
}
