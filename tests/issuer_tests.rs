//! Certificate issuer lifecycle tests
//!
//! Covers:
//! - Reuse of a valid certificate
//! - Forced and expiry-driven regeneration
//! - Secret-before-record write order
//! - Per-user serialisation of concurrent regeneration
//! - Persistence across issuer instances with the file stores

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};

use sap_cert_proxy::Error;
use sap_cert_proxy::config::CertificateConfig;
use sap_cert_proxy::issuer::CertificateIssuer;
use sap_cert_proxy::mtls::CertificateInfo;
use sap_cert_proxy::secrets::{
    FileSecretStore, InMemorySecretStore, SecretEntry, SecretStore, fetch_single_secret,
};
use sap_cert_proxy::store::{
    CertificateStore, FileCertificateStore, InMemoryCertificateStore, UserCertificateRecord,
};

// ─── Fixtures ──────────────────────────────────────────────────────────────

struct Fixture {
    issuer: Arc<CertificateIssuer>,
    certificates: Arc<InMemoryCertificateStore>,
    secrets: Arc<InMemorySecretStore>,
}

fn fixture(bootstrap: bool) -> Fixture {
    let certificates = Arc::new(InMemoryCertificateStore::new());
    let secrets = Arc::new(InMemorySecretStore::new());
    let issuer = CertificateIssuer::new(
        certificates.clone(),
        secrets.clone(),
        CertificateConfig {
            bootstrap_server_cert: bootstrap,
            ..CertificateConfig::default()
        },
        Duration::from_secs(5),
    );
    Fixture {
        issuer: Arc::new(issuer),
        certificates,
        secrets,
    }
}

/// Certificate store that records whether every `put` found its secret.
struct OrderCheckingStore {
    inner: InMemoryCertificateStore,
    secrets: Arc<InMemorySecretStore>,
    secret_missing: AtomicBool,
}

#[async_trait::async_trait]
impl CertificateStore for OrderCheckingStore {
    async fn get(&self, user_id: &str) -> sap_cert_proxy::Result<Option<UserCertificateRecord>> {
        self.inner.get(user_id).await
    }

    async fn put(&self, record: UserCertificateRecord) -> sap_cert_proxy::Result<()> {
        if fetch_single_secret(self.secrets.as_ref(), &record.passphrase_secret)
            .await
            .is_err()
        {
            self.secret_missing.store(true, Ordering::SeqCst);
        }
        self.inner.put(record).await
    }
}

/// Secret store whose writes always fail.
struct BrokenSecretStore {
    writes: AtomicUsize,
}

#[async_trait::async_trait]
impl SecretStore for BrokenSecretStore {
    async fn get_secrets(
        &self,
        _names: &[String],
        _decrypt: bool,
    ) -> sap_cert_proxy::Result<Vec<SecretEntry>> {
        Ok(vec![])
    }

    async fn put_secret(&self, _name: &str, _value: &SecretString) -> sap_cert_proxy::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(Error::SecretUnavailable("parameter store offline".to_string()))
    }
}

// ─── Reuse and regeneration ────────────────────────────────────────────────

#[tokio::test]
async fn two_issues_within_validity_return_identical_material() {
    // GIVEN: an issuer with a bootstrapped CA
    let f = fixture(true);

    // WHEN: issuing twice without forcing
    let first = f.issuer.issue_certificate("S0001", false).await.unwrap();
    let second = f.issuer.issue_certificate("S0001", false).await.unwrap();

    // THEN: the material is byte-identical
    assert_eq!(first.record(), second.record());
    assert_eq!(first.certificate_pem(), second.certificate_pem());
}

#[tokio::test]
async fn forced_issue_rotates_certificate_and_passphrase() {
    let f = fixture(true);
    let first = f.issuer.issue_certificate("S0001", false).await.unwrap();

    let forced = f.issuer.issue_certificate("S0001", true).await.unwrap();

    assert_ne!(first.certificate_pem(), forced.certificate_pem());
    assert_ne!(first.record().passphrase_secret, forced.record().passphrase_secret);

    // The stored record now points at the new secret, which differs from the old one
    let stored = f.certificates.get("S0001").await.unwrap().unwrap();
    assert_eq!(&stored, forced.record());
    let old = fetch_single_secret(f.secrets.as_ref(), &first.record().passphrase_secret)
        .await
        .unwrap();
    let new = fetch_single_secret(f.secrets.as_ref(), &stored.passphrase_secret)
        .await
        .unwrap();
    assert_ne!(old.expose_secret(), new.expose_secret());

    // And a later non-forced issue returns the rotated material
    let again = f.issuer.issue_certificate("S0001", false).await.unwrap();
    assert_eq!(again.certificate_pem(), forced.certificate_pem());
}

#[tokio::test]
async fn record_expiring_now_is_regenerated() {
    // GIVEN: a stored record whose expiry is exactly now
    let f = fixture(true);
    let original = f.issuer.issue_certificate("S0001", false).await.unwrap();
    let mut expired = original.record().clone();
    expired.expires_at = Utc::now();
    f.certificates.put(expired).await.unwrap();

    // WHEN: issuing again
    let renewed = f.issuer.issue_certificate("S0001", false).await.unwrap();

    // THEN: a new certificate replaces it
    assert_ne!(renewed.certificate_pem(), original.certificate_pem());
    assert!(renewed.expires_at() > Utc::now());
}

#[tokio::test]
async fn issued_certificate_is_bound_to_user_and_signed_by_server_ca() {
    let f = fixture(true);
    let credential = f.issuer.issue_certificate("S0001", false).await.unwrap();

    let leaf = CertificateInfo::from_pem(credential.certificate_pem()).unwrap();
    let ca = CertificateInfo::from_pem(credential.server_certificate_pem()).unwrap();

    assert_eq!(leaf.common_name.as_deref(), Some("S0001"));
    assert_eq!(leaf.issuer_common_name, ca.common_name);
    assert!(ca.is_ca);
    assert!(!leaf.is_ca);
    assert_eq!(credential.expires_at(), leaf.not_after);

    // Default expiry is one day
    let lifetime = leaf.not_after - leaf.not_before;
    assert_eq!(lifetime.num_days(), 1);
}

#[tokio::test]
async fn stored_private_key_is_sealed() {
    let f = fixture(true);
    let credential = f.issuer.issue_certificate("S0001", false).await.unwrap();

    let stored = f.certificates.get("S0001").await.unwrap().unwrap();
    assert!(stored.private_key_pem.contains("SEALED PRIVATE KEY"));
    assert!(!stored.private_key_pem.contains("BEGIN PRIVATE KEY"));

    // The credential can still open it for TLS
    assert!(credential.tls_client_config(true).await.is_ok());
}

// ─── Atomicity ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn record_is_never_written_before_its_secret() {
    // GIVEN: a certificate store that checks for the secret on every write
    let secrets = Arc::new(InMemorySecretStore::new());
    let store = Arc::new(OrderCheckingStore {
        inner: InMemoryCertificateStore::new(),
        secrets: secrets.clone(),
        secret_missing: AtomicBool::new(false),
    });
    let issuer = CertificateIssuer::new(
        store.clone(),
        secrets,
        CertificateConfig {
            bootstrap_server_cert: true,
            ..CertificateConfig::default()
        },
        Duration::from_secs(5),
    );

    // WHEN: the CA and two user certificates are written
    issuer.issue_certificate("S0001", false).await.unwrap();
    issuer.issue_certificate("S0001", true).await.unwrap();

    // THEN: every record found its secret already in place
    assert!(!store.secret_missing.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failed_secret_write_leaves_no_record() {
    let certificates = Arc::new(InMemoryCertificateStore::new());
    let secrets = Arc::new(BrokenSecretStore {
        writes: AtomicUsize::new(0),
    });
    let issuer = CertificateIssuer::new(
        certificates.clone(),
        secrets.clone(),
        CertificateConfig::default(),
        Duration::from_secs(5),
    );

    let err = issuer.ensure_server_certificate(false).await.unwrap_err();

    assert!(matches!(err, Error::SecretUnavailable(_)));
    assert_eq!(secrets.writes.load(Ordering::SeqCst), 1);
    assert!(certificates.is_empty());
}

#[tokio::test]
async fn record_without_secret_is_secret_unavailable() {
    // GIVEN: a record whose secret was removed externally
    let f = fixture(true);
    let credential = f.issuer.issue_certificate("S0001", false).await.unwrap();
    assert!(f.secrets.remove(&credential.record().passphrase_secret));

    // WHEN / THEN: reuse fails instead of returning unusable material
    let err = f.issuer.issue_certificate("S0001", false).await.unwrap_err();
    assert!(matches!(err, Error::SecretUnavailable(_)));
}

// ─── Server CA ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn issuance_without_server_certificate_fails() {
    let f = fixture(false);
    let err = f.issuer.issue_certificate("S0001", false).await.unwrap_err();
    assert!(matches!(err, Error::CertGeneration(_)));
    assert!(f.certificates.is_empty());
}

#[tokio::test]
async fn explicit_server_certificate_enables_issuance() {
    let f = fixture(false);
    let ca = f.issuer.ensure_server_certificate(false).await.unwrap();

    let credential = f.issuer.issue_certificate("S0001", false).await.unwrap();

    let leaf = CertificateInfo::from_pem(credential.certificate_pem()).unwrap();
    assert_eq!(leaf.issuer_common_name, ca.common_name);
    assert_eq!(ca.common_name.as_deref(), Some("SAP Certificate Proxy CA"));
}

// ─── Concurrency ───────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_issues_produce_one_certificate() {
    let f = fixture(true);
    f.issuer.ensure_server_certificate(false).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let issuer = Arc::clone(&f.issuer);
            tokio::spawn(async move { issuer.issue_certificate("S0001", false).await })
        })
        .collect();

    let mut certificates = Vec::new();
    for task in tasks {
        let credential = task.await.unwrap().unwrap();
        certificates.push(credential.certificate_pem().to_string());
    }

    certificates.dedup();
    assert_eq!(certificates.len(), 1);
    // CA passphrase + one user passphrase
    assert_eq!(f.secrets.len(), 2);
}

// ─── File-backed stores ────────────────────────────────────────────────────

#[tokio::test]
async fn file_stores_persist_certificates_across_issuers() {
    let dir = tempfile::tempdir().unwrap();
    let make_issuer = || {
        CertificateIssuer::new(
            Arc::new(FileCertificateStore::new(dir.path().join("certificates")).unwrap()),
            Arc::new(
                FileSecretStore::new(
                    dir.path().join("secrets"),
                    SecretString::from("master".to_string()),
                )
                .unwrap(),
            ),
            CertificateConfig {
                bootstrap_server_cert: true,
                ..CertificateConfig::default()
            },
            Duration::from_secs(5),
        )
    };

    // GIVEN: a certificate issued by one process
    let first = make_issuer().issue_certificate("DOMAIN/alice", false).await.unwrap();

    // WHEN: another process asks for the same user
    let second = make_issuer().issue_certificate("DOMAIN/alice", false).await.unwrap();

    // THEN: the stored certificate is reused and still opens
    assert_eq!(first.certificate_pem(), second.certificate_pem());
    assert!(second.tls_client_config(false).await.is_ok());
}
