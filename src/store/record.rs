//! Certificate record persisted per user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Certificate material bound to one identity.
///
/// Records are immutable: regeneration writes a whole new record under the
/// same id. The private key is stored sealed; its passphrase lives in the
/// secret store under [`passphrase_secret`](Self::passphrase_secret).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCertificateRecord {
    /// Identity the certificate is bound to (primary key).
    pub user_id: String,
    /// PEM client certificate.
    #[serde(rename = "certificatePEM")]
    pub certificate_pem: String,
    /// Sealed PEM private key.
    #[serde(rename = "privateKeyPEM")]
    pub private_key_pem: String,
    /// PEM CA certificate trusted for the backend handshake.
    #[serde(rename = "serverCertificatePEM")]
    pub server_certificate_pem: String,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
    /// First instant at which the certificate is no longer usable.
    pub expires_at: DateTime<Utc>,
    /// Secret store name of the key passphrase.
    pub passphrase_secret: String,
}

impl UserCertificateRecord {
    /// Whether the record can be reused at `now`.
    ///
    /// `expires_at` is exclusive: a record expiring exactly at `now` is
    /// already expired.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for UserCertificateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCertificateRecord")
            .field("user_id", &self.user_id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("passphrase_secret", &self.passphrase_secret)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn sample_record(user_id: &str, expires_at: DateTime<Utc>) -> UserCertificateRecord {
    UserCertificateRecord {
        user_id: user_id.to_string(),
        certificate_pem: format!("cert-{user_id}"),
        private_key_pem: format!("key-{user_id}"),
        server_certificate_pem: "ca".to_string(),
        issued_at: expires_at - chrono::Duration::days(1),
        expires_at,
        passphrase_secret: format!("pass/{user_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_expiring_now_is_expired() {
        let now = Utc::now();
        let record = sample_record("alice", now);
        assert!(!record.is_valid_at(now));
        assert!(record.is_valid_at(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let record = sample_record("alice", Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["userId"], "alice");
        assert!(json.get("certificatePEM").is_some());
        assert!(json.get("privateKeyPEM").is_some());
        assert!(json.get("serverCertificatePEM").is_some());
        assert!(json.get("expiresAt").is_some());
    }

    #[test]
    fn debug_omits_key_material() {
        let record = sample_record("alice", Utc::now());
        let rendered = format!("{record:?}");
        assert!(!rendered.contains("key-alice"));
        assert!(rendered.contains("alice"));
    }
}
