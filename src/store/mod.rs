//! Certificate store — persistence of per-user certificate records.
//!
//! The [`CertificateStore`] trait abstracts over storage backends:
//!
//! - [`InMemoryCertificateStore`] — `DashMap`-backed, process-local
//! - [`FileCertificateStore`] — one JSON document per record, replaced by
//!   atomic rename
//!
//! Both are safe for concurrent use; a `put` for an existing id replaces the
//! record wholesale (last writer wins).

pub mod file;
pub mod memory;
pub mod record;

pub use file::FileCertificateStore;
pub use memory::InMemoryCertificateStore;
pub use record::UserCertificateRecord;

use crate::Result;

/// Trait abstracting the certificate storage backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// concurrent request handlers.
#[async_trait::async_trait]
pub trait CertificateStore: Send + Sync + 'static {
    /// Look up the record for `user_id`.
    ///
    /// Returns `Ok(None)` when no record exists; expiry is the caller's
    /// concern.
    async fn get(&self, user_id: &str) -> Result<Option<UserCertificateRecord>>;

    /// Insert or replace the record keyed by `record.user_id`.
    async fn put(&self, record: UserCertificateRecord) -> Result<()>;
}
