//! In-memory certificate store.

use dashmap::DashMap;
use tracing::debug;

use super::{CertificateStore, UserCertificateRecord};
use crate::Result;

/// Certificate store backed by a `DashMap` keyed by user id.
pub struct InMemoryCertificateStore {
    records: DashMap<String, UserCertificateRecord>,
}

impl InMemoryCertificateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryCertificateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CertificateStore for InMemoryCertificateStore {
    async fn get(&self, user_id: &str) -> Result<Option<UserCertificateRecord>> {
        Ok(self.records.get(user_id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, record: UserCertificateRecord) -> Result<()> {
        debug!(user = %record.user_id, expires_at = %record.expires_at, "Stored certificate record");
        self.records.insert(record.user_id.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::record::sample_record;

    #[tokio::test]
    async fn get_missing_record_returns_none() {
        let store = InMemoryCertificateStore::new();
        assert!(store.get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_returns_record() {
        // GIVEN: a store with one record
        let store = InMemoryCertificateStore::new();
        let record = sample_record("alice", Utc::now());
        store.put(record.clone()).await.unwrap();

        // WHEN / THEN: lookup returns it unchanged
        assert_eq!(store.get("alice").await.unwrap(), Some(record));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn put_replaces_existing_record_wholesale() {
        let store = InMemoryCertificateStore::new();
        store.put(sample_record("alice", Utc::now())).await.unwrap();

        let mut replacement = sample_record("alice", Utc::now());
        replacement.certificate_pem = "cert-v2".to_string();
        store.put(replacement.clone()).await.unwrap();

        assert_eq!(store.get("alice").await.unwrap(), Some(replacement));
        assert_eq!(store.len(), 1);
    }
}
