//! Secret store — named secrets holding private key passphrases.
//!
//! The [`SecretStore`] trait is the seam to an external parameter/secret
//! service. Two implementations ship with the proxy:
//!
//! - [`InMemorySecretStore`] — `DashMap`-backed, process-local
//! - [`FileSecretStore`] — one file per secret, sealed with a master
//!   passphrase
//!
//! Values are always carried as [`SecretString`] so they never show up in
//! `Debug` output or logs.

mod file;

pub use file::FileSecretStore;

use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::{Error, Result};

/// A named secret value.
#[derive(Debug)]
pub struct SecretEntry {
    /// Secret name.
    pub name: String,
    /// Secret value.
    pub value: SecretString,
}

/// Trait abstracting the secret storage backend.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync + 'static {
    /// Fetch the secrets called `names`.
    ///
    /// Names that do not exist are omitted from the result rather than
    /// reported as errors. With `decrypt` unset, stores that encrypt at rest
    /// return the stored (encrypted) form.
    async fn get_secrets(&self, names: &[String], decrypt: bool) -> Result<Vec<SecretEntry>>;

    /// Create or overwrite the secret `name`.
    async fn put_secret(&self, name: &str, value: &SecretString) -> Result<()>;
}

/// Fetch exactly one decrypted secret.
///
/// # Errors
///
/// Returns `Error::SecretUnavailable` unless the store yields exactly one
/// value for `name`.
pub async fn fetch_single_secret(store: &dyn SecretStore, name: &str) -> Result<SecretString> {
    let mut entries = store.get_secrets(&[name.to_string()], true).await?;
    if entries.len() != 1 {
        return Err(Error::SecretUnavailable(format!(
            "Expected exactly one value for '{name}', got {}",
            entries.len()
        )));
    }
    let entry = entries.remove(0);
    if entry.name != name {
        return Err(Error::SecretUnavailable(format!(
            "Secret store returned '{}' for '{name}'",
            entry.name
        )));
    }
    Ok(entry.value)
}

fn duplicate(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Secret store backed by a `DashMap`.
pub struct InMemorySecretStore {
    secrets: DashMap<String, SecretString>,
}

impl InMemorySecretStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            secrets: DashMap::new(),
        }
    }

    /// Number of stored secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Remove a secret. Returns `true` if it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.secrets.remove(name).is_some()
    }
}

impl Default for InMemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secrets(&self, names: &[String], _decrypt: bool) -> Result<Vec<SecretEntry>> {
        Ok(names
            .iter()
            .filter_map(|name| {
                self.secrets.get(name).map(|value| SecretEntry {
                    name: name.clone(),
                    value: duplicate(value.value()),
                })
            })
            .collect())
    }

    async fn put_secret(&self, name: &str, value: &SecretString) -> Result<()> {
        debug!(secret = %name, "Stored secret");
        self.secrets.insert(name.to_string(), duplicate(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[tokio::test]
    async fn get_secrets_omits_unknown_names() {
        let store = InMemorySecretStore::new();
        store.put_secret("a", &secret("1")).await.unwrap();

        let entries = store
            .get_secrets(&["a".to_string(), "b".to_string()], true)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[0].value.expose_secret(), "1");
    }

    #[tokio::test]
    async fn fetch_single_secret_returns_value() {
        let store = InMemorySecretStore::new();
        store.put_secret("pass", &secret("hunter2")).await.unwrap();
        let value = fetch_single_secret(&store, "pass").await.unwrap();
        assert_eq!(value.expose_secret(), "hunter2");
    }

    #[tokio::test]
    async fn fetch_single_secret_missing_is_secret_unavailable() {
        let store = InMemorySecretStore::new();
        let err = fetch_single_secret(&store, "pass").await.unwrap_err();
        assert!(matches!(err, Error::SecretUnavailable(_)));
    }

    #[tokio::test]
    async fn put_secret_overwrites() {
        let store = InMemorySecretStore::new();
        store.put_secret("pass", &secret("old")).await.unwrap();
        store.put_secret("pass", &secret("new")).await.unwrap();
        let value = fetch_single_secret(&store, "pass").await.unwrap();
        assert_eq!(value.expose_secret(), "new");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn secret_entry_debug_is_redacted() {
        let entry = SecretEntry {
            name: "pass".to_string(),
            value: secret("hunter2"),
        };
        assert!(!format!("{entry:?}").contains("hunter2"));
    }
}
