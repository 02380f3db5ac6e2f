//! File-backed secret store.
//!
//! Secrets are sealed with the master passphrase (see
//! [`crate::mtls::sealing`]) and written one file per name, named after the
//! SHA-256 of the secret name.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{SecretEntry, SecretStore, duplicate};
use crate::mtls::sealing;
use crate::store::file::write_private;
use crate::{Error, Result};

#[derive(Serialize, Deserialize)]
struct SecretFile {
    name: String,
    sealed: String,
}

/// Secret store persisting sealed values under a directory.
pub struct FileSecretStore {
    dir: PathBuf,
    master: SecretString,
}

impl FileSecretStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns `Error::SecretUnavailable` if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>, master: SecretString) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::SecretUnavailable(format!(
                "Failed to create secret directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir, master })
    }

    /// Directory holding the secret files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn secret_path(&self, name: &str) -> PathBuf {
        let key = hex::encode(Sha256::digest(name.as_bytes()).as_slice());
        self.dir.join(format!("{key}.secret"))
    }

    async fn read(&self, name: &str) -> Result<Option<SecretFile>> {
        let path = self.secret_path(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let file: SecretFile = serde_json::from_str(&content).map_err(|e| {
                    Error::SecretUnavailable(format!("Corrupt secret file for '{name}': {e}"))
                })?;
                Ok((file.name == name).then_some(file))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::SecretUnavailable(format!(
                "Failed to read secret '{name}': {e}"
            ))),
        }
    }

    /// Argon2 runs on the blocking pool so store timeouts stay effective.
    async fn unseal(&self, name: &str, file: SecretFile) -> Result<SecretString> {
        let master = duplicate(&self.master);
        let name = name.to_owned();
        run_blocking(move || {
            let sealed = STANDARD
                .decode(&file.sealed)
                .map_err(|_| Error::SecretUnavailable(format!("Secret '{name}' is not base64")))?;
            let plaintext = sealing::open(&sealed, &master)?;
            let text = std::str::from_utf8(&plaintext)
                .map_err(|_| Error::SecretUnavailable(format!("Secret '{name}' is not UTF-8")))?;
            Ok(SecretString::from(text.to_owned()))
        })
        .await
    }

    async fn seal(&self, value: &SecretString) -> Result<String> {
        let master = duplicate(&self.master);
        let value = duplicate(value);
        run_blocking(move || {
            let sealed = sealing::seal(value.expose_secret().as_bytes(), &master)?;
            Ok(STANDARD.encode(sealed))
        })
        .await
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::SecretUnavailable(format!("Secret worker failed: {e}")))?
}

impl std::fmt::Debug for FileSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSecretStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secrets(&self, names: &[String], decrypt: bool) -> Result<Vec<SecretEntry>> {
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let Some(file) = self.read(name).await? else {
                debug!(secret = %name, "Secret not found");
                continue;
            };
            let value = if decrypt {
                self.unseal(name, file).await?
            } else {
                SecretString::from(file.sealed)
            };
            entries.push(SecretEntry {
                name: name.clone(),
                value,
            });
        }
        Ok(entries)
    }

    async fn put_secret(&self, name: &str, value: &SecretString) -> Result<()> {
        let content = serde_json::to_string(&SecretFile {
            name: name.to_string(),
            sealed: self.seal(value).await?,
        })?;

        let path = self.secret_path(name);
        let tmp = path.with_extension(format!("secret.{}.tmp", uuid::Uuid::new_v4().simple()));
        write_private(&tmp, content.as_bytes())
            .await
            .map_err(|e| Error::SecretUnavailable(format!("Failed to write secret '{name}': {e}")))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::SecretUnavailable(format!(
                "Failed to replace secret '{name}': {e}"
            )));
        }

        info!(secret = %name, "Saved secret");
        Ok(())
    }
}
