//! File-backed certificate store.
//!
//! Each record is one pretty-printed JSON file named after the SHA-256 of
//! the user id. Writes go to a temporary sibling first and are moved into
//! place with a rename, so readers see either the old or the new record.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{CertificateStore, UserCertificateRecord};
use crate::{Error, Result};

/// Certificate store persisting one JSON file per user.
#[derive(Debug)]
pub struct FileCertificateStore {
    dir: PathBuf,
}

impl FileCertificateStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns `Error::StoreUnavailable` if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::StoreUnavailable(format!(
                "Failed to create certificate directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the record files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, user_id: &str) -> PathBuf {
        let key = hex::encode(Sha256::digest(user_id.as_bytes()).as_slice());
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait::async_trait]
impl CertificateStore for FileCertificateStore {
    async fn get(&self, user_id: &str) -> Result<Option<UserCertificateRecord>> {
        let path = self.record_path(user_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(user = %user_id, "No stored certificate record");
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::StoreUnavailable(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let record: UserCertificateRecord = serde_json::from_str(&content).map_err(|e| {
            Error::StoreUnavailable(format!("Corrupt record {}: {e}", path.display()))
        })?;
        if record.user_id != user_id {
            return Err(Error::StoreUnavailable(format!(
                "Record {} belongs to a different user",
                path.display()
            )));
        }
        Ok(Some(record))
    }

    async fn put(&self, record: UserCertificateRecord) -> Result<()> {
        let path = self.record_path(&record.user_id);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));

        let content = serde_json::to_string_pretty(&record)
            .map_err(|e| Error::StoreUnavailable(format!("Failed to serialize record: {e}")))?;
        write_private(&tmp, content.as_bytes()).await.map_err(|e| {
            Error::StoreUnavailable(format!("Failed to write {}: {e}", tmp.display()))
        })?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::StoreUnavailable(format!(
                "Failed to replace {}: {e}",
                path.display()
            )));
        }

        info!(user = %record.user_id, expires_at = %record.expires_at, "Saved certificate record");
        Ok(())
    }
}

/// Write `bytes` to `path` readable by the owner only.
pub(crate) async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await;
    }
    Ok(())
}
