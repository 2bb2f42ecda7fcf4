//! # Filesystem Progress Backend
//!
//! Local filesystem implementation of [`ProgressBackend`] for single-node
//! deployments and development.
//!
//! Layout: `<base>/<stem(replay_id)>/<stem(kind)>.json`. A stem is the hex
//! encoding of the identifier so that any kind name maps to a valid file
//! name. Hex longer than [`MAX_PLAIN_STEM`] would overrun the 255-byte file
//! name limit of common filesystems once suffixes are added, so long
//! identifiers use a truncated prefix followed by their SHA-256.
//! Rows are located by stem but identified by their content.

use crate::error::ProgressStoreError;
use crate::progress::{ProgressKey, ReplayProgress};
use crate::progress_store::{BatchGetOutput, ProgressBackend, StoreLimits};
use crate::ReplayId;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Longest hex stem used verbatim
pub const MAX_PLAIN_STEM: usize = 128;

/// Hex characters of a long identifier kept in front of its hash
const HASHED_STEM_PREFIX: usize = 64;

/// File-name-safe stem of an identifier, at most 129 bytes long
fn file_stem(id: &str) -> String {
    let encoded = hex::encode(id);
    if encoded.len() <= MAX_PLAIN_STEM {
        return encoded;
    }

    // '-' never appears in hex, so hashed stems cannot collide with plain ones
    format!(
        "{}-{}",
        &encoded[..HASHED_STEM_PREFIX],
        hex::encode(Sha256::digest(id.as_bytes()))
    )
}

/// Filesystem-based progress table
///
/// # Examples
///
/// ```no_run
/// use replay_core::adapters::FilesystemProgressBackend;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = FilesystemProgressBackend::new(PathBuf::from("./data/progress")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemProgressBackend {
    base_path: PathBuf,
    limits: StoreLimits,
}

impl FilesystemProgressBackend {
    /// Create the backend, creating `base_path` if needed.
    ///
    /// # Errors
    ///
    /// Returns error if the base path cannot be created.
    pub async fn new(base_path: PathBuf) -> Result<Self, ProgressStoreError> {
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| ProgressStoreError::Io {
                message: format!("Failed to create base directory: {}", e),
            })?;

        Ok(Self {
            base_path,
            limits: StoreLimits::default(),
        })
    }

    fn replay_dir(&self, replay_id: &ReplayId) -> PathBuf {
        self.base_path.join(file_stem(replay_id.as_str()))
    }

    fn row_path(&self, key: &ProgressKey) -> PathBuf {
        self.replay_dir(&key.replay_id)
            .join(format!("{}.json", file_stem(key.kind.as_str())))
    }

    async fn read_row(&self, path: &PathBuf) -> Result<Option<ReplayProgress>, ProgressStoreError> {
        let json = match fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ProgressStoreError::Io {
                    message: format!("Failed to read progress row: {}", e),
                })
            }
        };

        Ok(Some(serde_json::from_str(&json)?))
    }
}

#[async_trait]
impl ProgressBackend for FilesystemProgressBackend {
    async fn get_item(&self, key: &ProgressKey) -> Result<Option<ReplayProgress>, ProgressStoreError> {
        self.read_row(&self.row_path(key)).await
    }

    async fn put_item(&self, progress: &ReplayProgress) -> Result<(), ProgressStoreError> {
        let key = progress.key();
        let path = self.row_path(&key);

        fs::create_dir_all(self.replay_dir(&key.replay_id))
            .await
            .map_err(|e| ProgressStoreError::Io {
                message: format!("Failed to create replay directory: {}", e),
            })?;

        let json = serde_json::to_string_pretty(progress)?;

        // Write then rename so readers never observe a partial row
        let temp_path = self
            .replay_dir(&key.replay_id)
            .join(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| ProgressStoreError::Io {
                message: format!("Failed to rename temp file: {}", e),
            })?;

        Ok(())
    }

    async fn batch_get_items(&self, keys: &[ProgressKey]) -> Result<BatchGetOutput, ProgressStoreError> {
        let mut output = BatchGetOutput::default();
        for key in keys {
            match self.get_item(key).await {
                Ok(Some(progress)) => output.items.push(progress),
                Ok(None) => {}
                Err(_) => output.unprocessed_keys.push(key.clone()),
            }
        }
        Ok(output)
    }

    async fn batch_put_items(
        &self,
        items: &[ReplayProgress],
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError> {
        let mut unprocessed = Vec::new();
        for item in items {
            if self.put_item(item).await.is_err() {
                unprocessed.push(item.clone());
            }
        }
        Ok(unprocessed)
    }

    async fn query_by_replay_id(
        &self,
        replay_id: &ReplayId,
    ) -> Result<Vec<ReplayProgress>, ProgressStoreError> {
        let dir = self.replay_dir(replay_id);
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match self.read_row(&path).await {
                Ok(Some(progress)) => found.push(progress),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable progress row"),
            }
        }

        found.sort_by(|a, b| a.kind.cmp(&b.kind));
        Ok(found)
    }

    fn limits(&self) -> StoreLimits {
        self.limits
    }
}

#[cfg(test)]
#[path = "filesystem_progress_tests.rs"]
mod tests;
