//! Filesystem storage backend.
//!
//! Writes stream into a uniquely-named temp file which is renamed over the
//! final path on success, so readers never observe partial blobs.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::{Blobs, BlobMeta, ByteStream};

/// Filesystem storage backend
pub struct FilesystemBlobs {
    base_path: PathBuf,
}

impl FilesystemBlobs {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl Blobs for FilesystemBlobs {
    async fn put(&self, key: &str, mut reader: ByteStream, _content_type: &str) -> Result<()> {
        let path = self.key_to_path(key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Unique temp name so concurrent writers for the same key never
        // interleave; the final rename decides the winner.
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path).await?;

        while let Some(chunk) = reader.next().await {
            match chunk {
                Ok(bytes) => file.write_all(&bytes).await?,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&temp_path).await;
                    return Err(AppError::Io(e));
                }
            }
        }

        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        let path = self.key_to_path(key);
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("Storage key not found: {}", key))
            } else {
                AppError::Storage(e.to_string())
            }
        })?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn head(&self, key: &str) -> Result<BlobMeta> {
        let path = self.key_to_path(key);
        let metadata = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("Storage key not found: {}", key))
            } else {
                AppError::Storage(e.to_string())
            }
        })?;

        let last_modified = metadata
            .modified()
            .ok()
            .map(DateTime::<Utc>::from);

        Ok(BlobMeta {
            size: metadata.len(),
            content_type: None,
            etag: None,
            last_modified,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.key_to_path(key).exists())
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let search_path = if prefix.is_empty() {
            self.base_path.clone()
        } else {
            self.key_to_path(prefix)
        };

        let mut keys = Vec::new();
        let mut stack = vec![search_path];

        while let Some(current) = stack.pop() {
            if keys.len() >= limit {
                break;
            }
            if !current.exists() {
                continue;
            }

            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.base_path) {
                    keys.push(relative.to_string_lossy().to_string());
                    if keys.len() >= limit {
                        break;
                    }
                }
            }
        }

        Ok(keys)
    }
}
