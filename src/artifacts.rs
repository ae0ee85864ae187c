//! Artifact store: streaming store-with-checksum, cache lookup, deletion,
//! and fire-and-forget download recording over the blob and metadata stores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::background::TaskPool;
use crate::error::{AppError, Result};
use crate::meta::MetaStore;
use crate::models::{Artifact, ArtifactInfo, DownloadEvent};
use crate::storage::{Blobs, ByteStream};

/// Derive the deterministic object-store key for an artifact identity.
///
/// Layout: `repositories/<repo-name>/<sanitised-name>/<version>/artifact`.
pub fn storage_key(repo_name: &str, name: &str, version: &str) -> String {
    format!(
        "repositories/{}/{}/{}/artifact",
        repo_name,
        sanitize(name),
        sanitize(version)
    )
}

/// Keep `[A-Za-z0-9@/_.-]`, replace any other byte with `_`. Colons and
/// hashes in composite names (docker `"<image>:blob:<digest>"`) stay
/// deterministic without escaping the key structure.
pub fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '@' | '/' | '_' | '.' | '-' => c,
            _ => '_',
        })
        .collect()
}

/// Artifact service over the blob store and metadata store.
pub struct ArtifactStore {
    meta: Arc<dyn MetaStore>,
    blobs: Arc<dyn Blobs>,
    tasks: Arc<TaskPool>,
}

impl ArtifactStore {
    pub fn new(meta: Arc<dyn MetaStore>, blobs: Arc<dyn Blobs>, tasks: Arc<TaskPool>) -> Self {
        Self { meta, blobs, tasks }
    }

    /// Consume `reader` to EOF, streaming bytes into the blob store while
    /// computing a running SHA-256 and byte count. On success the artifact
    /// row and its cache entry are upserted atomically with
    /// `expires_at = now + (ttl ?: repository TTL)`.
    ///
    /// If the reader errors or the blob put fails, no metadata is written.
    pub async fn store(
        &self,
        repository_id: Uuid,
        name: &str,
        version: &str,
        reader: ByteStream,
        content_type: &str,
        metadata: HashMap<String, String>,
        ttl: Option<Duration>,
    ) -> Result<ArtifactInfo> {
        let repo = self
            .meta
            .repository_by_id(repository_id)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("Repository {} not initialised", repository_id))
            })?;

        let key = storage_key(&repo.name, name, version);

        // Hash and count while the stream flows into the blob store.
        let digest_state = Arc::new(Mutex::new((Sha256::new(), 0u64)));
        let observer = digest_state.clone();
        let observed = reader.inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                let mut state = observer.lock().expect("digest state poisoned");
                state.0.update(bytes);
                state.1 += bytes.len() as u64;
            }
        });

        self.blobs
            .put(&key, Box::pin(observed), content_type)
            .await?;

        let (checksum, size) = {
            let state = digest_state.lock().expect("digest state poisoned");
            (format!("{:x}", state.0.clone().finalize()), state.1)
        };

        let now = Utc::now();
        let ttl_secs = ttl
            .map(|d| d.as_secs() as i64)
            .unwrap_or(repo.cache_ttl_secs);
        let expires_at = now + chrono::Duration::seconds(ttl_secs);

        let artifact = Artifact {
            id: Uuid::new_v4(),
            repository_id,
            name: name.to_string(),
            version: version.to_string(),
            storage_key: key,
            size_bytes: size as i64,
            checksum_sha256: checksum,
            content_type: content_type.to_string(),
            metadata,
            created_at: now,
            last_accessed_at: now,
        };

        self.meta.upsert_artifact(&artifact, expires_at).await?;

        tracing::debug!(
            repository = %repo.name,
            name = %name,
            version = %version,
            size = artifact.size_bytes,
            "Stored artifact"
        );

        Ok(ArtifactInfo::from(&artifact))
    }

    /// Look up the artifact and open a blob reader. `last_accessed_at` is
    /// bumped in the background; never mutates on miss. A metadata row whose
    /// blob has vanished (eviction race) reads as a miss.
    pub async fn get(
        &self,
        repository_id: Uuid,
        name: &str,
        version: &str,
    ) -> Result<Option<(ByteStream, ArtifactInfo)>> {
        let Some(artifact) = self.meta.artifact(repository_id, name, version).await? else {
            return Ok(None);
        };

        let stream = match self.blobs.get(&artifact.storage_key).await {
            Ok(stream) => stream,
            Err(AppError::NotFound(_)) => {
                tracing::warn!(
                    storage_key = %artifact.storage_key,
                    "Artifact row present but blob missing, treating as miss"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let meta = self.meta.clone();
        let artifact_id = artifact.id;
        self.tasks.try_submit(async move {
            if let Err(e) = meta.touch_last_accessed(artifact_id).await {
                tracing::debug!(error = %e, "last-accessed update failed");
            }
        });

        Ok(Some((stream, ArtifactInfo::from(&artifact))))
    }

    pub async fn exists(&self, repository_id: Uuid, name: &str, version: &str) -> Result<bool> {
        self.meta.artifact_exists(repository_id, name, version).await
    }

    /// Remove blob then metadata; idempotent.
    pub async fn delete(&self, repository_id: Uuid, name: &str, version: &str) -> Result<()> {
        let Some(artifact) = self.meta.artifact(repository_id, name, version).await? else {
            return Ok(());
        };

        self.blobs.delete(&artifact.storage_key).await?;
        self.meta.delete_artifact(repository_id, name, version).await?;
        Ok(())
    }

    /// Fire-and-forget download event append; errors are logged and swallowed.
    pub fn record_download(
        &self,
        repository_id: Uuid,
        name: &str,
        version: &str,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) {
        let event = DownloadEvent {
            repository_id,
            name: name.to_string(),
            version: version.to_string(),
            client_ip,
            user_agent,
            downloaded_at: Utc::now(),
        };

        let meta = self.meta.clone();
        self.tasks.try_submit(async move {
            if let Err(e) = meta.record_download(&event).await {
                tracing::debug!(error = %e, "download event write failed");
            }
        });
    }
}
