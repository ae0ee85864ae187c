//! Shared test fixtures: in-memory metadata and blob stores plus harness
//! wiring for the cache engine.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use uuid::Uuid;

use amargo::artifacts::ArtifactStore;
use amargo::background::TaskPool;
use amargo::cache::CacheEngine;
use amargo::error::{AppError, Result};
use amargo::meta::MetaStore;
use amargo::models::{
    Artifact, CacheEntry, DownloadEvent, GroupMember, Repository, RepositoryFormat, RepositoryType,
};
use amargo::storage::{stream_from_bytes, Blobs, BlobMeta, ByteStream};

// ---------------------------------------------------------------------------
// In-memory metadata store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryMeta {
    repos: Mutex<HashMap<Uuid, Repository>>,
    groups: Mutex<HashMap<String, (String, Vec<GroupMember>)>>,
    artifacts: Mutex<HashMap<(Uuid, String, String), Artifact>>,
    entries: Mutex<HashMap<String, (Uuid, CacheEntry)>>,
    downloads: Mutex<Vec<DownloadEvent>>,
}

impl MemoryMeta {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn downloads(&self) -> Vec<DownloadEvent> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn entry_for(&self, repository_id: Uuid, name: &str, version: &str) -> Option<CacheEntry> {
        let key = CacheEntry::key_for(repository_id, name, version);
        self.entries
            .lock()
            .unwrap()
            .get(&key)
            .map(|(_, entry)| entry.clone())
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.lock().unwrap().len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Insert a cache entry with no owning artifact (orphan).
    pub fn insert_orphan_entry(&self, repository_id: Uuid, key: &str, expires_at: DateTime<Utc>) {
        let entry = CacheEntry {
            key: key.to_string(),
            repository_id,
            storage_key: format!("orphans/{}", key),
            expires_at,
        };
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (Uuid::new_v4(), entry));
    }

    /// Force an artifact's cache entry to an absolute expiry.
    pub fn force_expiry(
        &self,
        repository_id: Uuid,
        name: &str,
        version: &str,
        expires_at: DateTime<Utc>,
    ) {
        let key = CacheEntry::key_for(repository_id, name, version);
        if let Some((_, entry)) = self.entries.lock().unwrap().get_mut(&key) {
            entry.expires_at = expires_at;
        }
    }
}

#[async_trait]
impl MetaStore for MemoryMeta {
    async fn upsert_repository(&self, repo: &Repository) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        let existing_id = repos
            .values()
            .find(|r| r.name == repo.name)
            .map(|r| r.id);
        let mut repo = repo.clone();
        if let Some(id) = existing_id {
            repo.id = id;
        }
        repos.insert(repo.id, repo);
        Ok(())
    }

    async fn repository_by_name(&self, name: &str) -> Result<Option<Repository>> {
        Ok(self
            .repos
            .lock()
            .unwrap()
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn repository_by_id(&self, id: Uuid) -> Result<Option<Repository>> {
        Ok(self.repos.lock().unwrap().get(&id).cloned())
    }

    async fn replace_group(
        &self,
        name: &str,
        format: &str,
        members: &[GroupMember],
    ) -> Result<()> {
        self.groups
            .lock()
            .unwrap()
            .insert(name.to_string(), (format.to_string(), members.to_vec()));
        Ok(())
    }

    async fn group_exists(&self, name: &str) -> Result<bool> {
        Ok(self.groups.lock().unwrap().contains_key(name))
    }

    async fn group_members(&self, group_name: &str) -> Result<Vec<Repository>> {
        let members = match self.groups.lock().unwrap().get(group_name) {
            Some((_, members)) => members.clone(),
            None => return Ok(vec![]),
        };
        let repos = self.repos.lock().unwrap();
        let mut resolved: Vec<(i32, Repository)> = members
            .iter()
            .filter_map(|m| repos.get(&m.repository_id).map(|r| (m.priority, r.clone())))
            .collect();
        resolved.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
        Ok(resolved.into_iter().map(|(_, r)| r).collect())
    }

    async fn upsert_artifact(&self, artifact: &Artifact, expires_at: DateTime<Utc>) -> Result<()> {
        let identity = (
            artifact.repository_id,
            artifact.name.clone(),
            artifact.version.clone(),
        );

        let mut artifacts = self.artifacts.lock().unwrap();
        let mut stored = artifact.clone();
        if let Some(existing) = artifacts.get(&identity) {
            stored.id = existing.id;
            stored.created_at = existing.created_at;
        }
        let artifact_id = stored.id;
        let storage_key = stored.storage_key.clone();
        artifacts.insert(identity, stored);

        let key = CacheEntry::key_for(artifact.repository_id, &artifact.name, &artifact.version);
        self.entries.lock().unwrap().insert(
            key.clone(),
            (
                artifact_id,
                CacheEntry {
                    key,
                    repository_id: artifact.repository_id,
                    storage_key,
                    expires_at,
                },
            ),
        );
        Ok(())
    }

    async fn artifact(
        &self,
        repository_id: Uuid,
        name: &str,
        version: &str,
    ) -> Result<Option<Artifact>> {
        Ok(self
            .artifacts
            .lock()
            .unwrap()
            .get(&(repository_id, name.to_string(), version.to_string()))
            .cloned())
    }

    async fn artifact_exists(
        &self,
        repository_id: Uuid,
        name: &str,
        version: &str,
    ) -> Result<bool> {
        Ok(self
            .artifacts
            .lock()
            .unwrap()
            .contains_key(&(repository_id, name.to_string(), version.to_string())))
    }

    async fn delete_artifact(&self, repository_id: Uuid, name: &str, version: &str) -> Result<()> {
        let removed = self
            .artifacts
            .lock()
            .unwrap()
            .remove(&(repository_id, name.to_string(), version.to_string()));
        if let Some(artifact) = removed {
            self.entries
                .lock()
                .unwrap()
                .retain(|_, (owner, _)| *owner != artifact.id);
        }
        Ok(())
    }

    async fn delete_artifacts_by_ids(&self, ids: &[Uuid]) -> Result<u64> {
        let mut artifacts = self.artifacts.lock().unwrap();
        let before = artifacts.len();
        artifacts.retain(|_, a| !ids.contains(&a.id));
        let removed = (before - artifacts.len()) as u64;

        self.entries
            .lock()
            .unwrap()
            .retain(|_, (owner, _)| !ids.contains(owner));
        Ok(removed)
    }

    async fn artifact_id_by_storage_key(
        &self,
        repository_id: Uuid,
        storage_key: &str,
    ) -> Result<Option<Uuid>> {
        Ok(self
            .artifacts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.repository_id == repository_id && a.storage_key == storage_key)
            .map(|a| a.id))
    }

    async fn touch_last_accessed(&self, artifact_id: Uuid) -> Result<()> {
        let mut artifacts = self.artifacts.lock().unwrap();
        if let Some(artifact) = artifacts.values_mut().find(|a| a.id == artifact_id) {
            artifact.last_accessed_at = Utc::now();
        }
        Ok(())
    }

    async fn record_download(&self, event: &DownloadEvent) -> Result<()> {
        self.downloads.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn expired_cache_entries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CacheEntry>> {
        let mut expired: Vec<CacheEntry> = self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|(_, e)| e.expires_at < now)
            .map(|(_, e)| e.clone())
            .collect();
        expired.sort_by_key(|e| e.expires_at);
        expired.truncate(limit as usize);
        Ok(expired)
    }

    async fn delete_cache_entries(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|key, _| !keys.contains(key));
        Ok((before - entries.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// In-memory blob store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBlobs {
    blobs: Mutex<HashMap<String, Bytes>>,
    /// When set, every put fails after consuming the stream.
    pub fail_puts: Mutex<bool>,
}

impl MemoryBlobs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn raw(&self, key: &str) -> Option<Bytes> {
        self.blobs.lock().unwrap().get(key).cloned()
    }

    pub fn set_fail_puts(&self, fail: bool) {
        *self.fail_puts.lock().unwrap() = fail;
    }
}

#[async_trait]
impl Blobs for MemoryBlobs {
    async fn put(&self, key: &str, mut reader: ByteStream, _content_type: &str) -> Result<()> {
        let mut buf = Vec::new();
        while let Some(chunk) = reader.next().await {
            match chunk {
                Ok(bytes) => buf.extend_from_slice(&bytes),
                // Partial writes never become visible
                Err(e) => return Err(AppError::Io(e)),
            }
        }
        if *self.fail_puts.lock().unwrap() {
            return Err(AppError::Storage("simulated put failure".into()));
        }
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::from(buf));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        match self.blobs.lock().unwrap().get(key) {
            Some(bytes) => Ok(stream_from_bytes(bytes.clone())),
            None => Err(AppError::NotFound(format!("Storage key not found: {}", key))),
        }
    }

    async fn head(&self, key: &str) -> Result<BlobMeta> {
        match self.blobs.lock().unwrap().get(key) {
            Some(bytes) => Ok(BlobMeta {
                size: bytes.len() as u64,
                content_type: None,
                etag: None,
                last_modified: None,
            }),
            None => Err(AppError::NotFound(format!("Storage key not found: {}", key))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.lock().unwrap().contains_key(key))
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .take(limit)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub meta: Arc<MemoryMeta>,
    pub blobs: Arc<MemoryBlobs>,
    pub artifacts: Arc<ArtifactStore>,
    pub cache: Arc<CacheEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store_timeout(Duration::from_secs(30))
    }

    pub fn with_store_timeout(store_timeout: Duration) -> Self {
        let meta = MemoryMeta::new();
        let blobs = MemoryBlobs::new();
        let tasks = TaskPool::new(2, 64);
        let meta_dyn: Arc<dyn MetaStore> = meta.clone();
        let blobs_dyn: Arc<dyn Blobs> = blobs.clone();
        let artifacts = Arc::new(ArtifactStore::new(meta_dyn.clone(), blobs_dyn, tasks));
        let cache = Arc::new(CacheEngine::new(meta_dyn, artifacts.clone(), store_timeout));
        Self {
            meta,
            blobs,
            artifacts,
            cache,
        }
    }

    /// Register a repository and return it.
    pub async fn add_repo(
        &self,
        name: &str,
        format: RepositoryFormat,
        repo_type: RepositoryType,
        upstream_url: Option<&str>,
    ) -> Repository {
        let now = Utc::now();
        let repo = Repository {
            id: Uuid::new_v4(),
            name: name.to_string(),
            format,
            repo_type,
            upstream_url: upstream_url.map(String::from),
            upstream_username: None,
            upstream_password: None,
            cache_ttl_secs: 3600,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        self.meta.upsert_repository(&repo).await.unwrap();
        repo
    }

    /// Register a group over `(repository, priority)` pairs.
    pub async fn add_group(&self, name: &str, format: RepositoryFormat, members: &[(&Repository, i32)]) {
        let members: Vec<GroupMember> = members
            .iter()
            .map(|(repo, priority)| GroupMember {
                group_name: name.to_string(),
                repository_id: repo.id,
                priority: *priority,
            })
            .collect();
        self.meta
            .replace_group(name, format.as_str(), &members)
            .await
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Stream helpers
// ---------------------------------------------------------------------------

/// Collect a byte stream into a buffer.
pub async fn collect(mut stream: ByteStream) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// A stream of `count` identical chunks of `chunk_size` bytes.
pub fn chunked_payload(byte: u8, chunk_size: usize, count: usize) -> (ByteStream, Vec<u8>) {
    let chunk = vec![byte; chunk_size];
    let total = [&chunk[..]].repeat(count).concat();
    let chunks: Vec<std::io::Result<Bytes>> = (0..count)
        .map(|_| Ok(Bytes::from(chunk.clone())))
        .collect();
    (Box::pin(futures::stream::iter(chunks)), total)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(bytes))
}
