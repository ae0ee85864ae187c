//! Artifact, cache-entry, and download-event models.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Artifact entity: a stored blob plus its metadata.
/// Identity is the composite `(repository, name, version)`.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub name: String,
    pub version: String,
    /// Object-store path, deterministic from `(repo name, sanitised name, version)`
    pub storage_key: String,
    pub size_bytes: i64,
    /// Lower-case hex SHA-256 of the stored bytes
    pub checksum_sha256: String,
    pub content_type: String,
    /// Free-form metadata (filename, source repository, ...)
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Summary of a stored artifact returned by store/get operations.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub repository_id: Uuid,
    pub name: String,
    pub version: String,
    pub storage_key: String,
    pub size_bytes: i64,
    pub checksum_sha256: String,
    pub content_type: String,
}

impl From<&Artifact> for ArtifactInfo {
    fn from(a: &Artifact) -> Self {
        Self {
            repository_id: a.repository_id,
            name: a.name.clone(),
            version: a.version.clone(),
            storage_key: a.storage_key.clone(),
            size_bytes: a.size_bytes,
            checksum_sha256: a.checksum_sha256.clone(),
            content_type: a.content_type.clone(),
        }
    }
}

/// TTL stamp on a stored artifact. Exactly one entry per artifact;
/// removed by cascade when the artifact is removed.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    /// String key `"<repo-id>:<name>:<version>"`
    pub key: String,
    pub repository_id: Uuid,
    pub storage_key: String,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Build the canonical cache-entry key for an artifact identity.
    pub fn key_for(repository_id: Uuid, name: &str, version: &str) -> String {
        format!("{}:{}:{}", repository_id, name, version)
    }
}

/// Append-only download audit row. Never read on the serving path;
/// writes may be dropped under pressure.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadEvent {
    pub repository_id: Uuid,
    pub name: String,
    pub version: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub downloaded_at: DateTime<Utc>,
}
