//! Metadata store: the relational index of repositories, groups, artifacts,
//! cache entries, and download events.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Artifact, CacheEntry, DownloadEvent, GroupMember, Repository};

pub use postgres::PgMetaStore;

/// Metadata store trait.
///
/// Group member enumeration returns repositories ordered by
/// `(priority asc, name asc)`; that ordering is semantic, not cosmetic.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Insert or update a repository by name. The id of an existing row is
    /// preserved across updates.
    async fn upsert_repository(&self, repo: &Repository) -> Result<()>;

    async fn repository_by_name(&self, name: &str) -> Result<Option<Repository>>;

    async fn repository_by_id(&self, id: Uuid) -> Result<Option<Repository>>;

    /// Replace a group's membership wholesale.
    async fn replace_group(&self, name: &str, format: &str, members: &[GroupMember])
        -> Result<()>;

    async fn group_exists(&self, name: &str) -> Result<bool>;

    /// Member repositories of a group, ordered `(priority asc, name asc)`.
    async fn group_members(&self, group_name: &str) -> Result<Vec<Repository>>;

    /// Atomically insert or replace the artifact row and its cache entry.
    async fn upsert_artifact(&self, artifact: &Artifact, expires_at: DateTime<Utc>) -> Result<()>;

    async fn artifact(
        &self,
        repository_id: Uuid,
        name: &str,
        version: &str,
    ) -> Result<Option<Artifact>>;

    async fn artifact_exists(&self, repository_id: Uuid, name: &str, version: &str)
        -> Result<bool>;

    /// Delete one artifact row (cascades to its cache entry); idempotent.
    async fn delete_artifact(&self, repository_id: Uuid, name: &str, version: &str) -> Result<()>;

    /// Bulk-delete artifact rows by id; returns the number removed.
    async fn delete_artifacts_by_ids(&self, ids: &[Uuid]) -> Result<u64>;

    /// Find the artifact owning a storage key within a repository.
    async fn artifact_id_by_storage_key(
        &self,
        repository_id: Uuid,
        storage_key: &str,
    ) -> Result<Option<Uuid>>;

    /// Best-effort bump of `last_accessed_at`; tolerates a concurrent delete.
    async fn touch_last_accessed(&self, artifact_id: Uuid) -> Result<()>;

    /// Append a download event.
    async fn record_download(&self, event: &DownloadEvent) -> Result<()>;

    /// Cache entries with `expires_at < now`, bounded to `limit` rows.
    async fn expired_cache_entries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CacheEntry>>;

    /// Delete cache entries by key (used for orphan cleanup); returns count.
    async fn delete_cache_entries(&self, keys: &[String]) -> Result<u64>;
}
