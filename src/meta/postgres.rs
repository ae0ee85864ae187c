//! PostgreSQL metadata store.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    Artifact, CacheEntry, DownloadEvent, GroupMember, Repository, RepositoryFormat, RepositoryType,
};

use super::MetaStore;

/// Metadata store over a PostgreSQL pool.
pub struct PgMetaStore {
    db: PgPool,
}

impl PgMetaStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[derive(FromRow)]
struct RepositoryRow {
    id: Uuid,
    name: String,
    format: String,
    repo_type: String,
    upstream_url: Option<String>,
    upstream_username: Option<String>,
    upstream_password: Option<String>,
    cache_ttl_secs: i64,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RepositoryRow {
    fn into_model(self) -> Result<Repository> {
        Ok(Repository {
            id: self.id,
            name: self.name,
            format: RepositoryFormat::from_str(&self.format)
                .map_err(|e| AppError::Database(e.to_string()))?,
            repo_type: RepositoryType::from_str(&self.repo_type)
                .map_err(|e| AppError::Database(e.to_string()))?,
            upstream_url: self.upstream_url,
            upstream_username: self.upstream_username,
            upstream_password: self.upstream_password,
            cache_ttl_secs: self.cache_ttl_secs,
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ArtifactRow {
    id: Uuid,
    repository_id: Uuid,
    name: String,
    version: String,
    storage_key: String,
    size_bytes: i64,
    checksum_sha256: String,
    content_type: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
}

impl ArtifactRow {
    fn into_model(self) -> Artifact {
        let metadata: HashMap<String, String> =
            serde_json::from_value(self.metadata).unwrap_or_default();
        Artifact {
            id: self.id,
            repository_id: self.repository_id,
            name: self.name,
            version: self.version,
            storage_key: self.storage_key,
            size_bytes: self.size_bytes,
            checksum_sha256: self.checksum_sha256,
            content_type: self.content_type,
            metadata,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
        }
    }
}

#[derive(FromRow)]
struct CacheEntryRow {
    key: String,
    repository_id: Uuid,
    storage_key: String,
    expires_at: DateTime<Utc>,
}

impl CacheEntryRow {
    fn into_model(self) -> CacheEntry {
        CacheEntry {
            key: self.key,
            repository_id: self.repository_id,
            storage_key: self.storage_key,
            expires_at: self.expires_at,
        }
    }
}

const REPOSITORY_COLUMNS: &str = "id, name, format, repo_type, upstream_url, upstream_username, \
     upstream_password, cache_ttl_secs, enabled, created_at, updated_at";

const ARTIFACT_COLUMNS: &str = "id, repository_id, name, version, storage_key, size_bytes, \
     checksum_sha256, content_type, metadata, created_at, last_accessed_at";

#[async_trait]
impl MetaStore for PgMetaStore {
    async fn upsert_repository(&self, repo: &Repository) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO repositories
                (id, name, format, repo_type, upstream_url, upstream_username,
                 upstream_password, cache_ttl_secs, enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (name) DO UPDATE SET
                format = EXCLUDED.format,
                repo_type = EXCLUDED.repo_type,
                upstream_url = EXCLUDED.upstream_url,
                upstream_username = EXCLUDED.upstream_username,
                upstream_password = EXCLUDED.upstream_password,
                cache_ttl_secs = EXCLUDED.cache_ttl_secs,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()
            "#,
        )
        .bind(repo.id)
        .bind(&repo.name)
        .bind(repo.format.as_str())
        .bind(repo.repo_type.as_str())
        .bind(&repo.upstream_url)
        .bind(&repo.upstream_username)
        .bind(&repo.upstream_password)
        .bind(repo.cache_ttl_secs)
        .bind(repo.enabled)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn repository_by_name(&self, name: &str) -> Result<Option<Repository>> {
        let row = sqlx::query_as::<_, RepositoryRow>(&format!(
            "SELECT {} FROM repositories WHERE name = $1",
            REPOSITORY_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.db)
        .await?;

        row.map(RepositoryRow::into_model).transpose()
    }

    async fn repository_by_id(&self, id: Uuid) -> Result<Option<Repository>> {
        let row = sqlx::query_as::<_, RepositoryRow>(&format!(
            "SELECT {} FROM repositories WHERE id = $1",
            REPOSITORY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(RepositoryRow::into_model).transpose()
    }

    async fn replace_group(
        &self,
        name: &str,
        format: &str,
        members: &[GroupMember],
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO groups (name, format) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET format = EXCLUDED.format
            "#,
        )
        .bind(name)
        .bind(format)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM group_members WHERE group_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        for member in members {
            sqlx::query(
                "INSERT INTO group_members (group_name, repository_id, priority) VALUES ($1, $2, $3)",
            )
            .bind(name)
            .bind(member.repository_id)
            .bind(member.priority)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn group_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM groups WHERE name = $1")
            .bind(name)
            .fetch_one(&self.db)
            .await?;
        Ok(count > 0)
    }

    async fn group_members(&self, group_name: &str) -> Result<Vec<Repository>> {
        let rows = sqlx::query_as::<_, RepositoryRow>(&format!(
            r#"
            SELECT r.{}
            FROM repositories r
            INNER JOIN group_members gm ON r.id = gm.repository_id
            WHERE gm.group_name = $1
            ORDER BY gm.priority ASC, r.name ASC
            "#,
            REPOSITORY_COLUMNS.replace(", ", ", r.")
        ))
        .bind(group_name)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(RepositoryRow::into_model).collect()
    }

    async fn upsert_artifact(&self, artifact: &Artifact, expires_at: DateTime<Utc>) -> Result<()> {
        let metadata = serde_json::to_value(&artifact.metadata)?;
        let entry_key = CacheEntry::key_for(artifact.repository_id, &artifact.name, &artifact.version);

        let mut tx = self.db.begin().await?;

        let artifact_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO artifacts
                (id, repository_id, name, version, storage_key, size_bytes,
                 checksum_sha256, content_type, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (repository_id, name, version) DO UPDATE SET
                storage_key = EXCLUDED.storage_key,
                size_bytes = EXCLUDED.size_bytes,
                checksum_sha256 = EXCLUDED.checksum_sha256,
                content_type = EXCLUDED.content_type,
                metadata = EXCLUDED.metadata,
                last_accessed_at = NOW()
            RETURNING id
            "#,
        )
        .bind(artifact.id)
        .bind(artifact.repository_id)
        .bind(&artifact.name)
        .bind(&artifact.version)
        .bind(&artifact.storage_key)
        .bind(artifact.size_bytes)
        .bind(&artifact.checksum_sha256)
        .bind(&artifact.content_type)
        .bind(metadata)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, artifact_id, repository_id, storage_key, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO UPDATE SET
                artifact_id = EXCLUDED.artifact_id,
                storage_key = EXCLUDED.storage_key,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&entry_key)
        .bind(artifact_id)
        .bind(artifact.repository_id)
        .bind(&artifact.storage_key)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn artifact(
        &self,
        repository_id: Uuid,
        name: &str,
        version: &str,
    ) -> Result<Option<Artifact>> {
        let row = sqlx::query_as::<_, ArtifactRow>(&format!(
            "SELECT {} FROM artifacts WHERE repository_id = $1 AND name = $2 AND version = $3",
            ARTIFACT_COLUMNS
        ))
        .bind(repository_id)
        .bind(name)
        .bind(version)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(ArtifactRow::into_model))
    }

    async fn artifact_exists(
        &self,
        repository_id: Uuid,
        name: &str,
        version: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM artifacts WHERE repository_id = $1 AND name = $2 AND version = $3",
        )
        .bind(repository_id)
        .bind(name)
        .bind(version)
        .fetch_one(&self.db)
        .await?;
        Ok(count > 0)
    }

    async fn delete_artifact(&self, repository_id: Uuid, name: &str, version: &str) -> Result<()> {
        sqlx::query("DELETE FROM artifacts WHERE repository_id = $1 AND name = $2 AND version = $3")
            .bind(repository_id)
            .bind(name)
            .bind(version)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_artifacts_by_ids(&self, ids: &[Uuid]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM artifacts WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn artifact_id_by_storage_key(
        &self,
        repository_id: Uuid,
        storage_key: &str,
    ) -> Result<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM artifacts WHERE repository_id = $1 AND storage_key = $2 LIMIT 1",
        )
        .bind(repository_id)
        .bind(storage_key)
        .fetch_optional(&self.db)
        .await?;
        Ok(id)
    }

    async fn touch_last_accessed(&self, artifact_id: Uuid) -> Result<()> {
        // No-ops when the artifact was deleted concurrently.
        sqlx::query("UPDATE artifacts SET last_accessed_at = NOW() WHERE id = $1")
            .bind(artifact_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn record_download(&self, event: &DownloadEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO download_events
                (repository_id, name, version, client_ip, user_agent, downloaded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.repository_id)
        .bind(&event.name)
        .bind(&event.version)
        .bind(&event.client_ip)
        .bind(&event.user_agent)
        .bind(event.downloaded_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn expired_cache_entries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query_as::<_, CacheEntryRow>(
            r#"
            SELECT key, repository_id, storage_key, expires_at
            FROM cache_entries
            WHERE expires_at < $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(CacheEntryRow::into_model).collect())
    }

    async fn delete_cache_entries(&self, keys: &[String]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ANY($1)")
            .bind(keys)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_columns_prefixing() {
        // group_members joins prefix every column with the repositories alias
        let prefixed = format!("r.{}", REPOSITORY_COLUMNS.replace(", ", ", r."));
        assert!(prefixed.starts_with("r.id, r.name"));
        assert!(prefixed.contains("r.cache_ttl_secs"));
        assert!(!prefixed.contains(", name"));
    }

    #[test]
    fn test_repository_row_rejects_unknown_format() {
        let row = RepositoryRow {
            id: Uuid::new_v4(),
            name: "bad".into(),
            format: "tarballs".into(),
            repo_type: "proxy".into(),
            upstream_url: None,
            upstream_username: None,
            upstream_password: None,
            cache_ttl_secs: 60,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(row.into_model().is_err());
    }

    #[test]
    fn test_artifact_row_tolerates_malformed_metadata() {
        let row = ArtifactRow {
            id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            name: "x".into(),
            version: "1".into(),
            storage_key: "k".into(),
            size_bytes: 1,
            checksum_sha256: "a".repeat(64),
            content_type: "application/octet-stream".into(),
            metadata: serde_json::json!([1, 2, 3]),
            created_at: Utc::now(),
            last_accessed_at: Utc::now(),
        };
        let artifact = row.into_model();
        assert!(artifact.metadata.is_empty());
    }
}
