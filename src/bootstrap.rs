//! Startup reconciliation of the declarative repository config into the
//! metadata store.

use chrono::Utc;
use uuid::Uuid;

use crate::config::ReposConfig;
use crate::error::{AppError, Result};
use crate::meta::MetaStore;
use crate::models::{GroupMember, Repository, RepositoryType};

/// Upsert every configured repository and replace every configured group's
/// membership. Existing repositories keep their ids (and therefore their
/// artifacts) across restarts.
pub async fn sync_repositories(meta: &dyn MetaStore, config: &ReposConfig) -> Result<()> {
    for def in &config.repositories {
        let now = Utc::now();
        let repo = Repository {
            id: Uuid::new_v4(),
            name: def.name.clone(),
            format: def.format,
            repo_type: def.repo_type,
            upstream_url: def.upstream_url.clone(),
            upstream_username: def.upstream_username.clone(),
            upstream_password: def.upstream_password.clone(),
            cache_ttl_secs: def
                .cache_ttl_secs
                .unwrap_or(crate::config::DEFAULT_CACHE_TTL_SECS),
            enabled: def.enabled,
            created_at: now,
            updated_at: now,
        };
        meta.upsert_repository(&repo).await?;
        tracing::debug!(repository = %def.name, "Synced repository");
    }

    for group in &config.groups {
        let mut members = Vec::with_capacity(group.members.len());
        for member in &group.members {
            let repo = meta
                .repository_by_name(&member.repository)
                .await?
                .ok_or_else(|| {
                    AppError::Config(format!(
                        "Group '{}' references missing repository '{}'",
                        group.name, member.repository
                    ))
                })?;
            if repo.repo_type == RepositoryType::Group {
                return Err(AppError::Config(format!(
                    "Group '{}' cannot nest group '{}'",
                    group.name, repo.name
                )));
            }
            members.push(GroupMember {
                group_name: group.name.clone(),
                repository_id: repo.id,
                priority: member.priority,
            });
        }

        meta.replace_group(&group.name, group.format.as_str(), &members)
            .await?;
        tracing::debug!(group = %group.name, members = members.len(), "Synced group");
    }

    tracing::info!(
        repositories = config.repositories.len(),
        groups = config.groups.len(),
        "Repository configuration synced"
    );
    Ok(())
}
