//! Group resolver: ordered member enumeration over the metadata store.

use std::sync::Arc;

use crate::error::Result;
use crate::meta::MetaStore;
use crate::models::Repository;

/// Restricts which group members are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFilter {
    /// All enabled members, in priority order
    All,
    /// Only enabled proxy members with a non-empty upstream
    ProxyOnly,
}

/// Pure view over the metadata store's group tables; ordering
/// `(priority asc, name asc)` comes from the store itself.
pub struct Groups {
    meta: Arc<dyn MetaStore>,
}

impl Groups {
    pub fn new(meta: Arc<dyn MetaStore>) -> Self {
        Self { meta }
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        self.meta.group_exists(name).await
    }

    /// Member repositories of `group_name`, sorted by `(priority, name)`.
    /// Disabled repositories are never returned.
    pub async fn members_of(
        &self,
        group_name: &str,
        filter: MemberFilter,
    ) -> Result<Vec<Repository>> {
        let members = self.meta.group_members(group_name).await?;
        Ok(members
            .into_iter()
            .filter(|r| match filter {
                MemberFilter::All => r.enabled,
                MemberFilter::ProxyOnly => r.is_fetchable_proxy(),
            })
            .collect())
    }
}
