//! Repository and group models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Repository format enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryFormat {
    Npm,
    Pypi,
    Docker,
    Go,
    Maven,
    Nuget,
    Generic,
}

impl RepositoryFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Pypi => "pypi",
            Self::Docker => "docker",
            Self::Go => "go",
            Self::Maven => "maven",
            Self::Nuget => "nuget",
            Self::Generic => "generic",
        }
    }
}

impl std::str::FromStr for RepositoryFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npm" => Ok(Self::Npm),
            "pypi" => Ok(Self::Pypi),
            "docker" => Ok(Self::Docker),
            "go" => Ok(Self::Go),
            "maven" => Ok(Self::Maven),
            "nuget" => Ok(Self::Nuget),
            "generic" => Ok(Self::Generic),
            other => Err(AppError::Config(format!(
                "Unknown repository format: {}",
                other
            ))),
        }
    }
}

/// Repository type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    /// Holds artifacts directly, no upstream
    Hosted,
    /// Pull-through proxy for one upstream registry
    Proxy,
    /// Virtual fan-out over member repositories
    Group,
}

impl RepositoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hosted => "hosted",
            Self::Proxy => "proxy",
            Self::Group => "group",
        }
    }
}

impl std::str::FromStr for RepositoryType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hosted" => Ok(Self::Hosted),
            "proxy" => Ok(Self::Proxy),
            "group" => Ok(Self::Group),
            other => Err(AppError::Config(format!(
                "Unknown repository type: {}",
                other
            ))),
        }
    }
}

/// Repository entity
#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub id: Uuid,
    /// Globally unique, lower-case, stable name
    pub name: String,
    pub format: RepositoryFormat,
    pub repo_type: RepositoryType,
    /// Upstream base URL; required for proxies, absent for hosted
    pub upstream_url: Option<String>,
    /// Opaque upstream credentials for Basic auth
    pub upstream_username: Option<String>,
    pub upstream_password: Option<String>,
    /// Default cache TTL in seconds for artifacts stored in this repository
    pub cache_ttl_secs: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    /// Whether this repository can serve as an upstream-fetch candidate.
    pub fn is_fetchable_proxy(&self) -> bool {
        self.enabled
            && self.repo_type == RepositoryType::Proxy
            && self
                .upstream_url
                .as_deref()
                .is_some_and(|u| !u.is_empty())
    }
}

/// Group member entity: `(repository, priority)` within a named group.
/// Smaller priority is tried first; ties break by repository name ascending.
#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    pub group_name: String,
    pub repository_id: Uuid,
    pub priority: i32,
}
