//! Application configuration loaded from environment variables, plus the
//! declarative repository/group definitions loaded from a JSON file and
//! reconciled into the metadata store at startup.

use std::collections::HashMap;
use std::env;

use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{RepositoryFormat, RepositoryType};

/// Default cache TTL in seconds (24 hours)
pub const DEFAULT_CACHE_TTL_SECS: i64 = 86400;

/// Read an environment variable and parse it, falling back to a default on missing or invalid values.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Server bind address (host:port)
    pub bind_address: String,

    /// Storage backend: "filesystem" or "s3"
    pub storage_backend: String,

    /// Filesystem storage path (when storage_backend = "filesystem")
    pub storage_path: String,

    /// S3 bucket name (when storage_backend = "s3")
    pub s3_bucket: Option<String>,

    /// S3 region
    pub s3_region: Option<String>,

    /// S3 endpoint URL (for MinIO or other S3-compatible services)
    pub s3_endpoint: Option<String>,

    /// Path to the declarative repositories/groups JSON file
    pub repos_config_path: String,

    /// Eviction pass interval in seconds
    pub eviction_interval_secs: u64,

    /// Max expired entries handled per eviction batch
    pub eviction_batch_size: i64,

    /// Upper bound on background cache population after a client disconnect
    pub store_timeout_secs: u64,

    /// Queue capacity of the fire-and-forget background pool
    pub background_queue_size: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| AppError::Config("DATABASE_URL not set".into()))?,
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            storage_backend: env::var("STORAGE_BACKEND").unwrap_or_else(|_| "filesystem".into()),
            storage_path: env::var("STORAGE_PATH")
                .unwrap_or_else(|_| "/var/lib/amargo/artifacts".into()),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            repos_config_path: env::var("REPOS_CONFIG")
                .unwrap_or_else(|_| "/etc/amargo/repositories.json".into()),
            eviction_interval_secs: env_parse("EVICTION_INTERVAL_SECS", 3600),
            eviction_batch_size: env_parse("EVICTION_BATCH_SIZE", 100),
            store_timeout_secs: env_parse("STORE_TIMEOUT_SECS", 900),
            background_queue_size: env_parse("BACKGROUND_QUEUE_SIZE", 1024),
        })
    }
}

/// One repository definition from the declarative config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryDef {
    pub name: String,
    pub format: RepositoryFormat,
    #[serde(rename = "type")]
    pub repo_type: RepositoryType,
    #[serde(default)]
    pub upstream_url: Option<String>,
    #[serde(default)]
    pub upstream_username: Option<String>,
    #[serde(default)]
    pub upstream_password: Option<String>,
    #[serde(default)]
    pub cache_ttl_secs: Option<i64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// One group member reference: repository name plus priority.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupMemberDef {
    pub repository: String,
    pub priority: i32,
}

/// One group definition from the declarative config file.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupDef {
    pub name: String,
    pub format: RepositoryFormat,
    pub members: Vec<GroupMemberDef>,
}

/// The declarative repositories/groups/routes file.
///
/// `routes` maps a format prefix ("npm", "pypi", ...) to the repository or
/// group name its adapter serves; a missing entry defaults to the format
/// name itself.
#[derive(Debug, Clone, Deserialize)]
pub struct ReposConfig {
    #[serde(default)]
    pub repositories: Vec<RepositoryDef>,
    #[serde(default)]
    pub groups: Vec<GroupDef>,
    #[serde(default)]
    pub routes: HashMap<String, String>,
}

impl ReposConfig {
    /// Load and validate the declarative config from a JSON file.
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Cannot read repos config {}: {}", path, e))
        })?;
        let config: ReposConfig = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Invalid repos config {}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the logical target name for a format route.
    pub fn route_for(&self, format: RepositoryFormat) -> String {
        self.routes
            .get(format.as_str())
            .cloned()
            .unwrap_or_else(|| format.as_str().to_string())
    }

    /// Enforce the data-model invariants before anything reaches the store:
    /// proxies need an upstream, hosted repositories must not have one,
    /// group members must exist and share the group's format.
    pub fn validate(&self) -> Result<()> {
        let mut by_name: HashMap<&str, &RepositoryDef> = HashMap::new();
        for repo in &self.repositories {
            if repo.name != repo.name.to_lowercase() {
                return Err(AppError::Config(format!(
                    "Repository name must be lower-case: {}",
                    repo.name
                )));
            }
            if by_name.insert(repo.name.as_str(), repo).is_some() {
                return Err(AppError::Config(format!(
                    "Duplicate repository name: {}",
                    repo.name
                )));
            }
            match repo.repo_type {
                RepositoryType::Proxy => {
                    if repo.upstream_url.as_deref().map_or(true, str::is_empty) {
                        return Err(AppError::Config(format!(
                            "Proxy repository '{}' requires an upstream_url",
                            repo.name
                        )));
                    }
                }
                RepositoryType::Hosted => {
                    if repo.upstream_url.is_some() {
                        return Err(AppError::Config(format!(
                            "Hosted repository '{}' must not have an upstream_url",
                            repo.name
                        )));
                    }
                }
                RepositoryType::Group => {
                    return Err(AppError::Config(format!(
                        "Repository '{}' has type group; define it under groups instead",
                        repo.name
                    )));
                }
            }
        }

        for group in &self.groups {
            if by_name.contains_key(group.name.as_str()) {
                return Err(AppError::Config(format!(
                    "Group '{}' collides with a repository name",
                    group.name
                )));
            }
            for member in &group.members {
                let repo = by_name.get(member.repository.as_str()).ok_or_else(|| {
                    AppError::Config(format!(
                        "Group '{}' references unknown repository '{}'",
                        group.name, member.repository
                    ))
                })?;
                if repo.format != group.format {
                    return Err(AppError::Config(format!(
                        "Group '{}' ({}) cannot contain '{}' ({})",
                        group.name,
                        group.format.as_str(),
                        repo.name,
                        repo.format.as_str()
                    )));
                }
                if member.priority < 0 {
                    return Err(AppError::Config(format!(
                        "Group '{}' member '{}' has negative priority",
                        group.name, member.repository
                    )));
                }
            }
        }

        Ok(())
    }
}
