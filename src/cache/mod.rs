//! Cache engine: the composite serve operation consumed by every protocol
//! adapter.
//!
//! `serve` enumerates candidate repositories (a single repository or the
//! ordered members of a group), runs a strictly sequential cache-lookup
//! pass, then a strictly sequential upstream pass over proxy members using
//! an adapter-supplied fetch hook, and on a winning fetch tees the upstream
//! stream between the caller and cache population.

pub mod tee;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::error::{AppError, Result};
use crate::groups::{Groups, MemberFilter};
use crate::meta::MetaStore;
use crate::models::{ArtifactInfo, Repository};
use crate::storage::ByteStream;

use tee::tee;

/// Logical serve target: one repository or a named group.
#[derive(Debug, Clone)]
pub enum Target {
    Repository(Uuid),
    Group(String),
}

/// What an upstream fetch hook produced for one proxy member.
pub enum FetchReply {
    /// Upstream has the artifact; stream plus its advertised content type.
    Found {
        stream: ByteStream,
        content_type: Option<String>,
    },
    /// Clean 404/410: try the next member.
    Missing,
}

/// Boxed future returned by a fetch hook invocation.
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<FetchReply>> + Send>>;

/// Options attached to a serve call.
#[derive(Default)]
pub struct ServeOptions {
    /// Content type recorded on store when upstream does not advertise one
    pub content_type: Option<String>,
    /// Free-form metadata persisted with the artifact
    pub metadata: HashMap<String, String>,
    /// Per-artifact TTL override
    pub ttl: Option<Duration>,
    /// Lower-case hex SHA-256 the content must hash to (docker blobs).
    /// A cached artifact that fails the check is skipped; a fetched one is
    /// not committed to the cache.
    pub expected_digest: Option<String>,
}

/// Outcome of a serve call.
pub enum ServeOutcome {
    /// Served from cache
    Hit {
        repository: String,
        stream: ByteStream,
        info: ArtifactInfo,
    },
    /// Teed from upstream; `stored` completes when cache population
    /// finishes (or fails, or times out).
    Miss {
        repository: String,
        repository_id: Uuid,
        stream: ByteStream,
        content_type: String,
        stored: oneshot::Receiver<Result<ArtifactInfo>>,
    },
    /// Every candidate returned a clean not-found
    NotFound,
}

impl std::fmt::Debug for ServeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServeOutcome::Hit { repository, info, .. } => f
                .debug_struct("Hit")
                .field("repository", repository)
                .field("info", info)
                .finish(),
            ServeOutcome::Miss { repository, repository_id, content_type, .. } => f
                .debug_struct("Miss")
                .field("repository", repository)
                .field("repository_id", repository_id)
                .field("content_type", content_type)
                .finish(),
            ServeOutcome::NotFound => f.write_str("NotFound"),
        }
    }
}

/// The pull-through cache engine (composes the artifact store and the
/// group resolver; upstream knowledge stays in the adapters' hooks).
pub struct CacheEngine {
    meta: Arc<dyn MetaStore>,
    artifacts: Arc<ArtifactStore>,
    groups: Groups,
    /// Upper bound on background cache population
    store_timeout: Duration,
}

impl CacheEngine {
    pub fn new(
        meta: Arc<dyn MetaStore>,
        artifacts: Arc<ArtifactStore>,
        store_timeout: Duration,
    ) -> Self {
        let groups = Groups::new(meta.clone());
        Self {
            meta,
            artifacts,
            groups,
            store_timeout,
        }
    }

    /// Resolve a configured route name to a target: groups shadow
    /// repositories of the same name.
    pub async fn resolve_target(&self, name: &str) -> Result<Target> {
        if self.groups.exists(name).await? {
            return Ok(Target::Group(name.to_string()));
        }
        match self.meta.repository_by_name(name).await? {
            Some(repo) => Ok(Target::Repository(repo.id)),
            None => Err(AppError::Internal(format!(
                "No repository or group named '{}' is configured",
                name
            ))),
        }
    }

    /// Serve `(name, version)` from the target, falling back to the
    /// adapter's fetch hook on miss.
    pub async fn serve<F>(
        &self,
        target: Target,
        name: &str,
        version: &str,
        fetch: F,
        options: ServeOptions,
    ) -> Result<ServeOutcome>
    where
        F: Fn(Repository) -> FetchFuture + Send,
    {
        let candidates = self.candidates(&target).await?;

        // Cache-lookup pass: strictly sequential, priority order is
        // semantic. Lookup errors fail open to the upstream pass.
        for candidate in &candidates {
            match self.artifacts.get(candidate.id, name, version).await {
                Ok(Some((stream, info))) => {
                    if let Some(expected) = options.expected_digest.as_deref() {
                        if info.checksum_sha256 != expected {
                            tracing::warn!(
                                repository = %candidate.name,
                                name = %name,
                                expected,
                                actual = %info.checksum_sha256,
                                "Cached digest mismatch, skipping entry"
                            );
                            continue;
                        }
                    }
                    return Ok(ServeOutcome::Hit {
                        repository: candidate.name.clone(),
                        stream,
                        info,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        repository = %candidate.name,
                        error = %e,
                        "Cache lookup failed, treating as miss"
                    );
                }
            }
        }

        // Upstream pass: proxy members only, same order. A clean 404/410
        // falls through to the next member; any other error aborts so a
        // failing mirror cannot mask the correct content.
        for candidate in candidates
            .iter()
            .filter(|c| c.is_fetchable_proxy())
        {
            match fetch(candidate.clone()).await? {
                FetchReply::Found {
                    stream,
                    content_type,
                } => {
                    return Ok(self.tee_and_store(
                        candidate,
                        name,
                        version,
                        stream,
                        content_type,
                        options,
                    ));
                }
                FetchReply::Missing => {
                    tracing::debug!(
                        repository = %candidate.name,
                        name = %name,
                        version = %version,
                        "Upstream miss, trying next candidate"
                    );
                }
            }
        }

        Ok(ServeOutcome::NotFound)
    }

    /// The proxy members a passthrough (non-cached) request may consult,
    /// in the same priority order as the upstream pass.
    pub async fn proxy_candidates(&self, target: &Target) -> Result<Vec<Repository>> {
        Ok(self
            .candidates(target)
            .await?
            .into_iter()
            .filter(Repository::is_fetchable_proxy)
            .collect())
    }

    async fn candidates(&self, target: &Target) -> Result<Vec<Repository>> {
        match target {
            Target::Group(group) => {
                let members = self.groups.members_of(group, MemberFilter::All).await?;
                if members.is_empty() && !self.groups.exists(group).await? {
                    return Err(AppError::Internal(format!(
                        "Group '{}' is not configured",
                        group
                    )));
                }
                Ok(members)
            }
            Target::Repository(id) => {
                let repo = self.meta.repository_by_id(*id).await?.ok_or_else(|| {
                    AppError::Internal(format!("Repository {} not initialised", id))
                })?;
                Ok(if repo.enabled { vec![repo] } else { vec![] })
            }
        }
    }

    /// Fan the winning upstream stream out between the caller and cache
    /// population. The store side keeps running after a caller disconnect;
    /// a store failure leaves the caller's stream untouched.
    fn tee_and_store(
        &self,
        winner: &Repository,
        name: &str,
        version: &str,
        upstream: ByteStream,
        upstream_content_type: Option<String>,
        options: ServeOptions,
    ) -> ServeOutcome {
        let handles = tee(upstream);
        let (done_tx, done_rx) = oneshot::channel();

        let artifacts = self.artifacts.clone();
        let repository_id = winner.id;
        let repository_name = winner.name.clone();
        let name = name.to_string();
        let version = version.to_string();
        let content_type = upstream_content_type
            .or(options.content_type)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let response_content_type = content_type.clone();
        let metadata = options.metadata;
        let ttl = options.ttl;
        let expected_digest = options.expected_digest;
        let store_timeout = self.store_timeout;

        tokio::spawn(async move {
            let stored = tokio::time::timeout(
                store_timeout,
                artifacts.store(
                    repository_id,
                    &name,
                    &version,
                    handles.store,
                    &content_type,
                    metadata,
                    ttl,
                ),
            )
            .await;

            let result = match stored {
                Ok(Ok(info)) => match expected_digest {
                    Some(expected) if info.checksum_sha256 != expected => {
                        tracing::warn!(
                            repository = %repository_name,
                            name = %name,
                            expected,
                            actual = %info.checksum_sha256,
                            "Fetched digest mismatch, abandoning cache insert"
                        );
                        let _ = artifacts.delete(repository_id, &name, &version).await;
                        Err(AppError::StoreFailure(format!(
                            "Digest mismatch for {}: expected {}, got {}",
                            name, expected, info.checksum_sha256
                        )))
                    }
                    _ => Ok(info),
                },
                Ok(Err(e)) => {
                    tracing::warn!(
                        repository = %repository_name,
                        name = %name,
                        version = %version,
                        error = %e,
                        "Cache population failed, response already streaming"
                    );
                    Err(AppError::StoreFailure(e.to_string()))
                }
                Err(_) => {
                    tracing::warn!(
                        repository = %repository_name,
                        name = %name,
                        version = %version,
                        timeout_secs = store_timeout.as_secs(),
                        "Cache population timed out"
                    );
                    Err(AppError::StoreFailure(format!(
                        "Cache population for {} exceeded {}s",
                        name,
                        store_timeout.as_secs()
                    )))
                }
            };

            let _ = done_tx.send(result);
        });

        ServeOutcome::Miss {
            repository: winner.name.clone(),
            repository_id: winner.id,
            stream: handles.client,
            content_type: response_content_type,
            stored: done_rx,
        }
    }
}
