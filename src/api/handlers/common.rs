//! Shared adapter plumbing: route resolution, pull-through serving,
//! passthrough proxying, and client metadata extraction.

use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;

use crate::api::respond::{self, ArtifactHeaders};
use crate::api::AppState;
use crate::cache::{FetchFuture, ServeOptions, ServeOutcome, Target};
use crate::error::{AppError, Result};
use crate::models::{Repository, RepositoryFormat};

/// Client attributes recorded with download events.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Pull client ip (X-Forwarded-For, first hop) and user agent from headers.
pub fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    ClientMeta { ip, user_agent }
}

/// External base URL of this instance, derived from the request headers.
pub fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}

/// Resolve the serve target configured for a format's route.
pub async fn target_for(state: &AppState, format: RepositoryFormat) -> Result<Target> {
    let route = state.repos.route_for(format);
    state.cache.resolve_target(&route).await
}

/// The standard cached-artifact flow shared by the adapters: resolve the
/// route, serve through the cache engine, record the download, and build
/// the labelled response. `NotFound` surfaces as 404.
#[allow(clippy::too_many_arguments)]
pub async fn serve_pull_through<F>(
    state: &AppState,
    format: RepositoryFormat,
    name: &str,
    version: &str,
    fetch: F,
    options: ServeOptions,
    headers: ArtifactHeaders,
    client: ClientMeta,
) -> Result<Response>
where
    F: Fn(Repository) -> FetchFuture + Send,
{
    let target = target_for(state, format).await?;

    match state
        .cache
        .serve(target, name, version, fetch, options)
        .await?
    {
        ServeOutcome::Hit {
            repository,
            stream,
            info,
        } => {
            state
                .artifacts
                .record_download(info.repository_id, name, version, client.ip, client.user_agent);
            Ok(respond::hit_response(&repository, stream, &info, &headers))
        }
        ServeOutcome::Miss {
            repository,
            repository_id,
            stream,
            content_type,
            stored,
        } => {
            // The store task keeps the cache population alive even when the
            // caller disconnects; the completion channel is not awaited here.
            drop(stored);
            state
                .artifacts
                .record_download(repository_id, name, version, client.ip, client.user_agent);
            Ok(respond::miss_response(
                &repository,
                stream,
                content_type,
                &headers,
            ))
        }
        ServeOutcome::NotFound => Err(AppError::NotFound(format!(
            "{}/{} not found in any candidate repository",
            name, version
        ))),
    }
}

/// Proxied (non-cached) fetch of a small document through the group's proxy
/// members in priority order. Returns the body, content type, and the name
/// of the member that produced it.
pub async fn proxy_passthrough(
    state: &AppState,
    format: RepositoryFormat,
    path: &str,
    extra_headers: HeaderMap,
) -> Result<(Bytes, Option<String>, String)> {
    let target = target_for(state, format).await?;
    let candidates = state.cache.proxy_candidates(&target).await?;

    for repo in candidates {
        match state
            .upstream
            .fetch_buffered(&repo, path, extra_headers.clone())
            .await?
        {
            Some((bytes, content_type)) => return Ok((bytes, content_type, repo.name)),
            None => continue,
        }
    }

    Err(AppError::NotFound(format!("{} not found upstream", path)))
}
