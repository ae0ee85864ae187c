//! npm registry adapter.
//!
//! Routes are mounted at `/npm/...`:
//!   GET /npm/{package}                    - Package metadata (proxied)
//!   GET /npm/{@scope}/{package}           - Scoped package metadata
//!   GET /npm/{package}/-/{filename}       - Tarball (pull-through)
//!   GET /npm/{@scope}/{package}/-/{filename} - Scoped tarball
//!
//! Scoped names arrive as `@scope/pkg` or URL-encoded `@scope%2Fpkg`;
//! both map to the same package. Tarball metadata URLs in proxied
//! metadata are rewritten to point back at this instance.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use percent_encoding::percent_decode_str;

use crate::api::handlers::common::{self, client_meta};
use crate::api::respond::{self, ArtifactHeaders};
use crate::api::SharedState;
use crate::cache::{FetchFuture, ServeOptions};
use crate::error::{AppError, Result};
use crate::models::{Repository, RepositoryFormat};

pub fn router() -> Router<SharedState> {
    Router::new().route("/*path", get(handle))
}

/// A parsed npm request path.
#[derive(Debug, PartialEq, Eq)]
enum NpmRequest {
    Metadata { package: String },
    Tarball { package: String, filename: String },
}

fn parse_path(path: &str) -> Result<NpmRequest> {
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let decoded = decoded.trim_matches('/');

    if decoded.is_empty() {
        return Err(AppError::InvalidRequest("Empty npm path".into()));
    }

    if let Some((package, filename)) = decoded.split_once("/-/") {
        if filename.is_empty() || filename.contains('/') {
            return Err(AppError::InvalidRequest(format!(
                "Invalid npm tarball filename: {}",
                filename
            )));
        }
        return Ok(NpmRequest::Tarball {
            package: package.to_string(),
            filename: filename.to_string(),
        });
    }

    // Metadata: bare name or @scope/name
    let segments: Vec<&str> = decoded.split('/').collect();
    let valid = match segments.as_slice() {
        [name] => !name.is_empty() && !name.starts_with('@'),
        [scope, name] => scope.starts_with('@') && !name.is_empty(),
        _ => false,
    };
    if !valid {
        return Err(AppError::InvalidRequest(format!(
            "Invalid npm package path: {}",
            decoded
        )));
    }

    Ok(NpmRequest::Metadata {
        package: decoded.to_string(),
    })
}

/// Extract the version by stripping the `<clean-pkg>-` prefix and `.tgz`
/// suffix from a tarball filename.
fn version_from_filename(package: &str, filename: &str) -> Result<String> {
    let clean = package.rsplit('/').next().unwrap_or(package);
    filename
        .strip_prefix(&format!("{}-", clean))
        .and_then(|rest| rest.strip_suffix(".tgz"))
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| {
            AppError::InvalidRequest(format!(
                "Tarball filename '{}' does not match package '{}'",
                filename, package
            ))
        })
}

/// Rewrite `versions.*.dist.tarball` URLs in proxied metadata to point at
/// this instance.
fn rewrite_tarball_urls(json: &mut serde_json::Value, base_url: &str) {
    let Some(versions) = json.get_mut("versions").and_then(|v| v.as_object_mut()) else {
        return;
    };

    for (_version, version_data) in versions.iter_mut() {
        let pkg_name = version_data
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or("_unknown")
            .to_string();

        if let Some(dist) = version_data.get_mut("dist") {
            let new_url = dist
                .get("tarball")
                .and_then(|t| t.as_str())
                .and_then(|tarball| {
                    tarball.rsplit_once("/-/").map(|(_, filename)| {
                        format!("{}/npm/{}/-/{}", base_url, pkg_name, filename)
                    })
                });

            if let Some(url) = new_url {
                if let Some(d) = dist.as_object_mut() {
                    d.insert("tarball".to_string(), serde_json::Value::String(url));
                }
            }
        }
    }
}

async fn handle(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    match parse_path(&path)? {
        NpmRequest::Metadata { package } => serve_metadata(&state, &package, &headers).await,
        NpmRequest::Tarball { package, filename } => {
            serve_tarball(&state, &package, &filename, &headers).await
        }
    }
}

async fn serve_metadata(
    state: &SharedState,
    package: &str,
    headers: &HeaderMap,
) -> Result<Response> {
    // Upstream registries accept the encoded form for scoped packages.
    let upstream_path = package.replace('/', "%2F");
    let (content, content_type, repository) = common::proxy_passthrough(
        state,
        RepositoryFormat::Npm,
        &upstream_path,
        HeaderMap::new(),
    )
    .await?;

    if let Ok(mut json) = serde_json::from_slice::<serde_json::Value>(&content) {
        rewrite_tarball_urls(&mut json, &common::base_url(headers));
        let rewritten = serde_json::to_vec(&json)?;
        return Ok(respond::passthrough_response(
            &repository,
            rewritten.into(),
            "application/json".to_string(),
        ));
    }

    // Not valid JSON: relay the upstream body untouched
    Ok(respond::passthrough_response(
        &repository,
        content,
        content_type.unwrap_or_else(|| "application/json".to_string()),
    ))
}

async fn serve_tarball(
    state: &SharedState,
    package: &str,
    filename: &str,
    headers: &HeaderMap,
) -> Result<Response> {
    let version = version_from_filename(package, filename)?;

    let upstream = state.upstream.clone();
    let fetch_path = format!("{}/-/{}", package, filename);
    let fetch = move |repo: Repository| -> FetchFuture {
        let upstream = upstream.clone();
        let fetch_path = fetch_path.clone();
        Box::pin(async move { upstream.fetch_stream(&repo, &fetch_path, HeaderMap::new()).await })
    };

    let mut options = ServeOptions {
        content_type: Some("application/octet-stream".to_string()),
        ..Default::default()
    };
    options
        .metadata
        .insert("filename".to_string(), filename.to_string());

    common::serve_pull_through(
        state,
        RepositoryFormat::Npm,
        package,
        &version,
        fetch,
        options,
        ArtifactHeaders {
            filename: Some(filename.to_string()),
            ..Default::default()
        },
        client_meta(headers),
    )
    .await
}
