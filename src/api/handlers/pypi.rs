//! PyPI Simple Repository (PEP 503) adapter.
//!
//! Routes are mounted at `/pypi/...`:
//!   GET /pypi/simple/                      - Root index (proxied)
//!   GET /pypi/simple/{project}/            - Project page (proxied, hrefs rewritten)
//!   GET /pypi/packages/{p1}/{p2}/{p3}/{filename} - Package file (pull-through)
//!
//! Project names are normalised per PEP 503 before hitting upstream, so
//! `Django` and `django` resolve to the same page. Project pages have
//! their file hrefs rewritten to `/pypi/packages/...` on this instance.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::api::handlers::common::{self, client_meta};
use crate::api::respond::{self, ArtifactHeaders};
use crate::api::SharedState;
use crate::cache::{FetchFuture, ServeOptions};
use crate::error::{AppError, Result};
use crate::models::{Repository, RepositoryFormat};

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/simple", get(simple_root))
        .route("/simple/", get(simple_root))
        .route("/simple/:project", get(simple_project))
        .route("/simple/:project/", get(simple_project))
        .route("/packages/*path", get(package_file))
}

/// PEP 503 name normalisation: lowercase, runs of `[._-]` collapse to `-`.
pub fn normalize_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_separator = false;

    for c in name.chars() {
        if matches!(c, '.' | '_' | '-') {
            if !last_was_separator {
                result.push('-');
                last_was_separator = true;
            }
        } else {
            result.push(c.to_ascii_lowercase());
            last_was_separator = false;
        }
    }

    result
}

const SDIST_SUFFIXES: [&str; 4] = [".tar.gz", ".tar.bz2", ".zip", ".egg"];

fn sdist_stem(filename: &str) -> Option<&str> {
    SDIST_SUFFIXES
        .iter()
        .find_map(|suffix| filename.strip_suffix(suffix))
}

/// Position of the version inside an sdist stem: the first digit that
/// follows a `-`.
fn sdist_version_start(stem: &str) -> Option<usize> {
    let bytes = stem.as_bytes();
    (1..bytes.len()).find(|&i| bytes[i - 1] == b'-' && bytes[i].is_ascii_digit())
}

/// Extract the version from a distribution filename.
/// Wheels (PEP 427) carry it as the segment after the first `-`; sdists
/// as the suffix starting at the first digit after a `-`.
pub fn version_from_filename(filename: &str) -> Result<String> {
    if let Some(stem) = filename.strip_suffix(".whl") {
        let mut parts = stem.split('-');
        let _distribution = parts.next();
        return parts
            .next()
            .filter(|v| !v.is_empty())
            .map(String::from)
            .ok_or_else(|| {
                AppError::InvalidRequest(format!("Invalid wheel filename: {}", filename))
            });
    }

    let stem = sdist_stem(filename).ok_or_else(|| {
        AppError::InvalidRequest(format!("Unknown Python package format: {}", filename))
    })?;

    sdist_version_start(stem)
        .map(|start| stem[start..].to_string())
        .ok_or_else(|| AppError::InvalidRequest(format!("No version in filename: {}", filename)))
}

/// Extract the normalised project name from a distribution filename.
pub fn package_from_filename(filename: &str) -> Result<String> {
    if let Some(stem) = filename.strip_suffix(".whl") {
        return stem
            .split('-')
            .next()
            .filter(|p| !p.is_empty())
            .map(normalize_name)
            .ok_or_else(|| {
                AppError::InvalidRequest(format!("Invalid wheel filename: {}", filename))
            });
    }

    let stem = sdist_stem(filename).ok_or_else(|| {
        AppError::InvalidRequest(format!("Unknown Python package format: {}", filename))
    })?;

    sdist_version_start(stem)
        .map(|start| normalize_name(&stem[..start - 1]))
        .ok_or_else(|| AppError::InvalidRequest(format!("No version in filename: {}", filename)))
}

/// Rewrite project-page hrefs so files resolve through this instance:
/// absolute pythonhosted URLs and relative `../../packages/` links both
/// become `/pypi/packages/...`.
pub fn rewrite_package_hrefs(html: &str) -> String {
    html.replace(
        "https://files.pythonhosted.org/packages/",
        "/pypi/packages/",
    )
    .replace("../../packages/", "/pypi/packages/")
}

async fn simple_root(State(state): State<SharedState>) -> Result<Response> {
    let (content, content_type, repository) =
        common::proxy_passthrough(&state, RepositoryFormat::Pypi, "simple/", HeaderMap::new())
            .await?;

    Ok(respond::passthrough_response(
        &repository,
        content,
        content_type.unwrap_or_else(|| "text/html; charset=utf-8".to_string()),
    ))
}

async fn simple_project(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<Response> {
    let normalized = normalize_name(&project);
    let upstream_path = format!("simple/{}/", normalized);

    let (content, content_type, repository) = common::proxy_passthrough(
        &state,
        RepositoryFormat::Pypi,
        &upstream_path,
        HeaderMap::new(),
    )
    .await?;

    let page = String::from_utf8_lossy(&content);
    let rewritten = rewrite_package_hrefs(&page);

    Ok(respond::passthrough_response(
        &repository,
        rewritten.into_bytes().into(),
        content_type.unwrap_or_else(|| "text/html; charset=utf-8".to_string()),
    ))
}

async fn package_file(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let filename = path
        .rsplit('/')
        .next()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::InvalidRequest(format!("Invalid packages path: {}", path)))?
        .to_string();

    let package = package_from_filename(&filename)?;
    let version = version_from_filename(&filename)?;
    let name = format!("{}/{}", package, filename);

    let upstream = state.upstream.clone();
    let fetch_path = format!("packages/{}", path);
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
        .insert("filename".to_string(), filename.clone());

    common::serve_pull_through(
        &state,
        RepositoryFormat::Pypi,
        &name,
        &version,
        fetch,
        options,
        ArtifactHeaders {
            filename: Some(filename),
            ..Default::default()
        },
        client_meta(&headers),
    )
    .await
}
