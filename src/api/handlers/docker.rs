//! Docker Registry v2 adapter.
//!
//! Routes are mounted at `/v2/...`:
//!   GET      /v2/                                  - API version check
//!   GET|HEAD /v2/{name...}/manifests/{reference}   - Manifest (pull-through)
//!   GET|HEAD /v2/{name...}/blobs/{digest}          - Blob (pull-through)
//!
//! Artifacts use composite names (`<image>:manifest:<ref>`,
//! `<image>:blob:<digest>`). Blob digests are verified against the stored
//! content; Docker Hub upstreams get the `library/` prefix for official
//! images and a short-lived Bearer token per fetch.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use sha2::{Digest, Sha256};

use crate::api::handlers::common::{self, client_meta, ClientMeta};
use crate::api::respond::{self, ArtifactHeaders, CACHE_CONTROL_IMMUTABLE, X_CACHE, X_REPOSITORY};
use crate::api::SharedState;
use crate::cache::{FetchFuture, ServeOptions, ServeOutcome};
use crate::error::{AppError, Result};
use crate::models::{Repository, RepositoryFormat};
use crate::upstream::{is_docker_hub, UpstreamClient};

pub const DISTRIBUTION_API_VERSION: &str = "Docker-Distribution-API-Version";
pub const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

/// Accept list sent upstream for manifest fetches.
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(version_check))
        .route("/*path", get(handle))
}

/// A parsed registry request.
#[derive(Debug, PartialEq, Eq)]
enum DockerRequest {
    Manifest { image: String, reference: String },
    Blob { image: String, digest: String },
}

fn parse_path(path: &str) -> Result<DockerRequest> {
    let path = path.trim_matches('/');

    if let Some(at) = path.rfind("/manifests/") {
        let image = &path[..at];
        let reference = &path[at + "/manifests/".len()..];
        if image.is_empty() || reference.is_empty() || reference.contains('/') {
            return Err(AppError::InvalidRequest(format!(
                "Invalid manifest path: {}",
                path
            )));
        }
        return Ok(DockerRequest::Manifest {
            image: image.to_string(),
            reference: reference.to_string(),
        });
    }

    if let Some(at) = path.rfind("/blobs/") {
        let image = &path[..at];
        let digest = &path[at + "/blobs/".len()..];
        if image.is_empty() || digest.is_empty() || digest.contains('/') {
            return Err(AppError::InvalidRequest(format!(
                "Invalid blob path: {}",
                path
            )));
        }
        return Ok(DockerRequest::Blob {
            image: image.to_string(),
            digest: digest.to_string(),
        });
    }

    Err(AppError::InvalidRequest(format!(
        "Unsupported registry path: {}",
        path
    )))
}

/// Validate `sha256:<64 hex>` and return the hex portion.
fn sha256_hex(digest: &str) -> Result<String> {
    let hex = digest.strip_prefix("sha256:").ok_or_else(|| {
        AppError::InvalidRequest(format!("Unsupported digest algorithm: {}", digest))
    })?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::InvalidRequest(format!(
            "Malformed sha256 digest: {}",
            digest
        )));
    }
    Ok(hex.to_ascii_lowercase())
}

/// The image name used against a specific upstream: Docker Hub official
/// images need the `library/` prefix.
fn upstream_image(upstream_url: &str, image: &str) -> String {
    if is_docker_hub(upstream_url) && !image.contains('/') {
        format!("library/{}", image)
    } else {
        image.to_string()
    }
}

/// Build the per-member fetch hook for `v2/<image>/<tail>`.
fn registry_fetch(
    upstream: UpstreamClient,
    image: String,
    tail: String,
    accept: Option<&'static str>,
) -> impl Fn(Repository) -> FetchFuture {
    move |repo: Repository| -> FetchFuture {
        let upstream = upstream.clone();
        let image = image.clone();
        let tail = tail.clone();
        Box::pin(async move {
            let base = repo.upstream_url.clone().unwrap_or_default();
            let image = upstream_image(&base, &image);

            let mut headers = HeaderMap::new();
            if let Some(accept) = accept {
                headers.insert(ACCEPT, HeaderValue::from_static(accept));
            }
            if is_docker_hub(&base) {
                let token = upstream.docker_hub_token(&image).await?;
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| AppError::Internal("Invalid bearer token value".into()))?;
                headers.insert(AUTHORIZATION, value);
            }

            let path = format!("v2/{}/{}", image, tail);
            upstream.fetch_stream(&repo, &path, headers).await
        })
    }
}

async fn version_check() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(DISTRIBUTION_API_VERSION, "registry/2.0")
        .body(Body::from("{}"))
        .expect("static response headers are valid")
}

async fn handle(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let client = client_meta(&headers);
    match parse_path(&path)? {
        DockerRequest::Manifest { image, reference } => {
            serve_manifest(&state, &image, &reference, client).await
        }
        DockerRequest::Blob { image, digest } => {
            serve_blob(&state, &image, &digest, client).await
        }
    }
}

async fn serve_blob(
    state: &SharedState,
    image: &str,
    digest: &str,
    client: ClientMeta,
) -> Result<Response> {
    let hex = sha256_hex(digest)?;
    let name = format!("{}:blob:{}", image, digest);

    let fetch = registry_fetch(
        state.upstream.clone(),
        image.to_string(),
        format!("blobs/{}", digest),
        None,
    );

    let options = ServeOptions {
        content_type: Some("application/octet-stream".to_string()),
        expected_digest: Some(hex),
        ..Default::default()
    };

    common::serve_pull_through(
        state,
        RepositoryFormat::Docker,
        &name,
        digest,
        fetch,
        options,
        ArtifactHeaders {
            extra: vec![(DOCKER_CONTENT_DIGEST, digest.to_string())],
            ..Default::default()
        },
        client,
    )
    .await
}

async fn serve_manifest(
    state: &SharedState,
    image: &str,
    reference: &str,
    client: ClientMeta,
) -> Result<Response> {
    let name = format!("{}:manifest:{}", image, reference);
    let by_digest = reference.starts_with("sha256:");
    let expected_digest = if by_digest {
        Some(sha256_hex(reference)?)
    } else {
        None
    };

    let fetch = registry_fetch(
        state.upstream.clone(),
        image.to_string(),
        format!("manifests/{}", reference),
        Some(MANIFEST_ACCEPT),
    );

    let options = ServeOptions {
        content_type: Some("application/vnd.docker.distribution.manifest.v2+json".to_string()),
        expected_digest,
        ..Default::default()
    };

    let target = common::target_for(state, RepositoryFormat::Docker).await?;
    match state
        .cache
        .serve(target, &name, reference, fetch, options)
        .await?
    {
        ServeOutcome::Hit {
            repository,
            stream,
            info,
        } => {
            state.artifacts.record_download(
                info.repository_id,
                &name,
                reference,
                client.ip,
                client.user_agent,
            );
            let headers = ArtifactHeaders {
                extra: vec![(
                    DOCKER_CONTENT_DIGEST,
                    format!("sha256:{}", info.checksum_sha256),
                )],
                ..Default::default()
            };
            Ok(respond::hit_response(&repository, stream, &info, &headers))
        }
        ServeOutcome::Miss {
            repository,
            repository_id,
            mut stream,
            content_type,
            stored,
        } => {
            // Manifests are small documents and clients need
            // Docker-Content-Digest up front, so buffer the client half
            // before responding; the store half drains concurrently.
            let mut body = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| {
                    AppError::UpstreamUnavailable(format!("Manifest stream failed: {}", e))
                })?;
                body.extend_from_slice(&chunk);
            }

            let digest = match stored.await {
                Ok(Ok(info)) => info.checksum_sha256,
                // Cache insert failed; the digest of the delivered bytes
                // still labels the response correctly.
                _ => format!("{:x}", Sha256::digest(&body)),
            };

            state.artifacts.record_download(
                repository_id,
                &name,
                reference,
                client.ip,
                client.user_agent,
            );

            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(X_CACHE, "MISS")
                .header(X_REPOSITORY, repository)
                .header(CONTENT_TYPE, content_type)
                .header(CONTENT_LENGTH, body.len().to_string())
                .header(ETAG, format!("\"{}\"", digest))
                .header(DOCKER_CONTENT_DIGEST, format!("sha256:{}", digest))
                .header(CACHE_CONTROL, CACHE_CONTROL_IMMUTABLE)
                .body(Body::from(body))
                .expect("static response headers are valid"))
        }
        ServeOutcome::NotFound => Err(AppError::NotFound(format!(
            "Manifest {}:{} not found",
            image, reference
        ))),
    }
}
