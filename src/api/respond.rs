//! Response builders for cache outcomes.
//!
//! Every adapter labels its responses the same way: `X-Cache: HIT|MISS`,
//! `X-Repository` with the serving member's name, `ETag` (the artifact
//! digest) on HIT, and `Cache-Control` split between immutable artifact
//! blobs and short-lived indexes.

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;

use crate::models::ArtifactInfo;
use crate::storage::ByteStream;

pub const X_CACHE: &str = "X-Cache";
pub const X_REPOSITORY: &str = "X-Repository";

/// Immutable artifact blobs: version-pinned or content-addressed.
pub const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// Mutable indexes and metadata documents.
pub const CACHE_CONTROL_SHORT: &str = "public, max-age=300";

/// Optional per-response header tweaks.
#[derive(Default)]
pub struct ArtifactHeaders {
    /// Overrides the stored/advertised content type in the response
    pub content_type: Option<String>,
    /// Adds a `Content-Disposition: attachment` filename
    pub filename: Option<String>,
    /// Extra headers (e.g. `Docker-Content-Digest`)
    pub extra: Vec<(&'static str, String)>,
}

fn apply_common(
    mut builder: axum::http::response::Builder,
    headers: &ArtifactHeaders,
) -> axum::http::response::Builder {
    if let Some(name) = &headers.filename {
        builder = builder.header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", name),
        );
    }
    for (name, value) in &headers.extra {
        builder = builder.header(*name, value);
    }
    builder
}

/// 200 response for a cache HIT: stored content type, exact length, ETag.
pub fn hit_response(
    repository: &str,
    stream: ByteStream,
    info: &ArtifactInfo,
    headers: &ArtifactHeaders,
) -> Response {
    let content_type = headers
        .content_type
        .clone()
        .unwrap_or_else(|| info.content_type.clone());

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(X_CACHE, "HIT")
        .header(X_REPOSITORY, repository)
        .header(ETAG, format!("\"{}\"", info.checksum_sha256))
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, info.size_bytes.to_string())
        .header(CACHE_CONTROL, CACHE_CONTROL_IMMUTABLE);

    apply_common(builder, headers)
        .body(Body::from_stream(stream))
        .expect("static response headers are valid")
}

/// 200 response for a MISS teed from upstream. Length is unknown until
/// end-of-stream, so the body is chunked.
pub fn miss_response(
    repository: &str,
    stream: ByteStream,
    content_type: String,
    headers: &ArtifactHeaders,
) -> Response {
    let content_type = headers.content_type.clone().unwrap_or(content_type);

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(X_CACHE, "MISS")
        .header(X_REPOSITORY, repository)
        .header(CONTENT_TYPE, content_type)
        .header(CACHE_CONTROL, CACHE_CONTROL_IMMUTABLE);

    apply_common(builder, headers)
        .body(Body::from_stream(stream))
        .expect("static response headers are valid")
}

/// 200 response for a proxied (non-cached) index or metadata document.
pub fn passthrough_response(
    repository: &str,
    body: Bytes,
    content_type: String,
) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(X_CACHE, "MISS")
        .header(X_REPOSITORY, repository)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, body.len().to_string())
        .header(CACHE_CONTROL, CACHE_CONTROL_SHORT)
        .body(Body::from(body))
        .expect("static response headers are valid")
}

/// 200 response for locally-generated documents (service indexes).
pub fn local_json_response(body: serde_json::Value) -> Response {
    let payload = body.to_string();
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(CONTENT_LENGTH, payload.len().to_string())
        .header(CACHE_CONTROL, CACHE_CONTROL_SHORT)
        .body(Body::from(payload))
        .expect("static response headers are valid")
}
