//! Maven repository adapter.
//!
//! Routes are mounted at `/maven/...`:
//!   GET|HEAD /maven/{group...}/{artifact}/{version}/{filename} - Artifact (pull-through)
//!   GET|HEAD /maven/{group...}/{artifact}/maven-metadata.xml   - Metadata (proxied)
//!
//! Version-pinned files are immutable and cached; `maven-metadata.xml`
//! is mutable and passed through with a short TTL.

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
    Router::new().route("/*path", get(handle))
}

/// A parsed Maven request path.
#[derive(Debug, PartialEq, Eq)]
enum MavenRequest {
    Metadata {
        group_id: String,
        artifact_id: String,
    },
    Artifact {
        group_path: String,
        artifact_id: String,
        version: String,
        filename: String,
    },
}

fn parse_path(path: &str) -> Result<MavenRequest> {
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let Some((&filename, rest)) = segments.split_last() else {
        return Err(AppError::InvalidRequest("Empty maven path".into()));
    };

    if filename == "maven-metadata.xml" {
        let Some((&artifact_id, group)) = rest.split_last() else {
            return Err(AppError::InvalidRequest(format!(
                "Metadata path too short: {}",
                path
            )));
        };
        if group.is_empty() {
            return Err(AppError::InvalidRequest(format!(
                "Metadata path missing group: {}",
                path
            )));
        }
        return Ok(MavenRequest::Metadata {
            group_id: group.join("."),
            artifact_id: artifact_id.to_string(),
        });
    }

    if segments.len() < 4 {
        return Err(AppError::InvalidRequest(format!(
            "Maven path too short: {}",
            path
        )));
    }

    let version = segments[segments.len() - 2];
    let artifact_id = segments[segments.len() - 3];
    let group_path = segments[..segments.len() - 3].join("/");

    Ok(MavenRequest::Artifact {
        group_path,
        artifact_id: artifact_id.to_string(),
        version: version.to_string(),
        filename: filename.to_string(),
    })
}

/// Content type by file extension.
fn content_type_for(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".jar") || lower.ends_with(".war") || lower.ends_with(".ear") {
        "application/java-archive"
    } else if lower.ends_with(".pom") || lower.ends_with(".xml") {
        "application/xml"
    } else if lower.ends_with(".sha1") || lower.ends_with(".md5") || lower.ends_with(".asc") {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

async fn handle(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    match parse_path(&path)? {
        MavenRequest::Metadata { .. } => {
            let (content, content_type, repository) = common::proxy_passthrough(
                &state,
                RepositoryFormat::Maven,
                path.trim_matches('/'),
                HeaderMap::new(),
            )
            .await?;

            Ok(respond::passthrough_response(
                &repository,
                content,
                content_type.unwrap_or_else(|| "application/xml".to_string()),
            ))
        }
        MavenRequest::Artifact {
            group_path,
            artifact_id,
            version,
            filename,
        } => {
            let name = format!("{}/{}/{}", group_path, artifact_id, filename);

            let upstream = state.upstream.clone();
            let fetch_path = path.trim_matches('/').to_string();
            let fetch = move |repo: Repository| -> FetchFuture {
                let upstream = upstream.clone();
                let fetch_path = fetch_path.clone();
                Box::pin(
                    async move { upstream.fetch_stream(&repo, &fetch_path, HeaderMap::new()).await },
                )
            };

            let mut options = ServeOptions {
                content_type: Some(content_type_for(&filename).to_string()),
                ..Default::default()
            };
            options
                .metadata
                .insert("filename".to_string(), filename.clone());
            options
                .metadata
                .insert("group_id".to_string(), group_path.replace('/', "."));
            options
                .metadata
                .insert("artifact_id".to_string(), artifact_id);

            common::serve_pull_through(
                &state,
                RepositoryFormat::Maven,
                &name,
                &version,
                fetch,
                options,
                ArtifactHeaders {
                    content_type: Some(content_type_for(&filename).to_string()),
                    filename: Some(filename),
                    ..Default::default()
                },
                client_meta(&headers),
            )
            .await
        }
    }
}
