//! Go module proxy (GOPROXY protocol) adapter.
//!
//! Routes are mounted at `/go/...`:
//!   GET /go/{module}/@v/list           - Version list (proxied)
//!   GET /go/{module}/@v/{ver}.info     - Version metadata (proxied)
//!   GET /go/{module}/@v/{ver}.mod      - go.mod file (proxied)
//!   GET /go/{module}/@v/{ver}.zip      - Module archive (pull-through)
//!   GET /go/{module}/@latest           - Latest version info (proxied)
//!
//! Module paths use the GOPROXY case encoding: every upper-case letter
//! travels as `!` followed by its lower-case form. Only the `.zip` path is
//! cached; the rest are short-TTL passthroughs.

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

/// A parsed GOPROXY request. The module is stored decoded.
#[derive(Debug, PartialEq, Eq)]
enum GoRequest {
    List { module: String },
    Info { module: String, version: String },
    Mod { module: String, version: String },
    Zip { module: String, version: String },
    Latest { module: String },
}

/// Decode the GOPROXY case encoding: `!a` means `A`.
pub fn decode_module_path(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        if c == '!' {
            match chars.next() {
                Some(next) => result.push(next.to_ascii_uppercase()),
                None => result.push('!'),
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Encode a module path for upstream: every `[A-Z]` becomes `!` plus its
/// lower-case form.
pub fn encode_module_path(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            result.push('!');
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

fn parse_path(path: &str) -> Result<GoRequest> {
    let path = path.trim_matches('/');
    let decoded = decode_module_path(path);

    if let Some(at) = decoded.rfind("/@v/") {
        let module = decoded[..at].to_string();
        let rest = &decoded[at + 4..];

        if module.is_empty() || rest.is_empty() {
            return Err(AppError::InvalidRequest(format!(
                "Invalid module proxy path: {}",
                path
            )));
        }

        if rest == "list" {
            return Ok(GoRequest::List { module });
        }
        if let Some(version) = rest.strip_suffix(".info") {
            return Ok(GoRequest::Info {
                module,
                version: version.to_string(),
            });
        }
        if let Some(version) = rest.strip_suffix(".mod") {
            return Ok(GoRequest::Mod {
                module,
                version: version.to_string(),
            });
        }
        if let Some(version) = rest.strip_suffix(".zip") {
            return Ok(GoRequest::Zip {
                module,
                version: version.to_string(),
            });
        }

        return Err(AppError::InvalidRequest(format!(
            "Unknown @v operation: {}",
            rest
        )));
    }

    if let Some(module) = decoded.strip_suffix("/@latest") {
        if !module.is_empty() {
            return Ok(GoRequest::Latest {
                module: module.to_string(),
            });
        }
    }

    Err(AppError::InvalidRequest(format!(
        "Invalid module proxy path: {}",
        path
    )))
}

async fn handle(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    match parse_path(&path)? {
        GoRequest::List { module } => {
            passthrough(&state, &module, "@v/list", "text/plain; charset=utf-8").await
        }
        GoRequest::Info { module, version } => {
            let tail = format!("@v/{}.info", version);
            passthrough(&state, &module, &tail, "application/json").await
        }
        GoRequest::Mod { module, version } => {
            let tail = format!("@v/{}.mod", version);
            passthrough(&state, &module, &tail, "text/plain; charset=utf-8").await
        }
        GoRequest::Latest { module } => {
            passthrough(&state, &module, "@latest", "application/json").await
        }
        GoRequest::Zip { module, version } => {
            serve_zip(&state, &module, &version, &headers).await
        }
    }
}

async fn passthrough(
    state: &SharedState,
    module: &str,
    tail: &str,
    default_content_type: &str,
) -> Result<Response> {
    let upstream_path = format!("{}/{}", encode_module_path(module), tail);
    let (content, content_type, repository) =
        common::proxy_passthrough(state, RepositoryFormat::Go, &upstream_path, HeaderMap::new())
            .await?;

    Ok(respond::passthrough_response(
        &repository,
        content,
        content_type.unwrap_or_else(|| default_content_type.to_string()),
    ))
}

async fn serve_zip(
    state: &SharedState,
    module: &str,
    version: &str,
    headers: &HeaderMap,
) -> Result<Response> {
    let upstream = state.upstream.clone();
    let fetch_path = format!("{}/@v/{}.zip", encode_module_path(module), version);
    let fetch = move |repo: Repository| -> FetchFuture {
        let upstream = upstream.clone();
        let fetch_path = fetch_path.clone();
        Box::pin(async move { upstream.fetch_stream(&repo, &fetch_path, HeaderMap::new()).await })
    };

    let options = ServeOptions {
        content_type: Some("application/zip".to_string()),
        ..Default::default()
    };

    common::serve_pull_through(
        state,
        RepositoryFormat::Go,
        module,
        version,
        fetch,
        options,
        ArtifactHeaders::default(),
        client_meta(headers),
    )
    .await
}
