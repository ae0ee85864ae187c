//! NuGet V3 adapter.
//!
//! Routes are mounted at `/nuget/...`:
//!   GET /nuget/v3/index.json                                  - Service index (local)
//!   GET /nuget/v3-flatcontainer/{id}/index.json               - Version list (proxied)
//!   GET|HEAD /nuget/v3-flatcontainer/{id}/{version}/{filename} - Package (pull-through)
//!
//! Package ids and versions are lower-cased per the flat-container
//! convention. `.nupkg` files are cached; `.nuspec` files pass through.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::json;

use crate::api::handlers::common::{self, client_meta};
use crate::api::respond::{self, ArtifactHeaders};
use crate::api::SharedState;
use crate::cache::{FetchFuture, ServeOptions};
use crate::error::{AppError, Result};
use crate::models::{Repository, RepositoryFormat};

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/v3/index.json", get(service_index))
        .route("/v3-flatcontainer/:id/index.json", get(version_list))
        .route("/v3-flatcontainer/:id/:version/:filename", get(package_file))
}

/// Build the V3 service index against this instance's base URL.
fn build_service_index(base_url: &str) -> serde_json::Value {
    json!({
        "version": "3.0.0",
        "resources": [
            {
                "@id": format!("{}/nuget/v3-flatcontainer/", base_url),
                "@type": "PackageBaseAddress/3.0.0",
                "comment": "Base URL of where NuGet packages are stored"
            },
            {
                "@id": format!("{}/nuget/v3/registrations/", base_url),
                "@type": "RegistrationsBaseUrl/3.6.0",
                "comment": "Base URL of NuGet package registration info"
            }
        ]
    })
}

/// Expected flat-container filename for a package id and version.
fn expected_filename(id: &str, version: &str) -> String {
    format!("{}.{}.nupkg", id, version)
}

async fn service_index(headers: HeaderMap) -> Response {
    respond::local_json_response(build_service_index(&common::base_url(&headers)))
}

async fn version_list(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let id = id.to_lowercase();
    let upstream_path = format!("v3-flatcontainer/{}/index.json", id);

    let (content, content_type, repository) = common::proxy_passthrough(
        &state,
        RepositoryFormat::Nuget,
        &upstream_path,
        HeaderMap::new(),
    )
    .await?;

    Ok(respond::passthrough_response(
        &repository,
        content,
        content_type.unwrap_or_else(|| "application/json".to_string()),
    ))
}

async fn package_file(
    State(state): State<SharedState>,
    Path((id, version, filename)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let id = id.to_lowercase();
    let version = version.to_lowercase();
    let filename = filename.to_lowercase();

    let upstream_path = format!("v3-flatcontainer/{}/{}/{}", id, version, filename);

    if filename.ends_with(".nuspec") {
        let (content, content_type, repository) = common::proxy_passthrough(
            &state,
            RepositoryFormat::Nuget,
            &upstream_path,
            HeaderMap::new(),
        )
        .await?;

        return Ok(respond::passthrough_response(
            &repository,
            content,
            content_type.unwrap_or_else(|| "application/xml".to_string()),
        ));
    }

    if !filename.ends_with(".nupkg") {
        return Err(AppError::InvalidRequest(format!(
            "Unsupported flat-container file: {}",
            filename
        )));
    }

    if filename != expected_filename(&id, &version) {
        return Err(AppError::InvalidRequest(format!(
            "Filename '{}' does not match {}/{}",
            filename, id, version
        )));
    }

    let upstream = state.upstream.clone();
    let fetch_path = upstream_path.clone();
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
        RepositoryFormat::Nuget,
        &id,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_index_resources() {
        let index = build_service_index("http://localhost:8080");
        let resources = index["resources"].as_array().unwrap();

        let types: Vec<&str> = resources
            .iter()
            .map(|r| r["@type"].as_str().unwrap())
            .collect();
        assert!(types.contains(&"PackageBaseAddress/3.0.0"));
        assert!(types.contains(&"RegistrationsBaseUrl/3.6.0"));
    }

    #[test]
    fn test_service_index_flatcontainer_url() {
        let index = build_service_index("https://cache.example.com");
        let flat = index["resources"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["@type"] == "PackageBaseAddress/3.0.0")
            .unwrap();
        assert_eq!(
            flat["@id"],
            "https://cache.example.com/nuget/v3-flatcontainer/"
        );
    }

    #[test]
    fn test_service_index_version() {
        let index = build_service_index("http://x");
        assert_eq!(index["version"], "3.0.0");
    }

    #[test]
    fn test_expected_filename() {
        assert_eq!(
            expected_filename("newtonsoft.json", "13.0.3"),
            "newtonsoft.json.13.0.3.nupkg"
        );
    }
}
