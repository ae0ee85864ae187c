//! Upstream HTTP plumbing shared by the adapters' fetch hooks: URL joining,
//! Basic-auth assembly, status mapping, and the Docker Hub token client.

use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::cache::FetchReply;
use crate::error::{AppError, Result};
use crate::models::Repository;
use crate::storage::ByteStream;

/// Connect timeout for upstream requests
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Hard deadline on Docker Hub token acquisition
const TOKEN_TIMEOUT_SECS: u64 = 5;

const USER_AGENT: &str = concat!("amargo/", env!("CARGO_PKG_VERSION"));

/// Join an upstream base URL and a path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Assemble a Basic authorization header value for upstream credentials.
pub fn basic_auth_value(username: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    format!("Basic {}", encoded)
}

/// Whether an upstream URL points at Docker Hub (where official images
/// need the `library/` prefix and pulls need a Bearer token).
pub fn is_docker_hub(upstream_url: &str) -> bool {
    upstream_url.contains("registry-1.docker.io")
        || upstream_url.contains("registry.docker.io")
        || upstream_url.contains("://docker.io")
}

#[derive(Deserialize)]
struct DockerToken {
    token: String,
}

/// Shared HTTP client for upstream fetches.
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
}

impl UpstreamClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Streaming GET against one proxy member. Maps status per the group
    /// fallthrough policy: 404/410 are a clean miss, 401 is Unauthorized,
    /// anything else non-2xx (and network failures) is UpstreamUnavailable.
    pub async fn fetch_stream(
        &self,
        repo: &Repository,
        path: &str,
        extra_headers: HeaderMap,
    ) -> Result<FetchReply> {
        let base = repo.upstream_url.as_deref().ok_or_else(|| {
            AppError::Internal(format!("Repository '{}' has no upstream", repo.name))
        })?;
        let url = join_url(base, path);

        tracing::debug!(url = %url, repository = %repo.name, "Fetching from upstream");

        let mut request = self.http.get(&url).headers(extra_headers);
        if let (Some(user), Some(pass)) = (&repo.upstream_username, &repo.upstream_password) {
            if let Ok(value) = HeaderValue::from_str(&basic_auth_value(user, pass)) {
                request = request.header(AUTHORIZATION, value);
            }
        }

        let response = request.send().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Fetch from {} failed: {}", url, e))
        })?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(FetchReply::Missing),
            StatusCode::UNAUTHORIZED => Err(AppError::Unauthorized(format!(
                "Upstream {} rejected credentials",
                url
            ))),
            status if !status.is_success() => Err(AppError::UpstreamUnavailable(format!(
                "Upstream {} returned {}",
                url, status
            ))),
            _ => {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);

                let stream: ByteStream = Box::pin(
                    response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(std::io::Error::other)),
                );

                Ok(FetchReply::Found {
                    stream,
                    content_type,
                })
            }
        }
    }

    /// Buffered GET for small passthrough bodies (indexes, metadata pages).
    /// `Ok(None)` is a clean 404/410; other non-2xx statuses are errors,
    /// same policy as [`fetch_stream`].
    pub async fn fetch_buffered(
        &self,
        repo: &Repository,
        path: &str,
        extra_headers: HeaderMap,
    ) -> Result<Option<(Bytes, Option<String>)>> {
        match self.fetch_stream(repo, path, extra_headers).await? {
            FetchReply::Missing => Ok(None),
            FetchReply::Found {
                mut stream,
                content_type,
            } => {
                let mut buf = Vec::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| {
                        AppError::UpstreamUnavailable(format!("Upstream body read failed: {}", e))
                    })?;
                    buf.extend_from_slice(&chunk);
                }
                Ok(Some((Bytes::from(buf), content_type)))
            }
        }
    }

    /// Obtain a short-lived pull token from Docker Hub for one image.
    /// Bounded to a few seconds; a timeout fails the fetch.
    pub async fn docker_hub_token(&self, image: &str) -> Result<String> {
        let url = format!(
            "https://auth.docker.io/token?service=registry.docker.io&scope=repository:{}:pull",
            image
        );

        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(TOKEN_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| {
                AppError::UpstreamUnavailable(format!("Docker Hub token request failed: {}", e))
            })?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AppError::Unauthorized(
                "Docker Hub refused to issue a pull token".into(),
            ));
        }
        if !response.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "Docker Hub token endpoint returned {}",
                response.status()
            )));
        }

        let token: DockerToken = response.json().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Invalid Docker Hub token response: {}", e))
        })?;

        Ok(token.token)
    }
}
