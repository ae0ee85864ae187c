//! Router assembly.

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use super::handlers::{docker, goproxy, maven, npm, nuget, pypi};
use super::SharedState;

/// Build the application router with all protocol adapters mounted.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/npm", npm::router())
        .nest("/pypi", pypi::router())
        .nest("/v2", docker::router())
        .nest("/go", goproxy::router())
        .nest("/maven", maven::router())
        .nest("/nuget", nuget::router())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}
