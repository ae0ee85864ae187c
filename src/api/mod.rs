//! HTTP surface: application state, routes, and protocol adapters.

pub mod handlers;
pub mod respond;
pub mod routes;

use std::sync::Arc;

use crate::artifacts::ArtifactStore;
use crate::background::TaskPool;
use crate::cache::CacheEngine;
use crate::config::{Config, ReposConfig};
use crate::meta::MetaStore;
use crate::storage::Blobs;
use crate::upstream::UpstreamClient;

/// Application state shared by all handlers. Wiring is explicit: every
/// component is constructed at startup and handed in here.
pub struct AppState {
    pub config: Config,
    pub repos: ReposConfig,
    pub meta: Arc<dyn MetaStore>,
    pub blobs: Arc<dyn Blobs>,
    pub artifacts: Arc<ArtifactStore>,
    pub cache: Arc<CacheEngine>,
    pub upstream: UpstreamClient,
    pub tasks: Arc<TaskPool>,
}

pub type SharedState = Arc<AppState>;
