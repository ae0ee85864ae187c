//! Amargo - multi-protocol pull-through caching proxy for package
//! artifacts (npm, PyPI, Docker Registry v2, Go modules, Maven, NuGet).

pub mod api;
pub mod artifacts;
pub mod background;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod evict;
pub mod groups;
pub mod meta;
pub mod models;
pub mod storage;
pub mod telemetry;
pub mod upstream;

pub use config::Config;
pub use error::{AppError, Result};
