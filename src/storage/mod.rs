//! Object-store backends.
//!
//! A flat key→blob store with streaming reads and writes. Backends surface
//! failures as errors and do not retry; retries are at the caller's
//! discretion.

pub mod filesystem;
pub mod s3;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::Result;

/// A boxed stream of bytes for streaming blob reads and writes.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Wrap a single buffer into a one-chunk [`ByteStream`].
pub fn stream_from_bytes(bytes: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}

/// Metadata about a stored blob.
#[derive(Debug, Clone)]
pub struct BlobMeta {
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Object-store backend trait.
///
/// `put` is atomic: readers observing the key see either the full new blob
/// or the previous state, never a partial write.
#[async_trait]
pub trait Blobs: Send + Sync {
    /// Store content under the given key, consuming the stream to end.
    async fn put(&self, key: &str, reader: ByteStream, content_type: &str) -> Result<()>;

    /// Open a streaming read; `NotFound` if absent.
    async fn get(&self, key: &str) -> Result<ByteStream>;

    /// Fetch blob metadata without the content.
    async fn head(&self, key: &str) -> Result<BlobMeta>;

    /// Delete content by key; idempotent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// List up to `limit` keys under a prefix.
    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>>;
}
