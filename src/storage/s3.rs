//! S3 storage backend using the rust-s3 crate.
//!
//! Supports AWS S3 and S3-compatible services (MinIO, etc.).
//! Credentials come from the environment (AWS_ACCESS_KEY_ID /
//! AWS_SECRET_ACCESS_KEY or the instance profile chain).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use tokio_util::io::StreamReader;

use crate::error::{AppError, Result};

use super::{Blobs, BlobMeta, ByteStream};

/// S3 storage backend configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint URL (for MinIO compatibility)
    pub endpoint: Option<String>,
    /// Optional key prefix for all objects
    pub prefix: Option<String>,
}

impl S3Config {
    pub fn new(
        bucket: String,
        region: String,
        endpoint: Option<String>,
        prefix: Option<String>,
    ) -> Self {
        Self {
            bucket,
            region,
            endpoint,
            prefix,
        }
    }
}

/// S3-compatible storage backend
pub struct S3Blobs {
    bucket: Box<Bucket>,
    prefix: Option<String>,
}

impl S3Blobs {
    /// Create new S3 backend from configuration
    pub fn new(config: S3Config) -> Result<Self> {
        let credentials = Credentials::from_env()
            .map_err(|e| AppError::Config(format!("Failed to load AWS credentials: {}", e)))?;

        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config
                .region
                .parse()
                .map_err(|_| AppError::Config(format!("Invalid S3 region: {}", config.region)))?,
        };

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| AppError::Config(format!("Failed to create S3 bucket: {}", e)))?;

        // Path-style access for MinIO compatibility
        let bucket = if config.endpoint.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(Self {
            bucket,
            prefix: config.prefix,
        })
    }

    /// Generate the full S3 key with optional prefix
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
            None => key.to_string(),
        }
    }

    /// Strip the prefix from an S3 key
    fn strip_prefix(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => {
                let prefix_with_slash = format!("{}/", prefix.trim_end_matches('/'));
                key.strip_prefix(&prefix_with_slash)
                    .unwrap_or(key)
                    .to_string()
            }
            None => key.to_string(),
        }
    }

    fn is_not_found(err: &s3::error::S3Error) -> bool {
        let s = err.to_string();
        s.contains("404") || s.contains("NoSuchKey") || s.contains("Not Found")
    }
}

#[async_trait]
impl Blobs for S3Blobs {
    async fn put(&self, key: &str, reader: ByteStream, content_type: &str) -> Result<()> {
        let full_key = self.full_key(key);

        let mut reader = StreamReader::new(reader);
        self.bucket
            .put_object_stream_with_content_type(&mut reader, &full_key, content_type)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to put object '{}': {}", key, e)))?;

        tracing::debug!(key = %key, "S3 put object successful");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        let full_key = self.full_key(key);

        let response = self.bucket.get_object_stream(&full_key).await.map_err(|e| {
            if Self::is_not_found(&e) {
                AppError::NotFound(format!("Storage key not found: {}", key))
            } else {
                AppError::Storage(format!("Failed to get object '{}': {}", key, e))
            }
        })?;

        let stream = response
            .bytes
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(Box::pin(stream))
    }

    async fn head(&self, key: &str) -> Result<BlobMeta> {
        let full_key = self.full_key(key);

        let (head, _) = self.bucket.head_object(&full_key).await.map_err(|e| {
            if Self::is_not_found(&e) {
                AppError::NotFound(format!("Storage key not found: {}", key))
            } else {
                AppError::Storage(format!("Failed to head object '{}': {}", key, e))
            }
        })?;

        let last_modified = head
            .last_modified
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(BlobMeta {
            size: head.content_length.unwrap_or(0) as u64,
            content_type: head.content_type,
            etag: head.e_tag,
            last_modified,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key);

        self.bucket
            .delete_object(&full_key)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to delete object '{}': {}", key, e)))?;

        tracing::debug!(key = %key, "S3 delete object successful");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_key = self.full_key(key);

        match self.bucket.head_object(&full_key).await {
            Ok(_) => Ok(true),
            Err(e) if Self::is_not_found(&e) => Ok(false),
            Err(e) => Err(AppError::Storage(format!(
                "Failed to check existence of '{}': {}",
                key, e
            ))),
        }
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let search_prefix = self.full_key(prefix);

        let results = self
            .bucket
            .list(search_prefix, None)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to list objects: {}", e)))?;

        let keys: Vec<String> = results
            .into_iter()
            .flat_map(|result| result.contents)
            .map(|obj| self.strip_prefix(&obj.key))
            .take(limit)
            .collect();

        tracing::debug!(prefix = %prefix, count = keys.len(), "S3 list objects successful");
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key_with_prefix() {
        let prefix = Some("artifacts".to_string());
        let key = "repositories/npm/express/4.18.2/artifact";

        let full = match &prefix {
            Some(p) => format!("{}/{}", p.trim_end_matches('/'), key),
            None => key.to_string(),
        };

        assert_eq!(full, "artifacts/repositories/npm/express/4.18.2/artifact");
    }

    #[test]
    fn test_full_key_without_prefix() {
        let prefix: Option<String> = None;
        let key = "repositories/npm/express/4.18.2/artifact";

        let full = match &prefix {
            Some(p) => format!("{}/{}", p.trim_end_matches('/'), key),
            None => key.to_string(),
        };

        assert_eq!(full, key);
    }

    #[test]
    fn test_strip_prefix() {
        let prefix = Some("artifacts".to_string());
        let key = "artifacts/repositories/maven/x/1.0/artifact";

        let stripped = match &prefix {
            Some(p) => {
                let prefix_with_slash = format!("{}/", p.trim_end_matches('/'));
                key.strip_prefix(&prefix_with_slash)
                    .unwrap_or(key)
                    .to_string()
            }
            None => key.to_string(),
        };

        assert_eq!(stripped, "repositories/maven/x/1.0/artifact");
    }

    #[test]
    fn test_s3_config_new() {
        let config = S3Config::new(
            "my-bucket".to_string(),
            "us-west-2".to_string(),
            Some("http://localhost:9000".to_string()),
            Some("prefix".to_string()),
        );

        assert_eq!(config.bucket, "my-bucket");
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.endpoint, Some("http://localhost:9000".to_string()));
        assert_eq!(config.prefix, Some("prefix".to_string()));
    }
}
