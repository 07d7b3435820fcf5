//! S3-compatible storage backend.
//!
//! This module provides a storage backend implementation for S3-compatible
//! services including AWS S3, Backblaze B2, Tigris (Fly.io), MinIO and others.
//!
//! # Credentials
//!
//! Static credentials may be given explicitly (`key_id` and `key_secret`).
//! Without them the client falls back to the default AWS credential chain:
//! environment, shared profile files, then container or instance roles.

use crate::{
    ObjectInfo, StorageBackend,
    backend::{BoxAsyncRead, ObjectInfoStream},
    error::{ErrorKind, Result},
    validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::DisplayErrorContext,
    operation::list_objects_v2::ListObjectsV2Output,
    primitives::DateTime,
    types::Object,
};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

/// S3-compatible storage backend.
///
/// Reads objects from an S3 bucket, optionally under a key prefix. All paths
/// are relative to the configured prefix (if any).
///
/// # Examples
///
/// ```no_run
/// use signage_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "s3",
///     "my-bucket",
///     Some("lobby/".to_string()),
///     "sa-east-1",
///     None::<String>,
///     Some("access_key_id".to_string()),
///     Some("secret_access_key".to_string()),
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - AWS/provider access key ID, if not using the default chain
    /// * `key_secret` - AWS/provider secret access key, if not using the default chain
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: Option<String>,
        key_secret: Option<String>,
    ) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.into()));
        if let (Some(key_id), Some(key_secret)) = (key_id, key_secret) {
            loader = loader.credentials_provider(Credentials::new(key_id, key_secret, None, None, "signage-config"));
        }
        let shared = loader.load().await;
        let mut config_builder = aws_sdk_s3::config::Builder::from(&shared)
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Self::from_client(name, Client::from_conf(config_builder.build()), bucket, prefix)
    }

    /// Wrap an already configured client.
    pub fn from_client(
        name: impl Into<String>,
        client: Client,
        bucket: impl Into<String>,
        prefix: Option<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        Ok(Self {
            name: name.into(),
            client,
            bucket: bucket.into(),
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Construct the full S3 key from a relative path.
    fn full_key(&self, path: &Path) -> Result<String> {
        let key = crate::object_key(path)?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key,
        })
    }

    /// Strip the configured prefix from an S3 key to get relative path.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        let relative = match &self.prefix {
            Some(prefix) => key.strip_prefix(prefix.as_str()).and_then(|s| s.strip_prefix('/')).unwrap_or(key),
            None => key,
        };
        validate_path(relative)
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    async fn list_page(&self, continuation: Option<String>) -> Result<ListObjectsV2Output> {
        let _permit = self.acquire_permit().await?;
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);
        if let Some(prefix) = &self.prefix {
            request = request.prefix(format!("{prefix}/"));
        }
        if let Some(token) = continuation {
            request = request.continuation_token(token);
        }
        let output =
            request.send().await.map_err(|e| ErrorKind::Network(DisplayErrorContext(&e).to_string()))?;
        Ok(output)
    }

    /// Map a listed object to its metadata. Directory markers (and the prefix
    /// itself) yield `None`.
    fn object_info(&self, object: &Object) -> Result<Option<ObjectInfo>> {
        let Some(key) = object.key() else {
            return Ok(None);
        };
        if key.ends_with('/') {
            return Ok(None);
        }
        let path = self.relative_path(key)?;
        let size = u64::try_from(object.size().unwrap_or_default()).unwrap_or_default();
        let modified = match object.last_modified() {
            Some(dt) => Self::parse_datetime(dt)?,
            None => OffsetDateTime::UNIX_EPOCH,
        };
        Ok(Some(ObjectInfo::new(path, size, modified)))
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream(&self) -> ObjectInfoStream<'_> {
        Box::pin(stream! {
            let mut continuation: Option<String> = None;
            loop {
                let page = match self.list_page(continuation.take()).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    },
                };
                for object in page.contents() {
                    match self.object_info(object) {
                        Ok(Some(info)) => yield Ok(info),
                        Ok(None) => {},
                        // An unusable key can never match a local file, so it
                        // is skipped instead of failing the whole listing.
                        Err(e) => tracing::warn!(backend = %self.name, key = ?object.key(), error = %*e, "Skipping object with unusable key"),
                    }
                }
                match (page.is_truncated().unwrap_or(false), page.next_continuation_token()) {
                    (true, Some(token)) => continuation = Some(token.to_string()),
                    (true, None) => {
                        yield Err(exn::Exn::from(ErrorKind::BackendError(
                            "truncated listing without continuation token".to_string(),
                        )));
                        return;
                    },
                    (false, _) => break,
                }
            }
        })
    }

    async fn reader(&self, path: &Path) -> Result<BoxAsyncRead> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        let output = self.client.get_object().bucket(&self.bucket).key(key).send().await.map_err(|e| {
            match e.as_service_error() {
                Some(service) if service.is_no_such_key() => ErrorKind::NotFound(path.to_path_buf()),
                _ => ErrorKind::Network(DisplayErrorContext(&e).to_string()),
            }
        })?;
        Ok(Box::pin(output.body.into_async_read()))
    }
}
