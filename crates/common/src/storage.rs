//! Object storage abstraction.
//!
//! Blobs are addressed by key. Clients upload and download directly through
//! time-boxed presigned URLs; the service itself only checks existence,
//! moves blobs between the store and local scratch files, and deletes them.
//!
//! Supports both local filesystem and S3-compatible object storage.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use crate::{AppError, AppResult};

/// Upper bound for a single health check round trip.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Object store capability.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// Download an object to `dest`.
    async fn get(&self, key: &str, dest: &Path) -> AppResult<()>;

    /// Upload the file at `path` under `key`.
    async fn put(&self, key: &str, path: &Path) -> AppResult<()>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Mint a download URL valid for `ttl`.
    async fn presigned_get(&self, key: &str, ttl: Duration) -> AppResult<String>;

    /// Mint an upload URL valid for `ttl`.
    async fn presigned_put(&self, key: &str, ttl: Duration) -> AppResult<String>;

    /// Verify the store is reachable, within [`HEALTH_CHECK_TIMEOUT`].
    async fn health_check(&self) -> AppResult<()>;
}

/// Shared object store handle.
pub type ObjectStoreService = Arc<dyn ObjectStore>;

/// HTTP method a presigned URL grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    /// Download.
    Get,
    /// Upload.
    Put,
}

impl PresignMethod {
    /// Method name as it appears in the URL.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Local filesystem object store.
///
/// Presigned URLs point at `base_url` and carry an expiry and an
/// HMAC-SHA256 signature that the serving side checks with
/// [`LocalObjectStore::verify_presigned`].
pub struct LocalObjectStore {
    base_path: PathBuf,
    base_url: String,
    signing_secret: String,
}

impl LocalObjectStore {
    /// Create a new local object store.
    #[must_use]
    pub const fn new(base_path: PathBuf, base_url: String, signing_secret: String) -> Self {
        Self {
            base_path,
            base_url,
            signing_secret,
        }
    }

    fn object_path(&self, key: &str) -> AppResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(AppError::BadRequest(format!("Invalid object key: {key}")));
        }
        Ok(self.base_path.join(relative))
    }

    fn signature(&self, method: PresignMethod, key: &str, expires: i64) -> AppResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes())
            .map_err(|e| AppError::Presign(format!("Invalid signing secret: {e}")))?;
        mac.update(method.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn presign(&self, method: PresignMethod, key: &str, ttl: Duration) -> AppResult<String> {
        self.object_path(key)?;
        let ttl = i64::try_from(ttl.as_secs())
            .map_err(|_| AppError::Presign(format!("Expiry out of range: {ttl:?}")))?;
        let expires = chrono::Utc::now().timestamp() + ttl;
        let signature = self.signature(method, key, expires)?;

        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AppError::Presign(format!("Invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| AppError::Presign("Base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(key.split('/'));
        url.query_pairs_mut()
            .append_pair("method", method.as_str())
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);

        Ok(url.into())
    }

    /// Check a presigned URL's parameters.
    ///
    /// `now` is a unix timestamp. Returns `false` for expired links and
    /// signature mismatches.
    #[must_use]
    pub fn verify_presigned(
        &self,
        method: PresignMethod,
        key: &str,
        expires: i64,
        signature: &str,
        now: i64,
    ) -> bool {
        if now > expires {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.signing_secret.as_bytes()) else {
            return false;
        };
        mac.update(method.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac.verify_slice(&provided).is_ok()
    }
}

async fn ensure_parent(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to create directory: {e}")))?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl ObjectStore for LocalObjectStore {
    async fn exists(&self, key: &str) -> AppResult<bool> {
        let path = self.object_path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to stat {key}: {e}")))
    }

    async fn get(&self, key: &str, dest: &Path) -> AppResult<()> {
        let path = self.object_path(key)?;
        ensure_parent(dest).await?;
        tokio::fs::copy(&path, dest)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to download {key}: {e}")))?;
        Ok(())
    }

    async fn put(&self, key: &str, path: &Path) -> AppResult<()> {
        let target = self.object_path(key)?;
        ensure_parent(&target).await?;
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to upload {key}: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!("Failed to delete {key}: {e}"))),
        }
    }

    async fn presigned_get(&self, key: &str, ttl: Duration) -> AppResult<String> {
        self.presign(PresignMethod::Get, key, ttl)
    }

    async fn presigned_put(&self, key: &str, ttl: Duration) -> AppResult<String> {
        self.presign(PresignMethod::Put, key, ttl)
    }

    async fn health_check(&self) -> AppResult<()> {
        let check = async {
            tokio::fs::create_dir_all(&self.base_path).await?;
            tokio::fs::metadata(&self.base_path).await
        };
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check).await {
            Ok(Ok(meta)) if meta.is_dir() => Ok(()),
            Ok(Ok(_)) => Err(AppError::Storage(format!(
                "{} is not a directory",
                self.base_path.display()
            ))),
            Ok(Err(e)) => Err(AppError::Storage(format!("Storage unavailable: {e}"))),
            Err(_) => Err(AppError::Storage("Storage health check timed out".to_string())),
        }
    }
}

/// S3-compatible object store.
#[cfg(feature = "s3")]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: Option<String>,
}

#[cfg(feature = "s3")]
impl S3ObjectStore {
    /// Create a new S3 object store.
    #[must_use]
    pub fn new(
        endpoint: &str,
        bucket: String,
        region: &str,
        access_key_id: &str,
        secret_access_key: &str,
        prefix: Option<String>,
    ) -> Self {
        use aws_config::{BehaviorVersion, Region};
        use aws_sdk_s3::config::Credentials;

        let credentials =
            Credentials::new(access_key_id, secret_access_key, None, None, "notes");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket,
            prefix,
        }
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
            None => key.to_string(),
        }
    }
}

#[cfg(feature = "s3")]
#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn exists(&self, key: &str) -> AppResult<bool> {
        use aws_sdk_s3::error::DisplayErrorContext;

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(AppError::Storage(format!(
                "S3 head_object failed for {key}: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }

    async fn get(&self, key: &str, dest: &Path) -> AppResult<()> {
        use aws_sdk_s3::error::DisplayErrorContext;

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| {
                AppError::Storage(format!(
                    "S3 download failed for {key}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        ensure_parent(dest).await?;
        let mut body = output.body.into_async_read();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to create {}: {e}", dest.display())))?;
        tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| AppError::Storage(format!("S3 download failed for {key}: {e}")))?;
        Ok(())
    }

    async fn put(&self, key: &str, path: &Path) -> AppResult<()> {
        use aws_sdk_s3::error::DisplayErrorContext;
        use aws_sdk_s3::primitives::ByteStream;

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to read {}: {e}", path.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(body)
            .send()
            .await
            .map_err(|e| {
                AppError::Storage(format!(
                    "S3 upload failed for {key}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        use aws_sdk_s3::error::DisplayErrorContext;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| {
                AppError::Storage(format!(
                    "S3 delete failed for {key}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn presigned_get(&self, key: &str, ttl: Duration) -> AppResult<String> {
        use aws_sdk_s3::presigning::PresigningConfig;

        let config =
            PresigningConfig::expires_in(ttl).map_err(|e| AppError::Presign(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .presigned(config)
            .await
            .map_err(|e| AppError::Presign(format!("Failed to presign GET {key}: {e}")))?;
        Ok(request.uri().to_string())
    }

    async fn presigned_put(&self, key: &str, ttl: Duration) -> AppResult<String> {
        use aws_sdk_s3::presigning::PresigningConfig;

        let config =
            PresigningConfig::expires_in(ttl).map_err(|e| AppError::Presign(e.to_string()))?;
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .presigned(config)
            .await
            .map_err(|e| AppError::Presign(format!("Failed to presign PUT {key}: {e}")))?;
        Ok(request.uri().to_string())
    }

    async fn health_check(&self) -> AppResult<()> {
        use aws_sdk_s3::error::DisplayErrorContext;

        let request = self.client.head_bucket().bucket(&self.bucket).send();
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, request).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::Storage(format!(
                "Bucket {} unavailable: {}",
                self.bucket,
                DisplayErrorContext(&e)
            ))),
            Err(_) => Err(AppError::Storage("Storage health check timed out".to_string())),
        }
    }
}
