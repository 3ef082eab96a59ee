//! Application configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration. Caching is disabled when absent.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Cache lifetimes.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Object storage backend.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Presigned URL settings.
    #[serde(default)]
    pub presign: PresignConfig,
    /// Media processing settings.
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Maximum lifetime of a pooled connection, in seconds.
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    /// How many times to try connecting before giving up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Delay before the first reconnect, doubled on every further attempt.
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Cache entry lifetimes, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of cached users.
    #[serde(default = "default_user_ttl_secs")]
    pub user_ttl_secs: u64,
    /// Lifetime of cached access and refresh tokens.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    /// Lifetime of cached notes.
    #[serde(default = "default_note_ttl_secs")]
    pub note_ttl_secs: u64,
}

impl CacheConfig {
    /// User entry lifetime.
    #[must_use]
    pub const fn user_ttl(&self) -> Duration {
        Duration::from_secs(self.user_ttl_secs)
    }

    /// Token entry lifetime.
    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Note entry lifetime.
    #[must_use]
    pub const fn note_ttl(&self) -> Duration {
        Duration::from_secs(self.note_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            user_ttl_secs: default_user_ttl_secs(),
            token_ttl_secs: default_token_ttl_secs(),
            note_ttl_secs: default_note_ttl_secs(),
        }
    }
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Local {
        /// Base path for stored objects.
        base_path: PathBuf,
        /// Base URL the presigned links point at.
        base_url: String,
        /// Secret used to sign presigned links.
        signing_secret: String,
    },
    /// S3-compatible object storage.
    S3 {
        /// S3 endpoint URL.
        endpoint: String,
        /// Bucket name.
        bucket: String,
        /// Region.
        region: String,
        /// Access key ID.
        access_key_id: String,
        /// Secret access key.
        secret_access_key: String,
        /// Path prefix within the bucket.
        #[serde(default)]
        prefix: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local {
            base_path: PathBuf::from("./objects"),
            base_url: "http://localhost:8080/objects".to_string(),
            signing_secret: "change-me".to_string(),
        }
    }
}

/// Presigned URL configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PresignConfig {
    /// Lifetime of download links, in seconds.
    #[serde(default = "default_presign_ttl_secs")]
    pub get_ttl_secs: u64,
    /// Lifetime of upload links, in seconds.
    #[serde(default = "default_presign_ttl_secs")]
    pub put_ttl_secs: u64,
    /// Key prefix for client uploads.
    #[serde(default = "default_upload_prefix")]
    pub upload_prefix: String,
}

impl PresignConfig {
    /// Download link lifetime.
    #[must_use]
    pub const fn get_ttl(&self) -> Duration {
        Duration::from_secs(self.get_ttl_secs)
    }

    /// Upload link lifetime.
    #[must_use]
    pub const fn put_ttl(&self) -> Duration {
        Duration::from_secs(self.put_ttl_secs)
    }
}

impl Default for PresignConfig {
    fn default() -> Self {
        Self {
            get_ttl_secs: default_presign_ttl_secs(),
            put_ttl_secs: default_presign_ttl_secs(),
            upload_prefix: default_upload_prefix(),
        }
    }
}

/// Where media processing runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// In the calling process.
    #[default]
    Inline,
    /// As a batch job submitted to the cluster.
    Cluster,
}

/// Media processing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Dispatcher selection.
    #[serde(default)]
    pub mode: ProcessingMode,
    /// Directory for downloaded and transcoded scratch files.
    #[serde(default = "std::env::temp_dir")]
    pub scratch_dir: PathBuf,
    /// JPEG re-encode quality (1-100).
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Target audio bitrate passed to ffmpeg.
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Path to the ffmpeg binary. Looked up on `PATH` when unset.
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
    /// Cluster job settings.
    #[serde(default)]
    pub cluster: ClusterJobConfig,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::default(),
            scratch_dir: std::env::temp_dir(),
            jpeg_quality: default_jpeg_quality(),
            audio_bitrate: default_audio_bitrate(),
            ffmpeg_path: None,
            cluster: ClusterJobConfig::default(),
        }
    }
}

/// Batch job submission settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterJobConfig {
    /// Cluster API server.
    #[serde(default = "default_cluster_api_url")]
    pub api_url: String,
    /// Namespace the jobs are created in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Container image running the `process-files` command.
    #[serde(default = "default_image")]
    pub image: String,
    /// Container entrypoint.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    /// Secrets injected into the container environment.
    #[serde(default = "default_secret_refs")]
    pub secret_refs: Vec<String>,
    /// Retries before the job is marked failed.
    #[serde(default = "default_backoff_limit")]
    pub backoff_limit: u32,
    /// Seconds a finished job is kept before cleanup.
    #[serde(default = "default_ttl_after_finished")]
    pub ttl_seconds_after_finished: u32,
    /// Service account token file.
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    /// Cluster CA bundle. Skipped when the file does not exist.
    #[serde(default = "default_ca_cert_path")]
    pub ca_cert_path: PathBuf,
    /// Submission request timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClusterJobConfig {
    fn default() -> Self {
        Self {
            api_url: default_cluster_api_url(),
            namespace: default_namespace(),
            image: default_image(),
            command: default_command(),
            secret_refs: default_secret_refs(),
            backoff_limit: default_backoff_limit(),
            ttl_seconds_after_finished: default_ttl_after_finished(),
            token_path: default_token_path(),
            ca_cert_path: default_ca_cert_path(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

const fn default_max_connections() -> u32 {
    12
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_max_lifetime_secs() -> u64 {
    1800
}

const fn default_connect_attempts() -> u32 {
    5
}

const fn default_connect_backoff_ms() -> u64 {
    1000
}

fn default_redis_prefix() -> String {
    "notes".to_string()
}

const fn default_user_ttl_secs() -> u64 {
    3600
}

const fn default_token_ttl_secs() -> u64 {
    59 * 60
}

const fn default_note_ttl_secs() -> u64 {
    59 * 60
}

const fn default_presign_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_upload_prefix() -> String {
    "original".to_string()
}

const fn default_jpeg_quality() -> u8 {
    50
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_cluster_api_url() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_image() -> String {
    "ghcr.io/daniarmas/notes".to_string()
}

fn default_command() -> Vec<String> {
    vec!["/app/notes".to_string()]
}

fn default_secret_refs() -> Vec<String> {
    vec!["note-secrets".to_string()]
}

const fn default_backoff_limit() -> u32 {
    4
}

const fn default_ttl_after_finished() -> u32 {
    15
}

fn default_token_path() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token")
}

fn default_ca_cert_path() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/ca.crt")
}

const fn default_request_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `NOTES_ENV`)
    /// 4. Environment variables with `NOTES_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("NOTES_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("NOTES")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("NOTES")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load(toml: &str) -> Config {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(toml.as_bytes()).unwrap();
        Config::from_file(file.path()).unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load(
            r#"
            [database]
            url = "postgres://localhost/notes"
            "#,
        );

        assert_eq!(config.database.max_connections, 12);
        assert_eq!(config.database.connect_attempts, 5);
        assert!(config.redis.is_none());
        assert_eq!(config.cache.note_ttl(), Duration::from_secs(3540));
        assert_eq!(config.presign.upload_prefix, "original");
        assert_eq!(config.processing.mode, ProcessingMode::Inline);
        assert_eq!(config.processing.jpeg_quality, 50);
        assert_eq!(config.processing.cluster.backoff_limit, 4);
        assert_eq!(config.processing.cluster.ttl_seconds_after_finished, 15);
        assert!(matches!(config.storage, StorageConfig::Local { .. }));
    }

    #[test]
    fn test_tagged_storage_and_cluster_mode() {
        let config = load(
            r#"
            [database]
            url = "postgres://localhost/notes"

            [redis]
            url = "redis://localhost:6379"

            [storage]
            backend = "s3"
            endpoint = "http://minio:9000"
            bucket = "notes"
            region = "us-east-1"
            access_key_id = "key"
            secret_access_key = "secret"

            [processing]
            mode = "cluster"

            [processing.cluster]
            namespace = "media"
            secret_refs = ["a", "b"]
            "#,
        );

        assert_eq!(config.redis.unwrap().prefix, "notes");
        match config.storage {
            StorageConfig::S3 { bucket, prefix, .. } => {
                assert_eq!(bucket, "notes");
                assert!(prefix.is_none());
            }
            StorageConfig::Local { .. } => panic!("Expected S3 storage"),
        }
        assert_eq!(config.processing.mode, ProcessingMode::Cluster);
        assert_eq!(config.processing.cluster.namespace, "media");
        assert_eq!(config.processing.cluster.secret_refs, vec!["a", "b"]);
        assert_eq!(config.processing.cluster.image, "ghcr.io/daniarmas/notes");
    }
}
