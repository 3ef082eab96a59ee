//! Notes service entry point.
//!
//! ```text
//! notes migrate
//! notes process-files --note <id> --files <key1,key2,...>
//! notes reprocess --note <id>
//! notes check
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fred::prelude::*;
use notes_common::config::{RedisConfig, StorageConfig};
use notes_common::{
    AppError, AppResult, Cache, CacheService, Config, LocalObjectStore, NoopCache,
    ObjectStoreService, RedisCache,
};
use notes_core::cached::CachedNoteRepository;
use notes_core::{
    FileService, InlineDispatcher, MediaConfig, MediaService, NoteService, build_dispatcher,
};
use notes_db::repositories::{FileRepository, NoteRepository};
use sea_orm::DatabaseConnection;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Redis connect deadline. Past it the service runs without a cache.
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "notes")]
#[command(version, about = "Notes service with media processing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run database migrations
    Migrate,

    /// Transcode a note's uploaded files in this process
    ProcessFiles {
        /// Id of the note that owns the files
        #[arg(long = "note")]
        note_id: String,

        /// Comma-separated original object keys
        #[arg(
            long = "files",
            required = true,
            value_delimiter = ',',
            value_parser = object_key
        )]
        object_keys: Vec<String>,
    },

    /// Hand a note's unprocessed files to the configured dispatcher again
    Reprocess {
        /// Id of the note to reprocess
        #[arg(long = "note")]
        note_id: String,
    },

    /// Check that the database, cache and object store are reachable
    Check,
}

fn object_key(value: &str) -> Result<String, String> {
    let key = value.trim();
    if key.is_empty() {
        Err("object keys must not be empty".to_string())
    } else {
        Ok(key.to_string())
    }
}

/// Per-file outcome counts of one `process-files` run.
#[derive(Debug, Default, PartialEq, Eq)]
struct ProcessSummary {
    processed: usize,
    failed: usize,
}

/// Exit status of a `process-files` job.
///
/// Failed files are terminal and already logged. Only a job that could not
/// start exits non-zero, since a non-zero exit makes the cluster rerun the
/// whole job.
fn job_exit_status(outcome: &AppResult<ProcessSummary>) -> u8 {
    u8::from(outcome.is_err())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "notes=info,sea_orm=warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("NOTES_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Connect to Redis and wait until the connection is up.
async fn connect_redis(redis: &RedisConfig) -> AppResult<fred::clients::Client> {
    let fred_config = fred::types::config::Config::from_url(&redis.url)
        .map_err(|e| AppError::Config(format!("Invalid Redis URL: {e}")))?;
    let client = fred::clients::Client::new(fred_config, None, None, None);
    client.connect();

    match tokio::time::timeout(REDIS_CONNECT_TIMEOUT, client.wait_for_connect()).await {
        Ok(Ok(())) => Ok(client),
        Ok(Err(e)) => Err(AppError::Cache(format!("Failed to connect to Redis: {e}"))),
        Err(_) => Err(AppError::Cache("Timed out connecting to Redis".to_string())),
    }
}

/// Connect to Redis when configured. Falls back to no caching.
async fn connect_cache(config: &Config) -> CacheService {
    let Some(redis) = &config.redis else {
        info!("Redis not configured, caching disabled");
        return Arc::new(NoopCache);
    };

    match connect_redis(redis).await {
        Ok(client) => {
            info!("Connected to Redis");
            Arc::new(RedisCache::new(Arc::new(client), redis.prefix.clone()))
        }
        Err(e) => {
            warn!(error = %e, "Redis unavailable, caching disabled");
            Arc::new(NoopCache)
        }
    }
}

/// Round-trip the configured cache. `Ok(false)` means none is configured.
async fn check_cache(redis: Option<&RedisConfig>) -> AppResult<bool> {
    let Some(redis) = redis else {
        return Ok(false);
    };

    let client = connect_redis(redis).await?;
    let cache = RedisCache::new(Arc::new(client), redis.prefix.clone());
    cache.get("health").await?;
    Ok(true)
}

/// Build the configured object store and check it is reachable.
async fn connect_storage(config: &StorageConfig) -> AppResult<ObjectStoreService> {
    let storage: ObjectStoreService = match config {
        StorageConfig::Local {
            base_path,
            base_url,
            signing_secret,
        } => Arc::new(LocalObjectStore::new(
            base_path.clone(),
            base_url.clone(),
            signing_secret.clone(),
        )),
        StorageConfig::S3 { .. } => s3_store(config)?,
    };

    storage.health_check().await?;
    info!("Object store reachable");
    Ok(storage)
}

#[cfg(feature = "s3")]
fn s3_store(config: &StorageConfig) -> AppResult<ObjectStoreService> {
    let StorageConfig::S3 {
        endpoint,
        bucket,
        region,
        access_key_id,
        secret_access_key,
        prefix,
    } = config
    else {
        return Err(AppError::Config("Expected S3 storage settings".to_string()));
    };

    Ok(Arc::new(notes_common::S3ObjectStore::new(
        endpoint,
        bucket.clone(),
        region,
        access_key_id,
        secret_access_key,
        prefix.clone(),
    )))
}

#[cfg(not(feature = "s3"))]
fn s3_store(_config: &StorageConfig) -> AppResult<ObjectStoreService> {
    Err(AppError::Config(
        "S3 storage requires a build with the `s3` feature".to_string(),
    ))
}

fn file_service(
    config: &Config,
    db: &Arc<DatabaseConnection>,
    storage: &ObjectStoreService,
) -> FileService {
    FileService::new(
        Arc::clone(db),
        FileRepository::new(Arc::clone(db)),
        Arc::clone(storage),
        MediaService::new(MediaConfig::from(&config.processing)),
        config.presign.get_ttl(),
    )
}

/// Cluster job entrypoint. Always processes in this process.
async fn process_files(
    config: &Config,
    db: Arc<DatabaseConnection>,
    note_id: &str,
    object_keys: &[String],
) -> AppResult<ProcessSummary> {
    let storage = connect_storage(&config.storage).await?;
    let dispatcher = InlineDispatcher::new(file_service(config, &db, &storage));

    info!(note_id = %note_id, files = object_keys.len(), "Processing files");
    let results = dispatcher.process_all(object_keys).await;
    let summary = summarize(note_id, object_keys, results);

    info!(
        note_id = %note_id,
        processed = summary.processed,
        failed = summary.failed,
        "Processing finished"
    );
    Ok(summary)
}

fn summarize(
    note_id: &str,
    object_keys: &[String],
    results: Vec<AppResult<String>>,
) -> ProcessSummary {
    let mut summary = ProcessSummary::default();
    for (key, result) in object_keys.iter().zip(results) {
        match result {
            Ok(processed_key) => {
                summary.processed += 1;
                info!(key = %key, processed_key = %processed_key, "File processed");
            }
            Err(e) => {
                summary.failed += 1;
                error!(note_id = %note_id, key = %key, error = %e, "File processing failed");
            }
        }
    }
    summary
}

/// Hand a note's unprocessed files to the configured dispatcher.
async fn reprocess(config: &Config, db: Arc<DatabaseConnection>, note_id: &str) -> AppResult<()> {
    let cache = connect_cache(config).await;
    let storage = connect_storage(&config.storage).await?;
    let files = file_service(config, &db, &storage);
    let dispatcher = build_dispatcher(&config.processing, files.clone())?;

    let notes = NoteService::new(
        Arc::clone(&db),
        CachedNoteRepository::new(
            NoteRepository::new(Arc::clone(&db)),
            cache,
            config.cache.note_ttl(),
        ),
        files,
        storage,
        dispatcher,
        config.presign.clone(),
    );

    let count = notes.reprocess(note_id).await?;
    info!(note_id = %note_id, files = count, mode = ?config.processing.mode, "Reprocess requested");
    Ok(())
}

/// Probe every backing service and report each result.
async fn check(config: &Config, db: Arc<DatabaseConnection>) -> ExitCode {
    let mut healthy = true;

    match db.ping().await {
        Ok(()) => info!("Database: ok"),
        Err(e) => {
            healthy = false;
            error!(error = %e, "Database: unreachable");
        }
    }

    match check_cache(config.redis.as_ref()).await {
        Ok(true) => info!("Cache: ok"),
        Ok(false) => info!("Cache: not configured"),
        Err(e) => {
            healthy = false;
            error!(error = %e, "Cache: unreachable");
        }
    }

    match connect_storage(&config.storage).await {
        Ok(_) => info!("Object store: ok"),
        Err(e) => {
            healthy = false;
            error!(error = %e, "Object store: unreachable");
        }
    }

    if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(command: Command) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Arc::new(notes_db::init(&config.database).await?);

    match command {
        Command::Migrate => {
            info!("Running database migrations...");
            notes_db::migrate(&db).await?;
            info!("Migrations completed");
            Ok(ExitCode::SUCCESS)
        }
        Command::ProcessFiles {
            note_id,
            object_keys,
        } => {
            let outcome = process_files(&config, db, &note_id, &object_keys).await;
            if let Err(e) = &outcome {
                error!(note_id = %note_id, error = %e, "Processing job could not start");
            }
            Ok(ExitCode::from(job_exit_status(&outcome)))
        }
        Command::Reprocess { note_id } => {
            reprocess(&config, db, &note_id).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => Ok(check(&config, db).await),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}
