//! File lifecycle: processing, read URLs and object removal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notes_common::{AppError, AppResult, ObjectStoreService};
use notes_db::entities::file;
use notes_db::map_db_err;
use notes_db::repositories::FileRepository;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;

use super::media::{MediaKind, MediaService};
use crate::fanout::fan_out;

/// A file with a freshly minted download URL.
#[derive(Debug, Clone, Serialize)]
pub struct FileWithUrl {
    #[serde(flatten)]
    pub file: file::Model,
    /// Presigned GET URL, never persisted
    pub url: String,
}

/// Removes a scratch file when dropped.
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.0.display(), error = %e, "Failed to remove scratch file");
            }
        }
    }
}

/// File service.
#[derive(Clone)]
pub struct FileService {
    db: Arc<DatabaseConnection>,
    file_repo: FileRepository,
    storage: ObjectStoreService,
    media: MediaService,
    url_ttl: Duration,
}

impl FileService {
    /// Create a new file service.
    #[must_use]
    pub const fn new(
        db: Arc<DatabaseConnection>,
        file_repo: FileRepository,
        storage: ObjectStoreService,
        media: MediaService,
        url_ttl: Duration,
    ) -> Self {
        Self {
            db,
            file_repo,
            storage,
            media,
            url_ttl,
        }
    }

    /// Underlying repository.
    #[must_use]
    pub const fn repository(&self) -> &FileRepository {
        &self.file_repo
    }

    /// Transcode the blob uploaded under `original_key` and record the result.
    ///
    /// Returns the processed key. On any failure the file row is left
    /// untouched and stays servable from its original blob. Scratch files
    /// are removed on every path.
    pub async fn process(&self, original_key: &str) -> AppResult<String> {
        let kind = MediaKind::classify(original_key);
        let prefix = kind
            .processed_prefix()
            .ok_or_else(|| AppError::UnsupportedFileType(original_key.to_string()))?;

        let download = ScratchFile(self.media.scratch_path(original_key));
        self.storage.get(original_key, download.path()).await?;

        let output = ScratchFile(self.media.transcode(download.path()).await?);
        let name = output
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::Internal("Transcoder produced an unnamed file".to_string()))?;
        let processed_key = format!("{prefix}/{name}");

        self.storage.put(&processed_key, output.path()).await?;

        if let Err(e) = self.mark_processed(original_key, &processed_key).await {
            if let Err(cleanup) = self.storage.delete(&processed_key).await {
                tracing::warn!(key = %processed_key, error = %cleanup, "Failed to remove orphaned processed object");
            }
            return Err(e);
        }

        tracing::info!(
            original_key = %original_key,
            processed_key = %processed_key,
            "Processed file"
        );
        Ok(processed_key)
    }

    /// Record `processed_key` on the file uploaded under `original_key`, in
    /// its own transaction.
    pub async fn mark_processed(&self, original_key: &str, processed_key: &str) -> AppResult<()> {
        let txn = self.db.begin().await.map_err(map_db_err)?;
        self.file_repo
            .update_processed_key_in(&txn, original_key, processed_key)
            .await?;
        txn.commit().await.map_err(map_db_err)
    }

    /// Mint a download URL for every file, concurrently.
    ///
    /// Processed blobs are preferred; unprocessed files fall back to the
    /// original upload. Any failure fails the whole call with `Presign`.
    pub async fn attach_urls(&self, files: Vec<file::Model>) -> AppResult<Vec<FileWithUrl>> {
        let storage = self.storage.clone();
        let ttl = self.url_ttl;

        fan_out(files, move |file| {
            let storage = storage.clone();
            async move {
                let url = storage
                    .presigned_get(file.serving_key(), ttl)
                    .await
                    .map_err(|e| match e {
                        AppError::Presign(msg) => AppError::Presign(msg),
                        other => AppError::Presign(other.to_string()),
                    })?;
                Ok(FileWithUrl { file, url })
            }
        })
        .await
        .into_iter()
        .collect()
    }

    /// Files with URLs for each of the given notes.
    pub async fn for_notes(
        &self,
        note_ids: &[String],
    ) -> AppResult<HashMap<String, Vec<FileWithUrl>>> {
        let files = self.file_repo.find_by_note_ids(note_ids).await?;
        let mut by_note: HashMap<String, Vec<FileWithUrl>> = HashMap::new();
        for file in self.attach_urls(files).await? {
            by_note
                .entry(file.file.note_id.clone())
                .or_default()
                .push(file);
        }
        Ok(by_note)
    }

    /// Delete every blob the given files reference, concurrently.
    ///
    /// All deletions are attempted. Failures are logged and returned as one
    /// `Storage` error naming every key that could not be removed.
    pub async fn remove_objects(&self, files: &[file::Model]) -> AppResult<()> {
        let keys: Vec<String> = files
            .iter()
            .flat_map(file::Model::object_keys)
            .map(str::to_string)
            .collect();

        let storage = self.storage.clone();
        let results = fan_out(keys.clone(), move |key| {
            let storage = storage.clone();
            async move { storage.delete(&key).await }
        })
        .await;

        let mut failed = Vec::new();
        for (key, result) in keys.into_iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(key = %key, error = %e, "Failed to remove object");
                failed.push(key);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(AppError::Storage(format!(
                "Failed to remove {} object(s): {}",
                failed.len(),
                failed.join(", ")
            )))
        }
    }
}
