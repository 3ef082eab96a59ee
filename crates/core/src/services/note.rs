//! Note service.
//!
//! Creating a note runs four stages, each gated on the previous one:
//! every object key is checked for existence, the note and its file rows
//! are inserted in one transaction, the keys are handed to the dispatcher,
//! and download URLs are minted for the response.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use notes_common::config::PresignConfig;
use notes_common::{AppError, AppResult, IdGenerator, ObjectStoreService};
use notes_db::entities::{file, note};
use notes_db::map_db_err;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{DatabaseConnection, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::dispatch::DispatcherService;
use super::file::{FileService, FileWithUrl};
use crate::cached::CachedNoteRepository;
use crate::fanout::fan_out;

/// Notes per listing page.
pub const PAGE_SIZE: u64 = 20;

/// Most files one note can carry.
pub const MAX_FILES_PER_NOTE: usize = 16;

/// Input for creating a new note.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateNoteInput {
    #[validate(length(max = 256))]
    pub title: String,

    #[validate(length(max = 65536))]
    pub content: String,

    /// Keys of blobs the client already uploaded, in display order.
    #[validate(length(max = 16))]
    #[serde(default)]
    pub object_keys: Vec<String>,
}

/// Input for editing a note.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateNoteInput {
    #[validate(length(max = 256))]
    pub title: String,

    #[validate(length(max = 65536))]
    pub content: String,
}

/// A note with its files.
#[derive(Debug, Clone, Serialize)]
pub struct NoteWithFiles {
    #[serde(flatten)]
    pub note: note::Model,
    pub files: Vec<FileWithUrl>,
    /// Set when the note was saved but its files could not be handed off
    /// for processing. The client may retry through [`NoteService::reprocess`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePage {
    pub notes: Vec<NoteWithFiles>,
    /// Pass back to fetch the next page; `None` on the last page.
    pub next_cursor: Option<DateTimeWithTimeZone>,
}

/// Where a client should upload one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrl {
    pub client_name: String,
    pub object_key: String,
    pub upload_url: String,
}

/// Note service for business logic.
#[derive(Clone)]
pub struct NoteService {
    db: Arc<DatabaseConnection>,
    note_repo: CachedNoteRepository,
    files: FileService,
    storage: ObjectStoreService,
    dispatcher: DispatcherService,
    presign: PresignConfig,
    id_gen: IdGenerator,
}

impl NoteService {
    /// Create a new note service.
    #[must_use]
    pub const fn new(
        db: Arc<DatabaseConnection>,
        note_repo: CachedNoteRepository,
        files: FileService,
        storage: ObjectStoreService,
        dispatcher: DispatcherService,
        presign: PresignConfig,
    ) -> Self {
        Self {
            db,
            note_repo,
            files,
            storage,
            dispatcher,
            presign,
            id_gen: IdGenerator::new(),
        }
    }

    /// Create a note with files from already uploaded blobs.
    ///
    /// Nothing is written unless every key exists. Once the rows are
    /// committed the note stands: a dispatch failure is reported in
    /// `processing_error`, and a URL minting failure fails the call with
    /// `Presign` while the note remains readable.
    pub async fn create_note(
        &self,
        owner_id: &str,
        input: CreateNoteInput,
    ) -> AppResult<NoteWithFiles> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        ensure_unique(&input.object_keys)?;

        self.ensure_objects_exist(&input.object_keys).await?;

        let (note, files) = self.insert_note(owner_id, &input).await?;
        self.note_repo.remember(&note.id, &note).await;

        let processing_error = if input.object_keys.is_empty() {
            None
        } else {
            match self.dispatcher.dispatch(&note.id, &input.object_keys).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(note_id = %note.id, error = %e, "Failed to dispatch file processing");
                    Some(e.to_string())
                }
            }
        };

        let files = self.files.attach_urls(files).await?;

        tracing::info!(
            note_id = %note.id,
            user_id = %owner_id,
            files = files.len(),
            "Created note"
        );

        Ok(NoteWithFiles {
            note,
            files,
            processing_error,
        })
    }

    /// Fail with `ObjectsNotFound` naming every key that is missing or could
    /// not be checked.
    async fn ensure_objects_exist(&self, keys: &[String]) -> AppResult<()> {
        let storage = self.storage.clone();
        let results = fan_out(keys.to_vec(), move |key| {
            let storage = storage.clone();
            async move { storage.exists(&key).await }
        })
        .await;

        let missing: Vec<String> = keys
            .iter()
            .zip(results)
            .filter_map(|(key, result)| match result {
                Ok(true) => None,
                Ok(false) => Some(key.clone()),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Object existence check failed");
                    Some(key.clone())
                }
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::ObjectsNotFound(missing))
        }
    }

    async fn insert_note(
        &self,
        owner_id: &str,
        input: &CreateNoteInput,
    ) -> AppResult<(note::Model, Vec<file::Model>)> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let txn = self.db.begin().await.map_err(map_db_err)?;

        let note = self
            .note_repo
            .inner()
            .create_in(
                &txn,
                note::ActiveModel {
                    id: Set(self.id_gen.generate()),
                    user_id: Set(owner_id.to_string()),
                    title: Set(input.title.clone()),
                    content: Set(input.content.clone()),
                    created_at: Set(now),
                    updated_at: Set(now),
                    deleted_at: Set(None),
                },
            )
            .await?;

        let mut files = Vec::with_capacity(input.object_keys.len());
        for key in &input.object_keys {
            let file = self
                .files
                .repository()
                .create_in(
                    &txn,
                    file::ActiveModel {
                        id: Set(self.id_gen.generate()),
                        note_id: Set(note.id.clone()),
                        original_object_key: Set(key.clone()),
                        processed_object_key: Set(None),
                        created_at: Set(now),
                        updated_at: Set(now),
                        deleted_at: Set(None),
                    },
                )
                .await?;
            files.push(file);
        }

        txn.commit().await.map_err(map_db_err)?;
        Ok((note, files))
    }

    /// Get a note with its files.
    pub async fn get_note(&self, id: &str) -> AppResult<NoteWithFiles> {
        let note = self.note_repo.get(id).await?;
        self.with_files(note).await
    }

    async fn with_files(&self, note: note::Model) -> AppResult<NoteWithFiles> {
        let files = self.files.repository().find_by_note_id(&note.id).await?;
        let files = self.files.attach_urls(files).await?;
        Ok(NoteWithFiles {
            note,
            files,
            processing_error: None,
        })
    }

    /// A page of the user's notes, most recently updated first.
    ///
    /// `cursor` is the `next_cursor` of the previous page, `None` for the first.
    pub async fn list_notes(
        &self,
        owner_id: &str,
        cursor: Option<DateTimeWithTimeZone>,
    ) -> AppResult<NotePage> {
        let before = cursor.unwrap_or_else(|| Utc::now().into());
        let notes = self
            .note_repo
            .inner()
            .list_by_user(owner_id, before, PAGE_SIZE)
            .await?;
        self.page(notes).await
    }

    /// A page of the user's trashed notes.
    pub async fn list_trash(
        &self,
        owner_id: &str,
        cursor: Option<DateTimeWithTimeZone>,
    ) -> AppResult<NotePage> {
        let before = cursor.unwrap_or_else(|| Utc::now().into());
        let notes = self
            .note_repo
            .inner()
            .list_trash_by_user(owner_id, before, PAGE_SIZE)
            .await?;
        self.page(notes).await
    }

    async fn page(&self, notes: Vec<note::Model>) -> AppResult<NotePage> {
        let next_cursor = if notes.len() as u64 == PAGE_SIZE {
            notes.last().map(|n| n.updated_at)
        } else {
            None
        };

        let ids: Vec<String> = notes.iter().map(|n| n.id.clone()).collect();
        let mut files = self.files.for_notes(&ids).await?;

        let notes = notes
            .into_iter()
            .map(|note| NoteWithFiles {
                files: files.remove(&note.id).unwrap_or_default(),
                note,
                processing_error: None,
            })
            .collect();

        Ok(NotePage { notes, next_cursor })
    }

    /// Edit a note's title and content.
    pub async fn update_note(&self, id: &str, input: UpdateNoteInput) -> AppResult<NoteWithFiles> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let note = self
            .note_repo
            .update_content(id, input.title, input.content)
            .await?;
        self.with_files(note).await
    }

    /// Take a note out of the trash.
    pub async fn restore_note(&self, id: &str) -> AppResult<()> {
        self.note_repo.restore(id).await
    }

    /// Delete a note.
    ///
    /// A soft delete moves it to the trash. A hard delete removes the note
    /// and file rows in one transaction, then removes their blobs. Blob
    /// removal failures do not bring the rows back; they are returned as one
    /// `Storage` error.
    pub async fn delete_note(&self, id: &str, hard: bool) -> AppResult<()> {
        if !hard {
            self.note_repo.soft_delete(id).await?;
            tracing::info!(note_id = %id, "Moved note to trash");
            return Ok(());
        }

        let files = self.files.repository().find_by_note_id(id).await?;

        let txn = self.db.begin().await.map_err(map_db_err)?;
        self.files.repository().delete_by_note_in(&txn, id).await?;
        self.note_repo.inner().delete_in(&txn, id).await?;
        txn.commit().await.map_err(map_db_err)?;

        self.note_repo.forget(id).await;
        tracing::info!(note_id = %id, files = files.len(), "Deleted note");

        self.files.remove_objects(&files).await
    }

    /// Mint one fresh object key and upload URL per client file name.
    pub async fn presigned_upload_urls(&self, names: Vec<String>) -> AppResult<Vec<UploadUrl>> {
        if names.len() > MAX_FILES_PER_NOTE {
            return Err(AppError::Validation(format!(
                "At most {MAX_FILES_PER_NOTE} files per note"
            )));
        }

        let storage = self.storage.clone();
        let ttl = self.presign.put_ttl();
        let targets: Vec<(String, String)> = names
            .into_iter()
            .map(|name| {
                let key = format!(
                    "{}/{}",
                    self.presign.upload_prefix,
                    self.id_gen.object_name(&name)
                );
                (name, key)
            })
            .collect();

        fan_out(targets, move |(client_name, object_key)| {
            let storage = storage.clone();
            async move {
                let upload_url = storage
                    .presigned_put(&object_key, ttl)
                    .await
                    .map_err(|e| match e {
                        AppError::Presign(msg) => AppError::Presign(msg),
                        other => AppError::Presign(other.to_string()),
                    })?;
                Ok(UploadUrl {
                    client_name,
                    object_key,
                    upload_url,
                })
            }
        })
        .await
        .into_iter()
        .collect()
    }

    /// Hand a note's unprocessed files to the dispatcher again.
    ///
    /// Returns how many files were dispatched. Submission failures are
    /// returned as `Dispatch`.
    pub async fn reprocess(&self, note_id: &str) -> AppResult<usize> {
        let note = self.note_repo.get(note_id).await?;
        let keys: Vec<String> = self
            .files
            .repository()
            .find_by_note_id(&note.id)
            .await?
            .into_iter()
            .filter(|f| f.processed_object_key.is_none())
            .map(|f| f.original_object_key)
            .collect();

        if keys.is_empty() {
            return Ok(0);
        }

        self.dispatcher.dispatch(&note.id, &keys).await?;
        tracing::info!(note_id = %note.id, files = keys.len(), "Re-dispatched file processing");
        Ok(keys.len())
    }
}

fn ensure_unique(keys: &[String]) -> AppResult<()> {
    let mut seen = HashSet::with_capacity(keys.len());
    for key in keys {
        if !seen.insert(key.as_str()) {
            return Err(AppError::Validation(format!("Duplicate object key: {key}")));
        }
    }
    Ok(())
}
