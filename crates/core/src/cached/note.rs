use notes_common::AppResult;
use notes_db::entities::note;
use notes_db::repositories::NoteRepository;

use super::{Authoritative, CachedRepository};

/// Note repository behind the cache.
pub type CachedNoteRepository = CachedRepository<NoteRepository>;

#[async_trait::async_trait]
impl Authoritative for NoteRepository {
    type Model = note::Model;
    const PREFIX: &'static str = "note";

    async fn load(&self, id: &str) -> AppResult<note::Model> {
        self.get_by_id(id).await
    }
}

impl CachedRepository<NoteRepository> {
    /// Replace title and content, then refresh the cached copy.
    pub async fn update_content(
        &self,
        id: &str,
        title: String,
        content: String,
    ) -> AppResult<note::Model> {
        let note = self.inner().update_content(id, title, content).await?;
        self.remember(&note.id, &note).await;
        Ok(note)
    }

    /// Move a note to the trash, then drop the cached copy.
    pub async fn soft_delete(&self, id: &str) -> AppResult<()> {
        self.inner().soft_delete(id).await?;
        self.forget(id).await;
        Ok(())
    }

    /// Take a note out of the trash, then drop the cached copy.
    pub async fn restore(&self, id: &str) -> AppResult<()> {
        self.inner().restore(id).await?;
        self.forget(id).await;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingCache, note_model};
    use notes_common::AppError;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_soft_delete_invalidates() {
        let cache = Arc::new(RecordingCache::default());
        cache.insert("note:note1", &note_model("note1", "user1"));
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo =
            CachedNoteRepository::new(NoteRepository::new(db), cache.clone(), Duration::from_secs(60));
        repo.soft_delete("note1").await.unwrap();

        assert_eq!(cache.deleted_keys(), vec!["note:note1".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_restore_keeps_cache() {
        let cache = Arc::new(RecordingCache::default());
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo =
            CachedNoteRepository::new(NoteRepository::new(db), cache.clone(), Duration::from_secs(60));
        let result = repo.restore("note1").await;

        assert!(matches!(result, Err(AppError::NoteNotFound(_))));
        assert!(cache.deleted_keys().is_empty());
    }

    #[tokio::test]
    async fn test_update_refreshes_cache() {
        let before = note_model("note1", "user1");
        let mut after = before.clone();
        after.title = "Renamed".to_string();

        let cache = Arc::new(RecordingCache::default());
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[before]])
                .append_query_results([[after.clone()]])
                .into_connection(),
        );

        let repo =
            CachedNoteRepository::new(NoteRepository::new(db), cache.clone(), Duration::from_secs(60));
        repo.update_content("note1", "Renamed".to_string(), "content".to_string())
            .await
            .unwrap();

        assert_eq!(repo.get("note1").await.unwrap().title, "Renamed");
    }
}
