//! File repository.

use std::sync::Arc;

use crate::entities::{File, file};
use crate::map_db_err;
use chrono::Utc;
use notes_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, prelude::DateTimeWithTimeZone, sea_query::Expr,
};

/// File repository for database operations.
#[derive(Clone)]
pub struct FileRepository {
    db: Arc<DatabaseConnection>,
}

impl FileRepository {
    /// Create a new file repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a file by the key it was uploaded under.
    pub async fn find_by_original_key(&self, key: &str) -> AppResult<Option<file::Model>> {
        File::find()
            .filter(file::Column::OriginalObjectKey.eq(key))
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)
    }

    /// Files attached to a note, in creation order.
    ///
    /// Files inserted together share `created_at`; their monotonic ids keep
    /// them in insertion order.
    pub async fn find_by_note_id(&self, note_id: &str) -> AppResult<Vec<file::Model>> {
        File::find()
            .filter(file::Column::NoteId.eq(note_id))
            .order_by_asc(file::Column::CreatedAt)
            .order_by_asc(file::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(map_db_err)
    }

    /// Files attached to any of the given notes, in creation order.
    pub async fn find_by_note_ids(&self, note_ids: &[String]) -> AppResult<Vec<file::Model>> {
        if note_ids.is_empty() {
            return Ok(vec![]);
        }

        File::find()
            .filter(file::Column::NoteId.is_in(note_ids.to_vec()))
            .order_by_asc(file::Column::CreatedAt)
            .order_by_asc(file::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(map_db_err)
    }

    /// Create a file row on the given connection or transaction.
    pub async fn create_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: file::ActiveModel,
    ) -> AppResult<file::Model> {
        model.insert(conn).await.map_err(map_db_err)
    }

    /// Record the processed key of the file uploaded under `original_key`.
    ///
    /// Safe to repeat with the same arguments. Fails with `NotFound` when
    /// no row has that original key.
    pub async fn update_processed_key_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        original_key: &str,
        processed_key: &str,
    ) -> AppResult<()> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = File::update_many()
            .col_expr(file::Column::ProcessedObjectKey, Expr::value(processed_key))
            .col_expr(file::Column::UpdatedAt, Expr::value(now))
            .filter(file::Column::OriginalObjectKey.eq(original_key))
            .exec(conn)
            .await
            .map_err(map_db_err)?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("file {original_key}")));
        }
        Ok(())
    }

    /// Delete every file row of a note. Returns the number of rows removed.
    pub async fn delete_by_note_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        note_id: &str,
    ) -> AppResult<u64> {
        let result = File::delete_many()
            .filter(file::Column::NoteId.eq(note_id))
            .exec(conn)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected)
    }
}
