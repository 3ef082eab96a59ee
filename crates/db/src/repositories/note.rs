//! Note repository.

use std::sync::Arc;

use crate::entities::{Note, note};
use crate::map_db_err;
use chrono::Utc;
use notes_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, prelude::DateTimeWithTimeZone, sea_query::Expr,
};

/// Note repository for database operations.
#[derive(Clone)]
pub struct NoteRepository {
    db: Arc<DatabaseConnection>,
}

impl NoteRepository {
    /// Create a new note repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a note by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<note::Model>> {
        Note::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)
    }

    /// Find a note by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<note::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NoteNotFound(id.to_string()))
    }

    /// Create a new note.
    pub async fn create(&self, model: note::ActiveModel) -> AppResult<note::Model> {
        self.create_in(self.db.as_ref(), model).await
    }

    /// Create a new note on the given connection or transaction.
    pub async fn create_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: note::ActiveModel,
    ) -> AppResult<note::Model> {
        model.insert(conn).await.map_err(map_db_err)
    }

    /// List a user's live notes last updated strictly before `before`, newest first.
    pub async fn list_by_user(
        &self,
        user_id: &str,
        before: DateTimeWithTimeZone,
        limit: u64,
    ) -> AppResult<Vec<note::Model>> {
        Note::find()
            .filter(note::Column::UserId.eq(user_id))
            .filter(note::Column::DeletedAt.is_null())
            .filter(note::Column::UpdatedAt.lt(before))
            .order_by_desc(note::Column::UpdatedAt)
            .order_by_desc(note::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(map_db_err)
    }

    /// List a user's trashed notes, same ordering as [`Self::list_by_user`].
    pub async fn list_trash_by_user(
        &self,
        user_id: &str,
        before: DateTimeWithTimeZone,
        limit: u64,
    ) -> AppResult<Vec<note::Model>> {
        Note::find()
            .filter(note::Column::UserId.eq(user_id))
            .filter(note::Column::DeletedAt.is_not_null())
            .filter(note::Column::UpdatedAt.lt(before))
            .order_by_desc(note::Column::UpdatedAt)
            .order_by_desc(note::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(map_db_err)
    }

    /// Replace a note's title and content.
    pub async fn update_content(
        &self,
        id: &str,
        title: String,
        content: String,
    ) -> AppResult<note::Model> {
        let note = self.get_by_id(id).await?;

        let mut active: note::ActiveModel = note.into();
        active.title = Set(title);
        active.content = Set(content);
        active.updated_at = Set(Utc::now().into());

        active.update(self.db.as_ref()).await.map_err(map_db_err)
    }

    /// Move a note to the trash.
    ///
    /// Fails with `NoteNotFound` if the note does not exist or is already trashed.
    pub async fn soft_delete(&self, id: &str) -> AppResult<()> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = Note::update_many()
            .col_expr(note::Column::DeletedAt, Expr::value(now))
            .filter(note::Column::Id.eq(id))
            .filter(note::Column::DeletedAt.is_null())
            .exec(self.db.as_ref())
            .await
            .map_err(map_db_err)?;

        if result.rows_affected == 0 {
            return Err(AppError::NoteNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Take a note out of the trash.
    ///
    /// Fails with `NoteNotFound` if the note does not exist or is not trashed.
    pub async fn restore(&self, id: &str) -> AppResult<()> {
        let result = Note::update_many()
            .col_expr(
                note::Column::DeletedAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .filter(note::Column::Id.eq(id))
            .filter(note::Column::DeletedAt.is_not_null())
            .exec(self.db.as_ref())
            .await
            .map_err(map_db_err)?;

        if result.rows_affected == 0 {
            return Err(AppError::NoteNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete a note row on the given connection or transaction.
    pub async fn delete_in<C: ConnectionTrait>(&self, conn: &C, id: &str) -> AppResult<()> {
        let result = Note::delete_by_id(id).exec(conn).await.map_err(map_db_err)?;

        if result.rows_affected == 0 {
            return Err(AppError::NoteNotFound(id.to_string()));
        }
        Ok(())
    }
}
