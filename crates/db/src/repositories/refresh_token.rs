//! Refresh token repository.

use std::sync::Arc;

use crate::entities::{RefreshToken, refresh_token};
use crate::map_db_err;
use notes_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};

/// Refresh token repository for database operations.
#[derive(Clone)]
pub struct RefreshTokenRepository {
    db: Arc<DatabaseConnection>,
}

impl RefreshTokenRepository {
    /// Create a new refresh token repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a refresh token by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<refresh_token::Model>> {
        RefreshToken::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)
    }

    /// Find a refresh token by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<refresh_token::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("refresh token {id}")))
    }

    /// Create a refresh token.
    pub async fn create(&self, model: refresh_token::ActiveModel) -> AppResult<refresh_token::Model> {
        self.create_in(self.db.as_ref(), model).await
    }

    /// Create a refresh token on the given connection or transaction.
    pub async fn create_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: refresh_token::ActiveModel,
    ) -> AppResult<refresh_token::Model> {
        model.insert(conn).await.map_err(map_db_err)
    }

    /// Refresh tokens a user holds.
    pub async fn find_by_user_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: &str,
    ) -> AppResult<Vec<refresh_token::Model>> {
        RefreshToken::find()
            .filter(refresh_token::Column::UserId.eq(user_id))
            .all(conn)
            .await
            .map_err(map_db_err)
    }

    /// Delete every refresh token of a user. Returns the number of rows removed.
    pub async fn delete_by_user_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: &str,
    ) -> AppResult<u64> {
        let result = RefreshToken::delete_many()
            .filter(refresh_token::Column::UserId.eq(user_id))
            .exec(conn)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected)
    }

    /// Delete a refresh token and, by cascade, its access tokens.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let result = RefreshToken::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(map_db_err)?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("refresh token {id}")));
        }
        Ok(())
    }
}
