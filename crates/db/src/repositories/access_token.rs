//! Access token repository.

use std::sync::Arc;

use crate::entities::{AccessToken, access_token};
use crate::map_db_err;
use notes_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};

/// Access token repository for database operations.
#[derive(Clone)]
pub struct AccessTokenRepository {
    db: Arc<DatabaseConnection>,
}

impl AccessTokenRepository {
    /// Create a new access token repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find an access token by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<access_token::Model>> {
        AccessToken::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)
    }

    /// Find an access token by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<access_token::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("access token {id}")))
    }

    /// Create an access token.
    pub async fn create(
        &self,
        model: access_token::ActiveModel,
    ) -> AppResult<access_token::Model> {
        self.create_in(self.db.as_ref(), model).await
    }

    /// Create an access token on the given connection or transaction.
    pub async fn create_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: access_token::ActiveModel,
    ) -> AppResult<access_token::Model> {
        model.insert(conn).await.map_err(map_db_err)
    }

    /// Access tokens a user holds, across all refresh tokens.
    pub async fn find_by_user_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: &str,
    ) -> AppResult<Vec<access_token::Model>> {
        AccessToken::find()
            .filter(access_token::Column::UserId.eq(user_id))
            .all(conn)
            .await
            .map_err(map_db_err)
    }

    /// Delete every access token of a user. Returns the number of rows removed.
    pub async fn delete_by_user_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: &str,
    ) -> AppResult<u64> {
        let result = AccessToken::delete_many()
            .filter(access_token::Column::UserId.eq(user_id))
            .exec(conn)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected)
    }

    /// Delete an access token.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let result = AccessToken::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(map_db_err)?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("access token {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn test_delete_by_user_in() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 3,
                }])
                .into_connection(),
        );

        let repo = AccessTokenRepository::new(db.clone());
        let deleted = repo.delete_by_user_in(db.as_ref(), "user1").await.unwrap();

        assert_eq!(deleted, 3);
    }

    #[tokio::test]
    async fn test_get_by_id_not_found() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<access_token::Model>::new()])
                .into_connection(),
        );

        let repo = AccessTokenRepository::new(db);
        assert!(matches!(
            repo.get_by_id("at1").await,
            Err(AppError::NotFound(_))
        ));
    }
}
