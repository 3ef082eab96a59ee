use notes_common::AppResult;
use notes_db::entities::{access_token, refresh_token};
use notes_db::repositories::{AccessTokenRepository, RefreshTokenRepository};

use super::{Authoritative, CachedRepository};

/// Refresh token repository behind the cache.
pub type CachedRefreshTokenRepository = CachedRepository<RefreshTokenRepository>;

/// Access token repository behind the cache.
pub type CachedAccessTokenRepository = CachedRepository<AccessTokenRepository>;

#[async_trait::async_trait]
impl Authoritative for RefreshTokenRepository {
    type Model = refresh_token::Model;
    const PREFIX: &'static str = "refresh_token";

    async fn load(&self, id: &str) -> AppResult<refresh_token::Model> {
        self.get_by_id(id).await
    }
}

#[async_trait::async_trait]
impl Authoritative for AccessTokenRepository {
    type Model = access_token::Model;
    const PREFIX: &'static str = "access_token";

    async fn load(&self, id: &str) -> AppResult<access_token::Model> {
        self.get_by_id(id).await
    }
}

impl CachedRepository<RefreshTokenRepository> {
    /// Insert a refresh token, then cache it.
    pub async fn create(
        &self,
        model: refresh_token::ActiveModel,
    ) -> AppResult<refresh_token::Model> {
        let token = self.inner().create(model).await?;
        self.remember(&token.id, &token).await;
        Ok(token)
    }

    /// Delete a refresh token, then drop it from the cache.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.inner().delete(id).await?;
        self.forget(id).await;
        Ok(())
    }
}

impl CachedRepository<AccessTokenRepository> {
    /// Insert an access token, then cache it.
    pub async fn create(
        &self,
        model: access_token::ActiveModel,
    ) -> AppResult<access_token::Model> {
        let token = self.inner().create(model).await?;
        self.remember(&token.id, &token).await;
        Ok(token)
    }

    /// Delete an access token, then drop it from the cache.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.inner().delete(id).await?;
        self.forget(id).await;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::RecordingCache;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Set};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_refresh_token(id: &str) -> refresh_token::Model {
        let now = Utc::now();
        refresh_token::Model {
            id: id.to_string(),
            user_id: "user1".to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    fn deleted() -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }
    }

    fn test_access_token(id: &str) -> access_token::Model {
        let now = Utc::now();
        access_token::Model {
            id: id.to_string(),
            user_id: "user1".to_string(),
            refresh_token_id: "refresh1".to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[tokio::test]
    async fn test_access_token_keys_do_not_collide_with_refresh_tokens() {
        let token = test_access_token("tok1");
        let cache = Arc::new(RecordingCache::default());
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[token.clone()]])
                .into_connection(),
        );

        let repo = CachedAccessTokenRepository::new(
            AccessTokenRepository::new(db),
            cache.clone(),
            Duration::from_secs(3540),
        );
        repo.get("tok1").await.unwrap();

        assert_eq!(
            cache.sets.lock().unwrap().clone(),
            vec!["access_token:tok1".to_string()]
        );
        assert!(cache.entries.lock().unwrap().get("refresh_token:tok1").is_none());
    }

    #[tokio::test]
    async fn test_refresh_token_hit() {
        let token = test_refresh_token("refresh1");
        let cache = Arc::new(RecordingCache::default());
        cache.insert("refresh_token:refresh1", &token);
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let repo = CachedRefreshTokenRepository::new(
            RefreshTokenRepository::new(db),
            cache,
            Duration::from_secs(3540),
        );

        assert_eq!(repo.get("refresh1").await.unwrap(), token);
    }

    #[tokio::test]
    async fn test_refresh_token_create_succeeds_with_cache_down() {
        let token = test_refresh_token("refresh1");
        let cache = Arc::new(RecordingCache::unavailable());
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[token.clone()]])
                .into_connection(),
        );

        let repo = CachedRefreshTokenRepository::new(
            RefreshTokenRepository::new(db),
            cache.clone(),
            Duration::from_secs(3540),
        );
        let created = repo
            .create(refresh_token::ActiveModel {
                id: Set(token.id.clone()),
                user_id: Set(token.user_id.clone()),
                created_at: Set(token.created_at),
                updated_at: Set(token.updated_at),
            })
            .await
            .unwrap();

        assert_eq!(created, token);
        assert_eq!(cache.set_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_token_delete_invalidates() {
        let cache = Arc::new(RecordingCache::default());
        cache.insert("refresh_token:refresh1", &test_refresh_token("refresh1"));
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([deleted()])
                .into_connection(),
        );

        let repo = CachedRefreshTokenRepository::new(
            RefreshTokenRepository::new(db),
            cache.clone(),
            Duration::from_secs(3540),
        );
        repo.delete("refresh1").await.unwrap();

        assert_eq!(cache.deleted_keys(), vec!["refresh_token:refresh1".to_string()]);
        assert!(cache.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_access_token_create_succeeds_with_cache_down() {
        let token = test_access_token("tok1");
        let cache = Arc::new(RecordingCache::unavailable());
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[token.clone()]])
                .into_connection(),
        );

        let repo = CachedAccessTokenRepository::new(
            AccessTokenRepository::new(db),
            cache.clone(),
            Duration::from_secs(3540),
        );
        let created = repo
            .create(access_token::ActiveModel {
                id: Set(token.id.clone()),
                user_id: Set(token.user_id.clone()),
                refresh_token_id: Set(token.refresh_token_id.clone()),
                created_at: Set(token.created_at),
                updated_at: Set(token.updated_at),
            })
            .await
            .unwrap();

        assert_eq!(created, token);
        assert_eq!(cache.set_count(), 1);
    }

    #[tokio::test]
    async fn test_access_token_delete_invalidates() {
        let cache = Arc::new(RecordingCache::default());
        cache.insert("access_token:tok1", &test_access_token("tok1"));
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([deleted()])
                .into_connection(),
        );

        let repo = CachedAccessTokenRepository::new(
            AccessTokenRepository::new(db),
            cache.clone(),
            Duration::from_secs(3540),
        );
        repo.delete("tok1").await.unwrap();

        assert_eq!(cache.deleted_keys(), vec!["access_token:tok1".to_string()]);
        assert!(cache.entries.lock().unwrap().is_empty());
    }
}
