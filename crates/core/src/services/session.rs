//! Session service.
//!
//! A session is one refresh token and the access token it issued. Signing
//! in rotates the user's session: every token they hold is replaced in a
//! single transaction.

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use notes_common::{AppError, AppResult, IdGenerator};
use notes_db::entities::{access_token, refresh_token, user};
use notes_db::map_db_err;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{DatabaseConnection, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::cached::{CachedAccessTokenRepository, CachedRefreshTokenRepository, CachedUserRepository};

/// Input for registering a user.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterInput {
    #[validate(length(min = 1, max = 128))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 256))]
    pub password: String,
}

/// A freshly issued session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub refresh_token: refresh_token::Model,
    pub access_token: access_token::Model,
}

/// Session service for business logic.
#[derive(Clone)]
pub struct SessionService {
    db: Arc<DatabaseConnection>,
    user_repo: CachedUserRepository,
    refresh_token_repo: CachedRefreshTokenRepository,
    access_token_repo: CachedAccessTokenRepository,
    id_gen: IdGenerator,
}

impl SessionService {
    /// Create a new session service.
    #[must_use]
    pub const fn new(
        db: Arc<DatabaseConnection>,
        user_repo: CachedUserRepository,
        refresh_token_repo: CachedRefreshTokenRepository,
        access_token_repo: CachedAccessTokenRepository,
    ) -> Self {
        Self {
            db,
            user_repo,
            refresh_token_repo,
            access_token_repo,
            id_gen: IdGenerator::new(),
        }
    }

    /// Register a new user.
    pub async fn register(&self, input: RegisterInput) -> AppResult<user::Model> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let password_hash = hash_password(&input.password)?;
        let now: DateTimeWithTimeZone = Utc::now().into();

        let user = self
            .user_repo
            .create(user::ActiveModel {
                id: Set(self.id_gen.generate()),
                name: Set(input.name),
                email: Set(input.email.to_lowercase()),
                password_hash: Set(password_hash),
                created_at: Set(now),
                updated_at: Set(now),
            })
            .await?;

        tracing::info!(user_id = %user.id, "Registered user");
        Ok(user)
    }

    /// Check credentials and issue a new session.
    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<Session> {
        let user = self
            .user_repo
            .inner()
            .find_by_email(&email.to_lowercase())
            .await?
            .ok_or(AppError::Unauthorized)?;

        if !verify_password(password, &user.password_hash)? {
            return Err(AppError::Unauthorized);
        }

        self.rotate(&user.id).await
    }

    /// Replace every token the user holds with one new session.
    ///
    /// The database work is one transaction. Cache entries of the removed
    /// and created tokens are updated after commit, each on its own.
    pub async fn rotate(&self, user_id: &str) -> AppResult<Session> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let access_repo = self.access_token_repo.inner();
        let refresh_repo = self.refresh_token_repo.inner();

        let txn = self.db.begin().await.map_err(map_db_err)?;

        let old_access = access_repo.find_by_user_in(&txn, user_id).await?;
        let old_refresh = refresh_repo.find_by_user_in(&txn, user_id).await?;
        access_repo.delete_by_user_in(&txn, user_id).await?;
        refresh_repo.delete_by_user_in(&txn, user_id).await?;

        let refresh_token = refresh_repo
            .create_in(
                &txn,
                refresh_token::ActiveModel {
                    id: Set(self.id_gen.generate()),
                    user_id: Set(user_id.to_string()),
                    created_at: Set(now),
                    updated_at: Set(now),
                },
            )
            .await?;
        let access_token = access_repo
            .create_in(
                &txn,
                access_token::ActiveModel {
                    id: Set(self.id_gen.generate()),
                    user_id: Set(user_id.to_string()),
                    refresh_token_id: Set(refresh_token.id.clone()),
                    created_at: Set(now),
                    updated_at: Set(now),
                },
            )
            .await?;

        txn.commit().await.map_err(map_db_err)?;

        for token in &old_access {
            self.access_token_repo.forget(&token.id).await;
        }
        for token in &old_refresh {
            self.refresh_token_repo.forget(&token.id).await;
        }
        self.refresh_token_repo
            .remember(&refresh_token.id, &refresh_token)
            .await;
        self.access_token_repo
            .remember(&access_token.id, &access_token)
            .await;

        tracing::info!(
            user_id = %user_id,
            revoked = old_refresh.len(),
            "Rotated session"
        );

        Ok(Session {
            refresh_token,
            access_token,
        })
    }

    /// Resolve an access token, failing with `Unauthorized` if it is unknown.
    pub async fn authenticate(&self, access_token_id: &str) -> AppResult<access_token::Model> {
        match self.access_token_repo.get(access_token_id).await {
            Ok(token) => Ok(token),
            Err(AppError::NotFound(_)) => Err(AppError::Unauthorized),
            Err(e) => Err(e),
        }
    }

    /// End the session an access token belongs to.
    pub async fn sign_out(&self, access_token_id: &str) -> AppResult<()> {
        let token = self.authenticate(access_token_id).await?;

        // Cascades to the access token.
        self.refresh_token_repo
            .delete(&token.refresh_token_id)
            .await?;
        self.access_token_repo.forget(&token.id).await;

        tracing::info!(user_id = %token.user_id, "Signed out");
        Ok(())
    }

    /// The signed-in user.
    pub async fn me(&self, user_id: &str) -> AppResult<user::Model> {
        self.user_repo.get(user_id).await
    }
}

/// Hash a password using Argon2.
fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| AppError::Internal(format!("Invalid hash: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::RecordingCache;
    use notes_db::repositories::{AccessTokenRepository, RefreshTokenRepository, UserRepository};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::time::Duration;

    fn service(db: Arc<DatabaseConnection>, cache: Arc<RecordingCache>) -> SessionService {
        let ttl = Duration::from_secs(3540);
        SessionService::new(
            db.clone(),
            CachedUserRepository::new(UserRepository::new(db.clone()), cache.clone(), ttl),
            CachedRefreshTokenRepository::new(
                RefreshTokenRepository::new(db.clone()),
                cache.clone(),
                ttl,
            ),
            CachedAccessTokenRepository::new(AccessTokenRepository::new(db), cache, ttl),
        )
    }

    fn test_user(password: &str) -> user::Model {
        let now = Utc::now();
        user::Model {
            id: "user1".to_string(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: hash_password(password).unwrap(),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    fn refresh(id: &str) -> refresh_token::Model {
        let now = Utc::now();
        refresh_token::Model {
            id: id.to_string(),
            user_id: "user1".to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    fn access(id: &str, refresh_id: &str) -> access_token::Model {
        let now = Utc::now();
        access_token::Model {
            id: id.to_string(),
            user_id: "user1".to_string(),
            refresh_token_id: refresh_id.to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    fn rows(n: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: n,
        }
    }

    /// Mock results for one rotation replacing (`a1`, `r1`) with (`a2`, `r2`).
    fn rotation(db: MockDatabase) -> MockDatabase {
        db.append_query_results([[access("a1", "r1")]])
            .append_query_results([[refresh("r1")]])
            .append_exec_results([rows(1), rows(1)])
            .append_query_results([[refresh("r2")]])
            .append_query_results([[access("a2", "r2")]])
    }

    #[test]
    fn test_hash_password() {
        let hash = hash_password("correct horse").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn test_verify_password_rejects_malformed_hash() {
        assert!(matches!(
            verify_password("pw", "not-a-hash"),
            Err(AppError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_rotate_replaces_tokens_and_updates_cache() {
        let cache = Arc::new(RecordingCache::default());
        let db = Arc::new(rotation(MockDatabase::new(DatabaseBackend::Postgres)).into_connection());

        let session = service(db, cache.clone()).rotate("user1").await.unwrap();

        assert_eq!(session.refresh_token.id, "r2");
        assert_eq!(session.access_token.refresh_token_id, "r2");
        assert_eq!(
            cache.deleted_keys(),
            vec!["access_token:a1".to_string(), "refresh_token:r1".to_string()]
        );
        assert_eq!(
            cache.sets.lock().unwrap().clone(),
            vec!["refresh_token:r2".to_string(), "access_token:a2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rotate_survives_cache_outage() {
        let cache = Arc::new(RecordingCache::unavailable());
        let db = Arc::new(rotation(MockDatabase::new(DatabaseBackend::Postgres)).into_connection());

        let session = service(db, cache.clone()).rotate("user1").await.unwrap();

        assert_eq!(session.access_token.id, "a2");
        assert_eq!(cache.deleted_keys().len(), 2);
        assert_eq!(cache.set_count(), 2);
    }

    #[tokio::test]
    async fn test_sign_in() {
        let cache = Arc::new(RecordingCache::default());
        let db = Arc::new(
            rotation(
                MockDatabase::new(DatabaseBackend::Postgres)
                    .append_query_results([[test_user("hunter2hunter2")]]),
            )
            .into_connection(),
        );

        let session = service(db, cache)
            .sign_in("Alice@Example.com", "hunter2hunter2")
            .await
            .unwrap();

        assert_eq!(session.access_token.id, "a2");
    }

    #[tokio::test]
    async fn test_sign_in_wrong_password() {
        let cache = Arc::new(RecordingCache::default());
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[test_user("hunter2hunter2")]])
                .into_connection(),
        );

        let result = service(db, cache.clone())
            .sign_in("alice@example.com", "letmein!")
            .await;

        assert!(matches!(result, Err(AppError::Unauthorized)));
        assert_eq!(cache.set_count(), 0);
    }

    #[tokio::test]
    async fn test_sign_in_unknown_email() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<user::Model>::new()])
                .into_connection(),
        );

        let result = service(db, Arc::new(RecordingCache::default()))
            .sign_in("nobody@example.com", "whatever1")
            .await;

        assert!(matches!(result, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_register_rejects_bad_email() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let result = service(db, Arc::new(RecordingCache::default()))
            .register(RegisterInput {
                name: "Alice".to_string(),
                email: "not-an-email".to_string(),
                password: "long enough".to_string(),
            })
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_register_caches_user() {
        let user = test_user("long enough");
        let cache = Arc::new(RecordingCache::default());
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[user.clone()]])
                .into_connection(),
        );

        let created = service(db, cache.clone())
            .register(RegisterInput {
                name: "Alice".to_string(),
                email: "Alice@Example.com".to_string(),
                password: "long enough".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(created.id, "user1");
        assert_eq!(cache.sets.lock().unwrap().clone(), vec!["user:user1".to_string()]);
    }

    #[tokio::test]
    async fn test_authenticate_unknown_token() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<access_token::Model>::new()])
                .into_connection(),
        );

        let result = service(db, Arc::new(RecordingCache::default()))
            .authenticate("ghost")
            .await;

        assert!(matches!(result, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_sign_out_deletes_refresh_token() {
        let cache = Arc::new(RecordingCache::default());
        cache.insert("access_token:a1", &access("a1", "r1"));
        cache.insert("refresh_token:r1", &refresh("r1"));
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([rows(1)])
                .into_connection(),
        );

        service(db, cache.clone()).sign_out("a1").await.unwrap();

        assert_eq!(
            cache.deleted_keys(),
            vec!["refresh_token:r1".to_string(), "access_token:a1".to_string()]
        );
        assert!(cache.entries.lock().unwrap().is_empty());
    }
}
