use notes_common::AppResult;
use notes_db::entities::user;
use notes_db::repositories::UserRepository;

use super::{Authoritative, CachedRepository};

/// User repository behind the cache.
pub type CachedUserRepository = CachedRepository<UserRepository>;

#[async_trait::async_trait]
impl Authoritative for UserRepository {
    type Model = user::Model;
    const PREFIX: &'static str = "user";

    async fn load(&self, id: &str) -> AppResult<user::Model> {
        self.get_by_id(id).await
    }
}

impl CachedRepository<UserRepository> {
    /// Insert a user, then cache it.
    pub async fn create(&self, model: user::ActiveModel) -> AppResult<user::Model> {
        let user = self.inner().create(model).await?;
        self.remember(&user.id, &user).await;
        Ok(user)
    }

    /// Delete a user, then drop it from the cache.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.inner().delete(id).await?;
        self.forget(id).await;
        Ok(())
    }
}
