use crate::repo::RepoError;
use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;

/// Users are owned by an external collaborator; the core only needs their
/// count (signup gating) and API-token lookup (request scoping).
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn count(&self) -> Result<i64, RepoError>;

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Uuid>, RepoError>;
}

pub struct DbUserRepo {
    db_pool: Arc<Pool<Postgres>>,
}

impl DbUserRepo {
    pub fn new(db_pool: Arc<Pool<Postgres>>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserRepo for DbUserRepo {
    async fn count(&self) -> Result<i64, RepoError> {
        let row = sqlx::query("SELECT count(*) AS count FROM users")
            .fetch_one(self.db_pool.deref())
            .await?;
        Ok(row.get("count"))
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Uuid>, RepoError> {
        let row = sqlx::query("SELECT id FROM users WHERE api_token_hash = $1")
            .bind(token_hash)
            .fetch_optional(self.db_pool.deref())
            .await?;
        Ok(row.map(|r| r.get("id")))
    }
}
