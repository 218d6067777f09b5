use crate::model::{Repository, RepositoryBackend};
use crate::repo::RepoError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glare_common::model::{RepositoryId, TokenSecret, UserId, WorkerId};
use sqlx::{Pool, Postgres, Row};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct RepositoryRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub backend: String,
    pub path: String,
    pub password: Option<String>,
    pub options: serde_json::Value,
    pub initialized_at: Option<DateTime<Utc>>,
    pub primary_worker_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RepositoryRecord> for Repository {
    type Error = String;

    fn try_from(value: RepositoryRecord) -> Result<Self, Self::Error> {
        let options: BTreeMap<String, String> = serde_json::from_value(value.options)
            .map_err(|e| format!("Invalid repository options: {e}"))?;
        Ok(Repository {
            id: RepositoryId(value.id),
            user_id: UserId(value.user_id),
            name: value.name,
            backend: RepositoryBackend::from_str(&value.backend)?,
            path: value.path,
            password: value.password.map(TokenSecret::new),
            options,
            initialized_at: value.initialized_at,
            primary_worker_id: value.primary_worker_id.map(WorkerId),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[async_trait]
pub trait RepositoryRepo: Send + Sync {
    async fn get(&self, repository_id: &Uuid) -> Result<Option<RepositoryRecord>, RepoError>;

    async fn list_all(&self) -> Result<Vec<RepositoryRecord>, RepoError>;

    /// The workers allowed to back up into this repository.
    async fn backup_worker_ids(&self, repository_id: &Uuid) -> Result<Vec<Uuid>, RepoError>;

    /// Persists a single option key, e.g. the synthesized `rclone.remote`.
    async fn set_option(
        &self,
        repository_id: &Uuid,
        key: &str,
        value: &str,
    ) -> Result<(), RepoError>;

    async fn set_initialized(
        &self,
        repository_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError>;
}

pub struct DbRepositoryRepo {
    db_pool: Arc<Pool<Postgres>>,
}

impl DbRepositoryRepo {
    pub fn new(db_pool: Arc<Pool<Postgres>>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl RepositoryRepo for DbRepositoryRepo {
    async fn get(&self, repository_id: &Uuid) -> Result<Option<RepositoryRecord>, RepoError> {
        sqlx::query_as::<_, RepositoryRecord>("SELECT * FROM repositories WHERE id = $1")
            .bind(repository_id)
            .fetch_optional(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn list_all(&self) -> Result<Vec<RepositoryRecord>, RepoError> {
        sqlx::query_as::<_, RepositoryRecord>("SELECT * FROM repositories ORDER BY created_at")
            .fetch_all(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn backup_worker_ids(&self, repository_id: &Uuid) -> Result<Vec<Uuid>, RepoError> {
        let rows = sqlx::query(
            "SELECT worker_id FROM repository_workers WHERE repository_id = $1 ORDER BY worker_id",
        )
        .bind(repository_id)
        .fetch_all(self.db_pool.deref())
        .await?;

        Ok(rows.into_iter().map(|row| row.get("worker_id")).collect())
    }

    async fn set_option(
        &self,
        repository_id: &Uuid,
        key: &str,
        value: &str,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
              UPDATE repositories
              SET options = jsonb_set(options, ARRAY[$2], to_jsonb($3::text), true),
                  updated_at = now()
              WHERE id = $1
            "#,
        )
        .bind(repository_id)
        .bind(key)
        .bind(value)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn set_initialized(
        &self,
        repository_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE repositories SET initialized_at = COALESCE(initialized_at, $2), updated_at = $2 WHERE id = $1",
        )
        .bind(repository_id)
        .bind(now)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }
}
