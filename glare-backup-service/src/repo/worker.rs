use crate::model::{Worker, WorkerStatus};
use crate::repo::RepoError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glare_common::model::{TokenSecret, UserId, WorkerId};
use sqlx::{Pool, Postgres};
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Worker sync events are capped per worker; older rows are pruned in the
/// same transaction that appends a new one.
pub const MAX_SYNC_EVENTS_PER_WORKER: i64 = 10_000;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct WorkerRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub region: Option<String>,
    pub status: String,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub uptime_ms: i64,
    pub requests_total: i64,
    pub error_total: i64,
    pub endpoint: Option<String>,
    pub sync_token: Option<String>,
    pub sync_token_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<WorkerRecord> for Worker {
    type Error = String;

    fn try_from(value: WorkerRecord) -> Result<Self, Self::Error> {
        Ok(Worker {
            id: WorkerId(value.id),
            user_id: UserId(value.user_id),
            name: value.name,
            region: value.region,
            status: WorkerStatus::from_str(&value.status)?,
            last_seen_at: value.last_seen_at,
            uptime_ms: value.uptime_ms,
            requests_total: value.requests_total,
            error_total: value.error_total,
            endpoint: value.endpoint,
            sync_token: value.sync_token.map(TokenSecret::new),
            sync_token_hash: value.sync_token_hash,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSyncUpdate {
    pub status: String,
    pub endpoint: Option<String>,
    pub uptime_ms: i64,
    pub requests_total: i64,
    pub error_total: i64,
}

#[async_trait]
pub trait WorkerRepo: Send + Sync {
    async fn get(&self, worker_id: &Uuid) -> Result<Option<WorkerRecord>, RepoError>;

    async fn get_many(&self, worker_ids: &[Uuid]) -> Result<Vec<WorkerRecord>, RepoError>;

    /// Applies a heartbeat: updates the worker row, appends a sync event and
    /// prunes the event log to the newest [`MAX_SYNC_EVENTS_PER_WORKER`]
    /// rows, all in one transaction.
    async fn record_sync(
        &self,
        worker_id: &Uuid,
        update: &WorkerSyncUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError>;
}

pub struct DbWorkerRepo {
    db_pool: Arc<Pool<Postgres>>,
}

impl DbWorkerRepo {
    pub fn new(db_pool: Arc<Pool<Postgres>>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl WorkerRepo for DbWorkerRepo {
    async fn get(&self, worker_id: &Uuid) -> Result<Option<WorkerRecord>, RepoError> {
        sqlx::query_as::<_, WorkerRecord>("SELECT * FROM workers WHERE id = $1")
            .bind(worker_id)
            .fetch_optional(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn get_many(&self, worker_ids: &[Uuid]) -> Result<Vec<WorkerRecord>, RepoError> {
        sqlx::query_as::<_, WorkerRecord>("SELECT * FROM workers WHERE id = ANY($1)")
            .bind(worker_ids)
            .fetch_all(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn record_sync(
        &self,
        worker_id: &Uuid,
        update: &WorkerSyncUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        let mut tx = self.db_pool.begin().await?;

        sqlx::query(
            r#"
              UPDATE workers
              SET status = $2,
                  endpoint = COALESCE($3, endpoint),
                  uptime_ms = $4,
                  requests_total = $5,
                  error_total = $6,
                  last_seen_at = $7,
                  updated_at = $7
              WHERE id = $1
            "#,
        )
        .bind(worker_id)
        .bind(update.status.as_str())
        .bind(update.endpoint.as_deref())
        .bind(update.uptime_ms)
        .bind(update.requests_total)
        .bind(update.error_total)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
              INSERT INTO worker_sync_events
                (id, worker_id, status, uptime_ms, requests_total, error_total, created_at)
              VALUES
                ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(worker_id)
        .bind(update.status.as_str())
        .bind(update.uptime_ms)
        .bind(update.requests_total)
        .bind(update.error_total)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
              DELETE FROM worker_sync_events
              WHERE worker_id = $1
                AND id NOT IN (
                  SELECT id FROM worker_sync_events
                  WHERE worker_id = $1
                  ORDER BY created_at DESC
                  LIMIT $2
                )
            "#,
        )
        .bind(worker_id)
        .bind(MAX_SYNC_EVENTS_PER_WORKER)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
