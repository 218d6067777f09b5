use crate::model::{BackupRun, RunStatus, RunType};
use crate::repo::RepoError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glare_common::model::{PlanId, RepositoryId, RunGroupId, RunId, UserId, WorkerId};
use sqlx::{Pool, Postgres, Row};
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct RunRecord {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub user_id: Uuid,
    pub repository_id: Uuid,
    pub worker_id: Option<Uuid>,
    pub run_group_id: Option<Uuid>,
    #[sqlx(rename = "type")]
    pub run_type: String,
    pub status: String,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub snapshot_id: Option<String>,
    pub snapshot_time: Option<DateTime<Utc>>,
    pub output: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RunRecord> for BackupRun {
    type Error = String;

    fn try_from(value: RunRecord) -> Result<Self, Self::Error> {
        Ok(BackupRun {
            id: RunId(value.id),
            plan_id: PlanId(value.plan_id),
            user_id: UserId(value.user_id),
            repository_id: RepositoryId(value.repository_id),
            worker_id: value.worker_id.map(WorkerId),
            run_group_id: value.run_group_id.map(RunGroupId),
            run_type: RunType::from_str(&value.run_type)?,
            status: RunStatus::from_str(&value.status)?,
            error: value.error,
            duration_ms: value.duration_ms,
            snapshot_id: value.snapshot_id,
            snapshot_time: value.snapshot_time,
            output: value.output,
            started_at: value.started_at,
            finished_at: value.finished_at,
        })
    }
}

impl From<BackupRun> for RunRecord {
    fn from(value: BackupRun) -> Self {
        RunRecord {
            id: value.id.0,
            plan_id: value.plan_id.0,
            user_id: value.user_id.0,
            repository_id: value.repository_id.0,
            worker_id: value.worker_id.map(|w| w.0),
            run_group_id: value.run_group_id.map(|g| g.0),
            run_type: value.run_type.to_string(),
            status: value.status.to_string(),
            error: value.error,
            duration_ms: value.duration_ms,
            snapshot_id: value.snapshot_id,
            snapshot_time: value.snapshot_time,
            output: value.output,
            started_at: value.started_at,
            finished_at: value.finished_at,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub status: String,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub snapshot_id: Option<String>,
    pub snapshot_time: Option<DateTime<Utc>>,
    pub output: Option<serde_json::Value>,
}

#[async_trait]
pub trait RunRepo: Send + Sync {
    async fn insert(&self, record: &RunRecord) -> Result<(), RepoError>;

    /// Atomically claims up to `limit` of the oldest pending runs of a
    /// worker, transitioning them to running. Uses skip-locked row locking so
    /// concurrent claimers with the same worker identity never pick the same
    /// row.
    async fn claim_pending(
        &self,
        worker_id: &Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<RunRecord>, RepoError>;

    /// Transitions `running → status` for the worker's own run. Returns the
    /// updated record, or `None` when no row matched.
    async fn complete(
        &self,
        run_id: &Uuid,
        worker_id: &Uuid,
        completion: &RunCompletion,
        now: DateTime<Utc>,
    ) -> Result<Option<RunRecord>, RepoError>;

    /// Marks a run failed regardless of its current state.
    async fn fail(&self, run_id: &Uuid, error: &str, now: DateTime<Utc>) -> Result<(), RepoError>;

    async fn recent_backup_runs(
        &self,
        user_id: &Uuid,
        repository_id: &Uuid,
        limit: i64,
    ) -> Result<Vec<RunRecord>, RepoError>;

    async fn known_snapshot_ids(
        &self,
        user_id: &Uuid,
        repository_id: &Uuid,
    ) -> Result<Vec<String>, RepoError>;
}

pub struct DbRunRepo {
    db_pool: Arc<Pool<Postgres>>,
}

impl DbRunRepo {
    pub fn new(db_pool: Arc<Pool<Postgres>>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl RunRepo for DbRunRepo {
    async fn insert(&self, record: &RunRecord) -> Result<(), RepoError> {
        sqlx::query(
            r#"
              INSERT INTO backup_runs
                (id, plan_id, user_id, repository_id, worker_id, run_group_id, type, status,
                 error, duration_ms, snapshot_id, snapshot_time, output, started_at, finished_at,
                 created_at)
              VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.id)
        .bind(record.plan_id)
        .bind(record.user_id)
        .bind(record.repository_id)
        .bind(record.worker_id)
        .bind(record.run_group_id)
        .bind(record.run_type.as_str())
        .bind(record.status.as_str())
        .bind(record.error.as_deref())
        .bind(record.duration_ms)
        .bind(record.snapshot_id.as_deref())
        .bind(record.snapshot_time)
        .bind(record.output.as_ref())
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(record.created_at)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn claim_pending(
        &self,
        worker_id: &Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<RunRecord>, RepoError> {
        sqlx::query_as::<_, RunRecord>(
            r#"
              WITH picked AS (
                SELECT id FROM backup_runs
                WHERE worker_id = $1 AND status = 'pending'
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
              )
              UPDATE backup_runs r
              SET status = 'running', started_at = $3
              FROM picked
              WHERE r.id = picked.id
              RETURNING r.*
            "#,
        )
        .bind(worker_id)
        .bind(limit)
        .bind(now)
        .fetch_all(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn complete(
        &self,
        run_id: &Uuid,
        worker_id: &Uuid,
        completion: &RunCompletion,
        now: DateTime<Utc>,
    ) -> Result<Option<RunRecord>, RepoError> {
        sqlx::query_as::<_, RunRecord>(
            r#"
              UPDATE backup_runs
              SET status = $3,
                  error = $4,
                  duration_ms = $5,
                  snapshot_id = COALESCE($6, snapshot_id),
                  snapshot_time = COALESCE($7, snapshot_time),
                  output = COALESCE($8, output),
                  finished_at = $9
              WHERE id = $1 AND worker_id = $2 AND status = 'running'
              RETURNING *
            "#,
        )
        .bind(run_id)
        .bind(worker_id)
        .bind(completion.status.as_str())
        .bind(completion.error.as_deref())
        .bind(completion.duration_ms)
        .bind(completion.snapshot_id.as_deref())
        .bind(completion.snapshot_time)
        .bind(completion.output.as_ref())
        .bind(now)
        .fetch_optional(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn fail(&self, run_id: &Uuid, error: &str, now: DateTime<Utc>) -> Result<(), RepoError> {
        sqlx::query(
            r#"
              UPDATE backup_runs
              SET status = 'failed', error = $2, finished_at = $3
              WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(error)
        .bind(now)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn recent_backup_runs(
        &self,
        user_id: &Uuid,
        repository_id: &Uuid,
        limit: i64,
    ) -> Result<Vec<RunRecord>, RepoError> {
        sqlx::query_as::<_, RunRecord>(
            r#"
              SELECT * FROM backup_runs
              WHERE user_id = $1 AND repository_id = $2 AND type = 'backup'
              ORDER BY created_at DESC
              LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(repository_id)
        .bind(limit)
        .fetch_all(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn known_snapshot_ids(
        &self,
        user_id: &Uuid,
        repository_id: &Uuid,
    ) -> Result<Vec<String>, RepoError> {
        let rows = sqlx::query(
            r#"
              SELECT DISTINCT snapshot_id FROM backup_runs
              WHERE user_id = $1 AND repository_id = $2 AND snapshot_id IS NOT NULL
            "#,
        )
        .bind(user_id)
        .bind(repository_id)
        .fetch_all(self.db_pool.deref())
        .await?;

        Ok(rows.into_iter().map(|row| row.get("snapshot_id")).collect())
    }
}
