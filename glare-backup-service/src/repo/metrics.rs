use crate::model::{AnomalyReason, EventSeverity, EventStatus, RunMetric, SizeAnomaly};
use crate::repo::RepoError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glare_common::model::{PlanId, RepositoryId, RunId, UserId};
use sqlx::{Pool, Postgres, Row};
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct MetricRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub repository_id: Uuid,
    pub snapshot_id: Option<String>,
    pub bytes_added: i64,
    pub bytes_processed: Option<i64>,
    pub files_new: Option<i64>,
    pub files_changed: Option<i64>,
    pub files_unmodified: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<RunMetric> for MetricRecord {
    fn from(value: RunMetric) -> Self {
        MetricRecord {
            id: value.id,
            run_id: value.run_id.0,
            user_id: value.user_id.0,
            plan_id: value.plan_id.map(|p| p.0),
            repository_id: value.repository_id.0,
            snapshot_id: value.snapshot_id,
            bytes_added: value.bytes_added,
            bytes_processed: value.bytes_processed,
            files_new: value.files_new,
            files_changed: value.files_changed,
            files_unmodified: value.files_unmodified,
            created_at: value.created_at,
        }
    }
}

impl TryFrom<MetricRecord> for RunMetric {
    type Error = String;

    fn try_from(value: MetricRecord) -> Result<Self, Self::Error> {
        Ok(RunMetric {
            id: value.id,
            run_id: RunId(value.run_id),
            user_id: UserId(value.user_id),
            plan_id: value.plan_id.map(PlanId),
            repository_id: RepositoryId(value.repository_id),
            snapshot_id: value.snapshot_id,
            bytes_added: value.bytes_added,
            bytes_processed: value.bytes_processed,
            files_new: value.files_new,
            files_changed: value.files_changed,
            files_unmodified: value.files_unmodified,
            created_at: value.created_at,
        })
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct AnomalyRecord {
    pub id: Uuid,
    pub metric_id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub repository_id: Uuid,
    pub expected_bytes: i64,
    pub actual_bytes: i64,
    pub deviation_score: f64,
    pub status: String,
    pub severity: String,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<SizeAnomaly> for AnomalyRecord {
    fn from(value: SizeAnomaly) -> Self {
        AnomalyRecord {
            id: value.id,
            metric_id: value.metric_id,
            user_id: value.user_id.0,
            plan_id: value.plan_id.map(|p| p.0),
            repository_id: value.repository_id.0,
            expected_bytes: value.expected_bytes,
            actual_bytes: value.actual_bytes,
            deviation_score: value.deviation_score,
            status: value.status.to_string(),
            severity: value.severity.to_string(),
            reason: value.reason.to_string(),
            detected_at: value.detected_at,
            resolved_at: value.resolved_at,
        }
    }
}

impl TryFrom<AnomalyRecord> for SizeAnomaly {
    type Error = String;

    fn try_from(value: AnomalyRecord) -> Result<Self, Self::Error> {
        Ok(SizeAnomaly {
            id: value.id,
            metric_id: value.metric_id,
            user_id: UserId(value.user_id),
            plan_id: value.plan_id.map(PlanId),
            repository_id: RepositoryId(value.repository_id),
            expected_bytes: value.expected_bytes,
            actual_bytes: value.actual_bytes,
            deviation_score: value.deviation_score,
            status: EventStatus::from_str(&value.status)?,
            severity: EventSeverity::from_str(&value.severity)?,
            reason: AnomalyReason::from_str(&value.reason)?,
            detected_at: value.detected_at,
            resolved_at: value.resolved_at,
        })
    }
}

#[async_trait]
pub trait MetricsRepo: Send + Sync {
    async fn insert_metric(&self, record: &MetricRecord) -> Result<(), RepoError>;

    /// Append-only storage growth sample; at most one per (user, run).
    async fn record_storage_sample(
        &self,
        user_id: &Uuid,
        run_id: &Uuid,
        repository_id: &Uuid,
        bytes_added: i64,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError>;

    /// The bytes-added values of the most recent metrics strictly before the
    /// given one, newest first, scoped to (user, plan) when a plan is set and
    /// to (user, repository) otherwise.
    async fn prior_bytes_added(
        &self,
        user_id: &Uuid,
        plan_id: Option<&Uuid>,
        repository_id: &Uuid,
        exclude_metric_id: &Uuid,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<i64>, RepoError>;

    async fn insert_anomaly(&self, record: &AnomalyRecord) -> Result<(), RepoError>;

    async fn resolve_open_anomalies(
        &self,
        user_id: &Uuid,
        plan_id: Option<&Uuid>,
        repository_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, RepoError>;
}

pub struct DbMetricsRepo {
    db_pool: Arc<Pool<Postgres>>,
}

impl DbMetricsRepo {
    pub fn new(db_pool: Arc<Pool<Postgres>>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl MetricsRepo for DbMetricsRepo {
    async fn insert_metric(&self, record: &MetricRecord) -> Result<(), RepoError> {
        sqlx::query(
            r#"
              INSERT INTO backup_run_metrics
                (id, run_id, user_id, plan_id, repository_id, snapshot_id, bytes_added,
                 bytes_processed, files_new, files_changed, files_unmodified, created_at)
              VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(record.run_id)
        .bind(record.user_id)
        .bind(record.plan_id)
        .bind(record.repository_id)
        .bind(record.snapshot_id.as_deref())
        .bind(record.bytes_added)
        .bind(record.bytes_processed)
        .bind(record.files_new)
        .bind(record.files_changed)
        .bind(record.files_unmodified)
        .bind(record.created_at)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn record_storage_sample(
        &self,
        user_id: &Uuid,
        run_id: &Uuid,
        repository_id: &Uuid,
        bytes_added: i64,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
              INSERT INTO storage_usage_events
                (id, user_id, run_id, repository_id, bytes_added, created_at)
              VALUES
                ($1, $2, $3, $4, $5, $6)
              ON CONFLICT (user_id, run_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(run_id)
        .bind(repository_id)
        .bind(bytes_added)
        .bind(now)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn prior_bytes_added(
        &self,
        user_id: &Uuid,
        plan_id: Option<&Uuid>,
        repository_id: &Uuid,
        exclude_metric_id: &Uuid,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<i64>, RepoError> {
        let rows = match plan_id {
            Some(plan_id) => {
                sqlx::query(
                    r#"
                      SELECT bytes_added FROM backup_run_metrics
                      WHERE user_id = $1 AND plan_id = $2 AND id != $3 AND created_at <= $4
                      ORDER BY created_at DESC
                      LIMIT $5
                    "#,
                )
                .bind(user_id)
                .bind(plan_id)
                .bind(exclude_metric_id)
                .bind(before)
                .bind(limit)
                .fetch_all(self.db_pool.deref())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                      SELECT bytes_added FROM backup_run_metrics
                      WHERE user_id = $1 AND repository_id = $2 AND id != $3 AND created_at <= $4
                      ORDER BY created_at DESC
                      LIMIT $5
                    "#,
                )
                .bind(user_id)
                .bind(repository_id)
                .bind(exclude_metric_id)
                .bind(before)
                .bind(limit)
                .fetch_all(self.db_pool.deref())
                .await?
            }
        };

        Ok(rows.into_iter().map(|row| row.get("bytes_added")).collect())
    }

    async fn insert_anomaly(&self, record: &AnomalyRecord) -> Result<(), RepoError> {
        sqlx::query(
            r#"
              INSERT INTO backup_size_anomalies
                (id, metric_id, user_id, plan_id, repository_id, expected_bytes, actual_bytes,
                 deviation_score, status, severity, reason, detected_at, resolved_at)
              VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id)
        .bind(record.metric_id)
        .bind(record.user_id)
        .bind(record.plan_id)
        .bind(record.repository_id)
        .bind(record.expected_bytes)
        .bind(record.actual_bytes)
        .bind(record.deviation_score)
        .bind(record.status.as_str())
        .bind(record.severity.as_str())
        .bind(record.reason.as_str())
        .bind(record.detected_at)
        .bind(record.resolved_at)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn resolve_open_anomalies(
        &self,
        user_id: &Uuid,
        plan_id: Option<&Uuid>,
        repository_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, RepoError> {
        let result = sqlx::query(
            r#"
              UPDATE backup_size_anomalies
              SET status = 'resolved', resolved_at = $4
              WHERE user_id = $1
                AND repository_id = $2
                AND plan_id IS NOT DISTINCT FROM $3
                AND status = 'open'
            "#,
        )
        .bind(user_id)
        .bind(repository_id)
        .bind(plan_id.copied())
        .bind(now)
        .execute(self.db_pool.deref())
        .await?;

        Ok(result.rows_affected())
    }
}
