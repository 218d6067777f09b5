use crate::model::{BackupPlan, PlanPathsConfig, PlanStatus, RetentionRules};
use crate::repo::RepoError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glare_common::model::{PlanId, RepositoryId, UserId, WorkerId};
use sqlx::{Pool, Postgres, Row};
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct PlanRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub repository_id: Uuid,
    pub worker_id: Option<Uuid>,
    pub name: String,
    pub cron: String,
    pub paths: serde_json::Value,
    pub tags: serde_json::Value,
    pub dry_run: bool,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<i64>,
    pub prune: bool,
    pub keep_last: Option<i32>,
    pub keep_daily: Option<i32>,
    pub keep_weekly: Option<i32>,
    pub keep_monthly: Option<i32>,
    pub keep_yearly: Option<i32>,
    pub keep_within: Option<String>,
    pub run_lease_until: Option<DateTime<Utc>>,
    pub run_lease_owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PlanRecord> for BackupPlan {
    type Error = String;

    fn try_from(value: PlanRecord) -> Result<Self, Self::Error> {
        let paths: PlanPathsConfig = serde_json::from_value(value.paths)
            .map_err(|e| format!("Invalid plan paths config: {e}"))?;
        let tags: Vec<String> =
            serde_json::from_value(value.tags).map_err(|e| format!("Invalid plan tags: {e}"))?;
        let last_status = value
            .last_status
            .as_deref()
            .map(PlanStatus::from_str)
            .transpose()?;

        Ok(BackupPlan {
            id: PlanId(value.id),
            user_id: UserId(value.user_id),
            repository_id: RepositoryId(value.repository_id),
            worker_id: value.worker_id.map(WorkerId),
            name: value.name,
            cron: value.cron,
            paths,
            tags,
            dry_run: value.dry_run,
            enabled: value.enabled,
            last_run_at: value.last_run_at,
            next_run_at: value.next_run_at,
            last_status,
            last_error: value.last_error,
            last_duration_ms: value.last_duration_ms,
            prune: value.prune,
            retention: RetentionRules {
                keep_last: value.keep_last,
                keep_daily: value.keep_daily,
                keep_weekly: value.keep_weekly,
                keep_monthly: value.keep_monthly,
                keep_yearly: value.keep_yearly,
                keep_within: value.keep_within,
            },
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// Aggregate over the runs of one finalized fire.
#[derive(Debug, Clone, PartialEq)]
pub struct RunGroupSummary {
    pub total: i64,
    pub success: i64,
    pub failure: i64,
    pub min_started_at: Option<DateTime<Utc>>,
    pub max_finished_at: Option<DateTime<Utc>>,
    pub latest_failure_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub last_status: PlanStatus,
    pub last_error: Option<String>,
    pub last_duration_ms: i64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl RunGroupSummary {
    pub fn outcome(&self) -> PlanOutcome {
        let last_status = if self.failure == 0 {
            PlanStatus::Success
        } else {
            PlanStatus::Failed
        };

        let last_error = if self.failure == 0 {
            None
        } else if self.success == 0 {
            Some(
                self.latest_failure_error
                    .clone()
                    .unwrap_or_else(|| "Backup failed".to_string()),
            )
        } else {
            Some(format!("{}/{} workers failed", self.failure, self.total))
        };

        let last_duration_ms = match (self.min_started_at, self.max_finished_at) {
            (Some(start), Some(finish)) => (finish - start).num_milliseconds().max(0),
            _ => 0,
        };

        PlanOutcome {
            last_status,
            last_error,
            last_duration_ms,
            last_run_at: self.max_finished_at,
        }
    }
}

#[async_trait]
pub trait PlanRepo: Send + Sync {
    async fn get(&self, plan_id: &Uuid) -> Result<Option<PlanRecord>, RepoError>;

    async fn get_for_user(
        &self,
        user_id: &Uuid,
        plan_id: &Uuid,
    ) -> Result<Option<PlanRecord>, RepoError>;

    /// Enabled plans whose next fire is due, ordered by (next_run_at, id).
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<PlanRecord>, RepoError>;

    /// The authoritative plan↔worker fan-out set.
    async fn worker_ids(&self, plan_id: &Uuid) -> Result<Vec<Uuid>, RepoError>;

    /// Back-compat: mirrors the first worker of the set into the legacy
    /// single-worker column.
    async fn set_legacy_worker_id(
        &self,
        plan_id: &Uuid,
        worker_id: &Uuid,
    ) -> Result<(), RepoError>;

    /// Atomically takes the advisory lease. Succeeds when the lease is free,
    /// expired, or already held by `owner`.
    async fn try_acquire_lease(
        &self,
        plan_id: &Uuid,
        owner: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepoError>;

    /// Clears the lease, but only for its current owner.
    async fn release_lease(&self, plan_id: &Uuid, owner: &str) -> Result<(), RepoError>;

    /// Marks the start of a fire: `last_status = running` and the next
    /// scheduled instant, so the scheduler does not re-fire the plan while
    /// runs are still outstanding.
    async fn mark_fire_started(
        &self,
        plan_id: &Uuid,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError>;

    /// Marks a fire that failed before any worker-level run could decide it.
    async fn mark_fire_failed(
        &self,
        plan_id: &Uuid,
        error: &str,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError>;

    /// Finalizes a run group under a plan-row lock. Returns `None` while any
    /// run of the group is still pending or running (or when the group has no
    /// runs at all); otherwise applies the aggregated outcome to the plan and
    /// returns the summary.
    async fn finalize_run_group(
        &self,
        plan_id: &Uuid,
        run_group_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RunGroupSummary>, RepoError>;

    /// Enabled plans targeting the given worker, via the plan↔worker set or
    /// the legacy column when the set is empty.
    async fn catalog_for_worker(&self, worker_id: &Uuid) -> Result<Vec<PlanRecord>, RepoError>;

    async fn first_for_repository_worker(
        &self,
        repository_id: &Uuid,
        worker_id: &Uuid,
    ) -> Result<Option<PlanRecord>, RepoError>;

    async fn set_enabled(
        &self,
        plan_id: &Uuid,
        enabled: bool,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepoError>;

    async fn delete(&self, plan_id: &Uuid) -> Result<bool, RepoError>;
}

pub struct DbPlanRepo {
    db_pool: Arc<Pool<Postgres>>,
}

impl DbPlanRepo {
    pub fn new(db_pool: Arc<Pool<Postgres>>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PlanRepo for DbPlanRepo {
    async fn get(&self, plan_id: &Uuid) -> Result<Option<PlanRecord>, RepoError> {
        sqlx::query_as::<_, PlanRecord>("SELECT * FROM backup_plans WHERE id = $1")
            .bind(plan_id)
            .fetch_optional(self.db_pool.deref())
            .await
            .map_err(|e| e.into())
    }

    async fn get_for_user(
        &self,
        user_id: &Uuid,
        plan_id: &Uuid,
    ) -> Result<Option<PlanRecord>, RepoError> {
        sqlx::query_as::<_, PlanRecord>(
            "SELECT * FROM backup_plans WHERE id = $1 AND user_id = $2",
        )
        .bind(plan_id)
        .bind(user_id)
        .fetch_optional(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<PlanRecord>, RepoError> {
        sqlx::query_as::<_, PlanRecord>(
            r#"
              SELECT * FROM backup_plans
              WHERE enabled = TRUE AND next_run_at IS NOT NULL AND next_run_at <= $1
              ORDER BY next_run_at ASC, id ASC
            "#,
        )
        .bind(now)
        .fetch_all(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn worker_ids(&self, plan_id: &Uuid) -> Result<Vec<Uuid>, RepoError> {
        let rows = sqlx::query(
            "SELECT worker_id FROM backup_plan_workers WHERE plan_id = $1 ORDER BY position, worker_id",
        )
        .bind(plan_id)
        .fetch_all(self.db_pool.deref())
        .await?;

        Ok(rows.into_iter().map(|row| row.get("worker_id")).collect())
    }

    async fn set_legacy_worker_id(
        &self,
        plan_id: &Uuid,
        worker_id: &Uuid,
    ) -> Result<(), RepoError> {
        sqlx::query("UPDATE backup_plans SET worker_id = $2 WHERE id = $1 AND worker_id IS DISTINCT FROM $2")
            .bind(plan_id)
            .bind(worker_id)
            .execute(self.db_pool.deref())
            .await?;
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        plan_id: &Uuid,
        owner: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
              UPDATE backup_plans
              SET run_lease_until = $3, run_lease_owner = $2
              WHERE id = $1
                AND (run_lease_until IS NULL OR run_lease_until < $4 OR run_lease_owner = $2)
            "#,
        )
        .bind(plan_id)
        .bind(owner)
        .bind(until)
        .bind(now)
        .execute(self.db_pool.deref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, plan_id: &Uuid, owner: &str) -> Result<(), RepoError> {
        sqlx::query(
            r#"
              UPDATE backup_plans
              SET run_lease_until = NULL, run_lease_owner = NULL
              WHERE id = $1 AND run_lease_owner = $2
            "#,
        )
        .bind(plan_id)
        .bind(owner)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn mark_fire_started(
        &self,
        plan_id: &Uuid,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
              UPDATE backup_plans
              SET last_status = 'running', next_run_at = $2, updated_at = $3
              WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .bind(next_run_at)
        .bind(now)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn mark_fire_failed(
        &self,
        plan_id: &Uuid,
        error: &str,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
              UPDATE backup_plans
              SET last_status = 'failed',
                  last_error = $2,
                  last_run_at = $3,
                  next_run_at = $4,
                  updated_at = $3
              WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .bind(error)
        .bind(now)
        .bind(next_run_at)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn finalize_run_group(
        &self,
        plan_id: &Uuid,
        run_group_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RunGroupSummary>, RepoError> {
        let mut tx = self.db_pool.begin().await?;

        // Row lock so two completions cannot both finalize the group.
        sqlx::query("SELECT id FROM backup_plans WHERE id = $1 FOR UPDATE")
            .bind(plan_id)
            .fetch_optional(&mut *tx)
            .await?;

        let aggregate = sqlx::query(
            r#"
              SELECT
                count(*) AS total,
                count(*) FILTER (WHERE status = 'success') AS success,
                count(*) FILTER (WHERE status = 'failed') AS failure,
                count(*) FILTER (WHERE status IN ('pending', 'running')) AS unfinished,
                min(started_at) AS min_started_at,
                max(finished_at) AS max_finished_at
              FROM backup_runs
              WHERE run_group_id = $1 AND plan_id = $2
            "#,
        )
        .bind(run_group_id)
        .bind(plan_id)
        .fetch_one(&mut *tx)
        .await?;

        let total: i64 = aggregate.get("total");
        let unfinished: i64 = aggregate.get("unfinished");
        if total == 0 || unfinished > 0 {
            tx.commit().await?;
            return Ok(None);
        }

        let latest_failure_error: Option<String> = sqlx::query(
            r#"
              SELECT error FROM backup_runs
              WHERE run_group_id = $1 AND plan_id = $2 AND status = 'failed'
              ORDER BY finished_at DESC NULLS LAST
              LIMIT 1
            "#,
        )
        .bind(run_group_id)
        .bind(plan_id)
        .fetch_optional(&mut *tx)
        .await?
        .and_then(|row| row.get("error"));

        let summary = RunGroupSummary {
            total,
            success: aggregate.get("success"),
            failure: aggregate.get("failure"),
            min_started_at: aggregate.get("min_started_at"),
            max_finished_at: aggregate.get("max_finished_at"),
            latest_failure_error,
        };

        let outcome = summary.outcome();
        sqlx::query(
            r#"
              UPDATE backup_plans
              SET last_run_at = $2,
                  last_status = $3,
                  last_error = $4,
                  last_duration_ms = $5,
                  updated_at = $6
              WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .bind(outcome.last_run_at)
        .bind(outcome.last_status.to_string())
        .bind(outcome.last_error.as_deref())
        .bind(outcome.last_duration_ms)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(summary))
    }

    async fn catalog_for_worker(&self, worker_id: &Uuid) -> Result<Vec<PlanRecord>, RepoError> {
        sqlx::query_as::<_, PlanRecord>(
            r#"
              SELECT p.* FROM backup_plans p
              WHERE p.enabled = TRUE
                AND (
                  EXISTS (
                    SELECT 1 FROM backup_plan_workers pw
                    WHERE pw.plan_id = p.id AND pw.worker_id = $1
                  )
                  OR (
                    p.worker_id = $1
                    AND NOT EXISTS (SELECT 1 FROM backup_plan_workers x WHERE x.plan_id = p.id)
                  )
                )
              ORDER BY p.name, p.id
            "#,
        )
        .bind(worker_id)
        .fetch_all(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn first_for_repository_worker(
        &self,
        repository_id: &Uuid,
        worker_id: &Uuid,
    ) -> Result<Option<PlanRecord>, RepoError> {
        sqlx::query_as::<_, PlanRecord>(
            r#"
              SELECT p.* FROM backup_plans p
              WHERE p.repository_id = $1
                AND (
                  EXISTS (
                    SELECT 1 FROM backup_plan_workers pw
                    WHERE pw.plan_id = p.id AND pw.worker_id = $2
                  )
                  OR (
                    p.worker_id = $2
                    AND NOT EXISTS (SELECT 1 FROM backup_plan_workers x WHERE x.plan_id = p.id)
                  )
                )
              ORDER BY p.created_at, p.id
              LIMIT 1
            "#,
        )
        .bind(repository_id)
        .bind(worker_id)
        .fetch_optional(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }

    async fn set_enabled(
        &self,
        plan_id: &Uuid,
        enabled: bool,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE backup_plans SET enabled = $2, next_run_at = $3, updated_at = now() WHERE id = $1",
        )
        .bind(plan_id)
        .bind(enabled)
        .bind(next_run_at)
        .execute(self.db_pool.deref())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, plan_id: &Uuid) -> Result<bool, RepoError> {
        let mut tx = self.db_pool.begin().await?;

        sqlx::query("DELETE FROM backup_plan_workers WHERE plan_id = $1")
            .bind(plan_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM backup_plans WHERE id = $1")
            .bind(plan_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }
}
