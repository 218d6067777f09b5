use crate::model::{BackupEvent, EventSeverity, EventStatus, EventType};
use crate::repo::RepoError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glare_common::model::{PlanId, RepositoryId, RunId, UserId, WorkerId};
use sqlx::{Pool, Postgres};
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct EventRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub repository_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub worker_id: Option<Uuid>,
    #[sqlx(rename = "type")]
    pub event_type: String,
    pub status: String,
    pub severity: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<EventRecord> for BackupEvent {
    type Error = String;

    fn try_from(value: EventRecord) -> Result<Self, Self::Error> {
        Ok(BackupEvent {
            id: value.id,
            user_id: UserId(value.user_id),
            repository_id: RepositoryId(value.repository_id),
            plan_id: value.plan_id.map(PlanId),
            run_id: value.run_id.map(RunId),
            worker_id: value.worker_id.map(WorkerId),
            event_type: EventType::from_str(&value.event_type)?,
            status: EventStatus::from_str(&value.status)?,
            severity: EventSeverity::from_str(&value.severity)?,
            message: value.message,
            details: value.details,
            created_at: value.created_at,
            resolved_at: value.resolved_at,
        })
    }
}

impl From<BackupEvent> for EventRecord {
    fn from(value: BackupEvent) -> Self {
        EventRecord {
            id: value.id,
            user_id: value.user_id.0,
            repository_id: value.repository_id.0,
            plan_id: value.plan_id.map(|p| p.0),
            run_id: value.run_id.map(|r| r.0),
            worker_id: value.worker_id.map(|w| w.0),
            event_type: value.event_type.to_string(),
            status: value.status.to_string(),
            severity: value.severity.to_string(),
            message: value.message,
            details: value.details,
            created_at: value.created_at,
            resolved_at: value.resolved_at,
        }
    }
}

impl EventRecord {
    pub fn new(
        user_id: Uuid,
        repository_id: Uuid,
        event_type: EventType,
        severity: EventSeverity,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        EventRecord {
            id: Uuid::new_v4(),
            user_id,
            repository_id,
            plan_id: None,
            run_id: None,
            worker_id: None,
            event_type: event_type.to_string(),
            status: EventStatus::Open.to_string(),
            severity: severity.to_string(),
            message: message.into(),
            details: None,
            created_at: now,
            resolved_at: None,
        }
    }

    pub fn with_plan(mut self, plan_id: Uuid) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_worker(mut self, worker_id: Uuid) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn resolved(mut self, at: DateTime<Utc>) -> Self {
        self.status = EventStatus::Resolved.to_string();
        self.resolved_at = Some(at);
        self
    }
}

#[async_trait]
pub trait EventRepo: Send + Sync {
    async fn insert(&self, record: &EventRecord) -> Result<(), RepoError>;

    async fn recent_for_repository(
        &self,
        user_id: &Uuid,
        repository_id: &Uuid,
        limit: i64,
    ) -> Result<Vec<EventRecord>, RepoError>;

    /// Events created after the given instant, oldest first; drives the
    /// event stream endpoint.
    async fn created_after(
        &self,
        user_id: &Uuid,
        after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EventRecord>, RepoError>;
}

pub struct DbEventRepo {
    db_pool: Arc<Pool<Postgres>>,
}

impl DbEventRepo {
    pub fn new(db_pool: Arc<Pool<Postgres>>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl EventRepo for DbEventRepo {
    async fn insert(&self, record: &EventRecord) -> Result<(), RepoError> {
        sqlx::query(
            r#"
              INSERT INTO backup_events
                (id, user_id, repository_id, plan_id, run_id, worker_id, type, status, severity,
                 message, details, created_at, resolved_at)
              VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.repository_id)
        .bind(record.plan_id)
        .bind(record.run_id)
        .bind(record.worker_id)
        .bind(record.event_type.as_str())
        .bind(record.status.as_str())
        .bind(record.severity.as_str())
        .bind(record.message.as_str())
        .bind(record.details.as_ref())
        .bind(record.created_at)
        .bind(record.resolved_at)
        .execute(self.db_pool.deref())
        .await?;
        Ok(())
    }

    async fn recent_for_repository(
        &self,
        user_id: &Uuid,
        repository_id: &Uuid,
        limit: i64,
    ) -> Result<Vec<EventRecord>, RepoError> {
        sqlx::query_as::<_, EventRecord>(
            r#"
              SELECT * FROM backup_events
              WHERE user_id = $1 AND repository_id = $2
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

    async fn created_after(
        &self,
        user_id: &Uuid,
        after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EventRecord>, RepoError> {
        sqlx::query_as::<_, EventRecord>(
            r#"
              SELECT * FROM backup_events
              WHERE user_id = $1 AND created_at > $2
              ORDER BY created_at ASC
              LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(after)
        .bind(limit)
        .fetch_all(self.db_pool.deref())
        .await
        .map_err(|e| e.into())
    }
}
