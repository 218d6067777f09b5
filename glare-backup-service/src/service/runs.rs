use crate::metrics as prom;
use crate::model::{
    BackupRequest, BackupRun, ClaimedRun, CompleteRunRequest, EventSeverity, EventType, RunStatus,
    Worker,
};
use crate::repo::event::{EventRecord, EventRepo};
use crate::repo::run::{RunCompletion, RunRepo};
use crate::repo::RepoError;
use crate::service::outcome::RunOutcomeService;
use crate::service::run_groups::RunGroupService;
use crate::service::snapshots::extract_primary_snapshot;
use chrono::Utc;
use glare_common::model::{PlanId, RepositoryId, RunId};
use glare_common::SafeDisplay;
use std::sync::Arc;
use tracing::{info, warn};

pub const MAX_CLAIM_LIMIT: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum RunServiceError {
    #[error("Run not found")]
    NotFound,
    #[error("Invalid completion status: {0}")]
    InvalidStatus(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    InternalRepoError(#[from] RepoError),
}

impl SafeDisplay for RunServiceError {
    fn to_safe_string(&self) -> String {
        match self {
            RunServiceError::NotFound | RunServiceError::InvalidStatus(_) => self.to_string(),
            RunServiceError::Internal(_) => "Internal error".to_string(),
            RunServiceError::InternalRepoError(inner) => inner.to_safe_string(),
        }
    }
}

/// Pull-mode worker interaction: claim pending runs, accept completions.
pub struct RunService {
    run_repo: Arc<dyn RunRepo>,
    event_repo: Arc<dyn EventRepo>,
    outcome_service: Arc<RunOutcomeService>,
    run_group_service: Arc<RunGroupService>,
}

impl RunService {
    pub fn new(
        run_repo: Arc<dyn RunRepo>,
        event_repo: Arc<dyn EventRepo>,
        outcome_service: Arc<RunOutcomeService>,
        run_group_service: Arc<RunGroupService>,
    ) -> Self {
        Self {
            run_repo,
            event_repo,
            outcome_service,
            run_group_service,
        }
    }

    /// Atomically claims up to `limit` (≤ 20) pending runs for the calling
    /// worker. Rows whose queued payload is missing or malformed are
    /// auto-failed and not returned.
    pub async fn claim(
        &self,
        worker: &Worker,
        limit: Option<u32>,
    ) -> Result<Vec<ClaimedRun>, RunServiceError> {
        let limit = limit.unwrap_or(MAX_CLAIM_LIMIT).clamp(1, MAX_CLAIM_LIMIT) as i64;
        let now = Utc::now();

        let records = self.run_repo.claim_pending(&worker.id.0, limit, now).await?;

        let mut claimed = Vec::with_capacity(records.len());
        for record in records {
            let request = record
                .output
                .as_ref()
                .and_then(|output| output.get("request"))
                .and_then(|request| {
                    serde_json::from_value::<BackupRequest>(request.clone()).ok()
                });

            match request {
                Some(request) => claimed.push(ClaimedRun {
                    id: RunId(record.id),
                    plan_id: PlanId(record.plan_id),
                    repository_id: RepositoryId(record.repository_id),
                    request,
                }),
                None => {
                    warn!(run_id = %record.id, "Auto-failing run with malformed queued payload");
                    self.run_repo
                        .fail(&record.id, "Invalid queued run payload", now)
                        .await?;
                    if let Some(run_group_id) = record.run_group_id {
                        self.run_group_service
                            .finalize_if_complete(
                                &PlanId(record.plan_id),
                                &glare_common::model::RunGroupId(run_group_id),
                            )
                            .await?;
                    }
                }
            }
        }

        if !claimed.is_empty() {
            info!(worker_id = %worker.id, count = claimed.len(), "Worker claimed pending runs");
        }
        Ok(claimed)
    }

    /// Applies a worker-reported terminal outcome to a running run. The
    /// persisted state matches the push path exactly: snapshot reference,
    /// completion event, storage sample, metric and anomaly check.
    pub async fn complete(
        &self,
        worker: &Worker,
        run_id: &RunId,
        request: CompleteRunRequest,
    ) -> Result<BackupRun, RunServiceError> {
        if !request.status.is_terminal() {
            return Err(RunServiceError::InvalidStatus(request.status.to_string()));
        }

        let snapshot = request
            .output
            .as_ref()
            .and_then(extract_primary_snapshot);
        let snapshot_id = request
            .snapshot_id
            .clone()
            .or_else(|| snapshot.as_ref().map(|s| s.id.clone()));
        let snapshot_time = request
            .snapshot_time
            .or_else(|| snapshot.as_ref().and_then(|s| s.time));

        let now = Utc::now();
        let completion = RunCompletion {
            status: request.status.to_string(),
            error: request.error.clone(),
            duration_ms: request.duration_ms,
            snapshot_id,
            snapshot_time,
            output: request.output.clone(),
        };

        let record = self
            .run_repo
            .complete(&run_id.0, &worker.id.0, &completion, now)
            .await?
            .ok_or(RunServiceError::NotFound)?;
        let run = BackupRun::try_from(record).map_err(RunServiceError::Internal)?;

        prom::RUNS_COMPLETED_TOTAL
            .with_label_values(&[run.status.to_string().as_str()])
            .inc();

        match run.status {
            RunStatus::Success => {
                let event = EventRecord::new(
                    run.user_id.0,
                    run.repository_id.0,
                    EventType::BackupCompleted,
                    EventSeverity::Info,
                    format!("Backup completed on worker {}", worker.name),
                    now,
                )
                .with_plan(run.plan_id.0)
                .with_run(run.id.0)
                .with_worker(worker.id.0)
                .resolved(now);
                self.event_repo.insert(&event).await?;

                self.outcome_service.record_success(&run).await?;
            }
            RunStatus::Failed => {
                let message = match &run.error {
                    Some(error) => format!("Backup failed on worker {}: {error}", worker.name),
                    None => format!("Backup failed on worker {}", worker.name),
                };
                let event = EventRecord::new(
                    run.user_id.0,
                    run.repository_id.0,
                    EventType::BackupFailed,
                    EventSeverity::Error,
                    message,
                    now,
                )
                .with_plan(run.plan_id.0)
                .with_run(run.id.0)
                .with_worker(worker.id.0);
                self.event_repo.insert(&event).await?;
            }
            RunStatus::Pending | RunStatus::Running => {}
        }

        if let Some(run_group_id) = run.run_group_id {
            self.run_group_service
                .finalize_if_complete(&run.plan_id, &run_group_id)
                .await?;
        }

        Ok(run)
    }
}
