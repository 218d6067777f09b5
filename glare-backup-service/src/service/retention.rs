use crate::model::{
    BackupPlan, EventSeverity, EventType, ForgetRequest, RunStatus, RunType, Worker,
};
use crate::repo::event::{EventRecord, EventRepo};
use crate::repo::plan::PlanRepo;
use crate::repo::repository::RepositoryRepo;
use crate::repo::run::{RunRecord, RunRepo};
use crate::repo::worker::WorkerRepo;
use crate::repo::RepoError;
use crate::service::options::normalize_backend_options;
use crate::service::worker_client::WorkerApi;
use chrono::Utc;
use glare_common::model::RunId;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Issues the forget+prune step after a successful fire. Failures are
/// recorded as a failed prune run plus an event and never reach the caller.
pub struct RetentionService {
    plan_repo: Arc<dyn PlanRepo>,
    repository_repo: Arc<dyn RepositoryRepo>,
    worker_repo: Arc<dyn WorkerRepo>,
    run_repo: Arc<dyn RunRepo>,
    event_repo: Arc<dyn EventRepo>,
    worker_api: Arc<dyn WorkerApi>,
}

impl RetentionService {
    pub fn new(
        plan_repo: Arc<dyn PlanRepo>,
        repository_repo: Arc<dyn RepositoryRepo>,
        worker_repo: Arc<dyn WorkerRepo>,
        run_repo: Arc<dyn RunRepo>,
        event_repo: Arc<dyn EventRepo>,
        worker_api: Arc<dyn WorkerApi>,
    ) -> Self {
        Self {
            plan_repo,
            repository_repo,
            worker_repo,
            run_repo,
            event_repo,
            worker_api,
        }
    }

    pub async fn execute(&self, plan: &BackupPlan) {
        if let Err(err) = self.run_prune(plan).await {
            error!(plan_id = %plan.id, "Retention step failed: {err}");
        }
    }

    async fn run_prune(&self, plan: &BackupPlan) -> Result<(), RepoError> {
        let Some(repository) = self
            .repository_repo
            .get(&plan.repository_id.0)
            .await?
            .and_then(|record| crate::model::Repository::try_from(record).ok())
        else {
            error!(plan_id = %plan.id, "Retention skipped: repository not found");
            return Ok(());
        };

        let worker = self.first_valid_worker(plan).await?;

        let run_id = RunId::new_v4();
        let started_at = Utc::now();
        let mut record = RunRecord {
            id: run_id.0,
            plan_id: plan.id.0,
            user_id: plan.user_id.0,
            repository_id: plan.repository_id.0,
            worker_id: worker.as_ref().map(|w| w.id.0),
            run_group_id: None,
            run_type: RunType::Prune.to_string(),
            status: RunStatus::Failed.to_string(),
            error: None,
            duration_ms: None,
            snapshot_id: None,
            snapshot_time: None,
            output: None,
            started_at: Some(started_at),
            finished_at: None,
            created_at: started_at,
        };

        let Some(worker) = worker else {
            record.error = Some("No worker available for retention".to_string());
            record.finished_at = Some(Utc::now());
            self.run_repo.insert(&record).await?;
            self.emit_prune_event(
                plan,
                &record,
                EventType::PruneFailed,
                EventSeverity::Error,
                "No worker available for retention".to_string(),
            )
            .await?;
            return Ok(());
        };

        let target = normalize_backend_options(
            repository.backend,
            &repository.path,
            &repository.id,
            &repository.options,
        );
        let request = ForgetRequest {
            backend: target.backend,
            options: target.options,
            repository: target.repository,
            password: repository.password.as_ref().map(|p| p.value.clone()),
            prune: true,
            retention: plan.retention.clone(),
        };

        let result = self.worker_api.forget(&worker, &request).await;
        let finished_at = Utc::now();
        record.finished_at = Some(finished_at);
        record.duration_ms = Some((finished_at - started_at).num_milliseconds().max(0));

        match result {
            Ok(outcome) => {
                let succeeded = outcome.success();
                record.status = if succeeded {
                    RunStatus::Success.to_string()
                } else {
                    RunStatus::Failed.to_string()
                };
                if !succeeded {
                    record.error = Some(
                        outcome
                            .error_message()
                            .unwrap_or_else(|| "Prune failed".to_string()),
                    );
                }
                record.output = Some(outcome.body);
                self.run_repo.insert(&record).await?;

                let severity = if succeeded {
                    EventSeverity::Info
                } else {
                    EventSeverity::Error
                };
                let message = if succeeded {
                    format!("Retention prune completed for plan {}", plan.name)
                } else {
                    format!("Retention prune failed for plan {}", plan.name)
                };
                self.emit_prune_event(plan, &record, EventType::PruneCompleted, severity, message)
                    .await?;

                info!(plan_id = %plan.id, success = succeeded, "Retention prune finished");
            }
            Err(call_error) => {
                record.error = Some(call_error.to_string());
                self.run_repo.insert(&record).await?;
                self.emit_prune_event(
                    plan,
                    &record,
                    EventType::PruneFailed,
                    EventSeverity::Error,
                    format!("Retention prune failed for plan {}", plan.name),
                )
                .await?;
            }
        }

        Ok(())
    }

    /// The first worker of the plan's fan-out list that is also attached to
    /// the repository.
    async fn first_valid_worker(&self, plan: &BackupPlan) -> Result<Option<Worker>, RepoError> {
        let mut candidates = self.plan_repo.worker_ids(&plan.id.0).await?;
        if candidates.is_empty() {
            candidates.extend(plan.worker_id.map(|w| w.0));
        }

        let attached: Vec<Uuid> = self
            .repository_repo
            .backup_worker_ids(&plan.repository_id.0)
            .await?;

        for candidate in candidates {
            if !attached.contains(&candidate) {
                continue;
            }
            if let Some(record) = self.worker_repo.get(&candidate).await? {
                if let Ok(worker) = Worker::try_from(record) {
                    if worker.endpoint.is_some() && worker.sync_token.is_some() {
                        return Ok(Some(worker));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn emit_prune_event(
        &self,
        plan: &BackupPlan,
        record: &RunRecord,
        event_type: EventType,
        severity: EventSeverity,
        message: String,
    ) -> Result<(), RepoError> {
        let mut event = EventRecord::new(
            plan.user_id.0,
            plan.repository_id.0,
            event_type,
            severity,
            message,
            Utc::now(),
        )
        .with_plan(plan.id.0)
        .with_run(record.id);
        if let Some(worker_id) = record.worker_id {
            event = event.with_worker(worker_id);
        }
        self.event_repo.insert(&event).await
    }
}
