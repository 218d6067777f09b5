use crate::cron::CronExpr;
use crate::metrics as prom;
use crate::model::{
    BackupPlan, BackupRequest, BackupRun, EventSeverity, EventType, Repository, RunStatus,
    RunType, Worker,
};
use crate::repo::event::{EventRecord, EventRepo};
use crate::repo::plan::PlanRepo;
use crate::repo::repository::RepositoryRepo;
use crate::repo::run::{RunRecord, RunRepo};
use crate::repo::worker::WorkerRepo;
use crate::repo::RepoError;
use crate::service::options::normalize_backend_options;
use crate::service::outcome::RunOutcomeService;
use crate::service::paths;
use crate::service::run_groups::RunGroupService;
use crate::service::snapshots::extract_primary_snapshot;
use crate::service::worker_client::{WorkerApi, WorkerCallError};
use chrono::{DateTime, Utc};
use glare_common::model::{RunGroupId, RunId, WorkerId};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Push: the dispatcher POSTs to the worker synchronously. Pull: the
/// dispatcher enqueues pending runs and workers claim them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Push,
    Pull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireTrigger {
    Scheduled,
    Manual,
    Bulk,
}

impl FireTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            FireTrigger::Scheduled => "scheduled",
            FireTrigger::Manual => "manual",
            FireTrigger::Bulk => "bulk",
        }
    }

    fn is_manual(&self) -> bool {
        matches!(self, FireTrigger::Manual | FireTrigger::Bulk)
    }
}

pub struct Dispatcher {
    plan_repo: Arc<dyn PlanRepo>,
    repository_repo: Arc<dyn RepositoryRepo>,
    worker_repo: Arc<dyn WorkerRepo>,
    run_repo: Arc<dyn RunRepo>,
    event_repo: Arc<dyn EventRepo>,
    worker_api: Arc<dyn WorkerApi>,
    outcome_service: Arc<RunOutcomeService>,
    run_group_service: Arc<RunGroupService>,
    mode: DispatchMode,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan_repo: Arc<dyn PlanRepo>,
        repository_repo: Arc<dyn RepositoryRepo>,
        worker_repo: Arc<dyn WorkerRepo>,
        run_repo: Arc<dyn RunRepo>,
        event_repo: Arc<dyn EventRepo>,
        worker_api: Arc<dyn WorkerApi>,
        outcome_service: Arc<RunOutcomeService>,
        run_group_service: Arc<RunGroupService>,
        mode: DispatchMode,
    ) -> Self {
        Self {
            plan_repo,
            repository_repo,
            worker_repo,
            run_repo,
            event_repo,
            worker_api,
            outcome_service,
            run_group_service,
            mode,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Executes one fire of a plan. Per-worker problems are isolated into
    /// failed run rows; only infrastructure errors bubble up.
    pub async fn fire(&self, plan: &BackupPlan, trigger: FireTrigger) -> Result<(), RepoError> {
        let run_group_id = RunGroupId::new_v4();
        let started_at = Utc::now();
        prom::PLAN_FIRES_TOTAL
            .with_label_values(&[trigger.as_str()])
            .inc();
        info!(plan_id = %plan.id, trigger = trigger.as_str(), "Firing backup plan");

        let next_run_at = match CronExpr::parse(&plan.cron) {
            Ok(cron) if plan.enabled => cron.next_fire_after(started_at).ok(),
            Ok(_) => None,
            Err(err) => {
                self.fail_fire(plan, &format!("Invalid cron expression: {err}"), "invalid_cron", None)
                    .await?;
                return Ok(());
            }
        };

        let paths_config = paths::normalize(&plan.paths);
        if paths_config.is_empty() {
            self.fail_fire(
                plan,
                "No backup paths configured",
                "empty_paths",
                next_run_at,
            )
            .await?;
            return Ok(());
        }

        let Some(repository_record) = self.repository_repo.get(&plan.repository_id.0).await?
        else {
            self.fail_fire(
                plan,
                "Repository not found",
                "repository_not_found",
                next_run_at,
            )
            .await?;
            return Ok(());
        };
        let repository = match Repository::try_from(repository_record) {
            Ok(repository) => repository,
            Err(err) => {
                self.fail_fire(
                    plan,
                    &format!("Invalid repository record: {err}"),
                    "repository_not_found",
                    next_run_at,
                )
                .await?;
                return Ok(());
            }
        };

        // The plan↔worker set is authoritative; the legacy column is both the
        // fallback and the write-back target.
        let mut worker_ids = self.plan_repo.worker_ids(&plan.id.0).await?;
        if worker_ids.is_empty() {
            worker_ids.extend(plan.worker_id.map(|w| w.0));
        } else if let Some(first) = worker_ids.first() {
            self.plan_repo.set_legacy_worker_id(&plan.id.0, first).await?;
        }

        let attached = self
            .repository_repo
            .backup_worker_ids(&plan.repository_id.0)
            .await?;

        let mut valid_ids: Vec<Uuid> = Vec::new();
        for worker_id in worker_ids {
            if attached.contains(&worker_id) {
                valid_ids.push(worker_id);
            } else {
                let event = EventRecord::new(
                    plan.user_id.0,
                    plan.repository_id.0,
                    EventType::BackupFailed,
                    EventSeverity::Error,
                    "Worker is not attached to the repository",
                    Utc::now(),
                )
                .with_plan(plan.id.0)
                .with_worker(worker_id)
                .with_details(json!({ "reason": "worker_not_attached_to_repository" }));
                self.event_repo.insert(&event).await?;
            }
        }

        if valid_ids.is_empty() {
            let now = Utc::now();
            let sentinel = RunRecord {
                id: Uuid::new_v4(),
                plan_id: plan.id.0,
                user_id: plan.user_id.0,
                repository_id: plan.repository_id.0,
                worker_id: None,
                run_group_id: Some(run_group_id.0),
                run_type: RunType::Backup.to_string(),
                status: RunStatus::Failed.to_string(),
                error: Some("No workers attached to the repository".to_string()),
                duration_ms: None,
                snapshot_id: None,
                snapshot_time: None,
                output: None,
                started_at: Some(started_at),
                finished_at: Some(now),
                created_at: now,
            };
            self.run_repo.insert(&sentinel).await?;
            self.plan_repo
                .mark_fire_failed(
                    &plan.id.0,
                    "No workers attached to the repository",
                    next_run_at,
                    now,
                )
                .await?;
            return Ok(());
        }

        let target = normalize_backend_options(
            repository.backend,
            &repository.path,
            &repository.id,
            &repository.options,
        );
        if let Some(remote) = &target.persist_remote {
            self.repository_repo
                .set_option(&repository.id.0, "rclone.remote", remote)
                .await?;
        }

        self.plan_repo
            .mark_fire_started(&plan.id.0, next_run_at, started_at)
            .await?;

        let worker_records = self.worker_repo.get_many(&valid_ids).await?;

        let mut fan_out: Vec<(Worker, BackupRequest)> = Vec::new();
        for worker_id in &valid_ids {
            let worker = worker_records
                .iter()
                .find(|record| record.id == *worker_id)
                .cloned()
                .and_then(|record| Worker::try_from(record).ok());
            let Some(worker) = worker else {
                self.insert_worker_failure(
                    plan,
                    &run_group_id,
                    Some(WorkerId(*worker_id)),
                    started_at,
                    "Worker not found",
                )
                .await?;
                continue;
            };

            let resolved = paths::resolve_worker_paths(&paths_config, &worker.id);
            if resolved.is_empty() {
                self.insert_worker_failure(
                    plan,
                    &run_group_id,
                    Some(worker.id),
                    started_at,
                    "No backup paths configured for worker",
                )
                .await?;
                let event = EventRecord::new(
                    plan.user_id.0,
                    plan.repository_id.0,
                    EventType::BackupFailed,
                    EventSeverity::Error,
                    "No backup paths configured for worker",
                    Utc::now(),
                )
                .with_plan(plan.id.0)
                .with_worker(worker.id.0)
                .with_details(json!({ "reason": "worker_paths_missing" }));
                self.event_repo.insert(&event).await?;
                continue;
            }

            let request = BackupRequest {
                backend: target.backend.clone(),
                options: target.options.clone(),
                repository: target.repository.clone(),
                password: repository.password.as_ref().map(|p| p.value.clone()),
                paths: resolved,
                tags: (!plan.tags.is_empty()).then(|| plan.tags.clone()),
                dry_run: plan.dry_run,
            };

            match self.mode {
                DispatchMode::Pull => {
                    self.enqueue_pull_run(plan, &run_group_id, &worker, &request)
                        .await?;
                }
                DispatchMode::Push => fan_out.push((worker, request)),
            }
        }

        if self.mode == DispatchMode::Push {
            self.run_push_fan_out(plan, &run_group_id, started_at, trigger, fan_out)
                .await?;
            self.run_group_service
                .finalize_if_complete(&plan.id, &run_group_id)
                .await?;
        }

        Ok(())
    }

    async fn fail_fire(
        &self,
        plan: &BackupPlan,
        message: &str,
        reason: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepoError> {
        warn!(plan_id = %plan.id, reason, "Plan fire failed: {message}");
        let now = Utc::now();
        let event = EventRecord::new(
            plan.user_id.0,
            plan.repository_id.0,
            EventType::BackupFailed,
            EventSeverity::Error,
            message,
            now,
        )
        .with_plan(plan.id.0)
        .with_details(json!({ "reason": reason }));
        self.event_repo.insert(&event).await?;
        self.plan_repo
            .mark_fire_failed(&plan.id.0, message, next_run_at, now)
            .await?;
        Ok(())
    }

    async fn insert_worker_failure(
        &self,
        plan: &BackupPlan,
        run_group_id: &RunGroupId,
        worker_id: Option<WorkerId>,
        started_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), RepoError> {
        let now = Utc::now();
        let record = RunRecord {
            id: Uuid::new_v4(),
            plan_id: plan.id.0,
            user_id: plan.user_id.0,
            repository_id: plan.repository_id.0,
            worker_id: worker_id.map(|w| w.0),
            run_group_id: Some(run_group_id.0),
            run_type: RunType::Backup.to_string(),
            status: RunStatus::Failed.to_string(),
            error: Some(error.to_string()),
            duration_ms: None,
            snapshot_id: None,
            snapshot_time: None,
            output: None,
            started_at: Some(started_at),
            finished_at: Some(now),
            created_at: now,
        };
        prom::RUNS_COMPLETED_TOTAL
            .with_label_values(&["failed"])
            .inc();
        self.run_repo.insert(&record).await
    }

    async fn enqueue_pull_run(
        &self,
        plan: &BackupPlan,
        run_group_id: &RunGroupId,
        worker: &Worker,
        request: &BackupRequest,
    ) -> Result<(), RepoError> {
        let now = Utc::now();
        let run_id = RunId::new_v4();
        let record = RunRecord {
            id: run_id.0,
            plan_id: plan.id.0,
            user_id: plan.user_id.0,
            repository_id: plan.repository_id.0,
            worker_id: Some(worker.id.0),
            run_group_id: Some(run_group_id.0),
            run_type: RunType::Backup.to_string(),
            status: RunStatus::Pending.to_string(),
            error: None,
            duration_ms: None,
            snapshot_id: None,
            snapshot_time: None,
            output: Some(json!({ "request": request })),
            started_at: None,
            finished_at: None,
            created_at: now,
        };
        self.run_repo.insert(&record).await?;

        let event = EventRecord::new(
            plan.user_id.0,
            plan.repository_id.0,
            EventType::BackupPending,
            EventSeverity::Info,
            format!("Backup queued for worker {}", worker.name),
            now,
        )
        .with_plan(plan.id.0)
        .with_run(run_id.0)
        .with_worker(worker.id.0)
        .with_details(json!({ "phase": "queued" }));
        self.event_repo.insert(&event).await
    }

    async fn run_push_fan_out(
        &self,
        plan: &BackupPlan,
        run_group_id: &RunGroupId,
        started_at: DateTime<Utc>,
        trigger: FireTrigger,
        fan_out: Vec<(Worker, BackupRequest)>,
    ) -> Result<(), RepoError> {
        let mut handles = Vec::with_capacity(fan_out.len());
        for (worker, request) in fan_out {
            let context = PushRunContext {
                run_repo: self.run_repo.clone(),
                event_repo: self.event_repo.clone(),
                worker_api: self.worker_api.clone(),
                outcome_service: self.outcome_service.clone(),
                plan: plan.clone(),
                run_group_id: *run_group_id,
                trigger,
            };
            let worker_id = worker.id;
            handles.push((
                worker_id,
                tokio::spawn(async move { context.execute(worker, request).await }),
            ));
        }

        for (worker_id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(repo_error)) => {
                    error!(plan_id = %plan.id, %worker_id, "Push run persistence failed: {repo_error}");
                }
                Err(join_error) => {
                    // A panicking per-worker task must not abort the fire.
                    error!(plan_id = %plan.id, %worker_id, "Push run crashed: {join_error}");
                    self.insert_worker_failure(
                        plan,
                        run_group_id,
                        Some(worker_id),
                        started_at,
                        "Worker execution crashed before completion",
                    )
                    .await?;
                }
            }
        }

        Ok(())
    }
}

/// Everything one spawned push-mode worker call needs, cloned out of the
/// dispatcher so the task is `'static`.
struct PushRunContext {
    run_repo: Arc<dyn RunRepo>,
    event_repo: Arc<dyn EventRepo>,
    worker_api: Arc<dyn WorkerApi>,
    outcome_service: Arc<RunOutcomeService>,
    plan: BackupPlan,
    run_group_id: RunGroupId,
    trigger: FireTrigger,
}

impl PushRunContext {
    async fn execute(&self, worker: Worker, request: BackupRequest) -> Result<(), RepoError> {
        let run_id = RunId::new_v4();
        let started_at = Utc::now();

        let running = EventRecord::new(
            self.plan.user_id.0,
            self.plan.repository_id.0,
            EventType::BackupRunning,
            EventSeverity::Info,
            format!("Backup running on worker {}", worker.name),
            started_at,
        )
        .with_plan(self.plan.id.0)
        .with_run(run_id.0)
        .with_worker(worker.id.0);
        self.event_repo.insert(&running).await?;

        let result = self.worker_api.backup(&worker, &request).await;
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0);

        let mut record = RunRecord {
            id: run_id.0,
            plan_id: self.plan.id.0,
            user_id: self.plan.user_id.0,
            repository_id: self.plan.repository_id.0,
            worker_id: Some(worker.id.0),
            run_group_id: Some(self.run_group_id.0),
            run_type: RunType::Backup.to_string(),
            status: RunStatus::Failed.to_string(),
            error: None,
            duration_ms: Some(duration_ms),
            snapshot_id: None,
            snapshot_time: None,
            output: None,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            created_at: finished_at,
        };

        match result {
            Ok(outcome) if outcome.success() => {
                let snapshot = extract_primary_snapshot(&outcome.body);
                record.status = RunStatus::Success.to_string();
                record.snapshot_id = snapshot.as_ref().map(|s| s.id.clone());
                record.snapshot_time = snapshot.as_ref().and_then(|s| s.time);
                record.output = Some(outcome.body);
                self.run_repo.insert(&record).await?;
                prom::RUNS_COMPLETED_TOTAL
                    .with_label_values(&["success"])
                    .inc();

                let event_type = if self.trigger.is_manual() {
                    EventType::ManualBackupCompleted
                } else {
                    EventType::BackupCompleted
                };
                let completed = EventRecord::new(
                    self.plan.user_id.0,
                    self.plan.repository_id.0,
                    event_type,
                    EventSeverity::Info,
                    format!("Backup completed on worker {}", worker.name),
                    finished_at,
                )
                .with_plan(self.plan.id.0)
                .with_run(run_id.0)
                .with_worker(worker.id.0)
                .resolved(finished_at);
                self.event_repo.insert(&completed).await?;

                if let Ok(run) = BackupRun::try_from(record) {
                    self.outcome_service.record_success(&run).await?;
                }
            }
            Ok(outcome) => {
                let error = outcome
                    .error_message()
                    .unwrap_or_else(|| format!("Worker returned HTTP {}", outcome.http_status));
                record.error = Some(error.clone());
                record.output = Some(outcome.body);
                self.run_repo.insert(&record).await?;
                prom::RUNS_COMPLETED_TOTAL
                    .with_label_values(&["failed"])
                    .inc();

                let failed = EventRecord::new(
                    self.plan.user_id.0,
                    self.plan.repository_id.0,
                    EventType::BackupFailed,
                    EventSeverity::Error,
                    format!("Backup failed on worker {}: {error}", worker.name),
                    finished_at,
                )
                .with_plan(self.plan.id.0)
                .with_run(run_id.0)
                .with_worker(worker.id.0);
                self.event_repo.insert(&failed).await?;
            }
            Err(call_error) => {
                let error = match &call_error {
                    WorkerCallError::Unreachable(message) => format!("Worker unreachable: {message}"),
                    other => other.to_string(),
                };
                record.error = Some(error.clone());
                self.run_repo.insert(&record).await?;
                prom::RUNS_COMPLETED_TOTAL
                    .with_label_values(&["failed"])
                    .inc();

                let unreachable = EventRecord::new(
                    self.plan.user_id.0,
                    self.plan.repository_id.0,
                    EventType::WorkerUnreachable,
                    EventSeverity::Error,
                    format!("Worker {} unreachable: {error}", worker.name),
                    finished_at,
                )
                .with_plan(self.plan.id.0)
                .with_run(run_id.0)
                .with_worker(worker.id.0);
                self.event_repo.insert(&unreachable).await?;
            }
        }

        Ok(())
    }
}
