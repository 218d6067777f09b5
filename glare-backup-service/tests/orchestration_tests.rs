use test_r::test;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use glare_backup_service::model::{
    BackupPlan, BackupRequest, CompleteRunRequest, PlanPathsConfig, RepositoryBackend,
    RetentionRules, RunStatus, Worker, WorkerStatus,
};
use glare_backup_service::repo::event::{EventRecord, EventRepo};
use glare_backup_service::repo::metrics::{AnomalyRecord, MetricRecord, MetricsRepo};
use glare_backup_service::repo::plan::{PlanRecord, PlanRepo, RunGroupSummary};
use glare_backup_service::repo::repository::{RepositoryRecord, RepositoryRepo};
use glare_backup_service::repo::run::{RunCompletion, RunRecord, RunRepo};
use glare_backup_service::repo::worker::{WorkerRecord, WorkerRepo, WorkerSyncUpdate};
use glare_backup_service::repo::RepoError;
use glare_backup_service::service::anomaly::SizeAnomalyService;
use glare_backup_service::service::dispatcher::{DispatchMode, Dispatcher, FireTrigger};
use glare_backup_service::service::lease::LeaseManager;
use glare_backup_service::service::outcome::RunOutcomeService;
use glare_backup_service::service::retention::RetentionService;
use glare_backup_service::service::run_groups::RunGroupService;
use glare_backup_service::service::runs::RunService;
use glare_backup_service::service::sweeper::{SnapshotSweeper, SweepError};
use glare_backup_service::service::worker_client::{
    WorkerApi, WorkerCallError, WorkerCallOutcome, WorkerVerb,
};
use glare_common::model::{PlanId, RepositoryId, RunId, TokenSecret, UserId, WorkerId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

test_r::enable!();

// --- In-memory database ----------------------------------------------------

#[derive(Default)]
struct DbState {
    plans: HashMap<Uuid, PlanRecord>,
    plan_workers: HashMap<Uuid, Vec<Uuid>>,
    repositories: HashMap<Uuid, RepositoryRecord>,
    repository_workers: HashMap<Uuid, Vec<Uuid>>,
    workers: HashMap<Uuid, WorkerRecord>,
    runs: Vec<RunRecord>,
    events: Vec<EventRecord>,
    metrics: Vec<MetricRecord>,
    storage_samples: Vec<(Uuid, Uuid)>,
    anomalies: Vec<AnomalyRecord>,
}

#[derive(Default)]
struct InMemoryDb {
    state: Mutex<DbState>,
}

impl InMemoryDb {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<T>(&self, f: impl FnOnce(&mut DbState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

struct InMemoryPlanRepo(Arc<InMemoryDb>);

#[async_trait]
impl PlanRepo for InMemoryPlanRepo {
    async fn get(&self, plan_id: &Uuid) -> Result<Option<PlanRecord>, RepoError> {
        Ok(self.0.with(|db| db.plans.get(plan_id).cloned()))
    }

    async fn get_for_user(
        &self,
        user_id: &Uuid,
        plan_id: &Uuid,
    ) -> Result<Option<PlanRecord>, RepoError> {
        Ok(self.0.with(|db| {
            db.plans
                .get(plan_id)
                .filter(|plan| plan.user_id == *user_id)
                .cloned()
        }))
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<PlanRecord>, RepoError> {
        Ok(self.0.with(|db| {
            let mut due: Vec<PlanRecord> = db
                .plans
                .values()
                .filter(|plan| {
                    plan.enabled && plan.next_run_at.map(|next| next <= now).unwrap_or(false)
                })
                .cloned()
                .collect();
            due.sort_by_key(|plan| (plan.next_run_at, plan.id));
            due
        }))
    }

    async fn worker_ids(&self, plan_id: &Uuid) -> Result<Vec<Uuid>, RepoError> {
        Ok(self
            .0
            .with(|db| db.plan_workers.get(plan_id).cloned().unwrap_or_default()))
    }

    async fn set_legacy_worker_id(
        &self,
        plan_id: &Uuid,
        worker_id: &Uuid,
    ) -> Result<(), RepoError> {
        self.0.with(|db| {
            if let Some(plan) = db.plans.get_mut(plan_id) {
                plan.worker_id = Some(*worker_id);
            }
        });
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        plan_id: &Uuid,
        owner: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        Ok(self.0.with(|db| {
            let Some(plan) = db.plans.get_mut(plan_id) else {
                return false;
            };
            let free = match (&plan.run_lease_until, &plan.run_lease_owner) {
                (None, _) => true,
                (Some(lease_until), _) if *lease_until < now => true,
                (_, Some(lease_owner)) => lease_owner == owner,
                _ => false,
            };
            if free {
                plan.run_lease_until = Some(until);
                plan.run_lease_owner = Some(owner.to_string());
            }
            free
        }))
    }

    async fn release_lease(&self, plan_id: &Uuid, owner: &str) -> Result<(), RepoError> {
        self.0.with(|db| {
            if let Some(plan) = db.plans.get_mut(plan_id) {
                if plan.run_lease_owner.as_deref() == Some(owner) {
                    plan.run_lease_until = None;
                    plan.run_lease_owner = None;
                }
            }
        });
        Ok(())
    }

    async fn mark_fire_started(
        &self,
        plan_id: &Uuid,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        self.0.with(|db| {
            if let Some(plan) = db.plans.get_mut(plan_id) {
                plan.last_status = Some("running".to_string());
                plan.next_run_at = next_run_at;
                plan.updated_at = now;
            }
        });
        Ok(())
    }

    async fn mark_fire_failed(
        &self,
        plan_id: &Uuid,
        error: &str,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        self.0.with(|db| {
            if let Some(plan) = db.plans.get_mut(plan_id) {
                plan.last_status = Some("failed".to_string());
                plan.last_error = Some(error.to_string());
                plan.last_run_at = Some(now);
                plan.next_run_at = next_run_at;
            }
        });
        Ok(())
    }

    async fn finalize_run_group(
        &self,
        plan_id: &Uuid,
        run_group_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RunGroupSummary>, RepoError> {
        Ok(self.0.with(|db| {
            let group: Vec<&RunRecord> = db
                .runs
                .iter()
                .filter(|run| {
                    run.plan_id == *plan_id && run.run_group_id == Some(*run_group_id)
                })
                .collect();

            let total = group.len() as i64;
            let unfinished = group
                .iter()
                .filter(|run| run.status == "pending" || run.status == "running")
                .count() as i64;
            if total == 0 || unfinished > 0 {
                return None;
            }

            let success = group.iter().filter(|run| run.status == "success").count() as i64;
            let failure = group.iter().filter(|run| run.status == "failed").count() as i64;
            let min_started_at = group.iter().filter_map(|run| run.started_at).min();
            let max_finished_at = group.iter().filter_map(|run| run.finished_at).max();
            let latest_failure_error = group
                .iter()
                .filter(|run| run.status == "failed")
                .max_by_key(|run| run.finished_at)
                .and_then(|run| run.error.clone());

            let summary = RunGroupSummary {
                total,
                success,
                failure,
                min_started_at,
                max_finished_at,
                latest_failure_error,
            };
            let outcome = summary.outcome();

            if let Some(plan) = db.plans.get_mut(plan_id) {
                plan.last_run_at = outcome.last_run_at;
                plan.last_status = Some(outcome.last_status.to_string());
                plan.last_error = outcome.last_error.clone();
                plan.last_duration_ms = Some(outcome.last_duration_ms);
                plan.updated_at = now;
            }

            Some(summary)
        }))
    }

    async fn catalog_for_worker(&self, worker_id: &Uuid) -> Result<Vec<PlanRecord>, RepoError> {
        Ok(self.0.with(|db| {
            db.plans
                .values()
                .filter(|plan| {
                    plan.enabled
                        && db
                            .plan_workers
                            .get(&plan.id)
                            .map(|workers| workers.contains(worker_id))
                            .unwrap_or(plan.worker_id == Some(*worker_id))
                })
                .cloned()
                .collect()
        }))
    }

    async fn first_for_repository_worker(
        &self,
        repository_id: &Uuid,
        worker_id: &Uuid,
    ) -> Result<Option<PlanRecord>, RepoError> {
        Ok(self.0.with(|db| {
            let mut plans: Vec<&PlanRecord> = db
                .plans
                .values()
                .filter(|plan| {
                    plan.repository_id == *repository_id
                        && db
                            .plan_workers
                            .get(&plan.id)
                            .map(|workers| workers.contains(worker_id))
                            .unwrap_or(plan.worker_id == Some(*worker_id))
                })
                .collect();
            plans.sort_by_key(|plan| (plan.created_at, plan.id));
            plans.first().map(|plan| (*plan).clone())
        }))
    }

    async fn set_enabled(
        &self,
        plan_id: &Uuid,
        enabled: bool,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepoError> {
        Ok(self.0.with(|db| {
            if let Some(plan) = db.plans.get_mut(plan_id) {
                plan.enabled = enabled;
                plan.next_run_at = next_run_at;
                true
            } else {
                false
            }
        }))
    }

    async fn delete(&self, plan_id: &Uuid) -> Result<bool, RepoError> {
        Ok(self.0.with(|db| {
            db.plan_workers.remove(plan_id);
            db.plans.remove(plan_id).is_some()
        }))
    }
}

struct InMemoryRepositoryRepo(Arc<InMemoryDb>);

#[async_trait]
impl RepositoryRepo for InMemoryRepositoryRepo {
    async fn get(&self, repository_id: &Uuid) -> Result<Option<RepositoryRecord>, RepoError> {
        Ok(self.0.with(|db| db.repositories.get(repository_id).cloned()))
    }

    async fn list_all(&self) -> Result<Vec<RepositoryRecord>, RepoError> {
        Ok(self.0.with(|db| db.repositories.values().cloned().collect()))
    }

    async fn backup_worker_ids(&self, repository_id: &Uuid) -> Result<Vec<Uuid>, RepoError> {
        Ok(self.0.with(|db| {
            db.repository_workers
                .get(repository_id)
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn set_option(
        &self,
        repository_id: &Uuid,
        key: &str,
        value: &str,
    ) -> Result<(), RepoError> {
        self.0.with(|db| {
            if let Some(repository) = db.repositories.get_mut(repository_id) {
                if let Value::Object(options) = &mut repository.options {
                    options.insert(key.to_string(), Value::String(value.to_string()));
                }
            }
        });
        Ok(())
    }

    async fn set_initialized(
        &self,
        repository_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        self.0.with(|db| {
            if let Some(repository) = db.repositories.get_mut(repository_id) {
                repository.initialized_at.get_or_insert(now);
            }
        });
        Ok(())
    }
}

struct InMemoryWorkerRepo(Arc<InMemoryDb>);

#[async_trait]
impl WorkerRepo for InMemoryWorkerRepo {
    async fn get(&self, worker_id: &Uuid) -> Result<Option<WorkerRecord>, RepoError> {
        Ok(self.0.with(|db| db.workers.get(worker_id).cloned()))
    }

    async fn get_many(&self, worker_ids: &[Uuid]) -> Result<Vec<WorkerRecord>, RepoError> {
        Ok(self.0.with(|db| {
            worker_ids
                .iter()
                .filter_map(|id| db.workers.get(id).cloned())
                .collect()
        }))
    }

    async fn record_sync(
        &self,
        worker_id: &Uuid,
        update: &WorkerSyncUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        self.0.with(|db| {
            if let Some(worker) = db.workers.get_mut(worker_id) {
                worker.status = update.status.clone();
                worker.last_seen_at = Some(now);
                worker.uptime_ms = update.uptime_ms;
            }
        });
        Ok(())
    }
}

struct InMemoryRunRepo(Arc<InMemoryDb>);

#[async_trait]
impl RunRepo for InMemoryRunRepo {
    async fn insert(&self, record: &RunRecord) -> Result<(), RepoError> {
        self.0.with(|db| db.runs.push(record.clone()));
        Ok(())
    }

    async fn claim_pending(
        &self,
        worker_id: &Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<RunRecord>, RepoError> {
        Ok(self.0.with(|db| {
            let mut pending: Vec<usize> = db
                .runs
                .iter()
                .enumerate()
                .filter(|(_, run)| run.worker_id == Some(*worker_id) && run.status == "pending")
                .map(|(idx, _)| idx)
                .collect();
            pending.sort_by_key(|idx| db.runs[*idx].created_at);
            pending.truncate(limit as usize);

            let mut claimed = Vec::new();
            for idx in pending {
                let run = &mut db.runs[idx];
                run.status = "running".to_string();
                run.started_at = Some(now);
                claimed.push(run.clone());
            }
            claimed
        }))
    }

    async fn complete(
        &self,
        run_id: &Uuid,
        worker_id: &Uuid,
        completion: &RunCompletion,
        now: DateTime<Utc>,
    ) -> Result<Option<RunRecord>, RepoError> {
        Ok(self.0.with(|db| {
            let run = db.runs.iter_mut().find(|run| {
                run.id == *run_id && run.worker_id == Some(*worker_id) && run.status == "running"
            })?;
            run.status = completion.status.clone();
            run.error = completion.error.clone();
            run.duration_ms = completion.duration_ms;
            if completion.snapshot_id.is_some() {
                run.snapshot_id = completion.snapshot_id.clone();
            }
            if completion.snapshot_time.is_some() {
                run.snapshot_time = completion.snapshot_time;
            }
            if completion.output.is_some() {
                run.output = completion.output.clone();
            }
            run.finished_at = Some(now);
            Some(run.clone())
        }))
    }

    async fn fail(&self, run_id: &Uuid, error: &str, now: DateTime<Utc>) -> Result<(), RepoError> {
        self.0.with(|db| {
            if let Some(run) = db.runs.iter_mut().find(|run| run.id == *run_id) {
                run.status = "failed".to_string();
                run.error = Some(error.to_string());
                run.finished_at = Some(now);
            }
        });
        Ok(())
    }

    async fn recent_backup_runs(
        &self,
        user_id: &Uuid,
        repository_id: &Uuid,
        limit: i64,
    ) -> Result<Vec<RunRecord>, RepoError> {
        Ok(self.0.with(|db| {
            let mut runs: Vec<RunRecord> = db
                .runs
                .iter()
                .filter(|run| {
                    run.user_id == *user_id
                        && run.repository_id == *repository_id
                        && run.run_type == "backup"
                })
                .cloned()
                .collect();
            runs.sort_by_key(|run| std::cmp::Reverse(run.created_at));
            runs.truncate(limit as usize);
            runs
        }))
    }

    async fn known_snapshot_ids(
        &self,
        user_id: &Uuid,
        repository_id: &Uuid,
    ) -> Result<Vec<String>, RepoError> {
        Ok(self.0.with(|db| {
            db.runs
                .iter()
                .filter(|run| run.user_id == *user_id && run.repository_id == *repository_id)
                .filter_map(|run| run.snapshot_id.clone())
                .collect()
        }))
    }
}

struct InMemoryEventRepo(Arc<InMemoryDb>);

#[async_trait]
impl EventRepo for InMemoryEventRepo {
    async fn insert(&self, record: &EventRecord) -> Result<(), RepoError> {
        self.0.with(|db| db.events.push(record.clone()));
        Ok(())
    }

    async fn recent_for_repository(
        &self,
        user_id: &Uuid,
        repository_id: &Uuid,
        limit: i64,
    ) -> Result<Vec<EventRecord>, RepoError> {
        Ok(self.0.with(|db| {
            let mut events: Vec<EventRecord> = db
                .events
                .iter()
                .filter(|event| {
                    event.user_id == *user_id && event.repository_id == *repository_id
                })
                .cloned()
                .collect();
            events.sort_by_key(|event| std::cmp::Reverse(event.created_at));
            events.truncate(limit as usize);
            events
        }))
    }

    async fn created_after(
        &self,
        user_id: &Uuid,
        after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EventRecord>, RepoError> {
        Ok(self.0.with(|db| {
            let mut events: Vec<EventRecord> = db
                .events
                .iter()
                .filter(|event| event.user_id == *user_id && event.created_at > after)
                .cloned()
                .collect();
            events.sort_by_key(|event| event.created_at);
            events.truncate(limit as usize);
            events
        }))
    }
}

struct InMemoryMetricsRepo(Arc<InMemoryDb>);

#[async_trait]
impl MetricsRepo for InMemoryMetricsRepo {
    async fn insert_metric(&self, record: &MetricRecord) -> Result<(), RepoError> {
        self.0.with(|db| db.metrics.push(record.clone()));
        Ok(())
    }

    async fn record_storage_sample(
        &self,
        user_id: &Uuid,
        run_id: &Uuid,
        _repository_id: &Uuid,
        _bytes_added: i64,
        _now: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        self.0.with(|db| {
            let key = (*user_id, *run_id);
            if !db.storage_samples.contains(&key) {
                db.storage_samples.push(key);
            }
        });
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
        Ok(self.0.with(|db| {
            let mut metrics: Vec<&MetricRecord> = db
                .metrics
                .iter()
                .filter(|metric| {
                    metric.user_id == *user_id
                        && metric.id != *exclude_metric_id
                        && metric.created_at <= before
                        && match plan_id {
                            Some(plan_id) => metric.plan_id == Some(*plan_id),
                            None => metric.repository_id == *repository_id,
                        }
                })
                .collect();
            metrics.sort_by_key(|metric| std::cmp::Reverse(metric.created_at));
            metrics.truncate(limit as usize);
            metrics.iter().map(|metric| metric.bytes_added).collect()
        }))
    }

    async fn insert_anomaly(&self, record: &AnomalyRecord) -> Result<(), RepoError> {
        self.0.with(|db| db.anomalies.push(record.clone()));
        Ok(())
    }

    async fn resolve_open_anomalies(
        &self,
        user_id: &Uuid,
        plan_id: Option<&Uuid>,
        repository_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, RepoError> {
        Ok(self.0.with(|db| {
            let mut resolved = 0;
            for anomaly in db.anomalies.iter_mut() {
                if anomaly.user_id == *user_id
                    && anomaly.repository_id == *repository_id
                    && anomaly.plan_id == plan_id.copied()
                    && anomaly.status == "open"
                {
                    anomaly.status = "resolved".to_string();
                    anomaly.resolved_at = Some(now);
                    resolved += 1;
                }
            }
            resolved
        }))
    }
}

// --- Fake worker API -------------------------------------------------------

#[derive(Clone)]
enum FakeCallResult {
    Respond(u16, Value),
    Unreachable,
}

#[derive(Default)]
struct FakeWorkerApi {
    backup_results: Mutex<HashMap<Uuid, FakeCallResult>>,
    snapshot_lists: Mutex<HashMap<Uuid, Value>>,
    forget_calls: Mutex<Vec<Uuid>>,
}

impl FakeWorkerApi {
    fn on_backup(&self, worker_id: &WorkerId, result: FakeCallResult) {
        self.backup_results
            .lock()
            .unwrap()
            .insert(worker_id.0, result);
    }

    fn on_snapshot_list(&self, worker_id: &WorkerId, body: Value) {
        self.snapshot_lists
            .lock()
            .unwrap()
            .insert(worker_id.0, body);
    }

    fn forget_call_count(&self) -> usize {
        self.forget_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkerApi for FakeWorkerApi {
    async fn call(
        &self,
        worker: &Worker,
        verb: WorkerVerb,
        _body: Value,
    ) -> Result<WorkerCallOutcome, WorkerCallError> {
        match verb {
            WorkerVerb::Backup => {
                let result = self
                    .backup_results
                    .lock()
                    .unwrap()
                    .get(&worker.id.0)
                    .cloned()
                    .unwrap_or(FakeCallResult::Unreachable);
                match result {
                    FakeCallResult::Respond(http_status, body) => {
                        Ok(WorkerCallOutcome { http_status, body })
                    }
                    FakeCallResult::Unreachable => {
                        Err(WorkerCallError::Unreachable("connection refused".to_string()))
                    }
                }
            }
            WorkerVerb::Forget => {
                self.forget_calls.lock().unwrap().push(worker.id.0);
                Ok(WorkerCallOutcome {
                    http_status: 200,
                    body: json!({ "rustic": { "success": true } }),
                })
            }
            WorkerVerb::RepositorySnapshots => {
                let body = self
                    .snapshot_lists
                    .lock()
                    .unwrap()
                    .get(&worker.id.0)
                    .cloned()
                    .unwrap_or_else(|| json!({ "snapshots": [] }));
                Ok(WorkerCallOutcome {
                    http_status: 200,
                    body,
                })
            }
            _ => Ok(WorkerCallOutcome {
                http_status: 200,
                body: Value::Null,
            }),
        }
    }
}

// --- Fixture ---------------------------------------------------------------

struct Fixture {
    db: Arc<InMemoryDb>,
    worker_api: Arc<FakeWorkerApi>,
    plan_repo: Arc<InMemoryPlanRepo>,
    run_service: Arc<RunService>,
    run_group_service: Arc<RunGroupService>,
    sweeper: Arc<SnapshotSweeper>,
    outcome_service: Arc<RunOutcomeService>,
    user_id: UserId,
}

impl Fixture {
    fn new() -> Self {
        let db = InMemoryDb::new();
        let worker_api = Arc::new(FakeWorkerApi::default());

        let plan_repo = Arc::new(InMemoryPlanRepo(db.clone()));
        let repository_repo = Arc::new(InMemoryRepositoryRepo(db.clone()));
        let worker_repo = Arc::new(InMemoryWorkerRepo(db.clone()));
        let run_repo = Arc::new(InMemoryRunRepo(db.clone()));
        let event_repo = Arc::new(InMemoryEventRepo(db.clone()));
        let metrics_repo = Arc::new(InMemoryMetricsRepo(db.clone()));

        let anomaly_service = Arc::new(SizeAnomalyService::new(
            metrics_repo.clone(),
            event_repo.clone(),
        ));
        let outcome_service = Arc::new(RunOutcomeService::new(
            metrics_repo.clone(),
            anomaly_service,
        ));
        let retention_service = Arc::new(RetentionService::new(
            plan_repo.clone(),
            repository_repo.clone(),
            worker_repo.clone(),
            run_repo.clone(),
            event_repo.clone(),
            worker_api.clone(),
        ));
        let run_group_service = Arc::new(RunGroupService::new(
            plan_repo.clone(),
            retention_service,
        ));
        let run_service = Arc::new(RunService::new(
            run_repo.clone(),
            event_repo.clone(),
            outcome_service.clone(),
            run_group_service.clone(),
        ));
        let sweeper = Arc::new(SnapshotSweeper::new(
            repository_repo,
            worker_repo,
            plan_repo.clone(),
            run_repo,
            outcome_service.clone(),
            worker_api.clone(),
        ));

        Fixture {
            db,
            worker_api,
            plan_repo,
            run_service,
            run_group_service,
            sweeper,
            outcome_service,
            user_id: UserId::new_v4(),
        }
    }

    fn dispatcher(&self, mode: DispatchMode) -> Dispatcher {
        Dispatcher::new(
            self.plan_repo.clone(),
            Arc::new(InMemoryRepositoryRepo(self.db.clone())),
            Arc::new(InMemoryWorkerRepo(self.db.clone())),
            Arc::new(InMemoryRunRepo(self.db.clone())),
            Arc::new(InMemoryEventRepo(self.db.clone())),
            self.worker_api.clone(),
            self.outcome_service.clone(),
            self.run_group_service.clone(),
            mode,
        )
    }

    fn add_worker(&self, name: &str) -> Worker {
        let now = Utc::now();
        let id = WorkerId::new_v4();
        let record = WorkerRecord {
            id: id.0,
            user_id: self.user_id.0,
            name: name.to_string(),
            region: None,
            status: "online".to_string(),
            last_seen_at: Some(now),
            uptime_ms: 0,
            requests_total: 0,
            error_total: 0,
            endpoint: Some(format!("http://{name}.internal:8440")),
            sync_token: Some("prefix:suffix".to_string()),
            sync_token_hash: "hash".to_string(),
            created_at: now,
            updated_at: now,
        };
        self.db
            .with(|db| db.workers.insert(id.0, record.clone()));
        Worker::try_from(record).unwrap()
    }

    fn add_repository(&self, workers: &[&Worker]) -> RepositoryId {
        let now = Utc::now();
        let id = RepositoryId::new_v4();
        let record = RepositoryRecord {
            id: id.0,
            user_id: self.user_id.0,
            name: "main".to_string(),
            backend: "local".to_string(),
            path: "/srv/backups/main".to_string(),
            password: Some("repo-password".to_string()),
            options: json!({}),
            initialized_at: Some(now),
            primary_worker_id: workers.first().map(|w| w.id.0),
            created_at: now,
            updated_at: now,
        };
        self.db.with(|db| {
            db.repositories.insert(id.0, record);
            db.repository_workers
                .insert(id.0, workers.iter().map(|w| w.id.0).collect());
        });
        id
    }

    fn add_plan(
        &self,
        repository_id: RepositoryId,
        workers: &[&Worker],
        cron: &str,
        retention: RetentionRules,
        prune: bool,
    ) -> BackupPlan {
        let now = Utc::now();
        let plan = BackupPlan {
            id: PlanId::new_v4(),
            user_id: self.user_id,
            repository_id,
            worker_id: workers.first().map(|w| w.id),
            name: "nightly".to_string(),
            cron: cron.to_string(),
            paths: PlanPathsConfig {
                default_paths: vec!["/a".to_string()],
                worker_paths: Default::default(),
            },
            tags: vec!["scheduled".to_string()],
            dry_run: false,
            enabled: true,
            last_run_at: None,
            next_run_at: Some(now),
            last_status: None,
            last_error: None,
            last_duration_ms: None,
            prune,
            retention,
            created_at: now,
            updated_at: now,
        };

        let record = PlanRecord {
            id: plan.id.0,
            user_id: plan.user_id.0,
            repository_id: plan.repository_id.0,
            worker_id: plan.worker_id.map(|w| w.0),
            name: plan.name.clone(),
            cron: plan.cron.clone(),
            paths: serde_json::to_value(&plan.paths).unwrap(),
            tags: serde_json::to_value(&plan.tags).unwrap(),
            dry_run: plan.dry_run,
            enabled: plan.enabled,
            last_run_at: None,
            next_run_at: plan.next_run_at,
            last_status: None,
            last_error: None,
            last_duration_ms: None,
            prune: plan.prune,
            keep_last: plan.retention.keep_last,
            keep_daily: plan.retention.keep_daily,
            keep_weekly: plan.retention.keep_weekly,
            keep_monthly: plan.retention.keep_monthly,
            keep_yearly: plan.retention.keep_yearly,
            keep_within: plan.retention.keep_within.clone(),
            run_lease_until: None,
            run_lease_owner: None,
            created_at: now,
            updated_at: now,
        };
        self.db.with(|db| {
            db.plans.insert(record.id, record);
            db.plan_workers
                .insert(plan.id.0, workers.iter().map(|w| w.id.0).collect());
        });
        plan
    }

    fn plan_record(&self, plan_id: &PlanId) -> PlanRecord {
        self.db
            .with(|db| db.plans.get(&plan_id.0).cloned())
            .expect("plan exists")
    }

    fn runs(&self) -> Vec<RunRecord> {
        self.db.with(|db| db.runs.clone())
    }

    fn events_of_type(&self, event_type: &str) -> Vec<EventRecord> {
        self.db.with(|db| {
            db.events
                .iter()
                .filter(|event| event.event_type == event_type)
                .cloned()
                .collect()
        })
    }
}

fn successful_backup_body() -> Value {
    json!({
        "rustic": { "success": true },
        "snapshot": { "id": "abcdef1234567890", "time": "2024-03-01T10:00:00Z" },
        "summary": { "data_added": 1048576 }
    })
}

// --- Push mode -------------------------------------------------------------

#[test]
async fn push_fire_with_two_workers_succeeds_end_to_end() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let w2 = fixture.add_worker("w2");
    let repository_id = fixture.add_repository(&[&w1, &w2]);
    let plan = fixture.add_plan(
        repository_id,
        &[&w1, &w2],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    fixture
        .worker_api
        .on_backup(&w1.id, FakeCallResult::Respond(200, successful_backup_body()));
    fixture
        .worker_api
        .on_backup(&w2.id, FakeCallResult::Respond(200, successful_backup_body()));

    let before = Utc::now();
    fixture
        .dispatcher(DispatchMode::Push)
        .fire(&plan, FireTrigger::Scheduled)
        .await
        .unwrap();

    let runs = fixture.runs();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| run.status == "success"));
    assert!(runs
        .iter()
        .all(|run| run.snapshot_id.as_deref() == Some("abcdef1234567890")));

    let record = fixture.plan_record(&plan.id);
    assert_eq!(record.last_status.as_deref(), Some("success"));
    assert_eq!(record.last_error, None);
    assert!(record.last_duration_ms.unwrap() >= 0);
    let next_run_at = record.next_run_at.unwrap();
    assert!(next_run_at > before);
    assert_eq!(next_run_at.timestamp() % 300, 0);

    assert_eq!(fixture.events_of_type("backup_completed").len(), 2);
    let metrics = fixture.db.with(|db| db.metrics.clone());
    assert_eq!(metrics.len(), 2);
    assert!(metrics.iter().all(|metric| metric.bytes_added == 1048576));
    // Fewer than 5 prior samples: the anomaly detector stays silent.
    assert!(fixture.db.with(|db| db.anomalies.is_empty()));
    assert_eq!(fixture.db.with(|db| db.storage_samples.len()), 2);
}

#[test]
async fn push_fire_isolates_an_unreachable_worker() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let w2 = fixture.add_worker("w2");
    let repository_id = fixture.add_repository(&[&w1, &w2]);
    let plan = fixture.add_plan(
        repository_id,
        &[&w1, &w2],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    fixture
        .worker_api
        .on_backup(&w1.id, FakeCallResult::Respond(200, successful_backup_body()));
    fixture
        .worker_api
        .on_backup(&w2.id, FakeCallResult::Unreachable);

    fixture
        .dispatcher(DispatchMode::Push)
        .fire(&plan, FireTrigger::Scheduled)
        .await
        .unwrap();

    let runs = fixture.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs.iter().filter(|r| r.status == "success").count(), 1);
    assert_eq!(runs.iter().filter(|r| r.status == "failed").count(), 1);

    let record = fixture.plan_record(&plan.id);
    assert_eq!(record.last_status.as_deref(), Some("failed"));
    assert_eq!(record.last_error.as_deref(), Some("1/2 workers failed"));
    assert_eq!(fixture.events_of_type("worker_unreachable").len(), 1);
}

#[test]
async fn fire_with_empty_paths_fails_closed() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let repository_id = fixture.add_repository(&[&w1]);
    let mut plan = fixture.add_plan(
        repository_id,
        &[&w1],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );
    plan.paths = PlanPathsConfig::default();

    fixture
        .dispatcher(DispatchMode::Push)
        .fire(&plan, FireTrigger::Scheduled)
        .await
        .unwrap();

    assert!(fixture.runs().is_empty());
    let record = fixture.plan_record(&plan.id);
    assert_eq!(record.last_status.as_deref(), Some("failed"));

    let failures = fixture.events_of_type("backup_failed");
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].details.as_ref().unwrap()["reason"],
        json!("empty_paths")
    );
}

#[test]
async fn fire_without_attached_workers_records_a_sentinel_run() {
    let fixture = Fixture::new();
    let attached = fixture.add_worker("attached");
    let detached = fixture.add_worker("detached");
    let repository_id = fixture.add_repository(&[&attached]);
    // The plan targets only a worker that is not attached to the repository.
    let plan = fixture.add_plan(
        repository_id,
        &[&detached],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    fixture
        .dispatcher(DispatchMode::Push)
        .fire(&plan, FireTrigger::Scheduled)
        .await
        .unwrap();

    let runs = fixture.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "failed");
    assert_eq!(runs[0].worker_id, None);

    let record = fixture.plan_record(&plan.id);
    assert_eq!(record.last_status.as_deref(), Some("failed"));

    let failures = fixture.events_of_type("backup_failed");
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].details.as_ref().unwrap()["reason"],
        json!("worker_not_attached_to_repository")
    );
}

// --- Retention -------------------------------------------------------------

#[test]
async fn retention_prunes_after_a_successful_fire() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let repository_id = fixture.add_repository(&[&w1]);
    let plan = fixture.add_plan(
        repository_id,
        &[&w1],
        "*/5 * * * *",
        RetentionRules {
            keep_last: Some(7),
            ..RetentionRules::default()
        },
        true,
    );

    fixture
        .worker_api
        .on_backup(&w1.id, FakeCallResult::Respond(200, successful_backup_body()));

    fixture
        .dispatcher(DispatchMode::Push)
        .fire(&plan, FireTrigger::Scheduled)
        .await
        .unwrap();

    assert_eq!(fixture.worker_api.forget_call_count(), 1);

    let runs = fixture.runs();
    let prune_runs: Vec<_> = runs.iter().filter(|r| r.run_type == "prune").collect();
    assert_eq!(prune_runs.len(), 1);
    assert_eq!(prune_runs[0].status, "success");
    assert_eq!(prune_runs[0].run_group_id, None);
    assert_eq!(fixture.events_of_type("prune_completed").len(), 1);
}

#[test]
async fn retention_is_skipped_when_every_backup_failed() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let repository_id = fixture.add_repository(&[&w1]);
    let plan = fixture.add_plan(
        repository_id,
        &[&w1],
        "*/5 * * * *",
        RetentionRules {
            keep_last: Some(7),
            ..RetentionRules::default()
        },
        true,
    );

    fixture
        .worker_api
        .on_backup(&w1.id, FakeCallResult::Unreachable);

    fixture
        .dispatcher(DispatchMode::Push)
        .fire(&plan, FireTrigger::Scheduled)
        .await
        .unwrap();

    assert_eq!(fixture.worker_api.forget_call_count(), 0);
    assert!(fixture.runs().iter().all(|r| r.run_type == "backup"));
}

// --- Pull mode -------------------------------------------------------------

#[test]
async fn pull_fire_enqueues_claimable_runs_and_finalizes_on_last_completion() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let w2 = fixture.add_worker("w2");
    let w3 = fixture.add_worker("w3");
    let repository_id = fixture.add_repository(&[&w1, &w2, &w3]);
    let plan = fixture.add_plan(
        repository_id,
        &[&w1, &w2, &w3],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    fixture
        .dispatcher(DispatchMode::Pull)
        .fire(&plan, FireTrigger::Scheduled)
        .await
        .unwrap();

    let runs = fixture.runs();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|run| run.status == "pending"));
    for run in &runs {
        let request: BackupRequest =
            serde_json::from_value(run.output.as_ref().unwrap()["request"].clone()).unwrap();
        assert_eq!(request.paths, vec!["/a".to_string()]);
        assert_eq!(request.password.as_deref(), Some("repo-password"));
    }
    assert_eq!(fixture.events_of_type("backup_pending").len(), 3);

    // Workers only see their own queue.
    let claimed_w1 = fixture.run_service.claim(&w1, None).await.unwrap();
    assert_eq!(claimed_w1.len(), 1);
    // A second claim by the same identity finds nothing left.
    assert!(fixture.run_service.claim(&w1, None).await.unwrap().is_empty());
    let claimed_w2 = fixture.run_service.claim(&w2, None).await.unwrap();
    let claimed_w3 = fixture.run_service.claim(&w3, None).await.unwrap();

    fixture
        .run_service
        .complete(
            &w1,
            &claimed_w1[0].id,
            CompleteRunRequest {
                status: RunStatus::Success,
                error: None,
                duration_ms: Some(1200),
                snapshot_id: None,
                snapshot_time: None,
                output: Some(successful_backup_body()),
            },
        )
        .await
        .unwrap();
    fixture
        .run_service
        .complete(
            &w2,
            &claimed_w2[0].id,
            CompleteRunRequest {
                status: RunStatus::Success,
                error: None,
                duration_ms: Some(900),
                snapshot_id: Some("fedcba9876543210".to_string()),
                snapshot_time: Some(Utc::now()),
                output: None,
            },
        )
        .await
        .unwrap();

    // Two of three workers reported; the fire must not finalize yet.
    let record = fixture.plan_record(&plan.id);
    assert_eq!(record.last_status.as_deref(), Some("running"));

    fixture
        .run_service
        .complete(
            &w3,
            &claimed_w3[0].id,
            CompleteRunRequest {
                status: RunStatus::Failed,
                error: Some("disk full".to_string()),
                duration_ms: None,
                snapshot_id: None,
                snapshot_time: None,
                output: None,
            },
        )
        .await
        .unwrap();

    let record = fixture.plan_record(&plan.id);
    assert_eq!(record.last_status.as_deref(), Some("failed"));
    assert_eq!(record.last_error.as_deref(), Some("1/3 workers failed"));

    // The snapshot reference was recovered from the output blob for w1.
    let snapshot_ids: Vec<Option<String>> = fixture
        .runs()
        .iter()
        .filter(|run| run.status == "success")
        .map(|run| run.snapshot_id.clone())
        .collect();
    assert!(snapshot_ids.contains(&Some("abcdef1234567890".to_string())));
    assert!(snapshot_ids.contains(&Some("fedcba9876543210".to_string())));
}

#[test]
async fn malformed_queued_payload_is_auto_failed_on_claim() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let repository_id = fixture.add_repository(&[&w1]);
    let plan = fixture.add_plan(
        repository_id,
        &[&w1],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    let now = Utc::now();
    fixture.db.with(|db| {
        db.runs.push(RunRecord {
            id: Uuid::new_v4(),
            plan_id: plan.id.0,
            user_id: fixture.user_id.0,
            repository_id: repository_id.0,
            worker_id: Some(w1.id.0),
            run_group_id: None,
            run_type: "backup".to_string(),
            status: "pending".to_string(),
            error: None,
            duration_ms: None,
            snapshot_id: None,
            snapshot_time: None,
            output: Some(json!({ "bogus": true })),
            started_at: None,
            finished_at: None,
            created_at: now,
        });
    });

    let claimed = fixture.run_service.claim(&w1, Some(5)).await.unwrap();
    assert!(claimed.is_empty());

    let runs = fixture.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "failed");
    assert_eq!(runs[0].error.as_deref(), Some("Invalid queued run payload"));
    // The source emits no backup_failed event for this case.
    assert!(fixture.events_of_type("backup_failed").is_empty());
}

#[test]
async fn completing_a_foreign_run_is_not_found() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let w2 = fixture.add_worker("w2");
    let repository_id = fixture.add_repository(&[&w1, &w2]);
    let plan = fixture.add_plan(
        repository_id,
        &[&w1],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    fixture
        .dispatcher(DispatchMode::Pull)
        .fire(&plan, FireTrigger::Scheduled)
        .await
        .unwrap();
    let claimed = fixture.run_service.claim(&w1, None).await.unwrap();

    let result = fixture
        .run_service
        .complete(
            &w2,
            &claimed[0].id,
            CompleteRunRequest {
                status: RunStatus::Success,
                error: None,
                duration_ms: None,
                snapshot_id: None,
                snapshot_time: None,
                output: None,
            },
        )
        .await;

    assert!(matches!(
        result,
        Err(glare_backup_service::service::runs::RunServiceError::NotFound)
    ));
}

// --- Lease -----------------------------------------------------------------

#[test]
async fn lease_excludes_other_owners_until_released() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let repository_id = fixture.add_repository(&[&w1]);
    let plan = fixture.add_plan(
        repository_id,
        &[&w1],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    let lease_a = LeaseManager::new(
        fixture.plan_repo.clone(),
        "replica-a".to_string(),
        Duration::from_secs(120),
    );
    let lease_b = LeaseManager::new(
        fixture.plan_repo.clone(),
        "replica-b".to_string(),
        Duration::from_secs(120),
    );

    assert!(lease_a.acquire(&plan.id).await.unwrap());
    // Reentrant for the same owner.
    assert!(lease_a.acquire(&plan.id).await.unwrap());
    // Denied for a different owner while held.
    assert!(!lease_b.acquire(&plan.id).await.unwrap());

    lease_a.release(&plan.id).await.unwrap();
    assert!(lease_b.acquire(&plan.id).await.unwrap());
}

#[test]
async fn expired_lease_can_be_taken_over() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let repository_id = fixture.add_repository(&[&w1]);
    let plan = fixture.add_plan(
        repository_id,
        &[&w1],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    // A crashed replica left an expired lease behind.
    fixture.db.with(|db| {
        let record = db.plans.get_mut(&plan.id.0).unwrap();
        record.run_lease_owner = Some("crashed-replica".to_string());
        record.run_lease_until = Some(Utc::now() - ChronoDuration::seconds(30));
    });

    let lease = LeaseManager::new(
        fixture.plan_repo.clone(),
        "replica-b".to_string(),
        Duration::from_secs(120),
    );
    assert!(lease.acquire(&plan.id).await.unwrap());
}

// --- Sweeper ---------------------------------------------------------------

fn snapshot_list_body(entries: &[(&str, &str)]) -> Value {
    let snapshots: Vec<Value> = entries
        .iter()
        .map(|(id, time)| json!({ "id": id, "time": time, "paths": ["/a"] }))
        .collect();
    json!({ "rustic": { "success": true }, "snapshots": snapshots })
}

#[test]
async fn sweeper_imports_unknown_snapshots_once() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let repository_id = fixture.add_repository(&[&w1]);
    fixture.add_plan(
        repository_id,
        &[&w1],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    fixture.worker_api.on_snapshot_list(
        &w1.id,
        snapshot_list_body(&[
            ("1111111111aaaaaa", "2024-03-01T10:00:00Z"),
            ("2222222222bbbbbb", "2024-03-01T11:00:00Z"),
        ]),
    );

    let report = fixture.sweeper.sweep_user(&fixture.user_id, true).await.unwrap();
    assert_eq!(report.imported_runs, 2);

    let runs = fixture.runs();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| run.status == "success"));
    assert!(runs.iter().all(|run| run.run_group_id.is_none()));
    assert!(runs
        .iter()
        .all(|run| run.started_at == run.finished_at && run.started_at.is_some()));

    // Second sweep with no new snapshots: idempotent.
    let report = fixture.sweeper.sweep_user(&fixture.user_id, true).await.unwrap();
    assert_eq!(report.imported_runs, 0);
    assert_eq!(fixture.runs().len(), 2);
}

#[test]
async fn sweeper_skips_snapshots_matching_a_known_short_id() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let repository_id = fixture.add_repository(&[&w1]);
    let plan = fixture.add_plan(
        repository_id,
        &[&w1],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    // A run already recorded the snapshot under its short id.
    let now = Utc::now();
    fixture.db.with(|db| {
        db.runs.push(RunRecord {
            id: Uuid::new_v4(),
            plan_id: plan.id.0,
            user_id: fixture.user_id.0,
            repository_id: repository_id.0,
            worker_id: Some(w1.id.0),
            run_group_id: None,
            run_type: "backup".to_string(),
            status: "success".to_string(),
            error: None,
            duration_ms: None,
            snapshot_id: Some("abcdef12".to_string()),
            snapshot_time: Some(now),
            output: None,
            started_at: Some(now),
            finished_at: Some(now),
            created_at: now,
        });
    });

    fixture.worker_api.on_snapshot_list(
        &w1.id,
        snapshot_list_body(&[("abcdef1234567890", "2024-03-01T10:00:00Z")]),
    );

    let report = fixture.sweeper.sweep_user(&fixture.user_id, true).await.unwrap();
    assert_eq!(report.imported_runs, 0);
    assert_eq!(fixture.runs().len(), 1);
}

#[test]
async fn sweeper_debounces_repeated_syncs_per_user() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let repository_id = fixture.add_repository(&[&w1]);
    fixture.add_plan(
        repository_id,
        &[&w1],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    fixture.sweeper.sweep_user(&fixture.user_id, false).await.unwrap();
    let second = fixture.sweeper.sweep_user(&fixture.user_id, false).await;
    assert!(matches!(second, Err(SweepError::Debounced)));
    // Force bypasses the debounce.
    assert!(fixture.sweeper.sweep_user(&fixture.user_id, true).await.is_ok());
}

// --- Anomaly pipeline ------------------------------------------------------

#[test]
async fn size_anomaly_fires_on_a_large_outlier() {
    let fixture = Fixture::new();
    let w1 = fixture.add_worker("w1");
    let repository_id = fixture.add_repository(&[&w1]);
    let plan = fixture.add_plan(
        repository_id,
        &[&w1],
        "*/5 * * * *",
        RetentionRules::default(),
        false,
    );

    // Ten stable prior samples for the same (user, plan).
    let base = Utc::now() - ChronoDuration::hours(11);
    let prior = [100, 102, 101, 99, 100, 98, 103, 100, 101, 100];
    fixture.db.with(|db| {
        for (i, bytes) in prior.iter().enumerate() {
            db.metrics.push(MetricRecord {
                id: Uuid::new_v4(),
                run_id: Uuid::new_v4(),
                user_id: fixture.user_id.0,
                plan_id: Some(plan.id.0),
                repository_id: repository_id.0,
                snapshot_id: None,
                bytes_added: *bytes,
                bytes_processed: None,
                files_new: None,
                files_changed: None,
                files_unmodified: None,
                created_at: base + ChronoDuration::hours(i as i64),
            });
        }
    });

    let run = glare_backup_service::model::BackupRun {
        id: RunId::new_v4(),
        plan_id: plan.id,
        user_id: fixture.user_id,
        repository_id,
        worker_id: Some(w1.id),
        run_group_id: None,
        run_type: glare_backup_service::model::RunType::Backup,
        status: RunStatus::Success,
        error: None,
        duration_ms: Some(1000),
        snapshot_id: Some("abc".to_string()),
        snapshot_time: Some(Utc::now()),
        output: Some(json!({ "summary": { "data_added": 600 } })),
        started_at: Some(Utc::now()),
        finished_at: Some(Utc::now()),
    };
    fixture.outcome_service.record_success(&run).await.unwrap();

    let anomalies = fixture.db.with(|db| db.anomalies.clone());
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].reason, "larger_than_expected");
    assert_eq!(anomalies[0].severity, "error");
    assert_eq!(anomalies[0].expected_bytes, 100);
    assert_eq!(anomalies[0].actual_bytes, 600);

    let events = fixture.events_of_type("backup_size_anomaly");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].details.as_ref().unwrap()["actualBytes"], json!(600));

    // A subsequent normal-sized run resolves the open anomaly.
    let normal_run = glare_backup_service::model::BackupRun {
        output: Some(json!({ "summary": { "data_added": 101 } })),
        id: RunId::new_v4(),
        ..run
    };
    fixture
        .outcome_service
        .record_success(&normal_run)
        .await
        .unwrap();
    let anomalies = fixture.db.with(|db| db.anomalies.clone());
    assert!(anomalies.iter().all(|a| a.status == "resolved"));
}

// --- Worker heartbeat ------------------------------------------------------

#[test]
async fn worker_online_window_is_45_seconds() {
    let fixture = Fixture::new();
    let mut worker = fixture.add_worker("w1");
    let now = Utc::now();

    worker.last_seen_at = Some(now - ChronoDuration::seconds(44));
    assert!(worker.is_online(now));
    worker.last_seen_at = Some(now - ChronoDuration::seconds(46));
    assert!(!worker.is_online(now));
    worker.last_seen_at = None;
    assert!(!worker.is_online(now));
}

#[test]
async fn worker_status_round_trips() {
    assert_eq!(WorkerStatus::Online.to_string(), "online");
    assert_eq!(
        "degraded".parse::<WorkerStatus>().unwrap(),
        WorkerStatus::Degraded
    );
    assert_eq!(
        TokenSecret::new("secret").as_str(),
        "secret"
    );
    assert_eq!(RepositoryBackend::S3.to_string(), "s3");
}
