use crate::metrics as prom;
use crate::model::{BackupRun, Repository, RunStatus, RunType, SweepReport, Worker};
use crate::repo::plan::PlanRepo;
use crate::repo::repository::RepositoryRepo;
use crate::repo::run::{RunRecord, RunRepo};
use crate::repo::worker::WorkerRepo;
use crate::repo::RepoError;
use crate::service::options::normalize_backend_options;
use crate::service::outcome::RunOutcomeService;
use crate::service::snapshots::extract_snapshot_records;
use crate::service::worker_client::{RepositoryTargetRequest, WorkerApi};
use chrono::{DateTime, Utc};
use glare_common::model::UserId;
use glare_common::SafeDisplay;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Minimum spacing in seconds between on-demand syncs of the same user.
pub const SYNC_DEBOUNCE_SECONDS: i64 = 5 * 60;
/// Short-id prefix length used for "probably the same snapshot" matching.
const SHORT_ID_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Snapshot sync was requested too recently, try again later")]
    Debounced,
    #[error(transparent)]
    InternalRepoError(#[from] RepoError),
}

impl SafeDisplay for SweepError {
    fn to_safe_string(&self) -> String {
        match self {
            SweepError::Debounced => self.to_string(),
            SweepError::InternalRepoError(inner) => inner.to_safe_string(),
        }
    }
}

/// Imports snapshots that exist on workers but never made it through the
/// normal completion path, by synthesizing successful runs for them.
pub struct SnapshotSweeper {
    repository_repo: Arc<dyn RepositoryRepo>,
    worker_repo: Arc<dyn WorkerRepo>,
    plan_repo: Arc<dyn PlanRepo>,
    run_repo: Arc<dyn RunRepo>,
    outcome_service: Arc<RunOutcomeService>,
    worker_api: Arc<dyn WorkerApi>,
    last_sync: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl SnapshotSweeper {
    pub fn new(
        repository_repo: Arc<dyn RepositoryRepo>,
        worker_repo: Arc<dyn WorkerRepo>,
        plan_repo: Arc<dyn PlanRepo>,
        run_repo: Arc<dyn RunRepo>,
        outcome_service: Arc<RunOutcomeService>,
        worker_api: Arc<dyn WorkerApi>,
    ) -> Self {
        Self {
            repository_repo,
            worker_repo,
            plan_repo,
            run_repo,
            outcome_service,
            worker_api,
            last_sync: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep_all().await {
                error!("Snapshot sweep failed: {err}");
            }
        }
    }

    /// Periodic sweep over every user with repositories. The 30-minute cadence
    /// dwarfs the per-user debounce, so the loop always forces.
    pub async fn sweep_all(&self) -> Result<(), RepoError> {
        let repositories = self.repository_repo.list_all().await?;
        let users: BTreeSet<Uuid> = repositories.iter().map(|r| r.user_id).collect();

        for user_id in users {
            match self.sweep_user(&UserId(user_id), true).await {
                Ok(report) if report.imported_runs > 0 => {
                    info!(
                        user_id = %user_id,
                        imported = report.imported_runs,
                        "Snapshot sweep imported missing runs"
                    );
                }
                Ok(_) => {}
                Err(SweepError::Debounced) => {}
                Err(SweepError::InternalRepoError(err)) => {
                    error!(user_id = %user_id, "Snapshot sweep failed for user: {err}");
                }
            }
        }
        Ok(())
    }

    pub async fn sweep_user(
        &self,
        user_id: &UserId,
        force: bool,
    ) -> Result<SweepReport, SweepError> {
        {
            let mut last_sync = self.last_sync.lock().await;
            let now = Utc::now();
            if !force {
                if let Some(last) = last_sync.get(&user_id.0) {
                    if now - *last < chrono::Duration::seconds(SYNC_DEBOUNCE_SECONDS) {
                        return Err(SweepError::Debounced);
                    }
                }
            }
            last_sync.insert(user_id.0, now);
        }

        let mut report = SweepReport {
            repositories_checked: 0,
            workers_queried: 0,
            imported_runs: 0,
        };

        let repositories = self.repository_repo.list_all().await?;
        for record in repositories {
            if record.user_id != user_id.0 {
                continue;
            }
            let Ok(repository) = Repository::try_from(record) else {
                continue;
            };
            report.repositories_checked += 1;

            if let Err(err) = self.sweep_repository(&repository, &mut report).await {
                warn!(
                    repository_id = %repository.id,
                    "Skipping repository in snapshot sweep: {err}"
                );
            }
        }

        Ok(report)
    }

    async fn sweep_repository(
        &self,
        repository: &Repository,
        report: &mut SweepReport,
    ) -> Result<(), RepoError> {
        let now = Utc::now();

        let mut known: BTreeSet<String> = self
            .run_repo
            .known_snapshot_ids(&repository.user_id.0, &repository.id.0)
            .await?
            .into_iter()
            .map(|id| id.to_lowercase())
            .collect();

        let worker_ids = self
            .repository_repo
            .backup_worker_ids(&repository.id.0)
            .await?;

        for worker_id in worker_ids {
            let Some(worker) = self
                .worker_repo
                .get(&worker_id)
                .await?
                .and_then(|record| Worker::try_from(record).ok())
            else {
                continue;
            };
            if worker.endpoint.is_none() || worker.sync_token.is_none() || !worker.is_online(now) {
                continue;
            }

            // Synthesized runs need a plan to hang off; a pair without one
            // has never been orchestrated by us and is not reconciled.
            let Some(plan_record) = self
                .plan_repo
                .first_for_repository_worker(&repository.id.0, &worker_id)
                .await?
            else {
                debug!(
                    repository_id = %repository.id,
                    worker_id = %worker.id,
                    "No plan associates this repository and worker, skipping"
                );
                continue;
            };

            report.workers_queried += 1;

            let target = normalize_backend_options(
                repository.backend,
                &repository.path,
                &repository.id,
                &repository.options,
            );
            let request = RepositoryTargetRequest {
                backend: target.backend,
                options: target.options,
                repository: target.repository,
                password: repository.password.as_ref().map(|p| p.value.clone()),
            };

            let outcome = match self.worker_api.repository_snapshots(&worker, &request).await {
                Ok(outcome) if outcome.success() => outcome,
                Ok(outcome) => {
                    warn!(
                        worker_id = %worker.id,
                        status = outcome.http_status,
                        "Worker rejected snapshot listing"
                    );
                    continue;
                }
                Err(err) => {
                    warn!(worker_id = %worker.id, "Worker snapshot listing unreachable: {err}");
                    continue;
                }
            };

            for (raw, snapshot) in extract_snapshot_records(&outcome.body) {
                let normalized = snapshot.id.to_lowercase();
                if known.contains(&normalized) {
                    continue;
                }
                if short_id_matches(&known, &normalized) {
                    continue;
                }

                let instant = snapshot.time.unwrap_or(now);
                let run_record = RunRecord {
                    id: Uuid::new_v4(),
                    plan_id: plan_record.id,
                    user_id: repository.user_id.0,
                    repository_id: repository.id.0,
                    worker_id: Some(worker.id.0),
                    run_group_id: None,
                    run_type: RunType::Backup.to_string(),
                    status: RunStatus::Success.to_string(),
                    error: None,
                    duration_ms: None,
                    snapshot_id: Some(snapshot.id.clone()),
                    snapshot_time: snapshot.time,
                    output: Some(raw),
                    started_at: Some(instant),
                    finished_at: Some(instant),
                    created_at: now,
                };
                self.run_repo.insert(&run_record).await?;
                known.insert(normalized);

                if let Ok(run) = BackupRun::try_from(run_record) {
                    self.outcome_service.record_success(&run).await?;
                }

                prom::SWEEPER_IMPORTED_TOTAL.inc();
                report.imported_runs += 1;
            }
        }

        Ok(())
    }
}

/// True when any known id shares an 8-char prefix with the candidate, in
/// either direction. Deliberately coarse; distinct snapshots sharing a prefix
/// are folded together.
fn short_id_matches(known: &BTreeSet<String>, candidate: &str) -> bool {
    let candidate_prefix: String = candidate.chars().take(SHORT_ID_LEN).collect();
    known.iter().any(|existing| {
        let existing_prefix: String = existing.chars().take(SHORT_ID_LEN).collect();
        existing.starts_with(&candidate_prefix) || candidate.starts_with(&existing_prefix)
    })
}
