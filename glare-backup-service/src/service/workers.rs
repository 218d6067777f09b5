use crate::model::{
    PlanCatalogEntry, PlanPathsConfig, Worker, WorkerStatus, WorkerSyncRequest,
};
use crate::repo::plan::PlanRepo;
use crate::repo::worker::{WorkerRepo, WorkerSyncUpdate};
use crate::repo::RepoError;
use crate::service::notify::NotificationService;
use crate::service::paths::resolve_worker_paths;
use chrono::Utc;
use glare_common::model::{PlanId, RepositoryId};
use glare_common::SafeDisplay;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum WorkerServiceError {
    #[error("Invalid worker status: {0}")]
    InvalidStatus(String),
    #[error(transparent)]
    InternalRepoError(#[from] RepoError),
}

impl SafeDisplay for WorkerServiceError {
    fn to_safe_string(&self) -> String {
        match self {
            WorkerServiceError::InvalidStatus(_) => self.to_string(),
            WorkerServiceError::InternalRepoError(inner) => inner.to_safe_string(),
        }
    }
}

/// Worker heartbeats and the pull-mode plan catalog.
pub struct WorkerService {
    worker_repo: Arc<dyn WorkerRepo>,
    plan_repo: Arc<dyn PlanRepo>,
    notification_service: Arc<dyn NotificationService>,
}

impl WorkerService {
    pub fn new(
        worker_repo: Arc<dyn WorkerRepo>,
        plan_repo: Arc<dyn PlanRepo>,
        notification_service: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            worker_repo,
            plan_repo,
            notification_service,
        }
    }

    /// Applies a heartbeat for the authenticated worker. Only `online` and
    /// `degraded` are acceptable self-reported states; `offline` is derived
    /// from heartbeat age, never reported.
    pub async fn sync(
        &self,
        worker: &Worker,
        request: &WorkerSyncRequest,
    ) -> Result<(), WorkerServiceError> {
        if request.status == WorkerStatus::Offline {
            return Err(WorkerServiceError::InvalidStatus(
                request.status.to_string(),
            ));
        }

        self.worker_repo
            .record_sync(
                &worker.id.0,
                &WorkerSyncUpdate {
                    status: request.status.to_string(),
                    endpoint: request.endpoint.clone(),
                    uptime_ms: request.uptime_ms,
                    requests_total: request.requests_total,
                    error_total: request.error_total,
                },
                Utc::now(),
            )
            .await?;

        if worker.status == WorkerStatus::Online && request.status == WorkerStatus::Degraded {
            self.notification_service
                .worker_health(worker, worker.status, request.status)
                .await;
        }

        debug!(worker_id = %worker.id, status = %request.status, "Worker heartbeat recorded");
        Ok(())
    }

    /// The enabled plans targeting the calling worker, with paths already
    /// resolved for it.
    pub async fn plan_catalog(
        &self,
        worker: &Worker,
    ) -> Result<Vec<PlanCatalogEntry>, WorkerServiceError> {
        let records = self.plan_repo.catalog_for_worker(&worker.id.0).await?;

        let mut catalog = Vec::with_capacity(records.len());
        for record in records {
            let paths: PlanPathsConfig =
                serde_json::from_value(record.paths.clone()).unwrap_or_default();
            let tags: Vec<String> =
                serde_json::from_value(record.tags.clone()).unwrap_or_default();
            catalog.push(PlanCatalogEntry {
                id: PlanId(record.id),
                name: record.name,
                repository_id: RepositoryId(record.repository_id),
                cron: record.cron,
                paths: resolve_worker_paths(&paths, &worker.id),
                tags,
                dry_run: record.dry_run,
                next_run_at: record.next_run_at,
            });
        }
        Ok(catalog)
    }
}
