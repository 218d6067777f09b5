use crate::model::{Repository, Worker};
use crate::repo::repository::RepositoryRepo;
use crate::repo::worker::WorkerRepo;
use crate::repo::RepoError;
use crate::service::options::normalize_backend_options;
use crate::service::worker_client::{
    RepositoryTargetRequest, WorkerApi, WorkerCallError, WorkerCallOutcome, WorkerVerb,
};
use chrono::Utc;
use glare_common::model::{RepositoryId, UserId, WorkerId};
use glare_common::SafeDisplay;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("Repository not found")]
    RepositoryNotFound,
    #[error("Worker not found")]
    WorkerNotFound,
    #[error("No reachable worker is attached to the repository")]
    NoWorkerAvailable,
    #[error(transparent)]
    WorkerCall(#[from] WorkerCallError),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    InternalRepoError(#[from] RepoError),
}

impl SafeDisplay for MaintenanceError {
    fn to_safe_string(&self) -> String {
        match self {
            MaintenanceError::RepositoryNotFound
            | MaintenanceError::WorkerNotFound
            | MaintenanceError::NoWorkerAvailable => self.to_string(),
            MaintenanceError::WorkerCall(inner) => inner.to_safe_string(),
            MaintenanceError::Internal(_) => "Internal error".to_string(),
            MaintenanceError::InternalRepoError(inner) => inner.to_safe_string(),
        }
    }
}

/// Repository and worker maintenance verbs forwarded to the worker tool,
/// through the same option normalization as dispatch.
pub struct MaintenanceService {
    repository_repo: Arc<dyn RepositoryRepo>,
    worker_repo: Arc<dyn WorkerRepo>,
    worker_api: Arc<dyn WorkerApi>,
}

impl MaintenanceService {
    pub fn new(
        repository_repo: Arc<dyn RepositoryRepo>,
        worker_repo: Arc<dyn WorkerRepo>,
        worker_api: Arc<dyn WorkerApi>,
    ) -> Self {
        Self {
            repository_repo,
            worker_repo,
            worker_api,
        }
    }

    pub async fn init(
        &self,
        user_id: &UserId,
        repository_id: &RepositoryId,
    ) -> Result<WorkerCallOutcome, MaintenanceError> {
        let outcome = self
            .repository_call(user_id, repository_id, WorkerVerb::Init, json!({}))
            .await?;
        if outcome.success() {
            self.repository_repo
                .set_initialized(&repository_id.0, Utc::now())
                .await?;
        }
        Ok(outcome)
    }

    pub async fn check(
        &self,
        user_id: &UserId,
        repository_id: &RepositoryId,
    ) -> Result<WorkerCallOutcome, MaintenanceError> {
        self.repository_call(user_id, repository_id, WorkerVerb::Check, json!({}))
            .await
    }

    pub async fn repair_index(
        &self,
        user_id: &UserId,
        repository_id: &RepositoryId,
    ) -> Result<WorkerCallOutcome, MaintenanceError> {
        self.repository_call(user_id, repository_id, WorkerVerb::RepairIndex, json!({}))
            .await
    }

    pub async fn restore(
        &self,
        user_id: &UserId,
        repository_id: &RepositoryId,
        snapshot_id: &str,
        target_path: &str,
    ) -> Result<WorkerCallOutcome, MaintenanceError> {
        self.repository_call(
            user_id,
            repository_id,
            WorkerVerb::Restore,
            json!({ "snapshotId": snapshot_id, "targetPath": target_path }),
        )
        .await
    }

    pub async fn snapshot_files(
        &self,
        user_id: &UserId,
        repository_id: &RepositoryId,
        snapshot_id: &str,
    ) -> Result<WorkerCallOutcome, MaintenanceError> {
        self.repository_call(
            user_id,
            repository_id,
            WorkerVerb::SnapshotFiles,
            json!({ "snapshotId": snapshot_id }),
        )
        .await
    }

    pub async fn rclone_size(
        &self,
        user_id: &UserId,
        repository_id: &RepositoryId,
    ) -> Result<WorkerCallOutcome, MaintenanceError> {
        self.repository_call(user_id, repository_id, WorkerVerb::RcloneSize, json!({}))
            .await
    }

    pub async fn ls_dirs(
        &self,
        user_id: &UserId,
        worker_id: &WorkerId,
        path: &str,
    ) -> Result<WorkerCallOutcome, MaintenanceError> {
        let worker = self.load_worker(user_id, worker_id).await?;
        self.worker_api
            .call(&worker, WorkerVerb::LsDirs, json!({ "path": path }))
            .await
            .map_err(Into::into)
    }

    pub async fn worker_proxy(
        &self,
        user_id: &UserId,
        worker_id: &WorkerId,
        verb: WorkerVerb,
    ) -> Result<WorkerCallOutcome, MaintenanceError> {
        let worker = self.load_worker(user_id, worker_id).await?;
        self.worker_api
            .call(&worker, verb, Value::Null)
            .await
            .map_err(Into::into)
    }

    async fn repository_call(
        &self,
        user_id: &UserId,
        repository_id: &RepositoryId,
        verb: WorkerVerb,
        extra: Value,
    ) -> Result<WorkerCallOutcome, MaintenanceError> {
        let (repository, worker) = self.load_target(user_id, repository_id).await?;

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

        let mut body = serde_json::to_value(&request)
            .map_err(|e| MaintenanceError::Internal(e.to_string()))?;
        if let (Value::Object(body_map), Value::Object(extra_map)) = (&mut body, extra) {
            body_map.extend(extra_map);
        }

        self.worker_api
            .call(&worker, verb, body)
            .await
            .map_err(Into::into)
    }

    async fn load_target(
        &self,
        user_id: &UserId,
        repository_id: &RepositoryId,
    ) -> Result<(Repository, Worker), MaintenanceError> {
        let repository = self
            .repository_repo
            .get(&repository_id.0)
            .await?
            .and_then(|record| Repository::try_from(record).ok())
            .filter(|repository| repository.user_id == *user_id)
            .ok_or(MaintenanceError::RepositoryNotFound)?;

        let mut candidates: Vec<Uuid> = Vec::new();
        candidates.extend(repository.primary_worker_id.map(|w| w.0));
        candidates.extend(
            self.repository_repo
                .backup_worker_ids(&repository.id.0)
                .await?,
        );

        let now = Utc::now();
        for candidate in candidates {
            if let Some(worker) = self
                .worker_repo
                .get(&candidate)
                .await?
                .and_then(|record| Worker::try_from(record).ok())
            {
                if worker.endpoint.is_some() && worker.sync_token.is_some() && worker.is_online(now)
                {
                    return Ok((repository, worker));
                }
            }
        }

        Err(MaintenanceError::NoWorkerAvailable)
    }

    async fn load_worker(
        &self,
        user_id: &UserId,
        worker_id: &WorkerId,
    ) -> Result<Worker, MaintenanceError> {
        self.worker_repo
            .get(&worker_id.0)
            .await?
            .and_then(|record| Worker::try_from(record).ok())
            .filter(|worker| worker.user_id == *user_id)
            .ok_or(MaintenanceError::WorkerNotFound)
    }
}
