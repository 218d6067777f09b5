use crate::api::{ApiResult, ApiTags, UserTokenScheme};
use crate::model::{
    MaintenanceResult, RestoreBody, SnapshotExecution, SnapshotFilesBody, SweepReport,
};
use crate::service::attribution::AttributionService;
use crate::service::auth::AuthService;
use crate::service::maintenance::MaintenanceService;
use crate::service::sweeper::SnapshotSweeper;
use crate::service::worker_client::WorkerCallOutcome;
use glare_common::model::RepositoryId;
use poem_openapi::param::{Path, Query};
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;
use std::sync::Arc;

pub struct RepositoriesApi {
    pub auth_service: Arc<dyn AuthService>,
    pub attribution_service: Arc<AttributionService>,
    pub maintenance_service: Arc<MaintenanceService>,
    pub sweeper: Arc<SnapshotSweeper>,
}

fn maintenance_result(outcome: WorkerCallOutcome) -> Json<MaintenanceResult> {
    Json(MaintenanceResult {
        success: outcome.success(),
        output: outcome.body,
    })
}

#[OpenApi(prefix_path = "/api/rustic/repositories", tag = ApiTags::Repository)]
impl RepositoriesApi {
    /// Which workers produced which logical snapshot, newest first
    #[oai(
        path = "/:repository_id/snapshot-executions",
        method = "get",
        operation_id = "snapshot_executions"
    )]
    async fn snapshot_executions(
        &self,
        repository_id: Path<RepositoryId>,
        token: UserTokenScheme,
    ) -> ApiResult<Json<Vec<SnapshotExecution>>> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        let executions = self
            .attribution_service
            .snapshot_executions(&auth.user_id, &repository_id.0)
            .await?;
        Ok(Json(executions))
    }

    /// Pull snapshot lists from online workers and import any snapshot the
    /// control plane has never seen. Debounced per user unless forced.
    #[oai(
        path = "/sync-snapshots",
        method = "post",
        operation_id = "sync_snapshots"
    )]
    async fn sync_snapshots(
        &self,
        token: UserTokenScheme,
        force: Query<Option<bool>>,
    ) -> ApiResult<Json<SweepReport>> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        let report = self
            .sweeper
            .sweep_user(&auth.user_id, force.0.unwrap_or(false))
            .await?;
        Ok(Json(report))
    }

    /// Initialize the repository through one of its workers
    #[oai(path = "/:repository_id/init", method = "post", operation_id = "init_repository")]
    async fn init(
        &self,
        repository_id: Path<RepositoryId>,
        token: UserTokenScheme,
    ) -> ApiResult<Json<MaintenanceResult>> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        let outcome = self
            .maintenance_service
            .init(&auth.user_id, &repository_id.0)
            .await?;
        Ok(maintenance_result(outcome))
    }

    /// Run a consistency check on the repository
    #[oai(path = "/:repository_id/check", method = "post", operation_id = "check_repository")]
    async fn check(
        &self,
        repository_id: Path<RepositoryId>,
        token: UserTokenScheme,
    ) -> ApiResult<Json<MaintenanceResult>> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        let outcome = self
            .maintenance_service
            .check(&auth.user_id, &repository_id.0)
            .await?;
        Ok(maintenance_result(outcome))
    }

    /// Repair the repository index
    #[oai(
        path = "/:repository_id/repair-index",
        method = "post",
        operation_id = "repair_repository_index"
    )]
    async fn repair_index(
        &self,
        repository_id: Path<RepositoryId>,
        token: UserTokenScheme,
    ) -> ApiResult<Json<MaintenanceResult>> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        let outcome = self
            .maintenance_service
            .repair_index(&auth.user_id, &repository_id.0)
            .await?;
        Ok(maintenance_result(outcome))
    }

    /// Restore a snapshot to a target path on the worker host
    #[oai(
        path = "/:repository_id/restore",
        method = "post",
        operation_id = "restore_snapshot"
    )]
    async fn restore(
        &self,
        repository_id: Path<RepositoryId>,
        token: UserTokenScheme,
        body: Json<RestoreBody>,
    ) -> ApiResult<Json<MaintenanceResult>> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        let outcome = self
            .maintenance_service
            .restore(
                &auth.user_id,
                &repository_id.0,
                &body.0.snapshot_id,
                &body.0.target_path,
            )
            .await?;
        Ok(maintenance_result(outcome))
    }

    /// List the files of one snapshot
    #[oai(
        path = "/:repository_id/snapshot-files",
        method = "post",
        operation_id = "snapshot_files"
    )]
    async fn snapshot_files(
        &self,
        repository_id: Path<RepositoryId>,
        token: UserTokenScheme,
        body: Json<SnapshotFilesBody>,
    ) -> ApiResult<Json<MaintenanceResult>> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        let outcome = self
            .maintenance_service
            .snapshot_files(&auth.user_id, &repository_id.0, &body.0.snapshot_id)
            .await?;
        Ok(maintenance_result(outcome))
    }

    /// Probe the storage size of an rclone-backed repository
    #[oai(path = "/:repository_id/size", method = "post", operation_id = "repository_size")]
    async fn size(
        &self,
        repository_id: Path<RepositoryId>,
        token: UserTokenScheme,
    ) -> ApiResult<Json<MaintenanceResult>> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        let outcome = self
            .maintenance_service
            .rclone_size(&auth.user_id, &repository_id.0)
            .await?;
        Ok(maintenance_result(outcome))
    }
}
