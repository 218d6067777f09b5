use crate::api::{ApiResult, ApiTags, UserTokenScheme, WorkerTokenScheme};
use crate::model::{
    ClaimRunsRequest, ClaimedRun, CompleteRunRequest, Empty, MaintenanceResult, LsDirsBody,
    PlanCatalogEntry, WorkerSyncRequest,
};
use crate::service::auth::{AuthService, WorkerAuthService};
use crate::service::maintenance::MaintenanceService;
use crate::service::runs::RunService;
use crate::service::worker_client::WorkerVerb;
use crate::service::workers::WorkerService;
use glare_common::model::{RunId, WorkerId};
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;
use std::sync::Arc;

/// Worker-facing surface: heartbeat, pull-mode catalog, claim and complete.
/// All calls authenticate with the worker's sync token.
pub struct WorkersApi {
    pub worker_auth_service: Arc<WorkerAuthService>,
    pub worker_service: Arc<WorkerService>,
    pub run_service: Arc<RunService>,
}

#[OpenApi(prefix_path = "/api/workers", tag = ApiTags::Worker)]
impl WorkersApi {
    /// Worker heartbeat: status, counters and the reachable endpoint
    #[oai(path = "/sync", method = "post", operation_id = "worker_sync")]
    async fn sync(
        &self,
        token: WorkerTokenScheme,
        body: Json<WorkerSyncRequest>,
    ) -> ApiResult<Json<Empty>> {
        let worker = self.worker_auth_service.authenticate(&token.0).await?;
        self.worker_service.sync(&worker, &body.0).await?;
        Ok(Json(Empty {}))
    }

    /// The enabled plans targeting the calling worker
    #[oai(
        path = "/backup-plans/sync",
        method = "post",
        operation_id = "worker_plan_catalog"
    )]
    async fn plan_catalog(
        &self,
        token: WorkerTokenScheme,
    ) -> ApiResult<Json<Vec<PlanCatalogEntry>>> {
        let worker = self.worker_auth_service.authenticate(&token.0).await?;
        let catalog = self.worker_service.plan_catalog(&worker).await?;
        Ok(Json(catalog))
    }

    /// Claim up to `limit` pending runs (at most 20)
    #[oai(
        path = "/backup-runs/claim",
        method = "post",
        operation_id = "claim_backup_runs"
    )]
    async fn claim(
        &self,
        token: WorkerTokenScheme,
        body: Json<ClaimRunsRequest>,
    ) -> ApiResult<Json<Vec<ClaimedRun>>> {
        let worker = self.worker_auth_service.authenticate(&token.0).await?;
        let claimed = self.run_service.claim(&worker, body.0.limit).await?;
        Ok(Json(claimed))
    }

    /// Report the terminal outcome of a claimed run
    #[oai(
        path = "/backup-runs/:run_id/complete",
        method = "post",
        operation_id = "complete_backup_run"
    )]
    async fn complete(
        &self,
        run_id: Path<RunId>,
        token: WorkerTokenScheme,
        body: Json<CompleteRunRequest>,
    ) -> ApiResult<Json<Empty>> {
        let worker = self.worker_auth_service.authenticate(&token.0).await?;
        self.run_service.complete(&worker, &run_id.0, body.0).await?;
        Ok(Json(Empty {}))
    }
}

/// Read-only and host-level worker passthroughs for the web surface.
pub struct WorkerProxyApi {
    pub auth_service: Arc<dyn AuthService>,
    pub maintenance_service: Arc<MaintenanceService>,
}

#[OpenApi(prefix_path = "/api/rustic/workers", tag = ApiTags::Worker)]
impl WorkerProxyApi {
    /// List directories on the worker host
    #[oai(path = "/:worker_id/ls-dirs", method = "post", operation_id = "worker_ls_dirs")]
    async fn ls_dirs(
        &self,
        worker_id: Path<WorkerId>,
        token: UserTokenScheme,
        body: Json<LsDirsBody>,
    ) -> ApiResult<Json<MaintenanceResult>> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        let outcome = self
            .maintenance_service
            .ls_dirs(&auth.user_id, &worker_id.0, &body.0.path)
            .await?;
        Ok(Json(MaintenanceResult {
            success: outcome.success(),
            output: outcome.body,
        }))
    }

    /// Worker tool version
    #[oai(path = "/:worker_id/version", method = "get", operation_id = "worker_version")]
    async fn version(
        &self,
        worker_id: Path<WorkerId>,
        token: UserTokenScheme,
    ) -> ApiResult<Json<MaintenanceResult>> {
        self.proxy(worker_id, token, WorkerVerb::Version).await
    }

    /// Snapshots cached on the worker
    #[oai(
        path = "/:worker_id/snapshots",
        method = "get",
        operation_id = "worker_snapshots"
    )]
    async fn snapshots(
        &self,
        worker_id: Path<WorkerId>,
        token: UserTokenScheme,
    ) -> ApiResult<Json<MaintenanceResult>> {
        self.proxy(worker_id, token, WorkerVerb::Snapshots).await
    }

    /// Worker tool statistics
    #[oai(path = "/:worker_id/stats", method = "get", operation_id = "worker_stats")]
    async fn stats(
        &self,
        worker_id: Path<WorkerId>,
        token: UserTokenScheme,
    ) -> ApiResult<Json<MaintenanceResult>> {
        self.proxy(worker_id, token, WorkerVerb::Stats).await
    }
}

impl WorkerProxyApi {
    async fn proxy(
        &self,
        worker_id: Path<WorkerId>,
        token: UserTokenScheme,
        verb: WorkerVerb,
    ) -> ApiResult<Json<MaintenanceResult>> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        let outcome = self
            .maintenance_service
            .worker_proxy(&auth.user_id, &worker_id.0, verb)
            .await?;
        Ok(Json(MaintenanceResult {
            success: outcome.success(),
            output: outcome.body,
        }))
    }
}
