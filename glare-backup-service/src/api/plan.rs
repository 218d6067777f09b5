use crate::api::{ApiError, ApiResult, ApiTags, UserTokenScheme};
use crate::model::{BulkPlanRequest, BulkPlanResult};
use crate::service::auth::AuthService;
use crate::service::plans::PlanService;
use glare_common::model::PlanId;
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, OpenApi};
use std::sync::Arc;

#[derive(ApiResponse)]
pub enum RunNowResponse {
    /// The fire was accepted and runs in the background
    #[oai(status = 202)]
    Accepted,
}

pub struct PlansApi {
    pub auth_service: Arc<dyn AuthService>,
    pub plan_service: Arc<PlanService>,
}

#[OpenApi(prefix_path = "/api/rustic/plans", tag = ApiTags::Plan)]
impl PlansApi {
    /// Fire a plan immediately. Conflicts (409) while another dispatcher
    /// holds the plan lease.
    #[oai(path = "/:plan_id/run", method = "post", operation_id = "run_plan_now")]
    async fn run_now(
        &self,
        plan_id: Path<PlanId>,
        token: UserTokenScheme,
    ) -> Result<RunNowResponse, ApiError> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        self.plan_service.run_now(&auth.user_id, &plan_id.0).await?;
        Ok(RunNowResponse::Accepted)
    }

    /// Trigger, pause, resume or delete up to 200 plans in one call
    #[oai(path = "/bulk", method = "post", operation_id = "bulk_plan_action")]
    async fn bulk(
        &self,
        token: UserTokenScheme,
        body: Json<BulkPlanRequest>,
    ) -> ApiResult<Json<Vec<BulkPlanResult>>> {
        let auth = self.auth_service.authenticate(&token.0).await?;
        let results = self.plan_service.bulk(&auth.user_id, &body.0).await?;
        Ok(Json(results))
    }
}
