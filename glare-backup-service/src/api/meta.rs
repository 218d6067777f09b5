use crate::api::{ApiResult, ApiTags};
use crate::model::SignupStatus;
use crate::service::signup::SignupStatusService;
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;
use std::sync::Arc;

pub struct MetaApi {
    pub signup_service: Arc<SignupStatusService>,
}

#[OpenApi(prefix_path = "/api/meta", tag = ApiTags::Meta)]
impl MetaApi {
    /// Whether new accounts can currently be created
    #[oai(
        path = "/signup-enabled",
        method = "get",
        operation_id = "signup_enabled"
    )]
    async fn signup_enabled(&self) -> ApiResult<Json<SignupStatus>> {
        let enabled = self.signup_service.signup_enabled().await?;
        Ok(Json(SignupStatus { enabled }))
    }
}
