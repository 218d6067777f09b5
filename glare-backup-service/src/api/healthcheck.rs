use crate::api::ApiTags;
use crate::model::{HealthcheckResponse, VersionInfo};
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;

pub struct HealthcheckApi;

#[OpenApi(tag = ApiTags::Healthcheck)]
impl HealthcheckApi {
    #[oai(path = "/healthcheck", method = "get", operation_id = "healthcheck")]
    async fn healthcheck(&self) -> Json<HealthcheckResponse> {
        Json(HealthcheckResponse {})
    }

    #[oai(path = "/version", method = "get", operation_id = "version")]
    async fn version(&self) -> Json<VersionInfo> {
        Json(VersionInfo {
            version: glare_common::VERSION.to_string(),
        })
    }
}
