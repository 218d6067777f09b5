use crate::model::{ErrorBody, ErrorsBody};
use crate::repo::RepoError;
use crate::service::auth::AuthError;
use crate::service::maintenance::MaintenanceError;
use crate::service::plans::PlanServiceError;
use crate::service::runs::RunServiceError;
use crate::service::sweeper::SweepError;
use crate::service::workers::WorkerServiceError;
use crate::service::Services;
use glare_common::model::TokenSecret;
use glare_common::SafeDisplay;
use poem::EndpointExt;
use poem::Route;
use poem_openapi::auth::Bearer;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, OpenApiService, SecurityScheme, Tags};

mod events;
mod healthcheck;
mod meta;
mod plan;
mod repository;
mod worker;

pub use events::EventStreamState;

#[derive(Tags)]
pub enum ApiTags {
    /// Worker-facing endpoints authenticated by the sync token
    Worker,
    /// Backup plan operations
    Plan,
    /// Repository insight and maintenance
    Repository,
    /// Service metadata
    Meta,
    Healthcheck,
}

/// Bearer carrying a worker sync token.
#[derive(SecurityScheme)]
#[oai(rename = "WorkerToken", ty = "bearer", checker = "worker_bearer_checker")]
pub struct WorkerTokenScheme(pub TokenSecret);

async fn worker_bearer_checker(_: &poem::Request, bearer: Bearer) -> Option<TokenSecret> {
    Some(TokenSecret::new(bearer.token))
}

/// Bearer carrying a user API token; session auth happens upstream.
#[derive(SecurityScheme)]
#[oai(rename = "UserToken", ty = "bearer", checker = "user_bearer_checker")]
pub struct UserTokenScheme(pub TokenSecret);

async fn user_bearer_checker(_: &poem::Request, bearer: Bearer) -> Option<TokenSecret> {
    Some(TokenSecret::new(bearer.token))
}

#[derive(ApiResponse, Debug, Clone)]
pub enum ApiError {
    /// Invalid request, returning with a list of issues detected in the request
    #[oai(status = 400)]
    BadRequest(Json<ErrorsBody>),
    /// Unauthorized request
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
    /// Entity not found
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),
    #[oai(status = 409)]
    Conflict(Json<ErrorBody>),
    /// Internal server error
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

impl ApiError {
    fn unauthorized(error: impl SafeDisplay) -> Self {
        ApiError::Unauthorized(Json(ErrorBody {
            error: error.to_safe_string(),
        }))
    }

    fn bad_request(error: impl SafeDisplay) -> Self {
        ApiError::BadRequest(Json(ErrorsBody {
            errors: vec![error.to_safe_string()],
        }))
    }

    fn not_found(error: impl SafeDisplay) -> Self {
        ApiError::NotFound(Json(ErrorBody {
            error: error.to_safe_string(),
        }))
    }

    fn conflict(error: impl SafeDisplay) -> Self {
        ApiError::Conflict(Json(ErrorBody {
            error: error.to_safe_string(),
        }))
    }

    fn internal(error: impl SafeDisplay) -> Self {
        ApiError::InternalError(Json(ErrorBody {
            error: error.to_safe_string(),
        }))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidToken => ApiError::unauthorized(value),
            AuthError::InternalRepoError(_) | AuthError::Internal(_) => ApiError::internal(value),
        }
    }
}

impl From<WorkerServiceError> for ApiError {
    fn from(value: WorkerServiceError) -> Self {
        match value {
            WorkerServiceError::InvalidStatus(_) => ApiError::bad_request(value),
            WorkerServiceError::InternalRepoError(_) => ApiError::internal(value),
        }
    }
}

impl From<RunServiceError> for ApiError {
    fn from(value: RunServiceError) -> Self {
        match value {
            RunServiceError::NotFound => ApiError::not_found(value),
            RunServiceError::InvalidStatus(_) => ApiError::bad_request(value),
            RunServiceError::Internal(_) | RunServiceError::InternalRepoError(_) => {
                ApiError::internal(value)
            }
        }
    }
}

impl From<PlanServiceError> for ApiError {
    fn from(value: PlanServiceError) -> Self {
        match value {
            PlanServiceError::NotFound => ApiError::not_found(value),
            PlanServiceError::LeaseConflict => ApiError::conflict(value),
            PlanServiceError::TooManyIds => ApiError::bad_request(value),
            PlanServiceError::Internal(_) | PlanServiceError::InternalRepoError(_) => {
                ApiError::internal(value)
            }
        }
    }
}

impl From<SweepError> for ApiError {
    fn from(value: SweepError) -> Self {
        match value {
            SweepError::Debounced => ApiError::conflict(value),
            SweepError::InternalRepoError(_) => ApiError::internal(value),
        }
    }
}

impl From<MaintenanceError> for ApiError {
    fn from(value: MaintenanceError) -> Self {
        match value {
            MaintenanceError::RepositoryNotFound | MaintenanceError::WorkerNotFound => {
                ApiError::not_found(value)
            }
            MaintenanceError::NoWorkerAvailable => ApiError::conflict(value),
            MaintenanceError::WorkerCall(_)
            | MaintenanceError::Internal(_)
            | MaintenanceError::InternalRepoError(_) => ApiError::internal(value),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(value: RepoError) -> Self {
        ApiError::internal(value)
    }
}

pub type Apis = (
    healthcheck::HealthcheckApi,
    worker::WorkersApi,
    worker::WorkerProxyApi,
    plan::PlansApi,
    repository::RepositoriesApi,
    meta::MetaApi,
);

pub fn make_open_api_service(services: &Services) -> OpenApiService<Apis, ()> {
    OpenApiService::new(
        (
            healthcheck::HealthcheckApi,
            worker::WorkersApi {
                worker_auth_service: services.worker_auth_service.clone(),
                worker_service: services.worker_service.clone(),
                run_service: services.run_service.clone(),
            },
            worker::WorkerProxyApi {
                auth_service: services.auth_service.clone(),
                maintenance_service: services.maintenance_service.clone(),
            },
            plan::PlansApi {
                auth_service: services.auth_service.clone(),
                plan_service: services.plan_service.clone(),
            },
            repository::RepositoriesApi {
                auth_service: services.auth_service.clone(),
                attribution_service: services.attribution_service.clone(),
                maintenance_service: services.maintenance_service.clone(),
                sweeper: services.sweeper.clone(),
            },
            meta::MetaApi {
                signup_service: services.signup_service.clone(),
            },
        ),
        "Glare Backup API",
        glare_common::VERSION,
    )
}

pub fn combined_routes(services: &Services) -> Route {
    let api_service = make_open_api_service(services);
    let ui = api_service.swagger_ui();
    let spec = api_service.spec_endpoint_yaml();

    let event_stream_state = EventStreamState {
        auth_service: services.auth_service.clone(),
        event_repo: services.event_repo.clone(),
        registry: services.event_stream_registry.clone(),
    };

    Route::new()
        .at(
            "/api/events/stream",
            poem::get(events::event_stream.data(event_stream_state)),
        )
        .nest("/docs", ui)
        .nest("/specs", spec)
        .nest("/", api_service)
}
